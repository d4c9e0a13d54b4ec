//! Content transforms for PHAR builds
//!
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::missing_errors_doc)] // Errors are documented on CompactorError
#![allow(clippy::doc_markdown)] // PHP names don't need backticks
//! Files added to an archive pass through a chain of compactors before they
//! are stored. This crate provides the chain and its standard members:
//!
//! - **Placeholder**: replaces configured tokens such as `@version@`
//! - **Php**: strips comments and redundant whitespace, keeping line numbers
//! - **Json**: re-encodes JSON without insignificant whitespace
//! - **PhpScoper**: moves namespaced code under a prefix and records the
//!   renamed symbols in a [`SymbolsRegistry`]
//!
//! It also provides [`MapFile`], which maps source paths to archive paths.
//!
//! # Examples
//!
//! ```
//! use pharbox_compactor::{Compactors, Placeholder};
//! use serde_json::json;
//!
//! let placeholder = Placeholder::from_json(&json!({"@version@": "1.2.0"}))?;
//! let chain = Compactors::from_names(&["Php"], "_PhpScoperDemo")?.with_placeholder(placeholder);
//!
//! let compacted = chain.compact("src/version.php", "<?php\n// version\nreturn '@version@';")?;
//! assert_eq!(compacted, "<?php\n\nreturn '1.2.0';");
//! # Ok::<(), pharbox_compactor::CompactorError>(())
//! ```

#![warn(missing_docs)]

pub mod compactor;
pub mod error;
pub mod json;
pub mod map_file;
pub mod php;
pub mod placeholder;
pub mod registry;
pub mod scoper;

pub use compactor::{Compactor, Compactors, Extensions};
pub use error::{CompactorError, CompactorResult};
pub use json::Json;
pub use map_file::MapFile;
pub use php::Php;
pub use placeholder::Placeholder;
pub use registry::SymbolsRegistry;
pub use scoper::{NamespaceScoper, PhpScoper, Scoper};
