//! PHAR archive builder.
//!
//! This crate packages a PHP application and its dependencies into a single
//! self-contained PHAR archive:
//! - `archive_builder`: buffering session, staging directory commit,
//!   compression and signing
//! - `parallel`: compaction of file batches on a bounded worker pool
//! - `composer`: Composer files and autoloader regeneration
//! - `requirements`: runtime requirements checker embedded in the archive
//! - `stub`: bootstrap stub generation
//! - `config`: `box.json` loading and validation
//! - `compile`: the end-to-end build
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use pharbox::{ArchiveBuilder, Compactors};
//! use serde_json::json;
//!
//! fn main() -> Result<(), pharbox::BuildError> {
//!     let mut builder = ArchiveBuilder::create("build/app.phar", "app.phar")?;
//!     builder.register_placeholders(&json!({"@version@": "1.0.0"}))?;
//!     builder.register_compactors(&Compactors::from_names(&["Php", "Json"], "_App")?);
//!
//!     builder.start_buffering()?;
//!     builder.add_file(Path::new("src/Kernel.php"), None, false)?;
//!     builder.add_file(Path::new("res/logo.png"), None, true)?;
//!     builder.end_buffering()?;
//!
//!     builder.sign_using_file(Path::new("private.pem"), None)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod archive_builder;
pub mod compile;
pub mod composer;
pub mod config;
pub mod error;
pub mod parallel;
pub mod requirements;
pub mod stub;

pub use archive_builder::{ArchiveBuilder, EMPTY_ARCHIVE_ENTRY};
pub use compile::{CompileReport, compile};
pub use composer::{ComposerFiles, ComposerOrchestrator, ProcessComposer};
pub use config::{BuildConfig, ConfigFile, Signing, StubSource};
pub use error::{BuildError, BuildResult, ConfigError};
pub use parallel::{DEFAULT_WORKER_LIMIT, TaskContext};
pub use requirements::Requirement;
pub use stub::StubGenerator;

pub use pharbox_compactor::{Compactors, MapFile, SymbolsRegistry};
pub use pharbox_formats::phar::CompressionAlgorithm;
