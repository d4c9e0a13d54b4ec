//! Error types for archive builds.
//!
//! All errors use thiserror for consistent error handling across the codebase.

use std::path::PathBuf;

use pharbox_compactor::CompactorError;
use pharbox_crypto::CryptoError;
use pharbox_formats::phar::PharError;
use thiserror::Error;

/// Build result type
pub type BuildResult<T> = Result<T, BuildError>;

/// Errors raised while building an archive.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Buffering operations called out of order
    #[error("Invalid builder state: {0}")]
    State(String),

    /// I/O failure on a known path
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// One or more files of a parallel batch failed
    #[error(
        "Failed to process {failed} file(s) in parallel, {} distinct error(s):\n - {}\n\
         Run the build again with --no-parallel to process the files sequentially",
        messages.len(),
        messages.join("\n - ")
    )]
    Aggregate {
        /// Number of files that failed
        failed: usize,
        /// Distinct failure messages, in first-seen order
        messages: Vec<String>,
    },

    /// A capability was not compiled in
    #[error("{capability} is not available: {remediation}")]
    Unsupported {
        /// Missing capability
        capability: String,
        /// How to get it
        remediation: String,
    },

    /// Compression ran out of file descriptors
    #[error(
        "Cannot compress the archive: too many open files for its {count} entries. \
         Raise the open file limit above {count}, for example with `ulimit -Sn {}`",
        count + 128
    )]
    TooManyOpenFiles {
        /// Entries in the archive
        count: usize,
    },

    /// Something other than a regular file sits where the public key goes
    #[error("Cannot write the public key to {}: the path exists and is not a regular file", .0.display())]
    PublicKeyPath(PathBuf),

    /// Composer invocation failed
    #[error("Composer failed: {0}")]
    Composer(String),

    /// Archive container error
    #[error(transparent)]
    Phar(#[from] PharError),

    /// Compactor error
    #[error(transparent)]
    Compactor(#[from] CompactorError),

    /// Key or signing error
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Invalid JSON in a Composer file
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Directory traversal error
    #[error("Directory traversal error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Worker pool could not be created
    #[error("Failed to start the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BuildError {
    /// Attach a path to an I/O error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Aggregate error with duplicate messages removed
    pub fn aggregate<I>(messages: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut failed = 0;
        let mut distinct: Vec<String> = Vec::new();
        for message in messages {
            failed += 1;
            if !distinct.contains(&message) {
                distinct.push(message);
            }
        }
        Self::Aggregate {
            failed,
            messages: distinct,
        }
    }

    /// Check for buffering misuse
    pub const fn is_state_error(&self) -> bool {
        matches!(self, Self::State(_))
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read configuration from {}: {source}", path.display())]
    Read {
        /// Configuration file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON for the schema
    #[error("Invalid configuration in {}: {source}", path.display())]
    Parse {
        /// Configuration file
        path: PathBuf,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// A setting has an unusable value
    #[error("Invalid value for \"{key}\": {reason}")]
    InvalidValue {
        /// Setting name
        key: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// A referenced file does not exist
    #[error("The {what} {} does not exist", path.display())]
    MissingFile {
        /// What the file is for
        what: &'static str,
        /// Resolved path
        path: PathBuf,
    },
}
