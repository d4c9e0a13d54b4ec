//! Error types for compaction

use thiserror::Error;

/// Compaction result type
pub type CompactorResult<T> = Result<T, CompactorError>;

/// Errors raised while configuring or running compactors
#[derive(Debug, Error)]
pub enum CompactorError {
    /// Placeholder value cannot be turned into a string
    #[error(
        "Invalid placeholder value for {key:?}: expected a string, number or boolean, got {kind}"
    )]
    InvalidPlaceholder {
        /// Placeholder token
        key: String,
        /// JSON type of the rejected value
        kind: &'static str,
    },

    /// Compactor name not recognised
    #[error("Unknown compactor {0:?} (expected Php, Json or PhpScoper)")]
    UnknownCompactor(String),

    /// Scoper prefix is not a valid namespace
    #[error("Invalid scoper prefix {0:?}: expected a PHP namespace such as \"_PhpScoper1a2b3c\"")]
    InvalidPrefix(String),

    /// Source could not be compacted
    #[error("Failed to compact {path}: {reason}")]
    Compaction {
        /// File being compacted
        path: String,
        /// What went wrong
        reason: String,
    },

    /// Pattern compilation error
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl CompactorError {
    /// Build a compaction error for `path`
    pub fn compaction(path: &str, reason: impl Into<String>) -> Self {
        Self::Compaction {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_error_names_key_and_kind() {
        let err = CompactorError::InvalidPlaceholder {
            key: "@config@".to_string(),
            kind: "object",
        };
        let message = err.to_string();
        assert!(message.contains("\"@config@\""));
        assert!(message.contains("got object"));
    }

    #[test]
    fn test_compaction_error_names_path() {
        let err = CompactorError::compaction("src/Kernel.php", "unterminated heredoc");
        assert_eq!(
            err.to_string(),
            "Failed to compact src/Kernel.php: unterminated heredoc"
        );
    }
}
