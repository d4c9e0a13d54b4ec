//! JSON minification

use tracing::debug;

use crate::compactor::{Compactor, Extensions};
use crate::error::CompactorResult;

/// Re-encodes JSON files without insignificant whitespace
///
/// Files that do not parse are left untouched.
#[derive(Debug, Clone)]
pub struct Json {
    extensions: Extensions,
}

impl Default for Json {
    fn default() -> Self {
        Self::new(Extensions::new(["json", "lock"]))
    }
}

impl Json {
    /// Minifier for the given extensions
    pub fn new(extensions: Extensions) -> Self {
        Self { extensions }
    }
}

impl Compactor for Json {
    fn name(&self) -> &'static str {
        "json"
    }

    fn supports(&self, path: &str) -> bool {
        self.extensions.matches(path)
    }

    fn compact(&self, path: &str, contents: &str) -> CompactorResult<String> {
        match serde_json::from_str::<serde_json::Value>(contents) {
            Ok(value) => Ok(value.to_string()),
            Err(e) => {
                debug!("Leaving {path} as-is, not valid JSON: {e}");
                Ok(contents.to_string())
            }
        }
    }
}
