//! Placeholder substitution

use regex::bytes::{NoExpand, Regex};
use serde_json::Value;

use crate::compactor::Compactor;
use crate::error::{CompactorError, CompactorResult};

/// Replaces literal tokens with configured values in every file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placeholder {
    replacements: Vec<(String, String)>,
}

impl Placeholder {
    /// Placeholder from already-stringified pairs, applied in order
    pub fn new(replacements: Vec<(String, String)>) -> Self {
        Self { replacements }
    }

    /// Placeholder from a JSON object of token to scalar value
    ///
    /// Booleans convert the way PHP casts them to string: `true` becomes
    /// `"1"`, `false` the empty string.
    pub fn from_json(map: &Value) -> CompactorResult<Self> {
        let Value::Object(map) = map else {
            return Err(CompactorError::InvalidPlaceholder {
                key: String::new(),
                kind: json_kind(map),
            });
        };

        let replacements = map
            .iter()
            .map(|(key, value)| Ok((key.clone(), stringify(key, value)?)))
            .collect::<CompactorResult<Vec<_>>>()?;

        Ok(Self { replacements })
    }

    /// Configured (token, value) pairs
    pub fn replacements(&self) -> &[(String, String)] {
        &self.replacements
    }

    /// Substitute every token in `contents`
    pub fn replace(&self, contents: &str) -> String {
        self.replacements
            .iter()
            .fold(contents.to_string(), |acc, (token, value)| {
                if token.is_empty() {
                    acc
                } else {
                    acc.replace(token.as_str(), value)
                }
            })
    }

    /// Substitute every token in raw `contents`, whatever their encoding
    pub fn replace_bytes(&self, contents: &[u8]) -> CompactorResult<Vec<u8>> {
        let mut current = contents.to_vec();
        for (token, value) in &self.replacements {
            if token.is_empty() {
                continue;
            }
            let pattern = Regex::new(&regex::escape(token))?;
            current = pattern
                .replace_all(&current, NoExpand(value.as_bytes()))
                .into_owned();
        }
        Ok(current)
    }
}

impl Compactor for Placeholder {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    fn supports(&self, _path: &str) -> bool {
        true
    }

    fn compact(&self, _path: &str, contents: &str) -> CompactorResult<String> {
        Ok(self.replace(contents))
    }

    fn compact_bytes(&self, _path: &str, contents: &[u8]) -> CompactorResult<Vec<u8>> {
        self.replace_bytes(contents)
    }

    fn is_placeholder(&self) -> bool {
        true
    }
}

fn stringify(key: &str, value: &Value) -> CompactorResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(true) => Ok("1".to_string()),
        Value::Bool(false) => Ok(String::new()),
        Value::Null | Value::Array(_) | Value::Object(_) => {
            Err(CompactorError::InvalidPlaceholder {
                key: key.to_string(),
                kind: json_kind(value),
            })
        }
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
