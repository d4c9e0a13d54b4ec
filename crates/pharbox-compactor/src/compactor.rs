//! Compactor trait and ordered compactor chain

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{CompactorError, CompactorResult};
use crate::json::Json;
use crate::php::Php;
use crate::placeholder::Placeholder;
use crate::scoper::{NamespaceScoper, PhpScoper, Scoper};

/// Content transform applied to files added to an archive
///
/// Implementations must be usable from several worker threads at once.
/// A compactor that does not support a path is skipped by the chain, so
/// `compact` is only called for supported paths.
pub trait Compactor: Send + Sync + fmt::Debug {
    /// Short name used in logs and configuration
    fn name(&self) -> &'static str;

    /// Check whether this compactor applies to `path`
    fn supports(&self, path: &str) -> bool;

    /// Transform `contents` of the file at `path`
    fn compact(&self, path: &str, contents: &str) -> CompactorResult<String>;

    /// Transform raw `contents` of the file at `path`
    ///
    /// Text compactors leave contents that are not UTF-8 untouched.
    fn compact_bytes(&self, path: &str, contents: &[u8]) -> CompactorResult<Vec<u8>> {
        match std::str::from_utf8(contents) {
            Ok(text) => Ok(self.compact(path, text)?.into_bytes()),
            Err(_) => {
                debug!("{} skips {path}, contents are not UTF-8", self.name());
                Ok(contents.to_vec())
            }
        }
    }

    /// The scoper behind a symbol-scoping compactor
    fn as_scoper(&self) -> Option<&dyn Scoper> {
        None
    }

    /// Check whether this is the placeholder compactor
    fn is_placeholder(&self) -> bool {
        false
    }

    /// Copy with its own mutable state, for use on a worker
    ///
    /// Stateless compactors return `None` and are shared as-is.
    fn fork(&self) -> Option<Arc<dyn Compactor>> {
        None
    }
}

/// File extension filter shared by the text compactors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extensions(Vec<String>);

impl Extensions {
    /// Filter accepting the given extensions (without the dot)
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            extensions
                .into_iter()
                .map(|e| e.into().to_ascii_lowercase())
                .collect(),
        )
    }

    /// Check the extension of `path`, case-insensitive
    pub fn matches(&self, path: &str) -> bool {
        let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        file_name.rsplit_once('.').is_some_and(|(stem, extension)| {
            !stem.is_empty() && self.0.iter().any(|e| e.eq_ignore_ascii_case(extension))
        })
    }
}

/// Ordered compactor chain
///
/// Each compactor that supports a path is applied in order, the output of one
/// feeding the next.
#[derive(Debug, Clone, Default)]
pub struct Compactors {
    compactors: Vec<Arc<dyn Compactor>>,
}

impl Compactors {
    /// Chain from an ordered list
    pub fn new(compactors: Vec<Arc<dyn Compactor>>) -> Self {
        Self { compactors }
    }

    /// Build a chain from configuration names
    ///
    /// Accepts short names (`Php`, `Json`, `PhpScoper`) as well as fully
    /// qualified class names whose last segment is one of them.
    pub fn from_names<S: AsRef<str>>(names: &[S], scoper_prefix: &str) -> CompactorResult<Self> {
        Self::from_names_excluding(names, scoper_prefix, &[] as &[&str])
    }

    /// Build a chain from configuration names, with namespaces the scoper
    /// leaves unprefixed
    pub fn from_names_excluding<S: AsRef<str>, E: AsRef<str>>(
        names: &[S],
        scoper_prefix: &str,
        excluded_namespaces: &[E],
    ) -> CompactorResult<Self> {
        let mut compactors: Vec<Arc<dyn Compactor>> = Vec::with_capacity(names.len());

        for name in names {
            let name = name.as_ref();
            let short = name.rsplit('\\').next().unwrap_or(name);
            let compactor: Arc<dyn Compactor> = match short.to_ascii_lowercase().as_str() {
                "php" => Arc::new(Php::default()),
                "json" => Arc::new(Json::default()),
                "phpscoper" => {
                    let scoper = NamespaceScoper::new(scoper_prefix)?.with_excluded_namespaces(
                        excluded_namespaces.iter().map(|ns| ns.as_ref().to_string()),
                    );
                    Arc::new(PhpScoper::new(Arc::new(scoper)))
                }
                _ => return Err(CompactorError::UnknownCompactor(name.to_string())),
            };
            compactors.push(compactor);
        }

        Ok(Self { compactors })
    }

    /// Append a compactor
    pub fn push(&mut self, compactor: Arc<dyn Compactor>) {
        self.compactors.push(compactor);
    }

    /// Number of compactors
    pub fn len(&self) -> usize {
        self.compactors.len()
    }

    /// Check whether the chain is empty
    pub fn is_empty(&self) -> bool {
        self.compactors.is_empty()
    }

    /// Iterate in application order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Compactor>> {
        self.compactors.iter()
    }

    /// Names in application order
    pub fn names(&self) -> Vec<&'static str> {
        self.compactors.iter().map(|c| c.name()).collect()
    }

    /// Run every supporting compactor over `contents`
    pub fn compact(&self, path: &str, contents: &str) -> CompactorResult<String> {
        let mut current = contents.to_string();
        for compactor in &self.compactors {
            if compactor.supports(path) {
                current = compactor.compact(path, &current)?;
            }
        }
        Ok(current)
    }

    /// Run every supporting compactor over raw `contents`
    ///
    /// Placeholders are substituted whatever the encoding; the other
    /// compactors only see UTF-8 input.
    pub fn compact_bytes(&self, path: &str, contents: &[u8]) -> CompactorResult<Vec<u8>> {
        let mut current = contents.to_vec();
        for compactor in &self.compactors {
            if compactor.supports(path) {
                current = compactor.compact_bytes(path, &current)?;
            }
        }
        Ok(current)
    }

    /// First scoper in the chain
    pub fn scoper(&self) -> Option<&dyn Scoper> {
        self.compactors.iter().find_map(|c| c.as_scoper())
    }

    /// Check whether the chain rewrites symbols
    pub fn has_scoper(&self) -> bool {
        self.scoper().is_some()
    }

    /// Chain without any placeholder compactor
    pub fn without_placeholders(&self) -> Self {
        Self {
            compactors: self
                .compactors
                .iter()
                .filter(|c| !c.is_placeholder())
                .cloned()
                .collect(),
        }
    }

    /// Chain with `placeholder` first and no other placeholder compactor
    pub fn with_placeholder(&self, placeholder: Placeholder) -> Self {
        let mut compactors: Vec<Arc<dyn Compactor>> = Vec::with_capacity(self.len() + 1);
        compactors.push(Arc::new(placeholder));
        compactors.extend(self.without_placeholders().compactors);
        Self { compactors }
    }

    /// Copy for a worker; stateful compactors get fresh state
    pub fn fork(&self) -> Self {
        let compactors = self
            .compactors
            .iter()
            .map(|c| c.fork().unwrap_or_else(|| Arc::clone(c)))
            .collect();
        debug!("Forked compactor chain: {:?}", self.names());
        Self { compactors }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Debug)]
    struct Upper;

    impl Compactor for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn supports(&self, path: &str) -> bool {
            path.ends_with(".txt")
        }

        fn compact(&self, _path: &str, contents: &str) -> CompactorResult<String> {
            Ok(contents.to_uppercase())
        }
    }

    #[test]
    fn test_extension_filter() {
        let extensions = Extensions::new(["php", "JSON"]);
        assert!(extensions.matches("src/Kernel.php"));
        assert!(extensions.matches("composer.json"));
        assert!(extensions.matches("README.PHP"));
        assert!(!extensions.matches("src/php"));
        assert!(!extensions.matches(".php"));
        assert!(!extensions.matches("php.d/readme.md"));
    }

    #[test]
    fn test_chain_threads_output() {
        let placeholder = Placeholder::from_json(&json!({"@name@": "box"})).unwrap();
        let chain = Compactors::new(vec![Arc::new(Upper)]).with_placeholder(placeholder);

        assert_eq!(chain.compact("a.txt", "hi @name@").unwrap(), "HI BOX");
        // Upper does not support .md, the placeholder does
        assert_eq!(chain.compact("a.md", "hi @name@").unwrap(), "hi box");
    }

    #[test]
    fn test_invalid_utf8_only_gets_placeholders() {
        let placeholder = Placeholder::from_json(&json!({"@name@": "box"})).unwrap();
        let chain = Compactors::new(vec![Arc::new(Upper)]).with_placeholder(placeholder);

        assert_eq!(
            chain.compact_bytes("a.txt", b"hi @name@ \xe9").unwrap(),
            b"hi box \xe9"
        );
        assert_eq!(chain.compact_bytes("a.txt", b"hi @name@").unwrap(), b"HI BOX");
    }

    #[test]
    fn test_with_placeholder_replaces_existing() {
        let first = Placeholder::from_json(&json!({"@a@": "1"})).unwrap();
        let second = Placeholder::from_json(&json!({"@a@": "2"})).unwrap();

        let chain = Compactors::new(vec![Arc::new(Upper), Arc::new(first)])
            .with_placeholder(second);

        assert_eq!(chain.names(), vec!["placeholder", "upper"]);
        assert_eq!(chain.compact("a.md", "@a@").unwrap(), "2");
    }

    #[test]
    fn test_from_names() {
        let chain = Compactors::from_names(
            &[
                "KevinGH\\Box\\Compactor\\Php",
                "Json",
                "KevinGH\\Box\\Compactor\\PhpScoper",
            ],
            "_PhpScoperAbc",
        )
        .expect("known compactors");

        assert_eq!(chain.names(), vec!["php", "json", "php-scoper"]);
        assert_eq!(chain.scoper().unwrap().prefix(), "_PhpScoperAbc");

        assert!(matches!(
            Compactors::from_names(&["Yaml"], "_PhpScoperAbc"),
            Err(CompactorError::UnknownCompactor(_))
        ));
    }

    #[test]
    fn test_excluded_namespaces_reach_the_scoper() {
        let chain =
            Compactors::from_names_excluding(&["PhpScoper"], "Scoped", &["Vendor\\Legacy"]).unwrap();

        let legacy = "<?php\nnamespace Vendor\\Legacy\\Util;\nclass Helper {}\n";
        assert_eq!(chain.compact("src/Helper.php", legacy).unwrap(), legacy);

        let scoped = chain
            .compact("src/A.php", "<?php\nnamespace App;\nclass A {}\n")
            .unwrap();
        assert!(scoped.contains("namespace Scoped\\App;"));
    }

    #[test]
    fn test_fork_isolates_scoper_state() {
        let chain = Compactors::from_names(&["PhpScoper"], "Scoped").unwrap();
        let fork = chain.fork();

        fork.compact("src/A.php", "<?php\nnamespace App;\nclass A {}\n")
            .unwrap();

        assert_eq!(fork.scoper().unwrap().symbols_registry().count(), 1);
        assert!(chain.scoper().unwrap().symbols_registry().is_empty());
    }
}
