//! Symbol scoping
//!
//! A scoper moves namespaced code under a prefix namespace so the bundled
//! dependencies cannot collide with the ones of the application loading the
//! archive. Every class and function it moves is recorded in a
//! [`SymbolsRegistry`], which is later used to generate autoload aliases.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::{Captures, Regex};
use tracing::debug;

use crate::compactor::{Compactor, Extensions};
use crate::error::{CompactorError, CompactorResult};
use crate::registry::SymbolsRegistry;

const NAME: &str = r"[A-Za-z_][A-Za-z0-9_]*(?:\\[A-Za-z_][A-Za-z0-9_]*)*";

/// Symbol-prefixing transform with a registry of what it renamed
pub trait Scoper: Send + Sync + fmt::Debug {
    /// Prefix the symbols of one file, recording them in the registry
    fn scope(&self, path: &str, contents: &str) -> CompactorResult<String>;

    /// Namespace prefix
    fn prefix(&self) -> &str;

    /// Snapshot of the symbols recorded so far
    fn symbols_registry(&self) -> SymbolsRegistry;

    /// Merge symbols recorded elsewhere, typically by workers
    fn record_symbols(&self, registry: &SymbolsRegistry);

    /// Same configuration with an empty registry
    fn fork(&self) -> Arc<dyn Scoper>;
}

#[derive(Debug)]
struct Patterns {
    namespace: Regex,
    use_statement: Regex,
    class: Regex,
    function: Regex,
}

impl Patterns {
    fn compile() -> CompactorResult<Self> {
        Ok(Self {
            namespace: Regex::new(&format!(r"(?m)^([ \t]*namespace[ \t]+)({NAME})([ \t]*[;{{])"))?,
            use_statement: Regex::new(&format!(
                r"(?m)^(use[ \t]+(?:function[ \t]+|const[ \t]+)?\\?)({NAME})(\\?)"
            ))?,
            class: Regex::new(
                r"(?m)^[ \t]*(?:(?:abstract|final|readonly)[ \t]+)*(?:class|interface|trait|enum)[ \t]+([A-Za-z_][A-Za-z0-9_]*)",
            )?,
            function: Regex::new(r"(?m)^function[ \t]+&?[ \t]*([A-Za-z_][A-Za-z0-9_]*)[ \t]*\(")?,
        })
    }
}

/// Regex-based scoper working on namespace and `use` declarations
///
/// Files without a namespace declaration are left alone. Namespaces that
/// already start with the prefix, or with one of the excluded namespaces,
/// are not touched.
#[derive(Debug)]
pub struct NamespaceScoper {
    prefix: String,
    excluded: Vec<String>,
    patterns: Arc<Patterns>,
    registry: Mutex<SymbolsRegistry>,
}

impl NamespaceScoper {
    /// Scoper moving code under `prefix`
    pub fn new(prefix: &str) -> CompactorResult<Self> {
        let prefix = prefix.trim_matches('\\');
        let valid = Regex::new(&format!("^{NAME}$"))?;
        if !valid.is_match(prefix) {
            return Err(CompactorError::InvalidPrefix(prefix.to_string()));
        }

        Ok(Self {
            prefix: prefix.to_string(),
            excluded: Vec::new(),
            patterns: Arc::new(Patterns::compile()?),
            registry: Mutex::new(SymbolsRegistry::new()),
        })
    }

    /// Leave these namespaces (and their children) unprefixed
    pub fn with_excluded_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded = namespaces
            .into_iter()
            .map(|ns| ns.into().trim_matches('\\').to_string())
            .collect();
        self
    }

    fn is_excluded(&self, name: &str) -> bool {
        std::iter::once(self.prefix.as_str())
            .chain(self.excluded.iter().map(String::as_str))
            .any(|ns| name == ns || name.strip_prefix(ns).is_some_and(|rest| rest.starts_with('\\')))
    }

    fn prefixed(&self, name: &str) -> String {
        format!("{}\\{name}", self.prefix)
    }
}

impl Scoper for NamespaceScoper {
    fn scope(&self, path: &str, contents: &str) -> CompactorResult<String> {
        let declarations: Vec<(usize, String)> = self
            .patterns
            .namespace
            .captures_iter(contents)
            .filter_map(|caps| Some((caps.get(0)?.start(), caps.get(2)?.as_str().to_string())))
            .collect();

        if declarations.is_empty() {
            return Ok(contents.to_string());
        }

        let namespace_at = |position: usize| {
            declarations
                .iter()
                .rev()
                .find(|(start, _)| *start <= position)
                .map(|(_, ns)| ns.as_str())
        };

        let mut partial = SymbolsRegistry::new();
        for caps in self.patterns.class.captures_iter(contents) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if let Some(ns) = namespace_at(whole.start()).filter(|ns| !self.is_excluded(ns)) {
                let original = format!("{ns}\\{}", name.as_str());
                partial.record_class(original.clone(), self.prefixed(&original));
            }
        }
        for caps in self.patterns.function.captures_iter(contents) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if let Some(ns) = namespace_at(whole.start()).filter(|ns| !self.is_excluded(ns)) {
                let original = format!("{ns}\\{}", name.as_str());
                partial.record_function(original.clone(), self.prefixed(&original));
            }
        }

        let scoped = self
            .patterns
            .namespace
            .replace_all(contents, |caps: &Captures<'_>| {
                let name = &caps[2];
                let name = if self.is_excluded(name) {
                    name.to_string()
                } else {
                    self.prefixed(name)
                };
                format!("{}{name}{}", &caps[1], &caps[3])
            });

        let scoped = self
            .patterns
            .use_statement
            .replace_all(&scoped, |caps: &Captures<'_>| {
                let name = &caps[2];
                let namespaced = name.contains('\\') || !caps[3].is_empty();
                if namespaced && !self.is_excluded(name) {
                    format!("{}{}{}", &caps[1], self.prefixed(name), &caps[3])
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned();

        if !partial.is_empty() {
            debug!("Scoped {} symbols in {path}", partial.count());
            self.registry.lock().merge(&partial);
        }

        Ok(scoped)
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn symbols_registry(&self) -> SymbolsRegistry {
        self.registry.lock().clone()
    }

    fn record_symbols(&self, registry: &SymbolsRegistry) {
        self.registry.lock().merge(registry);
    }

    fn fork(&self) -> Arc<dyn Scoper> {
        Arc::new(Self {
            prefix: self.prefix.clone(),
            excluded: self.excluded.clone(),
            patterns: Arc::clone(&self.patterns),
            registry: Mutex::new(SymbolsRegistry::new()),
        })
    }
}

/// Compactor applying a [`Scoper`] to PHP files
#[derive(Debug, Clone)]
pub struct PhpScoper {
    scoper: Arc<dyn Scoper>,
    extensions: Extensions,
}

impl PhpScoper {
    /// Compactor around `scoper`
    pub fn new(scoper: Arc<dyn Scoper>) -> Self {
        Self {
            scoper,
            extensions: Extensions::new(["php"]),
        }
    }

    /// Shared handle to the scoper
    pub fn scoper(&self) -> Arc<dyn Scoper> {
        Arc::clone(&self.scoper)
    }
}

impl Compactor for PhpScoper {
    fn name(&self) -> &'static str {
        "php-scoper"
    }

    fn supports(&self, path: &str) -> bool {
        self.extensions.matches(path)
    }

    fn compact(&self, path: &str, contents: &str) -> CompactorResult<String> {
        self.scoper.scope(path, contents)
    }

    fn as_scoper(&self) -> Option<&dyn Scoper> {
        Some(self.scoper.as_ref())
    }

    fn fork(&self) -> Option<Arc<dyn Compactor>> {
        Some(Arc::new(Self {
            scoper: self.scoper.fork(),
            extensions: self.extensions.clone(),
        }))
    }
}
