//! Composer integration
//!
//! Reads the Composer files of the project and regenerates the autoloader
//! inside the staging directory once every file has been compacted.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use pharbox_compactor::SymbolsRegistry;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{BuildError, BuildResult};

/// Vendor directory when `config.vendor-dir` is not set
pub const DEFAULT_VENDOR_DIR: &str = "vendor";

/// Name of the alias loader written next to the Composer autoloader
pub const SCOPER_AUTOLOAD_FILE: &str = "scoper-autoload.php";

/// Decoded Composer files of a project
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposerFiles {
    json: Option<Value>,
    lock: Option<Value>,
}

impl ComposerFiles {
    /// Composer files from already decoded documents
    pub const fn new(json: Option<Value>, lock: Option<Value>) -> Self {
        Self { json, lock }
    }

    /// Read `composer.json` and `composer.lock` under `base_path`; missing
    /// files are skipped
    pub fn load(base_path: &Path) -> BuildResult<Self> {
        let json = read_json(&base_path.join("composer.json"))?;
        let lock = read_json(&base_path.join("composer.lock"))?;
        Ok(Self { json, lock })
    }

    /// Decoded `composer.json`
    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    /// Decoded `composer.lock`
    pub fn lock(&self) -> Option<&Value> {
        self.lock.as_ref()
    }

    /// Vendor directory relative to the project root
    pub fn vendor_dir(&self) -> String {
        vendor_dir_of(self.json.as_ref())
    }
}

fn vendor_dir_of(json: Option<&Value>) -> String {
    json.and_then(|json| json.pointer("/config/vendor-dir"))
        .and_then(Value::as_str)
        .map_or_else(
            || DEFAULT_VENDOR_DIR.to_string(),
            |dir| dir.trim_end_matches('/').to_string(),
        )
}

fn read_json(path: &Path) -> BuildResult<Option<Value>> {
    if !path.is_file() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
    let value = serde_json::from_str(&contents)?;
    debug!("Loaded {}", path.display());
    Ok(Some(value))
}

/// Regenerates the autoloader of a staged project
pub trait ComposerOrchestrator {
    /// Dump the autoloader in `working_dir`
    ///
    /// `registry` holds the symbols moved under `prefix` by the scoper. It is
    /// empty when nothing was scoped.
    fn dump_autoload(
        &self,
        working_dir: &Path,
        registry: &SymbolsRegistry,
        prefix: &str,
    ) -> BuildResult<()>;
}

/// Runs the `composer` executable
#[derive(Debug, Clone)]
pub struct ProcessComposer {
    binary: PathBuf,
    vendor_dir: String,
}

impl ProcessComposer {
    /// Orchestrator running `binary` for a project using `vendor_dir`
    pub fn new(binary: impl Into<PathBuf>, vendor_dir: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            vendor_dir: vendor_dir.into(),
        }
    }
}

impl ComposerOrchestrator for ProcessComposer {
    fn dump_autoload(
        &self,
        working_dir: &Path,
        registry: &SymbolsRegistry,
        prefix: &str,
    ) -> BuildResult<()> {
        if !registry.is_empty() {
            let vendor = working_dir.join(&self.vendor_dir);
            fs::create_dir_all(&vendor).map_err(|e| BuildError::io(&vendor, e))?;

            let target = vendor.join(SCOPER_AUTOLOAD_FILE);
            fs::write(&target, scoper_autoload(registry, prefix))
                .map_err(|e| BuildError::io(&target, e))?;
            debug!(
                "Wrote {} with {} aliases",
                target.display(),
                registry.count()
            );
        }

        info!("Dumping the Composer autoloader");
        let output = Command::new(&self.binary)
            .args([
                "dump-autoload",
                "--classmap-authoritative",
                "--no-dev",
                "--no-interaction",
            ])
            .current_dir(working_dir)
            .output()
            .map_err(|e| {
                BuildError::Composer(format!("could not run {}: {e}", self.binary.display()))
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(BuildError::Composer(format!(
                "dump-autoload exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

fn php_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// PHP alias loader for the symbols moved under `prefix`
///
/// Classes are aliased lazily from their original name; functions get a
/// forwarding declaration in their original namespace.
pub fn scoper_autoload(registry: &SymbolsRegistry, prefix: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<?php\n");
    let _ = writeln!(out, "// Aliases for the symbols prefixed with {prefix}\n");

    out.push_str("namespace {\n");
    out.push_str("    $loader = require_once __DIR__.'/autoload.php';\n");

    if !registry.classes().is_empty() {
        out.push_str("\n    spl_autoload_register(static function (string $class): void {\n");
        out.push_str("        static $aliases = array(\n");
        for (original, prefixed) in registry.classes() {
            let _ = writeln!(
                out,
                "            {} => {},",
                php_string(original),
                php_string(prefixed)
            );
        }
        out.push_str("        );\n\n");
        out.push_str("        if (!isset($aliases[$class])) {\n");
        out.push_str("            return;\n");
        out.push_str("        }\n");
        out.push_str("        $target = $aliases[$class];\n");
        out.push_str(
            "        if (class_exists($target) || interface_exists($target) || trait_exists($target)) {\n",
        );
        out.push_str("            class_alias($target, $class);\n");
        out.push_str("        }\n");
        out.push_str("    });\n");
    }
    out.push_str("}\n");

    for (original, prefixed) in registry.functions() {
        let (namespace, name) = original.rsplit_once('\\').unwrap_or(("", original));
        let _ = write!(
            out,
            "\nnamespace {namespace}{}{{\n    if (!function_exists({})) {{\n        function {name}(...$arguments) {{\n            return \\{prefixed}(...$arguments);\n        }}\n    }}\n}}\n",
            if namespace.is_empty() { "" } else { " " },
            php_string(original),
        );
    }

    out.push_str("\nnamespace {\n    return $loader;\n}\n");
    out
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_vendor_dir() {
        assert_eq!(ComposerFiles::default().vendor_dir(), "vendor");

        let files = ComposerFiles::new(
            Some(json!({"config": {"vendor-dir": "lib/deps/"}})),
            None,
        );
        assert_eq!(files.vendor_dir(), "lib/deps");
    }

    #[test]
    fn test_load_ignores_installed_packages() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("composer.json"),
            r#"{"config": {"vendor-dir": "deps"}}"#,
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("deps/composer")).unwrap();
        fs::write(dir.path().join("deps/composer/installed.json"), "{ not json").unwrap();

        let files = ComposerFiles::load(dir.path()).unwrap();
        assert!(files.json().is_some());
        assert!(files.lock().is_none());
        assert_eq!(files.vendor_dir(), "deps");
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("composer.lock"), "{ not json").unwrap();

        let err = ComposerFiles::load(dir.path()).unwrap_err();
        assert!(matches!(err, BuildError::Json(_)));
    }

    #[test]
    fn test_scoper_autoload() {
        let mut registry = SymbolsRegistry::new();
        registry.record_class("Acme\\Kernel", "_Box\\Acme\\Kernel");
        registry.record_function("Acme\\Util\\dump", "_Box\\Acme\\Util\\dump");

        let php = scoper_autoload(&registry, "_Box");

        assert!(php.starts_with("<?php\n"));
        assert!(php.contains("'Acme\\\\Kernel' => '_Box\\\\Acme\\\\Kernel',"));
        assert!(php.contains("namespace Acme\\Util {\n"));
        assert!(php.contains("if (!function_exists('Acme\\\\Util\\\\dump')) {"));
        assert!(php.contains("return \\_Box\\Acme\\Util\\dump(...$arguments);"));
        assert!(php.ends_with("namespace {\n    return $loader;\n}\n"));
    }

    #[test]
    fn test_scoper_autoload_without_classes() {
        let mut registry = SymbolsRegistry::new();
        registry.record_function("Acme\\f", "_Box\\Acme\\f");

        let php = scoper_autoload(&registry, "_Box");
        assert!(!php.contains("spl_autoload_register"));
    }

    #[test]
    fn test_missing_binary_is_reported() {
        let dir = TempDir::new().unwrap();
        let composer = ProcessComposer::new(dir.path().join("no-such-composer"), "vendor");

        let err = composer
            .dump_autoload(dir.path(), &SymbolsRegistry::new(), "")
            .unwrap_err();
        assert!(matches!(err, BuildError::Composer(ref message) if message.contains("could not run")));
    }
}
