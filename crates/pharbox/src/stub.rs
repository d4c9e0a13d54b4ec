//! Stub generation
//!
//! The generated stub maps the archive under its alias, optionally checks
//! the runtime requirements, then hands over to the main script.

use std::fmt::Write as _;

use pharbox_crypto::sha256_hex;

use crate::requirements::CHECKER_FILE;

/// Shebang used when none is configured
pub const DEFAULT_SHEBANG: &str = "#!/usr/bin/env php";

/// Alias used when none is configured, derived from `seed`
///
/// The same seed always gives the same alias, so rebuilding a project does
/// not change its stub.
pub fn default_alias(seed: &str) -> String {
    let digest = sha256_hex(seed.as_bytes());
    format!("box-auto-generated-alias-{}.phar", &digest[..12])
}

/// Builder for the PHP bootstrap placed in front of the archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StubGenerator {
    shebang: Option<String>,
    banner: Option<String>,
    alias: Option<String>,
    intercept: bool,
    check_requirements: bool,
    index: Option<String>,
}

impl StubGenerator {
    /// Generator producing a bare stub
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the stub with a shebang line
    #[must_use]
    pub fn shebang(mut self, shebang: impl Into<String>) -> Self {
        self.shebang = Some(shebang.into());
        self
    }

    /// Add a comment block, one comment line per banner line
    #[must_use]
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    /// Map the archive under `alias`
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Route file functions through the archive
    #[must_use]
    pub const fn intercept(mut self, intercept: bool) -> Self {
        self.intercept = intercept;
        self
    }

    /// Run the requirements checker before the main script
    #[must_use]
    pub const fn check_requirements(mut self, check: bool) -> Self {
        self.check_requirements = check;
        self
    }

    /// Archive path of the script to run
    #[must_use]
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Render the stub
    pub fn generate(&self) -> String {
        let mut out = String::new();

        if let Some(shebang) = &self.shebang {
            let _ = writeln!(out, "{shebang}");
        }
        out.push_str("<?php\n");

        if let Some(banner) = self.banner.as_deref().filter(|b| !b.trim().is_empty()) {
            out.push_str("\n/*\n");
            for line in banner.lines() {
                if line.is_empty() {
                    out.push_str(" *\n");
                } else {
                    let _ = writeln!(out, " * {}", line.replace("*/", "* /"));
                }
            }
            out.push_str(" */\n");
        }

        let phar_prefix = self.alias.as_ref().map(|alias| {
            let alias = php_escape(alias);
            let _ = write!(out, "\nPhar::mapPhar('{alias}');\n");
            format!("phar://{alias}/")
        });

        if self.intercept {
            out.push_str("\nPhar::interceptFileFuncs();\n");
        }

        let prefix = phar_prefix.unwrap_or_else(|| "phar://' . __FILE__ . '/".to_string());

        if self.check_requirements {
            let _ = write!(out, "\nrequire '{prefix}{CHECKER_FILE}';\n");
        }

        if let Some(index) = &self.index {
            let index = php_escape(index.trim_start_matches('/'));
            let _ = write!(
                out,
                "\n$_SERVER['SCRIPT_FILENAME'] = '{prefix}{index}';\nrequire '{prefix}{index}';\n"
            );
        }

        out.push_str("\n__HALT_COMPILER(); ?>\n");
        out
    }
}

fn php_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
