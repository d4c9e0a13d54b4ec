//! Runtime requirements checker
//!
//! Collects the PHP version and extensions the packaged application needs
//! and generates a small PHP checker run by the stub before the
//! application starts.

use std::fmt;
use std::fmt::Write as _;

use pharbox_formats::phar::CompressionAlgorithm;
use serde_json::Value;

use crate::composer::ComposerFiles;

/// Directory of the checker inside the archive
pub const CHECKER_DIR: &str = ".box";

/// Archive path of the generated requirement list
pub const REQUIREMENTS_FILE: &str = ".box/.requirements.php";

/// Archive path of the checker script
pub const CHECKER_FILE: &str = ".box/bin/check-requirements.php";

/// Environment variable disabling the check when set to `0`
pub const CHECKER_ENV: &str = "PHARBOX_REQUIREMENT_CHECKER";

/// Something the PHP runtime must provide
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// PHP version constraint
    Php {
        /// Composer constraint such as `^8.1`
        constraint: String,
        /// Package declaring it, `None` for the project itself
        source: Option<String>,
    },
    /// PHP extension
    Extension {
        /// Extension name without the `ext-` prefix
        name: String,
        /// Package declaring it, `None` for the project itself
        source: Option<String>,
    },
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (what, source) = match self {
            Self::Php { constraint, source } => (format!("php {constraint}"), source),
            Self::Extension { name, source } => (format!("ext-{name}"), source),
        };
        match source {
            Some(source) => write!(f, "{what} (required by {source})"),
            None => f.write_str(&what),
        }
    }
}

/// Requirements of the project
///
/// Uses `composer.lock` when present (platform requirements and every
/// installed package), `composer.json` otherwise. The extension needed to
/// read compressed entries is added last.
pub fn collect(composer: &ComposerFiles, compression: CompressionAlgorithm) -> Vec<Requirement> {
    let mut requirements = Vec::new();

    if let Some(lock) = composer.lock() {
        if let Some(platform) = lock.get("platform") {
            push_from_map(&mut requirements, platform, None);
        }
        for package in lock
            .get("packages")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let name = package.get("name").and_then(Value::as_str);
            if let Some(require) = package.get("require") {
                push_from_map(&mut requirements, require, name);
            }
        }
    } else if let Some(require) = composer.json().and_then(|json| json.get("require")) {
        push_from_map(&mut requirements, require, None);
    }

    if let Some(extension) = compression.required_extension() {
        push_unique(
            &mut requirements,
            Requirement::Extension {
                name: extension.to_string(),
                source: None,
            },
        );
    }

    requirements
}

fn push_from_map(requirements: &mut Vec<Requirement>, map: &Value, source: Option<&str>) {
    let Some(map) = map.as_object() else {
        return;
    };

    for (package, constraint) in map {
        let source = source.map(str::to_string);
        let requirement = if package == "php" {
            let Some(constraint) = constraint.as_str() else {
                continue;
            };
            Requirement::Php {
                constraint: constraint.to_string(),
                source,
            }
        } else if let Some(name) = package.strip_prefix("ext-") {
            Requirement::Extension {
                name: name.to_ascii_lowercase(),
                source,
            }
        } else {
            continue;
        };
        push_unique(requirements, requirement);
    }
}

fn push_unique(requirements: &mut Vec<Requirement>, requirement: Requirement) {
    if !requirements.contains(&requirement) {
        requirements.push(requirement);
    }
}

fn php_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn php_nullable(value: Option<&String>) -> String {
    value.map_or_else(|| "null".to_string(), |v| php_string(v))
}

/// PHP file returning the requirement list
pub fn requirements_php(requirements: &[Requirement]) -> String {
    let mut out = String::from("<?php\n\nreturn array(\n");
    for requirement in requirements {
        let (kind, condition, source) = match requirement {
            Requirement::Php { constraint, source } => ("php", constraint, source),
            Requirement::Extension { name, source } => ("extension", name, source),
        };
        let _ = writeln!(
            out,
            "    array('type' => '{kind}', 'condition' => {}, 'source' => {}),",
            php_string(condition),
            php_nullable(source.as_ref())
        );
    }
    out.push_str(");\n");
    out
}

/// The checker files as (archive path, contents) pairs
pub fn checker_files(requirements: &[Requirement]) -> Vec<(String, String)> {
    vec![
        (REQUIREMENTS_FILE.to_string(), requirements_php(requirements)),
        (CHECKER_FILE.to_string(), CHECKER_SCRIPT.replace("@env@", CHECKER_ENV)),
    ]
}

const CHECKER_SCRIPT: &str = r#"<?php

if (getenv('@env@') === '0') {
    return;
}

if (!function_exists('pharbox_normalize_version')) {
    function pharbox_normalize_version(string $version): string
    {
        $version = preg_replace('/[-+@].*$/', '', ltrim(trim($version), 'vV'));
        $parts = array_slice(explode('.', $version), 0, 3);
        while (count($parts) < 3) {
            $parts[] = '0';
        }

        return implode('.', $parts);
    }

    function pharbox_version_matches(string $version, string $part): bool
    {
        if ($part === '*') {
            return true;
        }
        if (!preg_match('/^(\^|~|>=|<=|>|<|!=|==|=)?\s*(.+)$/', $part, $matches)) {
            return false;
        }
        list(, $operator, $target) = $matches;
        $version = pharbox_normalize_version($version);

        if (preg_match('/(^|\.)[x*]$/i', $target)) {
            $prefix = rtrim(preg_replace('/[x*]$/i', '', $target), '.');

            return $prefix === '' || strpos($version.'.', $prefix.'.') === 0;
        }

        $segments = count(explode('.', ltrim($target, 'vV')));
        $target = pharbox_normalize_version($target);
        $parts = explode('.', $target);

        switch ($operator) {
            case '^':
                if ($parts[0] !== '0') {
                    $upper = ($parts[0] + 1).'.0.0';
                } elseif ($parts[1] !== '0') {
                    $upper = '0.'.($parts[1] + 1).'.0';
                } else {
                    $upper = '0.0.'.($parts[2] + 1);
                }

                return version_compare($version, $target, '>=') && version_compare($version, $upper, '<');
            case '~':
                $upper = $segments <= 2 ? ($parts[0] + 1).'.0.0' : $parts[0].'.'.($parts[1] + 1).'.0';

                return version_compare($version, $target, '>=') && version_compare($version, $upper, '<');
            case '':
            case '=':
            case '==':
                return version_compare($version, $target, '==');
            default:
                return version_compare($version, $target, $operator);
        }
    }

    function pharbox_version_satisfies(string $version, string $constraint): bool
    {
        foreach (preg_split('/\s*\|\|?\s*/', trim($constraint)) as $alternative) {
            $satisfied = true;
            foreach (preg_split('/\s*,\s*|\s+/', trim($alternative), -1, PREG_SPLIT_NO_EMPTY) as $part) {
                if (!pharbox_version_matches($version, $part)) {
                    $satisfied = false;
                    break;
                }
            }
            if ($satisfied) {
                return true;
            }
        }

        return false;
    }
}

$failures = array();
foreach (require __DIR__.'/../.requirements.php' as $requirement) {
    $source = $requirement['source'] === null ? '' : sprintf(' (required by %s)', $requirement['source']);

    if ($requirement['type'] === 'php') {
        if (!pharbox_version_satisfies(PHP_VERSION, $requirement['condition'])) {
            $failures[] = sprintf('PHP %s is required%s, found %s.', $requirement['condition'], $source, PHP_VERSION);
        }
    } elseif (!extension_loaded($requirement['condition'])) {
        $failures[] = sprintf('The extension "%s" is required%s.', $requirement['condition'], $source);
    }
}

if ($failures !== array()) {
    $stderr = defined('STDERR') ? STDERR : fopen('php://stderr', 'w');
    fwrite($stderr, "The application requirements are not met:\n\n");
    foreach ($failures as $failure) {
        fwrite($stderr, '  - '.$failure."\n");
    }
    fwrite($stderr, "\nSet @env@=0 to skip this check.\n");
    exit(1);
}
"#;

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_collect_from_lock() {
        let composer = ComposerFiles::new(
            Some(json!({"require": {"php": "^7.4"}})),
            Some(json!({
                "platform": {"php": "^8.1", "ext-json": "*"},
                "packages": [
                    {"name": "acme/http", "require": {"php": ">=8.0", "ext-curl": "*", "psr/log": "^3.0"}},
                    {"name": "acme/yaml", "require": {"ext-JSON": "*"}}
                ]
            })),
        );

        let requirements = collect(&composer, CompressionAlgorithm::Gz);
        let rendered: Vec<String> = requirements.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "php ^8.1",
                "ext-json",
                "php >=8.0 (required by acme/http)",
                "ext-curl (required by acme/http)",
                "ext-json (required by acme/yaml)",
                "ext-zlib",
            ]
        );
    }

    #[test]
    fn test_collect_from_json_without_lock() {
        let composer = ComposerFiles::new(
            Some(json!({"require": {"php": "^8.2", "ext-mbstring": "*", "symfony/console": "^7"}})),
            None,
        );

        let requirements = collect(&composer, CompressionAlgorithm::None);
        assert_eq!(
            requirements,
            vec![
                Requirement::Php {
                    constraint: "^8.2".to_string(),
                    source: None
                },
                Requirement::Extension {
                    name: "mbstring".to_string(),
                    source: None
                },
            ]
        );
    }

    #[test]
    fn test_compression_extension_is_not_duplicated() {
        let composer = ComposerFiles::new(Some(json!({"require": {"ext-zlib": "*"}})), None);
        assert_eq!(collect(&composer, CompressionAlgorithm::Gz).len(), 1);
    }

    #[test]
    fn test_requirements_php() {
        let php = requirements_php(&[
            Requirement::Php {
                constraint: "^8.1".to_string(),
                source: None,
            },
            Requirement::Extension {
                name: "intl".to_string(),
                source: Some("o'neil/i18n".to_string()),
            },
        ]);

        assert_eq!(
            php,
            "<?php\n\nreturn array(\n    array('type' => 'php', 'condition' => '^8.1', 'source' => null),\n    array('type' => 'extension', 'condition' => 'intl', 'source' => 'o\\'neil/i18n'),\n);\n"
        );
    }

    #[test]
    fn test_checker_files() {
        let files = checker_files(&[]);
        let paths: Vec<&str> = files.iter().map(|(path, _)| path.as_str()).collect();
        assert_eq!(paths, vec![REQUIREMENTS_FILE, CHECKER_FILE]);

        let checker = &files[1].1;
        assert!(checker.contains("getenv('PHARBOX_REQUIREMENT_CHECKER') === '0'"));
        assert!(checker.contains("require __DIR__.'/../.requirements.php'"));
        assert!(!checker.contains("@env@"));
    }
}
