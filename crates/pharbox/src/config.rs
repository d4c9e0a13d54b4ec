//! Build configuration
//!
//! [`ConfigFile`] mirrors the `box.json` schema. [`BuildConfig`] is the
//! validated form used by the compile pipeline: paths are absolute,
//! defaults are filled in and names are parsed into their types.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use pharbox_compactor::MapFile;
use pharbox_crypto::sha256_hex;
use pharbox_formats::phar::{CompressionAlgorithm, SignatureAlgorithm};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ConfigError;
use crate::stub::{DEFAULT_SHEBANG, default_alias};

/// Configuration files looked up in the working directory, in order
pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["box.json", "box.json.dist"];

/// Main script when none is configured
pub const DEFAULT_MAIN: &str = "index.php";

/// Environment variable read when `key-pass` is `true`
pub const KEY_PASS_ENV: &str = "PHARBOX_KEY_PASS";

/// A setting that is either a string or a boolean
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StringOrBool {
    /// Explicit value
    String(String),
    /// `true` for the default, `false` to disable
    Bool(bool),
}

/// Banner as a single string or one string per line
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum BannerSetting {
    /// Banner text
    Text(String),
    /// Banner lines
    Lines(Vec<String>),
    /// `false` disables the banner
    Bool(bool),
}

/// `box.json` as written by the user
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigFile {
    /// JSON schema reference, ignored
    #[serde(rename = "$schema")]
    pub schema: Option<String>,
    /// Directory the other paths are relative to
    pub base_path: Option<PathBuf>,
    /// Main script, or `false` for none
    pub main: Option<StringOrBool>,
    /// Archive path
    pub output: Option<PathBuf>,
    /// Archive alias
    pub alias: Option<String>,
    /// Stub comment
    pub banner: Option<BannerSetting>,
    /// Stub shebang, or `false` for none
    pub shebang: Option<StringOrBool>,
    /// Stub file, `true` to generate one, `false` for the minimal stub
    pub stub: Option<StringOrBool>,
    /// Text files
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Binary files
    #[serde(default)]
    pub files_bin: Vec<PathBuf>,
    /// Directories of text files
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    /// Directories of binary files
    #[serde(default)]
    pub directories_bin: Vec<PathBuf>,
    /// Paths left out of directory scans
    #[serde(default)]
    pub exclude: Vec<PathBuf>,
    /// Compactor names, applied in order
    #[serde(default)]
    pub compactors: Vec<String>,
    /// `NONE`, `GZ` or `BZ2`
    pub compression: Option<String>,
    /// `MD5`, `SHA256`, `SHA512` or `OPENSSL`
    pub algorithm: Option<String>,
    /// Private key for `OPENSSL`
    pub key: Option<PathBuf>,
    /// Passphrase of the key, or `true` to read it from the environment
    pub key_pass: Option<StringOrBool>,
    /// Path mapping rules, each an object of one prefix to its replacement
    #[serde(default)]
    pub map: Vec<BTreeMap<String, String>>,
    /// Archive metadata
    pub metadata: Option<Value>,
    /// Placeholder values
    pub replacements: Option<Value>,
    /// Embed the requirements checker
    pub check_requirements: Option<bool>,
    /// Regenerate the Composer autoloader
    pub dump_autoload: Option<bool>,
    /// Remove Composer files not needed at runtime
    pub exclude_composer_files: Option<bool>,
    /// Route file functions through the archive
    #[serde(default)]
    pub intercept: bool,
    /// Fixed modification time for every entry
    pub timestamp: Option<u32>,
    /// Octal permissions of the archive, such as `"0755"`
    pub chmod: Option<String>,
    /// Allow parallel compaction
    pub parallel: Option<bool>,
    /// Namespace prefix of the scoper
    pub scoper_prefix: Option<String>,
    /// Namespaces the scoper leaves unprefixed
    #[serde(default)]
    pub exclude_namespaces: Vec<String>,
}

/// Where the stub comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubSource {
    /// Generated from the configuration
    Generated,
    /// Minimal stub of the container
    Default,
    /// User-provided file
    File(PathBuf),
}

/// How the archive is signed
#[derive(Debug, Clone)]
pub enum Signing {
    /// Hash signature
    Hash(SignatureAlgorithm),
    /// RSA signature with a private key file
    OpenSsl {
        /// Private key
        key: PathBuf,
        /// Passphrase of the key
        passphrase: Option<String>,
    },
}

/// Validated build configuration
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Configuration file, when one was used
    pub config_path: Option<PathBuf>,
    /// Directory archive paths are relative to
    pub base_path: PathBuf,
    /// Main script
    pub main: Option<PathBuf>,
    /// Archive path
    pub output: PathBuf,
    /// Archive alias
    pub alias: String,
    /// Stub comment
    pub banner: Option<String>,
    /// Stub shebang
    pub shebang: Option<String>,
    /// Stub source
    pub stub: StubSource,
    /// Text files
    pub files: Vec<PathBuf>,
    /// Binary files
    pub files_bin: Vec<PathBuf>,
    /// Directories of text files
    pub directories: Vec<PathBuf>,
    /// Directories of binary files
    pub directories_bin: Vec<PathBuf>,
    /// Paths left out of directory scans
    pub exclude: Vec<PathBuf>,
    /// Compactor names
    pub compactors: Vec<String>,
    /// Entry compression
    pub compression: CompressionAlgorithm,
    /// Signature
    pub signing: Signing,
    /// Path mapping
    pub map_file: MapFile,
    /// Archive metadata
    pub metadata: Option<Value>,
    /// Placeholder values, a JSON object
    pub replacements: Value,
    /// Embed the requirements checker
    pub check_requirements: bool,
    /// Regenerate the Composer autoloader
    pub dump_autoload: bool,
    /// Remove Composer files not needed at runtime
    pub exclude_composer_files: bool,
    /// Route file functions through the archive
    pub intercept: bool,
    /// Fixed modification time for every entry
    pub timestamp: Option<u32>,
    /// Archive permissions
    pub chmod: Option<u32>,
    /// Allow parallel compaction
    pub parallel: bool,
    /// Namespace prefix of the scoper
    pub scoper_prefix: String,
    /// Namespaces the scoper leaves unprefixed
    pub exclude_namespaces: Vec<String>,
}

impl BuildConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        debug!("Loaded configuration from {}", path.display());
        Self::resolve(file, &dir, Some(path.to_path_buf()))
    }

    /// Configuration of a project without configuration file
    pub fn defaults(dir: &Path) -> Result<Self, ConfigError> {
        Self::resolve(ConfigFile::default(), dir, None)
    }

    /// First of [`DEFAULT_CONFIG_FILES`] present in `dir`
    pub fn find(dir: &Path) -> Option<PathBuf> {
        DEFAULT_CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Validate `file`, resolving relative paths against `dir`
    pub fn resolve(
        file: ConfigFile,
        dir: &Path,
        config_path: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let base_path = match &file.base_path {
            Some(base) => dir.join(base),
            None => dir.to_path_buf(),
        };
        if !base_path.is_dir() {
            return Err(ConfigError::MissingFile {
                what: "base path",
                path: base_path,
            });
        }

        let main = match &file.main {
            None => Some(base_path.join(DEFAULT_MAIN)),
            Some(StringOrBool::String(main)) => Some(base_path.join(main)),
            Some(StringOrBool::Bool(true)) => {
                return Err(ConfigError::InvalidValue {
                    key: "main",
                    reason: "expected a path or false".to_string(),
                });
            }
            Some(StringOrBool::Bool(false)) => None,
        };
        if let Some(main) = &main {
            if !main.is_file() {
                return Err(ConfigError::MissingFile {
                    what: "main script",
                    path: main.clone(),
                });
            }
        }

        let output = match &file.output {
            Some(output) => base_path.join(output),
            None => {
                let stem = main
                    .as_deref()
                    .and_then(Path::file_stem)
                    .map_or_else(|| "index".to_string(), |s| s.to_string_lossy().into_owned());
                base_path.join(format!("{stem}.phar"))
            }
        };

        let alias = match &file.alias {
            Some(alias) if alias.trim().is_empty() => {
                return Err(ConfigError::InvalidValue {
                    key: "alias",
                    reason: "the alias cannot be empty".to_string(),
                });
            }
            Some(alias) => alias.clone(),
            None => default_alias(&output.to_string_lossy()),
        };

        let banner = match &file.banner {
            None => Some(default_banner()),
            Some(BannerSetting::Text(text)) => Some(text.clone()),
            Some(BannerSetting::Lines(lines)) => Some(lines.join("\n")),
            Some(BannerSetting::Bool(false)) => None,
            Some(BannerSetting::Bool(true)) => Some(default_banner()),
        };

        let shebang = match &file.shebang {
            None | Some(StringOrBool::Bool(true)) => Some(DEFAULT_SHEBANG.to_string()),
            Some(StringOrBool::Bool(false)) => None,
            Some(StringOrBool::String(shebang)) => {
                let shebang = shebang.trim();
                if !shebang.starts_with("#!") {
                    return Err(ConfigError::InvalidValue {
                        key: "shebang",
                        reason: format!("\"{shebang}\" does not start with #!"),
                    });
                }
                Some(shebang.to_string())
            }
        };

        let stub = match &file.stub {
            None | Some(StringOrBool::Bool(true)) => StubSource::Generated,
            Some(StringOrBool::Bool(false)) => StubSource::Default,
            Some(StringOrBool::String(path)) => {
                let path = base_path.join(path);
                if !path.is_file() {
                    return Err(ConfigError::MissingFile { what: "stub", path });
                }
                StubSource::File(path)
            }
        };

        let compression = match &file.compression {
            None => CompressionAlgorithm::None,
            Some(name) => {
                CompressionAlgorithm::from_name(name).ok_or_else(|| ConfigError::InvalidValue {
                    key: "compression",
                    reason: format!("unknown algorithm \"{name}\", expected NONE, GZ or BZ2"),
                })?
            }
        };

        let signing = resolve_signing(&file, &base_path)?;

        let map_file = MapFile::new(
            file.map
                .iter()
                .flat_map(|rule| rule.iter().map(|(from, to)| (from.clone(), to.clone())))
                .collect(),
        );

        let replacements = match &file.replacements {
            None => Value::Object(serde_json::Map::new()),
            Some(value @ Value::Object(_)) => value.clone(),
            Some(_) => {
                return Err(ConfigError::InvalidValue {
                    key: "replacements",
                    reason: "expected an object of placeholder to value".to_string(),
                });
            }
        };

        let chmod = file.chmod.as_deref().map(parse_chmod).transpose()?;

        let scoper_prefix = file.scoper_prefix.clone().unwrap_or_else(|| {
            let digest = sha256_hex(base_path.to_string_lossy().as_bytes());
            format!("_PhpScoper{}", &digest[..12])
        });

        let absolute = |paths: &[PathBuf]| -> Vec<PathBuf> {
            paths.iter().map(|p| base_path.join(p)).collect()
        };
        let mut directories = absolute(&file.directories);
        if file.files.is_empty()
            && file.files_bin.is_empty()
            && file.directories.is_empty()
            && file.directories_bin.is_empty()
        {
            directories.push(base_path.clone());
        }

        Ok(Self {
            files: absolute(&file.files),
            files_bin: absolute(&file.files_bin),
            directories,
            directories_bin: absolute(&file.directories_bin),
            exclude: absolute(&file.exclude),
            check_requirements: file.check_requirements.unwrap_or(true),
            dump_autoload: file
                .dump_autoload
                .unwrap_or_else(|| base_path.join("composer.json").is_file()),
            exclude_composer_files: file.exclude_composer_files.unwrap_or(true),
            parallel: file.parallel.unwrap_or(true),
            compactors: file.compactors,
            exclude_namespaces: file.exclude_namespaces,
            metadata: file.metadata,
            intercept: file.intercept,
            timestamp: file.timestamp,
            config_path,
            base_path,
            main,
            output,
            alias,
            banner,
            shebang,
            stub,
            compression,
            signing,
            map_file,
            replacements,
            chmod,
            scoper_prefix,
        })
    }
}

fn default_banner() -> String {
    format!(
        "Generated by pharbox {}.\n\n@link https://github.com/pharbox/pharbox",
        env!("CARGO_PKG_VERSION")
    )
}

fn resolve_signing(file: &ConfigFile, base_path: &Path) -> Result<Signing, ConfigError> {
    let name = file.algorithm.as_deref().unwrap_or("SHA256");

    match name.to_ascii_uppercase().as_str() {
        "OPENSSL" => {
            let key = file
                .key
                .as_ref()
                .map(|key| base_path.join(key))
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "key",
                    reason: "the OPENSSL algorithm needs a private key".to_string(),
                })?;
            if !key.is_file() {
                return Err(ConfigError::MissingFile {
                    what: "private key",
                    path: key,
                });
            }

            let passphrase = match &file.key_pass {
                None | Some(StringOrBool::Bool(false)) => None,
                Some(StringOrBool::String(pass)) => Some(pass.clone()),
                Some(StringOrBool::Bool(true)) => {
                    Some(std::env::var(KEY_PASS_ENV).map_err(|_| ConfigError::InvalidValue {
                        key: "key-pass",
                        reason: format!("set to true but {KEY_PASS_ENV} is not set"),
                    })?)
                }
            };

            Ok(Signing::OpenSsl { key, passphrase })
        }
        "SHA1" | "SHA-1" => Err(ConfigError::InvalidValue {
            key: "algorithm",
            reason: "SHA1 signatures are not supported, use SHA256 or SHA512".to_string(),
        }),
        _ => SignatureAlgorithm::from_name(name)
            .map(Signing::Hash)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "algorithm",
                reason: format!(
                    "unknown algorithm \"{name}\", expected MD5, SHA256, SHA512 or OPENSSL"
                ),
            }),
    }
}

fn parse_chmod(value: &str) -> Result<u32, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: "chmod",
        reason: format!("\"{value}\" is not an octal permission such as 0755"),
    };

    let digits = value.trim();
    let digits = digits
        .strip_prefix("0o")
        .or_else(|| digits.strip_prefix('0').filter(|rest| !rest.is_empty()))
        .unwrap_or(digits);
    let mode = u32::from_str_radix(digits, 8).map_err(|_| invalid())?;
    if mode > 0o7777 {
        return Err(invalid());
    }
    Ok(mode)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.php"), "<?php echo 1;").unwrap();
        dir
    }

    fn resolve(dir: &TempDir, json: &str) -> Result<BuildConfig, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json).unwrap();
        BuildConfig::resolve(file, dir.path(), None)
    }

    #[test]
    fn test_defaults() {
        let dir = project();
        let config = BuildConfig::defaults(dir.path()).unwrap();

        assert_eq!(config.main, Some(dir.path().join("index.php")));
        assert_eq!(config.output, dir.path().join("index.phar"));
        assert_eq!(config.shebang.as_deref(), Some(DEFAULT_SHEBANG));
        assert_eq!(config.stub, StubSource::Generated);
        assert_eq!(config.directories, vec![dir.path().to_path_buf()]);
        assert_eq!(config.compression, CompressionAlgorithm::None);
        assert!(matches!(config.signing, Signing::Hash(SignatureAlgorithm::Sha256)));
        assert!(config.alias.starts_with("box-auto-generated-alias-"));
        assert!(config.scoper_prefix.starts_with("_PhpScoper"));
        assert!(config.parallel);
        assert!(config.check_requirements);
        assert!(!config.dump_autoload);
        assert!(config.banner.unwrap().starts_with("Generated by pharbox"));
    }

    #[test]
    fn test_full_configuration() {
        let dir = project();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/console"), "#!/usr/bin/env php\n<?php").unwrap();

        let config = resolve(
            &dir,
            r##"{
                "$schema": "https://example.org/box.schema.json",
                "main": "bin/console",
                "output": "build/console.phar",
                "alias": "console.phar",
                "banner": ["line one", "line two"],
                "shebang": "#!/usr/bin/php8.3",
                "stub": false,
                "directories": ["src"],
                "compactors": ["Php", "Json"],
                "compression": "gz",
                "algorithm": "sha512",
                "map": [{"src": "lib"}, {"": "app"}],
                "replacements": {"@version@": "1.0.0"},
                "timestamp": 1700000000,
                "chmod": "0755",
                "parallel": false,
                "scoper-prefix": "_Console",
                "exclude-namespaces": ["Composer\\Autoload"]
            }"##,
        )
        .unwrap();

        assert_eq!(config.main, Some(dir.path().join("bin/console")));
        assert_eq!(config.output, dir.path().join("build/console.phar"));
        assert_eq!(config.banner.as_deref(), Some("line one\nline two"));
        assert_eq!(config.shebang.as_deref(), Some("#!/usr/bin/php8.3"));
        assert_eq!(config.stub, StubSource::Default);
        assert_eq!(config.directories, vec![dir.path().join("src")]);
        assert_eq!(config.compression, CompressionAlgorithm::Gz);
        assert!(matches!(config.signing, Signing::Hash(SignatureAlgorithm::Sha512)));
        assert_eq!(config.map_file.map("src/A.php"), "lib/A.php");
        assert_eq!(config.map_file.map("README.md"), "app/README.md");
        assert_eq!(config.timestamp, Some(1_700_000_000));
        assert_eq!(config.chmod, Some(0o755));
        assert!(!config.parallel);
        assert_eq!(config.scoper_prefix, "_Console");
        assert_eq!(config.exclude_namespaces, vec!["Composer\\Autoload".to_string()]);
    }

    #[test]
    fn test_default_output_follows_main() {
        let dir = project();
        fs::write(dir.path().join("app.php"), "<?php").unwrap();
        let config = resolve(&dir, r#"{"main": "app.php"}"#).unwrap();
        assert_eq!(config.output, dir.path().join("app.phar"));

        let config = resolve(&dir, r#"{"main": false}"#).unwrap();
        assert_eq!(config.main, None);
        assert_eq!(config.output, dir.path().join("index.phar"));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let dir = project();

        let cases = [
            (r#"{"compression": "LZ4"}"#, "compression"),
            (r#"{"algorithm": "SHA1"}"#, "algorithm"),
            (r#"{"algorithm": "OPENSSL"}"#, "key"),
            (r#"{"shebang": "/usr/bin/php"}"#, "shebang"),
            (r#"{"chmod": "rwx"}"#, "chmod"),
            (r#"{"replacements": ["@a@"]}"#, "replacements"),
        ];
        for (json, expected_key) in cases {
            match resolve(&dir, json) {
                Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, expected_key),
                other => unreachable!("{json} gave {other:?}"),
            }
        }
    }

    #[test]
    fn test_missing_files() {
        let dir = project();
        assert!(matches!(
            resolve(&dir, r#"{"main": "missing.php"}"#),
            Err(ConfigError::MissingFile { what: "main script", .. })
        ));
        assert!(matches!(
            resolve(&dir, r#"{"algorithm": "OPENSSL", "key": "private.pem"}"#),
            Err(ConfigError::MissingFile { what: "private key", .. })
        ));
    }

    #[test]
    fn test_unknown_key_is_a_parse_error() {
        let dir = project();
        let path = dir.path().join("box.json");
        fs::write(&path, r#"{"outptu": "app.phar"}"#).unwrap();

        assert!(matches!(
            BuildConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_find_prefers_box_json() {
        let dir = project();
        assert_eq!(BuildConfig::find(dir.path()), None);

        fs::write(dir.path().join("box.json.dist"), "{}").unwrap();
        assert_eq!(
            BuildConfig::find(dir.path()),
            Some(dir.path().join("box.json.dist"))
        );

        fs::write(dir.path().join("box.json"), "{}").unwrap();
        assert_eq!(
            BuildConfig::find(dir.path()),
            Some(dir.path().join("box.json"))
        );
    }

    #[test]
    fn test_parse_chmod() {
        assert_eq!(parse_chmod("0755").unwrap(), 0o755);
        assert_eq!(parse_chmod("644").unwrap(), 0o644);
        assert_eq!(parse_chmod("0o700").unwrap(), 0o700);
        assert!(parse_chmod("0").is_ok());
        assert!(parse_chmod("99").is_err());
    }
}
