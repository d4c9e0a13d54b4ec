//! Archive assembly
//!
//! [`ArchiveBuilder`] wraps a [`Phar`] handle with a buffering session.
//! Files added during the session are mapped and compacted, then held in
//! memory keyed by their archive path. Ending the session writes them to a
//! staging directory, gives a hook the chance to regenerate autoload files
//! there, and imports the directory into the archive in one write.
//!
//! Compression, signing and the other archive-wide operations require the
//! builder to be idle.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use pharbox_compactor::{Compactors, MapFile, Placeholder, Scoper, SymbolsRegistry};
use pharbox_crypto::PrivateKey;
use pharbox_formats::phar::{
    CompressionAlgorithm, Phar, PharError, SignatureAlgorithm, normalize_entry_name,
    public_key_path,
};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::{BuildError, BuildResult};
use crate::parallel::{self, ProcessedFile, TaskContext};

/// Entry added when a session buffered nothing; an archive cannot be empty
pub const EMPTY_ARCHIVE_ENTRY: &str = ".box_empty";

const EMPTY_ARCHIVE_CONTENTS: &str =
    "A PHAR cannot be empty so pharbox adds this file to ensure the PHAR is created still.";

/// Builds an archive through a buffering session
#[derive(Debug)]
pub struct ArchiveBuilder {
    phar: Phar,
    base_path: PathBuf,
    buffered: BTreeMap<String, Vec<u8>>,
    compactors: Compactors,
    placeholder: Placeholder,
    map_file: MapFile,
    buffering: bool,
    parallel: bool,
    workers: usize,
}

impl ArchiveBuilder {
    /// Builder for a new archive at `path`
    ///
    /// The parent directory is created if needed. Relative file paths are
    /// resolved against the current directory until
    /// [`Self::set_base_path`] is called.
    pub fn create(path: impl Into<PathBuf>, alias: &str) -> BuildResult<Self> {
        let phar = Phar::create(path, alias)?;
        Self::from_phar(phar)
    }

    /// Builder around an existing handle
    pub fn from_phar(phar: Phar) -> BuildResult<Self> {
        let base_path = std::env::current_dir().map_err(|e| BuildError::io(".", e))?;
        let placeholder = Placeholder::default();

        Ok(Self {
            phar,
            base_path,
            buffered: BTreeMap::new(),
            compactors: Compactors::default().with_placeholder(placeholder.clone()),
            placeholder,
            map_file: MapFile::default(),
            buffering: false,
            parallel: true,
            workers: parallel::default_worker_count(),
        })
    }

    /// Directory archive paths are relative to
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Set the directory archive paths are relative to
    pub fn set_base_path(&mut self, base_path: impl Into<PathBuf>) {
        self.base_path = base_path.into();
    }

    /// Allow or forbid parallel compaction
    ///
    /// Even when allowed, batches only run in parallel if the chain holds a
    /// scoper.
    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    /// Set the number of worker threads used by parallel batches
    pub fn set_workers(&mut self, workers: usize) {
        self.workers = workers.clamp(1, parallel::DEFAULT_WORKER_LIMIT);
    }

    /// Fix the modification time of entries written from now on
    pub fn set_timestamp(&mut self, timestamp: Option<u32>) {
        self.phar.set_timestamp(timestamp);
    }

    /// Check whether a buffering session is open
    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// Open a buffering session
    pub fn start_buffering(&mut self) -> BuildResult<()> {
        if self.buffering {
            return Err(BuildError::State(
                "the buffering must be ended before starting it again".to_string(),
            ));
        }
        debug!("Started buffering {}", self.phar.path().display());
        self.buffering = true;
        Ok(())
    }

    /// Add one file and return its archive path
    ///
    /// Without `contents` the file is read from disk. Binary files are stored
    /// verbatim; text files go through the compactor chain.
    pub fn add_file(
        &mut self,
        path: &Path,
        contents: Option<Vec<u8>>,
        binary: bool,
    ) -> BuildResult<String> {
        self.require_buffering("add files")?;

        let context = TaskContext::new(&self.base_path, &self.map_file, &self.compactors);
        let (logical_path, contents) = if binary {
            (context.logical_path(path)?, context.read_contents(path, contents)?)
        } else {
            context.process(path, contents)?
        };

        debug!("Buffered {logical_path} ({} bytes)", contents.len());
        self.buffered.insert(logical_path.clone(), contents);
        Ok(logical_path)
    }

    /// Add a batch of files read from disk and return their archive paths
    ///
    /// Either every file of the batch is buffered or none is.
    pub fn add_files(&mut self, paths: &[PathBuf], binary: bool) -> BuildResult<Vec<String>> {
        self.require_buffering("add files")?;

        let files = {
            let context = TaskContext::new(&self.base_path, &self.map_file, &self.compactors);

            if binary {
                paths
                    .iter()
                    .map(|path| -> BuildResult<ProcessedFile> {
                        Ok(ProcessedFile {
                            logical_path: context.logical_path(path)?,
                            contents: context.read_contents(path, None)?,
                            symbols: SymbolsRegistry::new(),
                        })
                    })
                    .collect::<BuildResult<Vec<_>>>()?
            } else if self.parallel && self.compactors.has_scoper() {
                let (files, registry) =
                    parallel::process_in_parallel(&context, paths, self.workers)?;
                if let Some(scoper) = self.compactors.scoper() {
                    scoper.record_symbols(&registry);
                }
                files
            } else {
                debug!("Processing {} files sequentially", paths.len());
                parallel::process_sequentially(&context, paths)?
            }
        };

        let logical_paths = files
            .into_iter()
            .map(|file| {
                self.buffered.insert(file.logical_path.clone(), file.contents);
                file.logical_path
            })
            .collect();
        Ok(logical_paths)
    }

    /// Add a file under an exact archive path, bypassing mapping and compaction
    pub fn add_internal_file(&mut self, logical_path: &str, contents: impl Into<Vec<u8>>) -> BuildResult<()> {
        self.require_buffering("add files")?;
        let logical_path = normalize_entry_name(logical_path)?;
        self.buffered.insert(logical_path, contents.into());
        Ok(())
    }

    /// Close the session and write the buffered files into the archive
    pub fn end_buffering(&mut self) -> BuildResult<()> {
        self.end_buffering_with(|_, _, _| Ok(()))
    }

    /// Close the session, calling `hook` on the staging directory first
    ///
    /// The hook receives the staging directory, the symbols recorded by the
    /// scoper and the scoper prefix (empty without a scoper). Files it leaves
    /// in the directory end up in the archive. The staging directory is
    /// removed whatever the outcome, and the builder is idle afterwards.
    pub fn end_buffering_with<F>(&mut self, hook: F) -> BuildResult<()>
    where
        F: FnOnce(&Path, &SymbolsRegistry, &str) -> BuildResult<()>,
    {
        self.require_buffering("end the buffering")?;
        self.buffering = false;

        let mut files = std::mem::take(&mut self.buffered);
        if files.is_empty() {
            debug!("Nothing buffered, adding {EMPTY_ARCHIVE_ENTRY}");
            files.insert(
                EMPTY_ARCHIVE_ENTRY.to_string(),
                EMPTY_ARCHIVE_CONTENTS.as_bytes().to_vec(),
            );
        }

        let staging = TempDir::new().map_err(|e| BuildError::io(std::env::temp_dir(), e))?;
        for (logical_path, contents) in &files {
            let target = staging.path().join(logical_path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
            }
            fs::write(&target, contents).map_err(|e| BuildError::io(&target, e))?;
        }
        debug!(
            "Staged {} files in {}",
            files.len(),
            staging.path().display()
        );

        let (registry, prefix) = self.compactors.scoper().map_or_else(
            || (SymbolsRegistry::new(), String::new()),
            |scoper| (scoper.symbols_registry(), scoper.prefix().to_string()),
        );
        hook(staging.path(), &registry, &prefix)?;

        let count = self.phar.build_from_directory(staging.path())?;
        info!("Added {count} files to {}", self.phar.path().display());
        Ok(())
    }

    /// Delete the Composer files that have no use at runtime
    ///
    /// Removes `composer.json`, `composer.lock` and
    /// `<vendor_dir>/composer/installed.json`, at their mapped paths, when
    /// present.
    pub fn remove_composer_artefacts(&mut self, vendor_dir: &str) -> BuildResult<()> {
        self.require_idle("remove the Composer artefacts")?;

        let vendor_dir = vendor_dir.trim_end_matches('/');
        let candidates = [
            "composer.json".to_string(),
            "composer.lock".to_string(),
            format!("{vendor_dir}/composer/installed.json"),
        ];

        let present: Vec<String> = candidates
            .iter()
            .map(|path| self.map_file.map(path))
            .filter(|path| self.phar.contains(path))
            .collect();
        if present.is_empty() {
            return Ok(());
        }

        self.phar.start_buffering()?;
        for path in &present {
            debug!("Removing Composer artefact {path}");
            self.phar.delete(path)?;
        }
        self.phar.stop_buffering()?;
        Ok(())
    }

    /// Compress every entry, or decompress them all with
    /// [`CompressionAlgorithm::None`]
    ///
    /// Returns the PHP extension the archive now needs at runtime, if any.
    pub fn compress(&mut self, algorithm: CompressionAlgorithm) -> BuildResult<Option<&'static str>> {
        self.require_idle("compress the archive")?;

        if !algorithm.is_available() {
            return Err(BuildError::Unsupported {
                capability: format!("{algorithm} compression"),
                remediation: format!(
                    "rebuild pharbox with the \"{}\" cargo feature enabled",
                    algorithm.cargo_feature().unwrap_or("default")
                ),
            });
        }

        let count = self.phar.count();
        let result = match algorithm {
            CompressionAlgorithm::None => self.phar.decompress_files(),
            _ => self.phar.compress_files(algorithm),
        };
        result.map_err(|e| {
            if is_too_many_open_files(&e) {
                BuildError::TooManyOpenFiles { count }
            } else {
                e.into()
            }
        })?;

        info!("Compressed {count} entries with {algorithm}");
        Ok(algorithm.required_extension())
    }

    /// Replace the compactor chain
    ///
    /// Placeholder compactors in `compactors` are dropped; the builder's own
    /// placeholder always runs first.
    pub fn register_compactors(&mut self, compactors: &Compactors) {
        self.compactors = compactors.with_placeholder(self.placeholder.clone());
        debug!("Registered compactors {:?}", self.compactors.names());
    }

    /// Replace the placeholders from a JSON object of token to scalar value
    pub fn register_placeholders(&mut self, placeholders: &serde_json::Value) -> BuildResult<()> {
        let placeholder = Placeholder::from_json(placeholders)?;
        self.compactors = self.compactors.with_placeholder(placeholder.clone());
        self.placeholder = placeholder;
        Ok(())
    }

    /// Replace the path mapping rules
    pub fn register_file_mapping(&mut self, map_file: MapFile) {
        self.map_file = map_file;
    }

    /// Use the file at `path` as stub, after placeholder substitution
    pub fn register_stub(&mut self, path: &Path) -> BuildResult<()> {
        let contents = fs::read(path).map_err(|e| BuildError::io(path, e))?;
        let stub = self.placeholder.replace_bytes(&contents)?;
        self.phar.set_stub(&stub)?;
        Ok(())
    }

    /// Store archive metadata
    pub fn set_metadata(&mut self, metadata: &serde_json::Value) -> BuildResult<()> {
        self.phar.set_metadata(metadata)?;
        Ok(())
    }

    /// Sign the archive with an RSA private key
    ///
    /// The public key is written to `<archive>.pubkey`, where PHP looks for
    /// it. Nothing is written if the key cannot be loaded.
    pub fn sign(&mut self, private_key_pem: &str, passphrase: Option<&str>) -> BuildResult<()> {
        let key = PrivateKey::from_pem(private_key_pem, passphrase)?;

        let pubkey_path = public_key_path(self.phar.path());
        if pubkey_path.exists() && !pubkey_path.is_file() {
            return Err(BuildError::PublicKeyPath(pubkey_path));
        }

        let public_pem = key.public_key().to_pem()?;
        fs::write(&pubkey_path, public_pem).map_err(|e| BuildError::io(&pubkey_path, e))?;

        info!(
            "Signing {} with a {}-bit RSA key",
            self.phar.path().display(),
            key.bits()
        );
        self.phar
            .set_signature_algorithm(SignatureAlgorithm::OpenSsl(key))?;
        Ok(())
    }

    /// Sign the archive with the RSA private key stored at `path`
    pub fn sign_using_file(&mut self, path: &Path, passphrase: Option<&str>) -> BuildResult<()> {
        let pem = fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
        self.sign(&pem, passphrase)
    }

    /// Number of entries in the archive
    pub fn count(&self) -> BuildResult<usize> {
        self.require_idle("count the archive entries")?;
        Ok(self.phar.count())
    }

    /// Current compactor chain
    pub fn compactors(&self) -> &Compactors {
        &self.compactors
    }

    /// Scoper of the current chain
    pub fn scoper(&self) -> Option<&dyn Scoper> {
        self.compactors.scoper()
    }

    /// Underlying archive handle
    pub fn phar(&self) -> &Phar {
        &self.phar
    }

    /// Underlying archive handle, mutable
    pub fn phar_mut(&mut self) -> &mut Phar {
        &mut self.phar
    }

    fn require_buffering(&self, action: &str) -> BuildResult<()> {
        if self.buffering {
            Ok(())
        } else {
            Err(BuildError::State(format!(
                "cannot {action}: the buffering must be started first"
            )))
        }
    }

    fn require_idle(&self, action: &str) -> BuildResult<()> {
        if self.buffering {
            Err(BuildError::State(format!(
                "cannot {action}: the buffering must be ended first"
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(unix)]
fn is_too_many_open_files(error: &PharError) -> bool {
    error.raw_os_error() == Some(libc::EMFILE)
}

#[cfg(not(unix))]
fn is_too_many_open_files(_error: &PharError) -> bool {
    false
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn builder(dir: &TempDir) -> ArchiveBuilder {
        let mut builder = ArchiveBuilder::create(dir.path().join("out/test.phar"), "test.phar")
            .expect("builder");
        builder.set_base_path(dir.path());
        builder
    }

    #[test]
    fn test_create_makes_parent_directory() {
        let dir = TempDir::new().unwrap();
        let builder = builder(&dir);
        assert!(dir.path().join("out").is_dir());
        assert_eq!(builder.phar().alias(), "test.phar");
    }

    #[test]
    fn test_buffering_state_machine() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir);

        assert!(builder.end_buffering().unwrap_err().is_state_error());
        assert!(
            builder
                .add_file(Path::new("a.php"), Some(b"<?php".to_vec()), false)
                .unwrap_err()
                .is_state_error()
        );

        builder.start_buffering().unwrap();
        assert!(builder.start_buffering().unwrap_err().is_state_error());
        assert!(builder.count().unwrap_err().is_state_error());
        assert!(
            builder
                .compress(CompressionAlgorithm::Gz)
                .unwrap_err()
                .is_state_error()
        );
        assert!(
            builder
                .remove_composer_artefacts("vendor")
                .unwrap_err()
                .is_state_error()
        );

        builder.end_buffering().unwrap();
        assert!(!builder.is_buffering());
        assert_eq!(builder.count().unwrap(), 1);
    }

    #[test]
    fn test_hook_sees_staged_files_and_can_add_more() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir);

        builder.start_buffering().unwrap();
        builder
            .add_file(Path::new("src/main.php"), Some(b"<?php".to_vec()), false)
            .unwrap();

        let mut seen_prefix = None;
        builder
            .end_buffering_with(|staging, registry, prefix| {
                assert!(staging.join("src/main.php").is_file());
                assert!(registry.is_empty());
                seen_prefix = Some(prefix.to_string());
                fs::create_dir_all(staging.join("vendor")).unwrap();
                fs::write(staging.join("vendor/autoload.php"), "<?php").unwrap();
                Ok(())
            })
            .unwrap();

        assert_eq!(seen_prefix.as_deref(), Some(""));
        assert!(builder.phar().contains("vendor/autoload.php"));
        assert_eq!(builder.count().unwrap(), 2);
    }

    #[test]
    fn test_hook_failure_leaves_builder_idle() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir);

        builder.start_buffering().unwrap();
        let err = builder
            .end_buffering_with(|_, _, _| Err(BuildError::Composer("exit code 1".to_string())))
            .unwrap_err();

        assert!(matches!(err, BuildError::Composer(_)));
        assert!(!builder.is_buffering());
        builder.start_buffering().unwrap();
    }

    #[test]
    fn test_register_compactors_keeps_placeholder_first() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir);

        builder
            .register_placeholders(&json!({"@name@": "pharbox"}))
            .unwrap();
        builder.register_compactors(&Compactors::from_names(&["Json"], "Scoped").unwrap());

        assert_eq!(builder.compactors().names(), vec!["placeholder", "json"]);

        builder.start_buffering().unwrap();
        let logical = builder
            .add_file(
                Path::new("app.json"),
                Some(b"{ \"name\": \"@name@\" }".to_vec()),
                false,
            )
            .unwrap();
        builder.end_buffering().unwrap();

        assert_eq!(
            builder.phar().get(&logical).unwrap().contents,
            br#"{"name":"pharbox"}"#
        );
    }

    #[test]
    fn test_invalid_placeholder_value() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir);

        let err = builder
            .register_placeholders(&json!({"@list@": [1, 2]}))
            .unwrap_err();
        assert!(matches!(err, BuildError::Compactor(_)));
    }

    #[test]
    fn test_register_stub_replaces_placeholders() {
        let dir = TempDir::new().unwrap();
        let stub_path = dir.path().join("stub.php");
        fs::write(
            &stub_path,
            "#!/usr/bin/env php\n<?php // @version@\n__HALT_COMPILER(); ?>",
        )
        .unwrap();

        let mut builder = builder(&dir);
        builder
            .register_placeholders(&json!({"@version@": "3.1.0"}))
            .unwrap();
        builder.register_stub(&stub_path).unwrap();

        let stub = String::from_utf8(builder.phar().stub().to_vec()).unwrap();
        assert!(stub.contains("// 3.1.0"));
        assert!(stub.ends_with("__HALT_COMPILER(); ?>\r\n"));
    }

    #[test]
    fn test_remove_composer_artefacts_uses_mapping() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir);
        builder.register_file_mapping(MapFile::new(vec![(String::new(), "app".to_string())]));

        builder.start_buffering().unwrap();
        for path in [
            "composer.json",
            "composer.lock",
            "libs/composer/installed.json",
            "libs/autoload.php",
        ] {
            builder
                .add_file(Path::new(path), Some(b"{}".to_vec()), true)
                .unwrap();
        }
        builder.end_buffering().unwrap();
        assert_eq!(builder.count().unwrap(), 4);

        builder.remove_composer_artefacts("libs/").unwrap();

        let names: Vec<&str> = builder.phar().entries().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["app/libs/autoload.php"]);
    }

    #[test]
    fn test_sign_refuses_directory_at_pubkey_path() {
        let dir = TempDir::new().unwrap();
        let mut builder = builder(&dir);
        fs::create_dir_all(dir.path().join("out/test.phar.pubkey")).unwrap();

        let pem = include_str!("../../pharbox-crypto/test_fixtures/private.pem");
        let err = builder.sign(pem, None).unwrap_err();
        assert!(matches!(err, BuildError::PublicKeyPath(_)));
    }
}
