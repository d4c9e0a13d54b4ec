//! End-to-end archive build
//!
//! The archive is assembled under a temporary name next to the output and
//! renamed into place once it is complete. A failed build leaves the
//! previous output untouched and removes the temporary files.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use pharbox_compactor::Compactors;
use pharbox_formats::phar::{CompressionAlgorithm, DEFAULT_STUB, SignatureType, public_key_path};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::archive_builder::ArchiveBuilder;
use crate::composer::{ComposerFiles, ComposerOrchestrator};
use crate::config::{BuildConfig, Signing, StubSource};
use crate::error::{BuildError, BuildResult, ConfigError};
use crate::requirements;
use crate::stub::StubGenerator;

const VCS_DIRECTORIES: [&str; 4] = [".git", ".hg", ".svn", ".bzr"];

/// Summary of a finished build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileReport {
    /// Archive path
    pub output: PathBuf,
    /// Number of entries
    pub entry_count: usize,
    /// Entry compression actually applied
    pub compression: CompressionAlgorithm,
    /// Signature type
    pub signature: SignatureType,
    /// PHP extension needed to read the archive
    pub required_extension: Option<&'static str>,
    /// Whether the requirements checker was embedded
    pub requirements_checker: bool,
}

/// Removes the temporary archive and its public key unless disarmed
#[derive(Debug)]
struct TemporaryOutput {
    path: PathBuf,
    armed: bool,
}

impl TemporaryOutput {
    fn new(output: &Path) -> Self {
        let name = output
            .file_name()
            .map_or_else(|| "archive".into(), |n| n.to_string_lossy());
        let path = output.with_file_name(format!(".{name}.{}.tmp", std::process::id()));
        Self { path, armed: true }
    }

    fn remove_files(&self) {
        for path in [self.path.clone(), public_key_path(&self.path)] {
            if path.is_file() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Could not remove {}: {e}", path.display());
                }
            }
        }
    }
}

impl Drop for TemporaryOutput {
    fn drop(&mut self) {
        if self.armed {
            self.remove_files();
        }
    }
}

/// Build the archive described by `config`
pub fn compile(
    config: &BuildConfig,
    composer: &dyn ComposerOrchestrator,
) -> BuildResult<CompileReport> {
    let started = Instant::now();
    let mut temporary = TemporaryOutput::new(&config.output);
    temporary.remove_files();
    info!("Building {}", config.output.display());

    let mut builder = ArchiveBuilder::create(&temporary.path, &config.alias)?;
    builder.set_base_path(&config.base_path);
    builder.set_parallel(config.parallel);
    builder.set_timestamp(config.timestamp);
    builder.register_file_mapping(config.map_file.clone());
    builder.register_placeholders(&config.replacements)?;
    builder.register_compactors(&Compactors::from_names_excluding(
        &config.compactors,
        &config.scoper_prefix,
        &config.exclude_namespaces,
    )?);

    let composer_files = ComposerFiles::load(&config.base_path)?;

    builder.start_buffering()?;

    let main = match &config.main {
        Some(main) => Some(add_main_script(&mut builder, main)?),
        None => None,
    };

    let requirements_checker = config.check_requirements && composer_files.json().is_some();
    if requirements_checker {
        let requirements = requirements::collect(&composer_files, config.compression);
        debug!("Embedding a checker for {} requirements", requirements.len());
        for (path, contents) in requirements::checker_files(&requirements) {
            builder.add_internal_file(&path, contents)?;
        }
    }

    let (text_files, binary_files) = collect_files(config, &temporary.path)?;
    info!(
        "Adding {} files and {} binary files",
        text_files.len(),
        binary_files.len()
    );
    builder.add_files(&text_files, false)?;
    builder.add_files(&binary_files, true)?;

    if config.dump_autoload {
        builder.end_buffering_with(|staging, registry, prefix| {
            composer.dump_autoload(staging, registry, prefix)
        })?;
    } else {
        builder.end_buffering()?;
    }

    if config.exclude_composer_files {
        builder.remove_composer_artefacts(&composer_files.vendor_dir())?;
    }

    match &config.stub {
        StubSource::Generated => {
            let mut generator = StubGenerator::new()
                .alias(&config.alias)
                .intercept(config.intercept)
                .check_requirements(requirements_checker);
            if let Some(shebang) = &config.shebang {
                generator = generator.shebang(shebang);
            }
            if let Some(banner) = &config.banner {
                generator = generator.banner(banner);
            }
            if let Some(main) = &main {
                generator = generator.index(main);
            }
            builder.phar_mut().set_stub(generator.generate().as_bytes())?;
        }
        StubSource::Default => builder.phar_mut().set_stub(DEFAULT_STUB.as_bytes())?,
        StubSource::File(path) => builder.register_stub(path)?,
    }

    if let Some(metadata) = &config.metadata {
        builder.set_metadata(metadata)?;
    }

    let (compression, required_extension) = compress_or_keep(&mut builder, config.compression);

    match &config.signing {
        Signing::Hash(algorithm) => builder
            .phar_mut()
            .set_signature_algorithm(algorithm.clone())?,
        Signing::OpenSsl { key, passphrase } => {
            builder.sign_using_file(key, passphrase.as_deref())?;
        }
    }

    let entry_count = builder.count()?;
    let signature = builder.phar().signature_type();
    drop(builder);

    if let Some(mode) = config.chmod {
        set_mode(&temporary.path, mode)?;
    }

    fs::rename(&temporary.path, &config.output).map_err(|e| BuildError::io(&config.output, e))?;
    let key = public_key_path(&config.output);
    let temporary_key = public_key_path(&temporary.path);
    if temporary_key.is_file() {
        fs::rename(&temporary_key, &key).map_err(|e| BuildError::io(&key, e))?;
    } else if key.is_file() {
        debug!("Removing stale public key {}", key.display());
        fs::remove_file(&key).map_err(|e| BuildError::io(&key, e))?;
    }
    temporary.armed = false;

    info!(
        "Built {} with {} entries in {:.2?}",
        config.output.display(),
        entry_count,
        started.elapsed()
    );

    Ok(CompileReport {
        output: config.output.clone(),
        entry_count,
        compression,
        signature,
        required_extension,
        requirements_checker,
    })
}

/// Compress the archive, leaving it uncompressed if that fails
fn compress_or_keep(
    builder: &mut ArchiveBuilder,
    algorithm: CompressionAlgorithm,
) -> (CompressionAlgorithm, Option<&'static str>) {
    if algorithm == CompressionAlgorithm::None {
        return (CompressionAlgorithm::None, None);
    }
    match builder.compress(algorithm) {
        Ok(extension) => (algorithm, extension),
        Err(e) => {
            warn!("The archive is left uncompressed: {e}");
            (CompressionAlgorithm::None, None)
        }
    }
}

fn add_main_script(builder: &mut ArchiveBuilder, main: &Path) -> BuildResult<String> {
    let contents = fs::read(main).map_err(|e| BuildError::io(main, e))?;
    let contents = if contents.starts_with(b"#!") {
        let line_end = contents
            .iter()
            .position(|&b| b == b'\n')
            .map_or(contents.len(), |i| i + 1);
        contents[line_end..].to_vec()
    } else {
        contents
    };

    let logical_path = builder.add_file(main, Some(contents), false)?;
    debug!("Main script is {logical_path}");
    Ok(logical_path)
}

/// Text and binary files to add, sorted and without duplicates
fn collect_files(
    config: &BuildConfig,
    temporary: &Path,
) -> BuildResult<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut skipped: Vec<PathBuf> = vec![
        config.output.clone(),
        public_key_path(&config.output),
        temporary.to_path_buf(),
    ];
    skipped.extend(config.main.iter().cloned());
    skipped.extend(config.config_path.iter().cloned());

    let is_excluded = |path: &Path| {
        skipped.iter().any(|s| s == path) || config.exclude.iter().any(|e| path.starts_with(e))
    };

    let collect = |files: &[PathBuf], directories: &[PathBuf]| -> BuildResult<BTreeSet<PathBuf>> {
        let mut collected = BTreeSet::new();

        for file in files {
            if !file.is_file() {
                return Err(ConfigError::MissingFile {
                    what: "file",
                    path: file.clone(),
                }
                .into());
            }
            if !is_excluded(file) {
                collected.insert(file.clone());
            }
        }

        for directory in directories {
            if !directory.is_dir() {
                return Err(ConfigError::MissingFile {
                    what: "directory",
                    path: directory.clone(),
                }
                .into());
            }
            let walker = WalkDir::new(directory)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| !is_vcs_directory(entry) && !is_excluded(entry.path()));
            for entry in walker {
                let entry = entry?;
                if entry.file_type().is_file() {
                    collected.insert(entry.into_path());
                }
            }
        }

        Ok(collected)
    };

    let binary = collect(&config.files_bin, &config.directories_bin)?;
    let text = collect(&config.files, &config.directories)?;

    Ok((
        text.difference(&binary).cloned().collect(),
        binary.into_iter().collect(),
    ))
}

fn is_vcs_directory(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| VCS_DIRECTORIES.contains(&name))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> BuildResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| BuildError::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> BuildResult<()> {
    debug!("Ignoring chmod {mode:o} for {} on this platform", path.display());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_compression_failure_keeps_archive_uncompressed() {
        let dir = TempDir::new().unwrap();
        let mut builder = ArchiveBuilder::create(dir.path().join("out/app.phar"), "app.phar").unwrap();
        builder.start_buffering().unwrap();
        builder
            .add_file(Path::new("data.txt"), Some(b"abcd".repeat(64)), true)
            .unwrap();
        builder.end_buffering().unwrap();

        // Nowhere left to write the compressed archive
        fs::remove_dir_all(dir.path().join("out")).unwrap();

        assert_eq!(
            compress_or_keep(&mut builder, CompressionAlgorithm::Gz),
            (CompressionAlgorithm::None, None)
        );
        assert!(builder.phar().entries().all(|entry| !entry.is_compressed()));
    }

    #[test]
    fn test_no_compression_is_not_attempted() {
        let dir = TempDir::new().unwrap();
        let mut builder = ArchiveBuilder::create(dir.path().join("app.phar"), "app.phar").unwrap();
        builder.start_buffering().unwrap();
        builder.end_buffering().unwrap();

        assert_eq!(
            compress_or_keep(&mut builder, CompressionAlgorithm::None),
            (CompressionAlgorithm::None, None)
        );
    }

    #[test]
    fn test_temporary_output_name() {
        let mut temporary = TemporaryOutput::new(Path::new("/srv/build/app.phar"));
        temporary.armed = false;
        let name = temporary.path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with(".app.phar."));
        assert!(name.ends_with(".tmp"));
        assert_eq!(temporary.path.parent(), Some(Path::new("/srv/build")));
    }
}
