//! Path mapping and compaction of file batches
//!
//! [`TaskContext`] carries the inputs every task needs (base path, path
//! mapper, compactor chain). It is built once per batch and shared by
//! reference with the workers, so no state outlives the batch.
//!
//! In parallel mode each task runs on a fork of the compactor chain. The
//! scoper of a fork starts with an empty registry, so what it records after
//! one file is that file's partial registry. Partials are unioned once every
//! task has finished.

use std::fs;
use std::path::{Path, PathBuf};

use pharbox_compactor::{Compactors, MapFile, SymbolsRegistry};
use pharbox_formats::phar::normalize_entry_name;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{BuildError, BuildResult};

/// Upper bound on worker threads for one batch
pub const DEFAULT_WORKER_LIMIT: usize = 32;

/// Worker count for this host, capped at [`DEFAULT_WORKER_LIMIT`]
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .min(DEFAULT_WORKER_LIMIT)
}

/// A file after mapping and compaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedFile {
    /// Path inside the archive
    pub logical_path: String,
    /// Contents to store
    pub contents: Vec<u8>,
    /// Symbols the scoper recorded for this file (parallel mode only)
    pub symbols: SymbolsRegistry,
}

/// Immutable inputs shared by every task of a batch
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    base_path: &'a Path,
    map_file: &'a MapFile,
    compactors: &'a Compactors,
}

impl<'a> TaskContext<'a> {
    /// Context for one batch
    pub const fn new(base_path: &'a Path, map_file: &'a MapFile, compactors: &'a Compactors) -> Self {
        Self {
            base_path,
            map_file,
            compactors,
        }
    }

    /// `/`-separated path relative to the base path
    ///
    /// Paths outside the base path are used as given.
    pub fn relative_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(self.base_path).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Archive path for `path`
    pub fn logical_path(&self, path: &Path) -> BuildResult<String> {
        let mapped = self.map_file.map(&self.relative_path(path));
        Ok(normalize_entry_name(&mapped)?)
    }

    /// Read `path` unless contents are given
    pub fn read_contents(&self, path: &Path, contents: Option<Vec<u8>>) -> BuildResult<Vec<u8>> {
        match contents {
            Some(contents) => Ok(contents),
            None => {
                let full = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.base_path.join(path)
                };
                fs::read(&full).map_err(|e| BuildError::io(full, e))
            }
        }
    }

    /// Map and compact one text file with `compactors`
    ///
    /// Contents that are not valid UTF-8 only get placeholder substitution.
    pub fn process_with(
        &self,
        compactors: &Compactors,
        path: &Path,
        contents: Option<Vec<u8>>,
    ) -> BuildResult<(String, Vec<u8>)> {
        let logical_path = self.logical_path(path)?;
        let contents = self.read_contents(path, contents)?;
        let compacted = compactors.compact_bytes(&logical_path, &contents)?;
        Ok((logical_path, compacted))
    }

    /// Map and compact one text file with the shared chain
    pub fn process(&self, path: &Path, contents: Option<Vec<u8>>) -> BuildResult<(String, Vec<u8>)> {
        self.process_with(self.compactors, path, contents)
    }

    /// Map and compact one file on a forked chain, returning its symbols
    pub fn process_isolated(&self, path: &Path) -> BuildResult<ProcessedFile> {
        let compactors = self.compactors.fork();
        let (logical_path, contents) = self.process_with(&compactors, path, None)?;
        let symbols = compactors
            .scoper()
            .map(|scoper| scoper.symbols_registry())
            .unwrap_or_default();

        Ok(ProcessedFile {
            logical_path,
            contents,
            symbols,
        })
    }
}

/// Process files one after the other on the shared chain
///
/// Stops at the first failure.
pub fn process_sequentially(
    context: &TaskContext<'_>,
    paths: &[PathBuf],
) -> BuildResult<Vec<ProcessedFile>> {
    paths
        .iter()
        .map(|path| -> BuildResult<ProcessedFile> {
            let (logical_path, contents) = context.process(path, None)?;
            Ok(ProcessedFile {
                logical_path,
                contents,
                symbols: SymbolsRegistry::new(),
            })
        })
        .collect()
}

/// Process files on a bounded worker pool
///
/// Every task runs to completion. If any failed, the distinct failure
/// messages are returned together and no result is kept. On success the
/// union of the partial registries is returned with the files.
pub fn process_in_parallel(
    context: &TaskContext<'_>,
    paths: &[PathBuf],
    workers: usize,
) -> BuildResult<(Vec<ProcessedFile>, SymbolsRegistry)> {
    let workers = workers.clamp(1, DEFAULT_WORKER_LIMIT);
    info!("Processing {} files on {} workers", paths.len(), workers);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|index| format!("pharbox-worker-{index}"))
        .build()?;

    let results: Vec<BuildResult<ProcessedFile>> = pool.install(|| {
        paths
            .par_iter()
            .map(|path| context.process_isolated(path))
            .collect()
    });

    let mut files = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(file) => files.push(file),
            Err(e) => failures.push(e.to_string()),
        }
    }

    if !failures.is_empty() {
        return Err(BuildError::aggregate(failures));
    }

    let registry = SymbolsRegistry::union(files.iter().map(|file| &file.symbols));
    debug!(
        "Parallel batch done: {} files, {} symbols",
        files.len(),
        registry.count()
    );
    Ok((files, registry))
}
