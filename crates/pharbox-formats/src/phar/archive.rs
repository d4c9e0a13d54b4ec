//! On-disk archive handle
//!
//! [`Phar`] owns an archive path and its in-memory contents. Outside a
//! buffering session every mutation is written back immediately; inside one
//! the archive is written once, when buffering stops. Writes go through a
//! temporary file in the target directory and are renamed into place.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use pharbox_crypto::PublicKey;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::phar::compression::CompressionAlgorithm;
use crate::phar::constants::DEFAULT_FILE_PERMISSIONS;
use crate::phar::error::{PharError, PharResult};
use crate::phar::file::{PharEntry, PharFile, normalize_entry_name};
use crate::phar::metadata;
use crate::phar::signature::{Signature, SignatureAlgorithm, SignatureType};

/// Path of the public key written next to an OpenSSL-signed archive
pub fn public_key_path(archive: &Path) -> PathBuf {
    let mut path = OsString::from(archive.as_os_str());
    path.push(".pubkey");
    PathBuf::from(path)
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Archive bound to a file on disk
#[derive(Debug)]
pub struct Phar {
    path: PathBuf,
    file: PharFile,
    signature: SignatureAlgorithm,
    buffering: bool,
    timestamp: Option<u32>,
}

impl Phar {
    /// Open `path` if it exists, otherwise start an empty archive there
    ///
    /// Missing parent directories are created. Nothing is written until the
    /// first mutation.
    pub fn create(path: impl Into<PathBuf>, alias: &str) -> PharResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PharError::io(parent, e))?;
        }

        let mut phar = if path.is_file() {
            Self::open(&path)?
        } else {
            Self {
                path,
                file: PharFile::new(),
                signature: SignatureAlgorithm::default(),
                buffering: false,
                timestamp: None,
            }
        };
        phar.file.alias = alias.to_string();
        Ok(phar)
    }

    /// Read an existing archive
    pub fn open(path: impl Into<PathBuf>) -> PharResult<Self> {
        let path = path.into();
        let data = fs::read(&path).map_err(|e| PharError::io(&path, e))?;
        let file = PharFile::parse(&data)?;
        debug!("Opened {} with {} entries", path.display(), file.entries.len());

        Ok(Self {
            path,
            file,
            signature: SignatureAlgorithm::default(),
            buffering: false,
            timestamp: None,
        })
    }

    /// Archive path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// In-memory archive model
    pub fn file(&self) -> &PharFile {
        &self.file
    }

    /// Check whether a buffering session is open
    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// Defer writes until [`Self::stop_buffering`]
    pub fn start_buffering(&mut self) -> PharResult<()> {
        if self.buffering {
            return Err(PharError::State("buffering already started".to_string()));
        }
        self.buffering = true;
        Ok(())
    }

    /// End the buffering session and write the archive
    pub fn stop_buffering(&mut self) -> PharResult<()> {
        if !self.buffering {
            return Err(PharError::State("buffering not started".to_string()));
        }
        self.buffering = false;
        self.flush()
    }

    /// Add or replace an entry
    pub fn add_from_string(&mut self, name: &str, contents: impl Into<Vec<u8>>) -> PharResult<()> {
        let entry = PharEntry::new(name, contents.into(), self.entry_timestamp())?;
        self.file.insert(entry);
        self.write_through()
    }

    /// Add every regular file under `dir`, named by its relative path
    ///
    /// Symlinks are followed. Returns the number of files added.
    pub fn build_from_directory(&mut self, dir: &Path) -> PharResult<usize> {
        let timestamp = self.entry_timestamp();
        let mut count = 0;

        for item in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let item = item?;
            if !item.file_type().is_file() {
                continue;
            }

            let relative = item
                .path()
                .strip_prefix(dir)
                .map_err(|_| PharError::InvalidEntryName(item.path().display().to_string()))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let contents = fs::read(item.path()).map_err(|e| PharError::io(item.path(), e))?;
            self.file.insert(PharEntry::new(&name, contents, timestamp)?);
            count += 1;
        }

        info!("Imported {} files from {}", count, dir.display());
        self.write_through()?;
        Ok(count)
    }

    /// Remove an entry
    pub fn delete(&mut self, name: &str) -> PharResult<()> {
        let name = normalize_entry_name(name)?;
        if self.file.entries.remove(&name).is_none() {
            return Err(PharError::EntryNotFound(name));
        }
        self.write_through()
    }

    /// Check whether an entry exists
    pub fn contains(&self, name: &str) -> bool {
        normalize_entry_name(name).is_ok_and(|name| self.file.entries.contains_key(&name))
    }

    /// Look up an entry
    pub fn get(&self, name: &str) -> PharResult<&PharEntry> {
        let name = normalize_entry_name(name)?;
        self.file
            .entries
            .get(&name)
            .ok_or(PharError::EntryNotFound(name))
    }

    /// Iterate entries in name order
    pub fn entries(&self) -> impl Iterator<Item = &PharEntry> {
        self.file.entries.values()
    }

    /// Number of entries
    pub fn count(&self) -> usize {
        self.file.entries.len()
    }

    /// Set the stub, cut after `__HALT_COMPILER();`
    pub fn set_stub(&mut self, stub: &[u8]) -> PharResult<()> {
        self.file.set_stub(stub)?;
        self.write_through()
    }

    /// Current stub
    pub fn stub(&self) -> &[u8] {
        &self.file.stub
    }

    /// Current alias
    pub fn alias(&self) -> &str {
        &self.file.alias
    }

    /// Set archive metadata, stored PHP-serialized
    pub fn set_metadata(&mut self, value: &serde_json::Value) -> PharResult<()> {
        self.file.metadata = metadata::serialize(value);
        self.write_through()
    }

    /// Serialized archive metadata
    pub fn metadata(&self) -> &[u8] {
        &self.file.metadata
    }

    /// Compress every entry with `algorithm`
    ///
    /// If the archive cannot be written the entries keep their previous
    /// compression.
    pub fn compress_files(&mut self, algorithm: CompressionAlgorithm) -> PharResult<()> {
        if !algorithm.is_available() {
            return Err(algorithm.unsupported_error());
        }

        let previous: Vec<CompressionAlgorithm> = self
            .file
            .entries
            .values_mut()
            .map(|entry| std::mem::replace(&mut entry.compression, algorithm))
            .collect();
        debug!("Marked {} entries for {algorithm}", previous.len());

        if let Err(e) = self.write_through() {
            for (entry, compression) in self.file.entries.values_mut().zip(previous) {
                entry.compression = compression;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Store every entry uncompressed
    pub fn decompress_files(&mut self) -> PharResult<()> {
        self.compress_files(CompressionAlgorithm::None)
    }

    /// Signature used on the next write
    pub fn set_signature_algorithm(&mut self, algorithm: SignatureAlgorithm) -> PharResult<()> {
        self.signature = algorithm;
        self.write_through()
    }

    /// Type of the signature used on the next write
    pub fn signature_type(&self) -> SignatureType {
        self.signature.signature_type()
    }

    /// Fix the modification time given to entries added from now on
    pub fn set_timestamp(&mut self, timestamp: Option<u32>) {
        self.timestamp = timestamp;
    }

    /// Check the signature of the archive as written on disk
    ///
    /// OpenSSL signatures are checked against `public_key`, or the
    /// `<archive>.pubkey` sidecar when none is given.
    pub fn verify(&self, public_key: Option<&PublicKey>) -> PharResult<Signature> {
        let data = fs::read(&self.path).map_err(|e| PharError::io(&self.path, e))?;
        let signature = Signature::parse(&data)?;

        let sidecar;
        let key = match public_key {
            Some(key) => Some(key),
            None if signature.kind.is_openssl() => {
                let key_path = public_key_path(&self.path);
                if !key_path.is_file() {
                    return Err(PharError::MissingPublicKey(key_path));
                }
                let pem =
                    fs::read_to_string(&key_path).map_err(|e| PharError::io(&key_path, e))?;
                sidecar = PublicKey::from_pem(&pem)?;
                Some(&sidecar)
            }
            None => None,
        };

        if signature.verify(&data, key)? {
            Ok(signature)
        } else {
            Err(PharError::InvalidSignature(format!(
                "{} signature does not match the archive contents",
                signature.kind
            )))
        }
    }

    /// Write the archive atomically
    pub fn flush(&self) -> PharResult<()> {
        let data = self.file.build(&self.signature)?;

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut temp = NamedTempFile::new_in(parent).map_err(|e| PharError::io(parent, e))?;
        temp.write_all(&data)
            .map_err(|e| PharError::io(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| PharError::io(temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| PharError::io(&self.path, e.error))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(DEFAULT_FILE_PERMISSIONS))
                .map_err(|e| PharError::io(&self.path, e))?;
        }

        debug!(
            "Wrote {} ({} bytes, {} entries, {})",
            self.path.display(),
            data.len(),
            self.file.entries.len(),
            self.signature.signature_type()
        );
        Ok(())
    }

    fn write_through(&self) -> PharResult<()> {
        if self.buffering {
            Ok(())
        } else {
            self.flush()
        }
    }

    fn entry_timestamp(&self) -> u32 {
        self.timestamp.unwrap_or_else(now)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_unbuffered_writes_immediately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/app.phar");

        let mut phar = Phar::create(&path, "app.phar").expect("create");
        assert!(!path.exists());

        phar.add_from_string("index.php", "<?php echo 1;").expect("add");
        assert!(path.is_file());

        let reopened = Phar::open(&path).expect("open");
        assert_eq!(reopened.alias(), "app.phar");
        assert_eq!(reopened.get("index.php").unwrap().contents, b"<?php echo 1;");
    }

    #[test]
    fn test_buffered_writes_on_stop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.phar");

        let mut phar = Phar::create(&path, "app.phar").expect("create");
        phar.start_buffering().expect("start");
        phar.add_from_string("a.php", "a").expect("add");
        phar.add_from_string("b.php", "b").expect("add");
        assert!(!path.exists());

        phar.stop_buffering().expect("stop");
        assert_eq!(Phar::open(&path).expect("open").count(), 2);
    }

    #[test]
    fn test_buffering_state_errors() {
        let dir = TempDir::new().unwrap();
        let mut phar = Phar::create(dir.path().join("a.phar"), "a.phar").expect("create");

        assert!(matches!(phar.stop_buffering(), Err(PharError::State(_))));
        phar.start_buffering().expect("start");
        assert!(matches!(phar.start_buffering(), Err(PharError::State(_))));
    }

    #[test]
    fn test_build_from_directory_uses_forward_slashes() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        fs::create_dir_all(source.join("Nested/Deep")).unwrap();
        fs::write(source.join("top.php"), "top").unwrap();
        fs::write(source.join("Nested/Deep/leaf.php"), "leaf").unwrap();

        let mut phar = Phar::create(dir.path().join("app.phar"), "app.phar").expect("create");
        phar.start_buffering().unwrap();
        let count = phar.build_from_directory(&source).expect("import");
        phar.stop_buffering().unwrap();

        assert_eq!(count, 2);
        let names: Vec<_> = phar.entries().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["Nested/Deep/leaf.php", "top.php"]);
    }

    #[test]
    fn test_fixed_timestamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.phar");
        let mut phar = Phar::create(&path, "app.phar").expect("create");
        phar.set_timestamp(Some(1_234_567));
        phar.add_from_string("a.php", "a").unwrap();

        assert_eq!(Phar::open(&path).unwrap().get("a.php").unwrap().timestamp, 1_234_567);
    }

    #[test]
    fn test_delete_missing_entry() {
        let dir = TempDir::new().unwrap();
        let mut phar = Phar::create(dir.path().join("a.phar"), "a.phar").expect("create");
        assert!(matches!(phar.delete("nope.php"), Err(PharError::EntryNotFound(_))));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.phar");
        let mut phar = Phar::create(&path, "app.phar").expect("create");
        phar.add_from_string("a.php", "payload").unwrap();

        let signature = phar.verify(None).expect("verify");
        assert_eq!(signature.kind, SignatureType::Sha256);

        let mut data = fs::read(&path).unwrap();
        let position = data.windows(7).position(|w| w == b"payload").unwrap();
        data[position] = b'P';
        fs::write(&path, data).unwrap();
        assert!(matches!(phar.verify(None), Err(PharError::InvalidSignature(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_written_archive_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.phar");
        let mut phar = Phar::create(&path, "app.phar").expect("create");
        phar.add_from_string("a.php", "a").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_public_key_path() {
        assert_eq!(
            public_key_path(Path::new("/tmp/app.phar")),
            PathBuf::from("/tmp/app.phar.pubkey")
        );
    }
}
