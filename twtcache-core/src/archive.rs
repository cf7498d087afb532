//! Content-addressed on-disk storage for twts that aged out of the cache.
//!
//! A twt lives at `<root>/<first byte>/<remaining bytes>.json`, both parts
//! hex encoded from the base32-decoded twt hash. The first byte bounds the
//! fan-out to 256 directories. Files are plain JSON, one twt each, so the
//! archive stays readable without the daemon.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use data_encoding::{Encoding, BASE32_NOPAD};
use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::error::ArchiveError;
use crate::twt::Twt;

pub const ARCHIVE_DIR: &str = "archive";

// Truncated hashes end mid-symbol, so the leftover bits are not zero.
static HASH_ENCODING: Lazy<Encoding> = Lazy::new(|| {
    let mut layout = BASE32_NOPAD.specification();
    layout.check_trailing_bits = false;
    layout.encoding().unwrap_or_else(|_| BASE32_NOPAD.clone())
});

/// Storage for archived twts, keyed by [`Twt::hash`].
pub trait Archiver: Send + Sync {
    fn has(&self, hash: &str) -> bool;
    fn get(&self, hash: &str) -> Result<Twt, ArchiveError>;
    /// Stores a twt. Refuses to overwrite an existing entry.
    fn archive(&self, twt: &Twt) -> Result<(), ArchiveError>;
    /// Removes a twt; removing an absent twt is not an error.
    fn del(&self, hash: &str) -> Result<(), ArchiveError>;
    fn count(&self) -> Result<usize, ArchiveError>;
}

/// Archiver that keeps nothing, for setups with archiving turned off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullArchiver;

impl Archiver for NullArchiver {
    fn has(&self, _hash: &str) -> bool {
        false
    }

    fn get(&self, hash: &str) -> Result<Twt, ArchiveError> {
        Err(ArchiveError::NotArchived(hash.to_owned()))
    }

    fn archive(&self, _twt: &Twt) -> Result<(), ArchiveError> {
        Ok(())
    }

    fn del(&self, _hash: &str) -> Result<(), ArchiveError> {
        Ok(())
    }

    fn count(&self) -> Result<usize, ArchiveError> {
        Ok(0)
    }
}

#[derive(Debug, Clone)]
pub struct DiskArchiver {
    root: PathBuf,
}

impl DiskArchiver {
    /// Opens (creating if needed) the archive rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Opens the archive under a data directory.
    pub fn in_data_dir(data_dir: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        Self::new(data_dir.as_ref().join(ARCHIVE_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the twt with `hash` is (or would be) stored.
    pub fn path_for(&self, hash: &str) -> Result<PathBuf, ArchiveError> {
        let bytes = HASH_ENCODING
            .decode(hash.to_uppercase().as_bytes())
            .map_err(|_| ArchiveError::InvalidHash(hash.to_owned()))?;
        if bytes.len() < 2 {
            return Err(ArchiveError::InvalidHash(hash.to_owned()));
        }

        Ok(self
            .root
            .join(hex::encode(&bytes[..1]))
            .join(format!("{}.json", hex::encode(&bytes[1..]))))
    }
}

impl Archiver for DiskArchiver {
    fn has(&self, hash: &str) -> bool {
        match self.path_for(hash) {
            Ok(path) => path.is_file(),
            Err(err) => {
                warn!(hash, error = %err, "error computing archive path");
                false
            }
        }
    }

    fn get(&self, hash: &str) -> Result<Twt, ArchiveError> {
        let path = self.path_for(hash)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(hash, "twt not found in archive");
                return Err(ArchiveError::NotArchived(hash.to_owned()));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    fn archive(&self, twt: &Twt) -> Result<(), ArchiveError> {
        let hash = twt.hash();
        let path = self.path_for(hash)?;
        if path.exists() {
            return Err(ArchiveError::AlreadyArchived(hash.to_owned()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = serde_json::to_vec(twt)?;
        // An existing payload is never replaced, even by a racing writer.
        let file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(ArchiveError::AlreadyArchived(hash.to_owned()));
            }
            Err(err) => return Err(err.into()),
        };
        write_or_remove(file, &path, &data)?;
        Ok(())
    }

    fn del(&self, hash: &str) -> Result<(), ArchiveError> {
        let path = self.path_for(hash)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn count(&self) -> Result<usize, ArchiveError> {
        let mut count = 0;
        for bucket in fs::read_dir(&self.root)? {
            let bucket = bucket?;
            if !bucket.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(bucket.path())? {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

// A partial payload would make the hash look archived forever, so the file
// is removed again when the write fails.
fn write_or_remove<W: Write>(mut file: W, path: &Path, data: &[u8]) -> io::Result<()> {
    let result = file.write_all(data).and_then(|()| file.flush());
    if result.is_err() {
        drop(file);
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "error removing partially archived twt");
        }
    }
    result
}
