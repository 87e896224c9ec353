use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid content hash: {0}")]
    InvalidHash(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Original,
    Thumb,
}

impl StorageKind {
    fn dir(&self) -> &'static str {
        match self {
            StorageKind::Original => "original",
            StorageKind::Thumb => "thumb",
        }
    }
}

/// Content-addressed filesystem placement of originals and thumbnails.
///
/// Paths have the shape `<root>/<kind>/<hash[0..2]>/<hash[2..4]>/<hash>[.<ext>]`
/// so no directory collects more than a few thousand entries. Writes go
/// through a temp file in the destination directory followed by an atomic
/// rename; once a path is observable its bytes are final. Re-writing an
/// already-present hash is a no-op. The core never deletes.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(
        &self,
        kind: StorageKind,
        hash: &str,
        ext: Option<&str>,
    ) -> Result<PathBuf, StorageError> {
        if hash.len() < 4 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidHash(hash.to_string()));
        }
        let file_name = match ext {
            Some(ext) => format!("{}.{}", hash, ext),
            None => hash.to_string(),
        };
        Ok(self
            .root
            .join(kind.dir())
            .join(&hash[0..2])
            .join(&hash[2..4])
            .join(file_name))
    }

    /// Write `bytes` under its content hash. Idempotent: a hash that is
    /// already stored is left untouched and its path returned.
    pub fn write(
        &self,
        kind: StorageKind,
        hash: &str,
        ext: Option<&str>,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let target = self.path_for(kind, hash, ext)?;
        if target.exists() {
            return Ok(target);
        }

        let parent = target
            .parent()
            .expect("content-addressed path always has a parent");
        fs::create_dir_all(parent).map_err(|source| StorageError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(|source| StorageError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        tmp.write_all(bytes).map_err(|source| StorageError::Io {
            path: tmp.path().to_path_buf(),
            source,
        })?;
        tmp.as_file().sync_all().map_err(|source| StorageError::Io {
            path: tmp.path().to_path_buf(),
            source,
        })?;
        tmp.persist(&target).map_err(|e| StorageError::Io {
            path: target.clone(),
            source: e.error,
        })?;

        Ok(target)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn hash_is_lowercase_hex() {
        let hash = sha256_hex(b"hello");
        assert_eq!(hash.len(), 64);
        assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn path_shards_by_hash_prefix() {
        let storage = Storage::new("/srv/photos");
        let hash = "abcdef0123456789";
        let path = storage
            .path_for(StorageKind::Original, hash, Some("jpg"))
            .unwrap();
        assert_eq!(
            path,
            PathBuf::from("/srv/photos/original/ab/cd/abcdef0123456789.jpg")
        );

        let thumb = storage.path_for(StorageKind::Thumb, hash, None).unwrap();
        assert_eq!(thumb, PathBuf::from("/srv/photos/thumb/ab/cd/abcdef0123456789"));
    }

    #[test]
    fn rejects_non_hex_hash() {
        let storage = Storage::new("/srv/photos");
        assert!(storage
            .path_for(StorageKind::Original, "../../etc/passwd", None)
            .is_err());
        assert!(storage.path_for(StorageKind::Original, "ab", None).is_err());
    }

    #[test]
    fn write_creates_parents_and_persists() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        let bytes = b"original image bytes";
        let hash = sha256_hex(bytes);

        let path = storage
            .write(StorageKind::Original, &hash, Some("jpg"), bytes)
            .unwrap();
        assert!(path.exists());
        assert_eq!(fs::read(&path).unwrap(), bytes);
        // No temp files left behind.
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn duplicate_write_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        let bytes = b"same bytes";
        let hash = sha256_hex(bytes);

        let first = storage
            .write(StorageKind::Original, &hash, Some("jpg"), bytes)
            .unwrap();
        let second = storage
            .write(StorageKind::Original, &hash, Some("jpg"), bytes)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(&second).unwrap(), bytes);
    }
}
