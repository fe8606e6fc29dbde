//! Content-addressed blob store (spec component C1).
//!
//! `BlobStore` is a pure byte store: it does not compress or encrypt. The
//! checksum used to key a blob is supplied by the caller (it is the
//! logical content's recorded checksum — see `crypto`/`compression` for
//! the layers that sit above this one in the ingest/restore pipeline,
//! spec §2). This keeps the store simple and lets `MetadataStore` remain
//! the single source of truth for what a checksum means.
//!
//! Layout: `root/<aa>/<bb>/<checksum>` where `aa`/`bb` are the first two
//! two-character hex-ish prefixes of the checksum string (spec §4.1).
//! Writes go to a temp sibling and are renamed into place, so a reader
//! never observes a partially written blob.

#![deny(unsafe_code)]

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors raised by `BlobStore` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No blob exists at the derived path for this checksum.
    #[error("blob not found: {0}")]
    NotFound(String),
    /// The checksum string is too short to be shardable (spec needs at
    /// least 4 hex characters to derive the two shard directories).
    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),
    /// Underlying I/O failure.
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// A content-addressed store rooted at a single directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (creating if necessary) a blob store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory this store is backed by.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic on-disk path for a checksum: `root/aa/bb/<checksum>`.
    pub fn path_for(&self, checksum: &str) -> Result<PathBuf, Error> {
        if checksum.len() < 4 {
            return Err(Error::InvalidChecksum(checksum.to_string()));
        }
        let (a, b) = (&checksum[0..2], &checksum[2..4]);
        Ok(self.root.join(a).join(b).join(checksum))
    }

    /// Store `reader`'s bytes under `checksum`, returning the number of
    /// bytes written. A checksum that already exists is a no-op; the
    /// reader is not consumed in that case, matching the idempotent-put
    /// contract in spec §4.1.
    pub fn put(&self, checksum: &str, mut reader: impl Read) -> Result<u64, Error> {
        let final_path = self.path_for(checksum)?;
        if let Ok(meta) = fs::metadata(&final_path) {
            return Ok(meta.len());
        }
        let parent = final_path.parent().expect("path_for always has a parent");
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        let written = io::copy(&mut reader, tmp.as_file_mut())?;
        tmp.as_file_mut().sync_all()?;

        match tmp.persist(&final_path) {
            Ok(_) => {}
            Err(e) if final_path.exists() => {
                // Lost a race with a concurrent identical put; the winner's
                // bytes are what matters, ours can be discarded.
                drop(e);
            }
            Err(e) => return Err(e.error.into()),
        }
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
        Ok(written)
    }

    /// Convenience wrapper around [`put`](Self::put) for in-memory bytes.
    pub fn put_bytes(&self, checksum: &str, bytes: &[u8]) -> Result<u64, Error> {
        self.put(checksum, bytes)
    }

    /// Open a blob for streaming reads.
    pub fn get(&self, checksum: &str) -> Result<File, Error> {
        let path = self.path_for(checksum)?;
        File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NotFound(checksum.to_string())
            } else {
                Error::Io(e)
            }
        })
    }

    /// Read a whole blob into memory.
    pub fn get_bytes(&self, checksum: &str) -> Result<Vec<u8>, Error> {
        let mut f = self.get(checksum)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Whether a blob exists for this checksum.
    #[must_use]
    pub fn exists(&self, checksum: &str) -> bool {
        self.path_for(checksum).map(|p| p.is_file()).unwrap_or(false)
    }

    /// On-disk size of the stored blob (post compression/encryption), not
    /// the logical content size (that's `CheckSums.Size` in `metadata_store`).
    pub fn size(&self, checksum: &str) -> Result<u64, Error> {
        let path = self.path_for(checksum)?;
        let meta = fs::metadata(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NotFound(checksum.to_string())
            } else {
                Error::Io(e)
            }
        })?;
        Ok(meta.len())
    }

    /// Delete the blob for `checksum`.
    pub fn remove(&self, checksum: &str) -> Result<(), Error> {
        let path = self.path_for(checksum)?;
        fs::remove_file(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NotFound(checksum.to_string())
            } else {
                Error::Io(e)
            }
        })
    }

    /// List every checksum currently present on disk. Used by
    /// `PurgeEngine::remove_orphans` to find blobs with no metadata row.
    pub fn iterate(&self) -> Result<Vec<String>, Error> {
        let mut out = Vec::new();
        if !self.root.is_dir() {
            return Ok(out);
        }
        for a in read_dir_entries(&self.root)? {
            if !a.is_dir() {
                continue;
            }
            for b in read_dir_entries(&a)? {
                if !b.is_dir() {
                    continue;
                }
                for blob in read_dir_entries(&b)? {
                    if blob.is_file() {
                        if let Some(name) = blob.file_name().and_then(|n| n.to_str()) {
                            out.push(name.to_string());
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

fn read_dir_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        out.push(entry?.path());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let cksum = "abcd1234ef";
        store.put_bytes(cksum, b"hello world").unwrap();
        assert!(store.exists(cksum));
        assert_eq!(store.get_bytes(cksum).unwrap(), b"hello world");
        assert_eq!(store.size(cksum).unwrap(), 11);
    }

    #[test]
    fn shard_path_uses_first_four_hex_chars() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let path = store.path_for("abcd1234ef").unwrap();
        assert_eq!(path, dir.path().join("ab").join("cd").join("abcd1234ef"));
    }

    #[test]
    fn double_put_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let cksum = "aaaa0000";
        store.put_bytes(cksum, b"first").unwrap();
        store.put_bytes(cksum, b"second-and-longer").unwrap();
        assert_eq!(store.get_bytes(cksum).unwrap(), b"first");
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let err = store.get("deadbeef00").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn remove_then_iterate() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        store.put_bytes("11112222aa", b"x").unwrap();
        store.put_bytes("33334444bb", b"y").unwrap();
        let mut all = store.iterate().unwrap();
        all.sort();
        assert_eq!(all, vec!["11112222aa".to_string(), "33334444bb".to_string()]);

        store.remove("11112222aa").unwrap();
        assert!(!store.exists("11112222aa"));
        assert_eq!(store.iterate().unwrap(), vec!["33334444bb".to_string()]);
    }

    #[test]
    fn invalid_checksum_too_short() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        assert!(matches!(store.put_bytes("ab", b"x"), Err(Error::InvalidChecksum(_))));
    }
}
