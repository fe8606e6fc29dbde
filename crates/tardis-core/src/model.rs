//! Entity records for the Tardis data model (spec §3).
//!
//! These are plain structs; `metadata_store` is the only crate that knows
//! how to load/store them. Keeping them here lets `regenerator`, `purge`
//! and `session` share one definition instead of redefining row shapes.

use serde::{Deserialize, Serialize};

/// One snapshot run. `BackupSet.id` is monotonically increasing in
/// creation order; "current" is the highest-id row with `completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSet {
    /// Monotonic primary key.
    pub id: i64,
    /// Human-readable name, unique.
    pub name: String,
    /// Client-generated session identifier, unique.
    pub session: String,
    /// Unix timestamp (seconds) the set was opened.
    pub start_time: f64,
    /// Unix timestamp the set was closed, if any.
    pub end_time: Option<f64>,
    /// Whether `completeBackupSet` has been called.
    pub completed: bool,
    /// Whether this set was requested as a full (non-incremental) backup.
    pub full: bool,
    /// Retention priority; lower values are purged first (spec §4.7).
    pub priority: i32,
    /// Client software version string, if reported.
    pub client_version: Option<String>,
    /// Server software version string.
    pub server_version: Option<String>,
    /// Count of files stored as full blobs in this set.
    pub files_full: i64,
    /// Count of files stored as deltas in this set.
    pub files_delta: i64,
    /// Total logical bytes received for this set.
    pub bytes_received: i64,
}

/// A state transition `BackupSet` moves through over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupSetState {
    /// Created, not yet completed; visible only to the session that opened it.
    Open,
    /// `completeBackupSet` has run; visible to readers.
    Complete,
    /// Removed by `PurgeEngine`.
    Deleted,
}

impl BackupSet {
    /// The state this row currently represents. A deleted set no longer has
    /// a row at all, so this only ever resolves to `Open` or `Complete`.
    #[must_use]
    pub fn state(&self) -> BackupSetState {
        if self.completed {
            BackupSetState::Complete
        } else {
            BackupSetState::Open
        }
    }
}

/// One version of a file within a single `BackupSet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRow {
    /// Row id.
    pub file_id: i64,
    /// Interned filename id (possibly ciphertext if the dataset is encrypted).
    pub name_id: i64,
    /// The `BackupSet` this version belongs to.
    pub backup_set: i64,
    /// Source-filesystem inode number.
    pub inode: i64,
    /// Source-filesystem device number.
    pub device: i64,
    /// Parent directory's inode.
    pub parent: i64,
    /// Parent directory's device.
    pub parent_device: i64,
    /// True if this row is a directory.
    pub dir: bool,
    /// True if this row is a symlink.
    pub link: bool,
    /// Logical file size in bytes.
    pub size: i64,
    pub mtime: Option<i64>,
    pub ctime: Option<i64>,
    pub atime: Option<i64>,
    pub mode: Option<i64>,
    pub uid: Option<i64>,
    pub gid: Option<i64>,
    pub nlinks: Option<i64>,
    /// Content checksum, null for directories and empty-content rows.
    pub checksum_id: Option<i64>,
    /// Checksum of an encoded extended-attributes blob, if any.
    pub xattrs_id: Option<i64>,
    /// Checksum of an encoded ACL blob, if any.
    pub acl_id: Option<i64>,
}

/// A unique content fingerprint naming one blob in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSumRow {
    /// Row id.
    pub checksum_id: i64,
    /// Hex-encoded strong content hash.
    pub checksum: String,
    /// Logical (decompressed, decrypted) size of the content.
    pub size: i64,
    /// The checksum this one is a delta against, if any.
    pub basis: Option<String>,
    /// Initialization vector for content decryption, if the blob is encrypted.
    pub iv: Option<Vec<u8>>,
    /// Whether the stored blob is zstd-compressed.
    pub compressed: bool,
    /// Whether the stored blob is encrypted.
    pub encrypted: bool,
    /// Size of the on-disk delta payload, if `basis` is set.
    pub delta_size: Option<i64>,
    /// Distance to the chain root: 0 if `basis` is null.
    pub chain_length: u32,
    /// False for a directory/symlink placeholder checksum (xattrs/ACL blobs still set this true).
    pub is_file: bool,
    /// Size of the blob as stored on disk (post compression/encryption).
    pub disk_size: i64,
}

/// Wrapped per-client key material (spec §4.2, §3 Keys entity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeysRow {
    /// Client identifier these keys belong to.
    pub client_id: String,
    /// PBKDF2 salt.
    pub salt: Vec<u8>,
    /// SRP-style password verifier.
    pub verifier: Vec<u8>,
    /// Wrapped deterministic filename/path key.
    pub filename_key: Vec<u8>,
    /// Wrapped randomized content key.
    pub content_key: Vec<u8>,
}

/// Dataset-level content-hash algorithm (spec §6, §9 Open Question:
/// stored as Config, not hard-coded; `Md5` is the default for
/// backward compatibility with legacy datasets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    /// Historical default.
    Md5,
    /// Preferred for new datasets.
    Sha256,
}

impl Default for ChecksumAlgorithm {
    fn default() -> Self {
        ChecksumAlgorithm::Md5
    }
}

impl ChecksumAlgorithm {
    /// Parse the `Config.ChecksumAlgorithm` string value.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MD5" => Some(ChecksumAlgorithm::Md5),
            "SHA256" => Some(ChecksumAlgorithm::Sha256),
            _ => None,
        }
    }

    /// Serialize back to the `Config` string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "MD5",
            ChecksumAlgorithm::Sha256 => "SHA256",
        }
    }
}

/// Policy for handling an existing file at the regeneration target path
/// (spec §4.6, tested by property P7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverwriteMode {
    /// Never replace an existing file.
    Never,
    /// Always replace.
    Always,
    /// Replace only if the on-disk file is older than the stored mtime.
    Newer,
    /// Replace only if the on-disk file is newer than the stored mtime.
    Older,
}

impl OverwriteMode {
    /// Decide whether a file should be replaced, given whether it exists
    /// and, if so, the on-disk vs. stored mtimes.
    #[must_use]
    pub fn should_replace(self, exists: bool, disk_mtime: i64, stored_mtime: i64) -> bool {
        if !exists {
            return true;
        }
        match self {
            OverwriteMode::Never => false,
            OverwriteMode::Always => true,
            OverwriteMode::Newer => disk_mtime < stored_mtime,
            OverwriteMode::Older => disk_mtime > stored_mtime,
        }
    }
}

/// Action to take when a regenerated file fails authentication
/// (spec §4.6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthFailAction {
    /// Leave the corrupt file in place.
    Keep,
    /// Rename to `<name>-CORRUPT-<hash>`.
    Rename,
    /// Remove the file.
    Delete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_truth_table() {
        assert!(OverwriteMode::Never.should_replace(false, 0, 0));
        assert!(!OverwriteMode::Never.should_replace(true, 0, 0));
        assert!(OverwriteMode::Always.should_replace(true, 100, 1));
        assert!(OverwriteMode::Newer.should_replace(true, 1, 2));
        assert!(!OverwriteMode::Newer.should_replace(true, 3, 2));
        assert!(OverwriteMode::Older.should_replace(true, 3, 2));
        assert!(!OverwriteMode::Older.should_replace(true, 1, 2));
    }

    #[test]
    fn checksum_algorithm_round_trip() {
        for a in [ChecksumAlgorithm::Md5, ChecksumAlgorithm::Sha256] {
            assert_eq!(ChecksumAlgorithm::parse(a.as_str()), Some(a));
        }
        assert_eq!(ChecksumAlgorithm::parse("bogus"), None);
    }

    #[test]
    fn backup_set_state() {
        let mut b = BackupSet {
            id: 1,
            name: "n".into(),
            session: "s".into(),
            start_time: 0.0,
            end_time: None,
            completed: false,
            full: true,
            priority: 1,
            client_version: None,
            server_version: None,
            files_full: 0,
            files_delta: 0,
            bytes_received: 0,
        };
        assert_eq!(b.state(), BackupSetState::Open);
        b.completed = true;
        assert_eq!(b.state(), BackupSetState::Complete);
    }
}
