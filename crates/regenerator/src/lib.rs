//! Reconstructs a file or subtree at a chosen backup set by walking the
//! delta chain, streaming through decrypt → decompress → patch →
//! authenticate (spec component C6, the "algorithmic heart" of the core).

#![deny(unsafe_code)]

pub mod error;
pub mod seekable;
pub mod xattrs;

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tardis_core::model::{AuthFailAction, ChecksumAlgorithm, FileRow, OverwriteMode};
use tempfile::NamedTempFile;

pub use error::Error;
pub use seekable::SeekableSource;
pub use xattrs::{decode_acl, decode_xattrs, PosixAcl, Xattrs};

/// How many path components [`Regenerator::recover_file`] passed when a
/// symlink target is recovered (the blob content of a symlink row is its
/// target path, stored the same way a file's content would be).
const SYMLINK_BLOB_MAX_BYTES: u64 = 4096;

/// Hooks the embedding CLI implements for filesystem operations this core
/// does not perform directly: applying extended attributes and POSIX ACLs,
/// and creating hardlinks/symlinks. Kept out of the core so it stays
/// testable without root or an xattr-capable filesystem in CI.
pub trait FilesystemApplier {
    /// Apply mode/uid/gid, decoded xattrs, and a decoded ACL to `path`.
    fn apply_metadata(
        &self,
        path: &Path,
        row: &FileRow,
        xattrs: Option<&Xattrs>,
        acl: Option<&PosixAcl>,
    ) -> std::io::Result<()>;

    /// Create `link` as a hardlink to the already-materialized `original`.
    fn create_hardlink(&self, original: &Path, link: &Path) -> std::io::Result<()>;

    /// Create `link` as a symlink pointing at `target`.
    fn create_symlink(&self, target: &[u8], link: &Path) -> std::io::Result<()>;
}

/// A `FilesystemApplier` that does nothing; useful for tests and for
/// callers that only want file content restored, not metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullApplier;

impl FilesystemApplier for NullApplier {
    fn apply_metadata(
        &self,
        _path: &Path,
        _row: &FileRow,
        _xattrs: Option<&Xattrs>,
        _acl: Option<&PosixAcl>,
    ) -> std::io::Result<()> {
        Ok(())
    }

    fn create_hardlink(&self, original: &Path, link: &Path) -> std::io::Result<()> {
        std::fs::hard_link(original, link)
    }

    fn create_symlink(&self, target: &[u8], link: &Path) -> std::io::Result<()> {
        let target = String::from_utf8_lossy(target);
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target.as_ref(), link)
        }
        #[cfg(not(unix))]
        {
            std::fs::write(link, target.as_bytes())
        }
    }
}

/// Per-recover-operation outcome, used by `recover_subtree` to keep going
/// past a single bad file rather than aborting the whole restore (spec §7).
#[derive(Debug)]
pub struct RecoveryError {
    /// Path relative to the subtree root where the failure occurred.
    pub path: PathBuf,
    /// The underlying error.
    pub error: Error,
}

/// Summary of a `recover_subtree` call.
#[derive(Debug, Default)]
pub struct SubtreeReport {
    /// Files/directories/symlinks successfully written.
    pub recovered: u64,
    /// Failures, one per file that could not be recovered; the rest of the
    /// subtree is still attempted.
    pub errors: Vec<RecoveryError>,
}

/// Reconstructs content given a metadata store and blob store handle.
pub struct Regenerator<'a> {
    blobs: &'a blob_store::BlobStore,
    metadata: &'a metadata_store::MetadataStore,
    content_key: Option<[u8; crypto::CONTENT_KEY_LEN]>,
    filename_key: Option<[u8; crypto::FILENAME_KEY_LEN]>,
    algo: ChecksumAlgorithm,
    max_delta_chain: u32,
    tempdir: Option<PathBuf>,
}

impl<'a> Regenerator<'a> {
    /// Build a regenerator. `content_key`/`filename_key` are required only
    /// for an encrypted dataset. `tempdir`, if set, is where basis
    /// materialization and delta patch output temp files are created.
    #[must_use]
    pub fn new(
        blobs: &'a blob_store::BlobStore,
        metadata: &'a metadata_store::MetadataStore,
        algo: ChecksumAlgorithm,
        max_delta_chain: u32,
    ) -> Self {
        Self { blobs, metadata, content_key: None, filename_key: None, algo, max_delta_chain, tempdir: None }
    }

    /// Supply the content/filename keys for an encrypted dataset.
    #[must_use]
    pub fn with_keys(
        mut self,
        content_key: [u8; crypto::CONTENT_KEY_LEN],
        filename_key: [u8; crypto::FILENAME_KEY_LEN],
    ) -> Self {
        self.content_key = Some(content_key);
        self.filename_key = Some(filename_key);
        self
    }

    /// Direct temp-file materialization to `dir` instead of the system default.
    #[must_use]
    pub fn with_tempdir(mut self, dir: PathBuf) -> Self {
        self.tempdir = Some(dir);
        self
    }

    /// Recover the logical content named by `checksum`. If `authenticate`
    /// is true, the reconstructed bytes are hashed and compared to
    /// `checksum`, returning `Error::AuthenticationFailed` on mismatch.
    pub fn recover_checksum(&self, checksum: &str, authenticate: bool) -> Result<SeekableSource, Error> {
        let source = self.recover_checksum_at_depth(checksum, 0)?;
        if authenticate {
            self.authenticate(checksum, source)
        } else {
            Ok(source)
        }
    }

    fn authenticate(&self, checksum: &str, mut source: SeekableSource) -> Result<SeekableSource, Error> {
        source.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        source.read_to_end(&mut buf)?;
        let computed = tardis_core::digest::hash_hex(self.algo, &buf);
        if computed != checksum {
            return Err(Error::AuthenticationFailed { expected: checksum.to_string(), computed });
        }
        SeekableSource::materialize(std::io::Cursor::new(buf), self.tempdir.as_deref())
            .map_err(Error::from)
    }

    fn recover_checksum_at_depth(&self, checksum: &str, depth: u32) -> Result<SeekableSource, Error> {
        if depth > self.max_delta_chain {
            return Err(Error::ChainTooLong { length: depth, max: self.max_delta_chain });
        }
        let info = self.metadata.checksum_info(checksum)?.ok_or(Error::NotFound)?;

        let raw = self.blobs.get(checksum)?;
        let payload: SeekableSource = if info.iv.is_some() || info.compressed {
            let mut raw = raw;
            let mut raw_bytes = Vec::new();
            raw.read_to_end(&mut raw_bytes)?;
            let decrypted = match (&info.iv, self.content_key) {
                (Some(iv), Some(key)) => crypto::ContentCipher::new(&key).decrypt(iv, &raw_bytes)?,
                (Some(_), None) => return Err(Error::MissingKeys),
                (None, _) => raw_bytes,
            };
            let decompressed = if info.compressed {
                let mut dec =
                    compression::DecompressingReader::new(std::io::Cursor::new(decrypted), self.algo, true)?;
                let mut out = Vec::new();
                dec.read_to_end(&mut out)?;
                out
            } else {
                decrypted
            };
            SeekableSource::materialize(std::io::Cursor::new(decompressed), self.tempdir.as_deref())?
        } else {
            SeekableSource::File(raw)
        };

        let Some(basis_checksum) = info.basis.as_deref() else {
            return Ok(payload);
        };

        let mut delta_bytes = Vec::new();
        let mut payload = payload;
        payload.read_to_end(&mut delta_bytes)?;
        let instructions = delta::decode(&delta_bytes)?;

        let mut basis_source = self.recover_checksum_at_depth(basis_checksum, depth + 1)?;

        let mut tmp = match self.tempdir.as_deref() {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        delta::patch(&mut basis_source, &instructions, tmp.as_file_mut())?;
        tmp.as_file_mut().flush()?;
        tmp.as_file_mut().seek(SeekFrom::Start(0))?;
        Ok(SeekableSource::Materialized(tmp))
    }

    /// Resolve `components` (raw name bytes, already encrypted if the
    /// dataset is encrypted) to a checksum and recover it.
    pub fn recover_file(
        &self,
        components: &[Vec<u8>],
        backup_set: i64,
        authenticate: bool,
        perm_checker: Option<&dyn Fn(&FileRow) -> bool>,
    ) -> Result<SeekableSource, Error> {
        let checksum = self
            .metadata
            .checksum_by_path(components, backup_set, perm_checker)?
            .ok_or(Error::NotFound)?;
        self.recover_checksum(&checksum, authenticate)
    }

    /// Encrypt a path component if the dataset is encrypted, else pass it through.
    #[must_use]
    pub fn encode_component(&self, component: &[u8]) -> Vec<u8> {
        match self.filename_key {
            Some(key) => crypto::FilenameCipher::new(&key)
                .encrypt(component)
                .expect("AES-SIV encryption of a filename component cannot fail"),
            None => component.to_vec(),
        }
    }

    /// Decrypt a `Name` row's bytes if the dataset is encrypted.
    pub fn decode_name(&self, name_id: i64) -> Result<Vec<u8>, Error> {
        let bytes = self.metadata.name_bytes(name_id)?;
        match self.filename_key {
            Some(key) => Ok(crypto::FilenameCipher::new(&key).decrypt(&bytes)?),
            None => Ok(bytes),
        }
    }

    /// Recursively recover a directory's contents into `out_dir`.
    /// Continues past a single bad file (recorded in the returned
    /// report) rather than aborting the whole restore.
    #[allow(clippy::too_many_arguments)]
    pub fn recover_subtree(
        &self,
        dir_inode: i64,
        dir_device: i64,
        backup_set: i64,
        out_dir: &Path,
        overwrite: OverwriteMode,
        auth_fail: AuthFailAction,
        applier: &dyn FilesystemApplier,
        hardlinks: &mut HashMap<(i64, i64), PathBuf>,
    ) -> Result<SubtreeReport, Error> {
        let mut report = SubtreeReport::default();
        std::fs::create_dir_all(out_dir)?;
        let children = self.metadata.read_directory(dir_inode, dir_device, backup_set)?;

        for child in children {
            let name = match self.decode_name(child.name_id) {
                Ok(n) => n,
                Err(e) => {
                    report.errors.push(RecoveryError { path: out_dir.to_path_buf(), error: e });
                    continue;
                }
            };
            let name_str = String::from_utf8_lossy(&name).into_owned();
            let target_path = out_dir.join(&name_str);

            if let Err(e) = self.recover_entry(
                &child,
                backup_set,
                &target_path,
                overwrite,
                auth_fail,
                applier,
                hardlinks,
            ) {
                report.errors.push(RecoveryError { path: target_path, error: e });
                continue;
            }

            if child.dir {
                let sub = self.recover_subtree(
                    child.inode,
                    child.device,
                    backup_set,
                    &target_path,
                    overwrite,
                    auth_fail,
                    applier,
                    hardlinks,
                )?;
                report.recovered += sub.recovered;
                report.errors.extend(sub.errors);
            } else {
                report.recovered += 1;
            }
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn recover_entry(
        &self,
        row: &FileRow,
        backup_set: i64,
        target_path: &Path,
        overwrite: OverwriteMode,
        auth_fail: AuthFailAction,
        applier: &dyn FilesystemApplier,
        hardlinks: &mut HashMap<(i64, i64), PathBuf>,
    ) -> Result<(), Error> {
        if row.dir {
            std::fs::create_dir_all(target_path)?;
            return self.apply_xattrs_and_acl(row, target_path, applier);
        }

        if let Some(existing) = hardlinks.get(&(row.inode, row.device)) {
            applier.create_hardlink(existing, target_path)?;
            return Ok(());
        }

        let exists = target_path.exists();
        let disk_mtime = std::fs::metadata(target_path).ok().and_then(|m| {
            m.modified().ok().and_then(|t| {
                t.duration_since(std::time::UNIX_EPOCH).ok().map(|d| d.as_secs() as i64)
            })
        });
        let stored_mtime = row.mtime.unwrap_or(0);
        if !overwrite.should_replace(exists, disk_mtime.unwrap_or(0), stored_mtime) {
            return Ok(());
        }

        if row.link {
            let Some(checksum_id) = row.checksum_id else { return Err(Error::NotFound) };
            let checksum = self
                .metadata
                .checksum_info_by_id(checksum_id)?
                .ok_or(Error::NotFound)?
                .checksum;
            let mut source = self.recover_checksum(&checksum, false)?;
            let mut target = Vec::new();
            source.take(SYMLINK_BLOB_MAX_BYTES).read_to_end(&mut target)?;
            applier.create_symlink(&target, target_path)?;
            hardlinks.insert((row.inode, row.device), target_path.to_path_buf());
            return Ok(());
        }

        let Some(checksum_id) = row.checksum_id else {
            // Empty/no-content file: create an empty file.
            std::fs::File::create(target_path)?;
            hardlinks.insert((row.inode, row.device), target_path.to_path_buf());
            return self.apply_xattrs_and_acl(row, target_path, applier);
        };
        let checksum = self.metadata.checksum_info_by_id(checksum_id)?.ok_or(Error::NotFound)?.checksum;

        match self.recover_checksum(&checksum, true) {
            Ok(mut source) => {
                source.seek(SeekFrom::Start(0))?;
                let mut out = std::fs::File::create(target_path)?;
                std::io::copy(&mut source, &mut out)?;
            }
            Err(Error::AuthenticationFailed { expected, computed }) => {
                self.handle_auth_failure(target_path, &computed, auth_fail)?;
                return Err(Error::AuthenticationFailed { expected, computed });
            }
            Err(e) => return Err(e),
        }

        hardlinks.insert((row.inode, row.device), target_path.to_path_buf());
        self.apply_xattrs_and_acl(row, target_path, applier)
    }

    fn apply_xattrs_and_acl(
        &self,
        row: &FileRow,
        path: &Path,
        applier: &dyn FilesystemApplier,
    ) -> Result<(), Error> {
        let xattrs = match row.xattrs_id {
            Some(id) => {
                let cksum = self.metadata.checksum_info_by_id(id)?.ok_or(Error::NotFound)?.checksum;
                let mut source = self.recover_checksum(&cksum, false)?;
                let mut bytes = Vec::new();
                source.read_to_end(&mut bytes)?;
                Some(decode_xattrs(&bytes)?)
            }
            None => None,
        };
        let acl = match row.acl_id {
            Some(id) => {
                let cksum = self.metadata.checksum_info_by_id(id)?.ok_or(Error::NotFound)?.checksum;
                let mut source = self.recover_checksum(&cksum, false)?;
                let mut bytes = Vec::new();
                source.read_to_end(&mut bytes)?;
                Some(decode_acl(&bytes)?)
            }
            None => None,
        };
        applier.apply_metadata(path, row, xattrs.as_ref(), acl.as_ref())?;
        Ok(())
    }

    /// On `AuthenticationFailed` for a recovered file with a target path,
    /// apply the configured `{Keep, Rename, Delete}` policy. `computed_hash`
    /// is the hash actually computed over the bytes that were read, not the
    /// checksum that was expected, so the renamed artifact reflects what is
    /// really on disk.
    fn handle_auth_failure(
        &self,
        target_path: &Path,
        computed_hash: &str,
        action: AuthFailAction,
    ) -> Result<(), Error> {
        match action {
            AuthFailAction::Keep => Ok(()),
            AuthFailAction::Delete => {
                if target_path.exists() {
                    std::fs::remove_file(target_path)?;
                }
                Ok(())
            }
            AuthFailAction::Rename => {
                if target_path.exists() {
                    let file_name = target_path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
                    let renamed =
                        target_path.with_file_name(format!("{file_name}-CORRUPT-{computed_hash}"));
                    std::fs::rename(target_path, renamed)?;
                }
                Ok(())
            }
        }
    }
}
