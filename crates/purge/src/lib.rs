//! Selects backup sets for deletion and reclaims their unique storage
//! (spec component C7), preserving the chain-preservation invariant: a
//! checksum still referenced as another surviving checksum's basis is
//! never deleted even after every `File` row pointing at it is gone.
//!
//! `purge` deletes `File`/`Backups` rows and reclaims `CheckSum`/`Blob`
//! storage in one transactional pass, then iterates deletion to a fixed
//! point ([`PurgeReport::rounds`]) because removing one checksum can make
//! its own basis newly deletable. `remove_orphans` is a separate,
//! non-transactional pass over the blob tree for blobs whose `CheckSum`
//! row is already gone (e.g. from a crash between the metadata commit and
//! the blob removal of a prior purge).

#![deny(unsafe_code)]

pub mod error;

pub use error::Error;

use metadata_store::MetadataStore;
use tracing::{debug, info, warn};

/// Summary of one [`PurgeEngine::purge`] / [`PurgeEngine::purge_incomplete`]
/// invocation (spec §4.7).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// `BackupSet` rows removed.
    pub sets_deleted: u64,
    /// `File` rows removed.
    pub files_deleted: u64,
    /// `CheckSum` rows removed (and their blobs, across every reclamation round).
    pub checksums_deleted: u64,
    /// Number of fixed-point reclamation rounds it took for `orphan_checksums`
    /// to return empty (spec §4.7 step 6: "iterate to fixed point").
    pub rounds: u64,
}

/// Reclaims backup sets, checksums, and blobs for one dataset.
pub struct PurgeEngine<'a> {
    metadata: &'a mut MetadataStore,
    blobs: &'a blob_store::BlobStore,
}

impl<'a> PurgeEngine<'a> {
    /// Build a purge engine bound to one dataset's metadata and blob handles.
    #[must_use]
    pub fn new(metadata: &'a mut MetadataStore, blobs: &'a blob_store::BlobStore) -> Self {
        Self { metadata, blobs }
    }

    /// Delete every completed backup set with `priority <= max_priority`
    /// and `end_time < before_time`, excluding `keep_bset`, then reclaim
    /// any checksums/blobs that become unreferenced as a result.
    pub fn purge(
        &mut self,
        max_priority: i32,
        before_time: f64,
        keep_bset: i64,
    ) -> Result<PurgeReport, Error> {
        let candidates = self.metadata.list_purge_candidates(max_priority, before_time, keep_bset)?;
        let ids: Vec<i64> = candidates.iter().map(|b| b.id).collect();
        info!(count = ids.len(), "purge: candidate backup sets selected");
        self.purge_sets(&ids)
    }

    /// Delete every incomplete (crashed-mid-ingest) backup set and reclaim
    /// anything that becomes unreferenced.
    pub fn purge_incomplete(&mut self) -> Result<PurgeReport, Error> {
        let candidates = self.metadata.list_purge_incomplete()?;
        let ids: Vec<i64> = candidates.iter().map(|b| b.id).collect();
        info!(count = ids.len(), "purge: incomplete backup sets selected");
        self.purge_sets(&ids)
    }

    /// Delete the given backup-set ids and run reclamation to a fixed point.
    fn purge_sets(&mut self, ids: &[i64]) -> Result<PurgeReport, Error> {
        let mut report = PurgeReport::default();
        if ids.is_empty() {
            return Ok(report);
        }

        let counts = self.metadata.purge_sets(ids)?;
        report.sets_deleted = counts.sets_deleted;
        report.files_deleted = counts.files_deleted;

        loop {
            let orphans = self.metadata.orphan_checksums()?;
            if orphans.is_empty() {
                break;
            }
            debug!(round = report.rounds, found = orphans.len(), "purge: reclamation round");
            for checksum in &orphans {
                self.reclaim_checksum(checksum)?;
            }
            report.checksums_deleted += orphans.len() as u64;
            report.rounds += 1;
        }

        info!(
            sets = report.sets_deleted,
            files = report.files_deleted,
            checksums = report.checksums_deleted,
            rounds = report.rounds,
            "purge: complete"
        );
        Ok(report)
    }

    /// Remove one checksum's blob (missing blob is logged, not fatal — the
    /// row is the source of truth once the blob is already gone) and its
    /// metadata row.
    fn reclaim_checksum(&mut self, checksum: &str) -> Result<(), Error> {
        match self.blobs.remove(checksum) {
            Ok(()) => {}
            Err(blob_store::Error::NotFound(_)) => {
                warn!(checksum, "purge: checksum row had no backing blob");
            }
            Err(e) => return Err(e.into()),
        }
        self.metadata.delete_checksum(checksum)?;
        Ok(())
    }

    /// Scan the blob tree for files with no `CheckSum` row and remove them
    /// (spec §4.7 step 8). A `CheckSum` row whose blob is already missing
    /// is logged but does not block the scan — it is reclaimed on the next
    /// `purge` cycle, once it becomes a true orphan.
    pub fn remove_orphans(&mut self) -> Result<u64, Error> {
        let mut removed = 0u64;
        for checksum in self.blobs.iterate()? {
            if self.metadata.checksum_info(&checksum)?.is_none() {
                match self.blobs.remove(&checksum) {
                    Ok(()) => removed += 1,
                    Err(blob_store::Error::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        info!(removed, "purge: removed orphan blobs");
        Ok(removed)
    }
}
