//! Typed projection of the dataset `Config` key/value table (spec §6).

use crate::model::ChecksumAlgorithm;
use serde::{Deserialize, Serialize};

/// One named retention/backup-naming rule. Patterns are matched against a
/// backup-set name by the (out-of-scope) client scanner; the core only
/// stores and exposes the parsed rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatRule {
    /// Glob-ish pattern a backup-set name is matched against.
    pub pattern: String,
    /// Retention priority for sets matching this pattern.
    pub priority: i32,
    /// Days to keep sets matching this pattern before they're purge candidates.
    pub keep_days: u32,
    /// Force a full (non-delta) backup for sets matching this pattern.
    pub force_full: bool,
}

/// Dataset-wide configuration (spec §6 "Recognised configuration options").
/// Backed 1:1 by rows in `metadata_store`'s `Config` table; this struct is
/// the typed view callers build and read that table through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Schema version this dataset was created/migrated to.
    pub schema_version: u32,
    /// Client identifier this dataset belongs to.
    pub client_id: String,
    /// Content-hash algorithm in effect for this dataset (fixed at creation).
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Whether blobs and filenames in this dataset are encrypted.
    pub encrypted: bool,
    /// Per-pattern name/priority/retention rules.
    pub formats: Vec<FormatRule>,
    /// Save full copies of files even when a delta would do.
    pub save_full: bool,
    /// Maximum delta-chain depth before a full blob must be used instead.
    pub max_delta_chain: u32,
    /// Percentage (0-100) of content change above which a full blob is
    /// demanded instead of a delta.
    pub max_change_percent: u8,
    /// Interval (in completed backup sets) between VACUUM runs.
    pub vacuum_interval: u32,
    /// Automatically run `PurgeEngine::purge` after each completed set.
    pub auto_purge: bool,
    /// Dataset is disabled; new backup sets are rejected.
    pub disabled: bool,
    /// Persist configuration changes back to the `Config` table.
    pub save_config: bool,
}

impl DatasetConfig {
    /// Defaults matching spec §6 (`MaxDeltaChain` = 5 is the only default
    /// the spec pins explicitly).
    #[must_use]
    pub fn new(client_id: impl Into<String>, schema_version: u32, encrypted: bool) -> Self {
        Self {
            schema_version,
            client_id: client_id.into(),
            checksum_algorithm: ChecksumAlgorithm::default(),
            encrypted,
            formats: Vec::new(),
            save_full: false,
            max_delta_chain: 5,
            max_change_percent: 50,
            vacuum_interval: 10,
            auto_purge: false,
            disabled: false,
            save_config: true,
        }
    }
}
