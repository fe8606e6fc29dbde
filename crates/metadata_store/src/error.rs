//! Errors from the relational metadata store.

use thiserror::Error;

/// Errors raised by [`crate::MetadataStore`].
#[derive(Debug, Error)]
pub enum Error {
    /// No row matched the query.
    #[error("not found")]
    NotFound,
    /// A unique constraint (backup-set name/session, checksum, name) was violated.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// On-disk `Config.SchemaVersion` has no migration path to the current version.
    #[error("schema version mismatch: on-disk={on_disk}, supported={supported}")]
    SchemaMismatch {
        /// Version recorded on disk.
        on_disk: u32,
        /// Highest version this build understands.
        supported: u32,
    },
    /// A privileged operation was attempted before `authenticate` succeeded.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The supplied password's challenge response did not match the stored verifier.
    #[error("authentication failed")]
    AuthenticationFailed,
    /// Inserting this checksum would exceed the dataset's `MaxDeltaChain`.
    #[error("delta chain too long: {length} > max {max}")]
    ChainTooLong {
        /// Chain length the candidate checksum would have.
        length: u32,
        /// Configured maximum.
        max: u32,
    },
    /// A `basis` would close a cycle in the checksum graph.
    #[error("checksum {0} cannot be its own basis (directly or transitively)")]
    CyclicBasis(String),
    /// Underlying SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<Error> for tardis_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound => tardis_core::Error::NotFound,
            Error::AlreadyExists(s) => tardis_core::Error::AlreadyExists(s),
            Error::SchemaMismatch { on_disk, supported } => {
                tardis_core::Error::SchemaMismatch { on_disk, supported }
            }
            Error::NotAuthenticated => tardis_core::Error::NotAuthenticated,
            Error::AuthenticationFailed => tardis_core::Error::AuthenticationFailed,
            Error::ChainTooLong { length, max } => tardis_core::Error::ChainTooLong { length, max },
            Error::CyclicBasis(s) => tardis_core::Error::MalformedDelta(format!(
                "cyclic basis reference at checksum {s}"
            )),
            Error::Sqlite(e) => {
                tardis_core::Error::Io(std::io::Error::other(e))
            }
        }
    }
}
