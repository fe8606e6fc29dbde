//! Errors from the ingest session lifecycle.

use thiserror::Error;

/// Errors raised by [`crate::SessionCoordinator`].
#[derive(Debug, Error)]
pub enum Error {
    /// No row matched the request.
    #[error("not found")]
    NotFound,
    /// Inserting this checksum would exceed the dataset's `MaxDeltaChain`;
    /// the caller must resubmit the same file as a full blob instead
    /// (spec §4.8, §9 Open Question — enforced at ingest).
    #[error("delta chain too long: {length} > max {max}")]
    ChainTooLong {
        /// Chain length the candidate checksum would have.
        length: u32,
        /// Configured maximum.
        max: u32,
    },
    /// The bytes streamed through `submit_full` did not hash to the
    /// checksum the caller supplied.
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        /// Checksum the caller claimed.
        expected: String,
        /// Checksum actually computed over the streamed content.
        computed: String,
    },
    /// The dataset is encrypted but no key material was supplied to the coordinator.
    #[error("content/filename key required for this dataset")]
    MissingKeys,
    /// Underlying metadata store failure.
    #[error(transparent)]
    MetadataStore(#[from] metadata_store::Error),
    /// Underlying blob store failure.
    #[error(transparent)]
    BlobStore(#[from] blob_store::Error),
    /// Underlying compression failure.
    #[error(transparent)]
    Compression(#[from] compression::Error),
    /// Underlying crypto failure.
    #[error(transparent)]
    Crypto(#[from] crypto::Error),
    /// Underlying I/O failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Error> for tardis_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound => tardis_core::Error::NotFound,
            Error::ChainTooLong { length, max } => tardis_core::Error::ChainTooLong { length, max },
            Error::ChecksumMismatch { computed, .. } => tardis_core::Error::CorruptBlob(computed),
            Error::MissingKeys => tardis_core::Error::NotAuthenticated,
            Error::MetadataStore(e) => e.into(),
            Error::BlobStore(blob_store::Error::NotFound(_)) => tardis_core::Error::NotFound,
            Error::BlobStore(blob_store::Error::InvalidChecksum(s)) => {
                tardis_core::Error::CorruptBlob(s)
            }
            Error::BlobStore(blob_store::Error::Io(e)) => tardis_core::Error::Io(e),
            Error::Compression(compression::Error::Io(e)) => tardis_core::Error::Io(e),
            Error::Crypto(_) => tardis_core::Error::AuthenticationFailed,
            Error::Io(e) => tardis_core::Error::Io(e),
        }
    }
}
