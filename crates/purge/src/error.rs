//! Errors from backup-set deletion and orphan reclamation.

use thiserror::Error;

/// Errors raised by [`crate::PurgeEngine`].
#[derive(Debug, Error)]
pub enum Error {
    /// No backup set matched the requested id.
    #[error("not found")]
    NotFound,
    /// Underlying metadata store failure.
    #[error(transparent)]
    MetadataStore(#[from] metadata_store::Error),
    /// Underlying blob store failure.
    #[error(transparent)]
    BlobStore(#[from] blob_store::Error),
}

impl From<Error> for tardis_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound => tardis_core::Error::NotFound,
            Error::MetadataStore(e) => e.into(),
            Error::BlobStore(blob_store::Error::NotFound(_)) => tardis_core::Error::NotFound,
            Error::BlobStore(blob_store::Error::InvalidChecksum(s)) => {
                tardis_core::Error::CorruptBlob(s)
            }
            Error::BlobStore(blob_store::Error::Io(e)) => tardis_core::Error::Io(e),
        }
    }
}
