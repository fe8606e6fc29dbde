//! Errors from file/subtree reconstruction.

use thiserror::Error;

/// Errors raised while recovering content (spec §4.6, §7).
#[derive(Debug, Error)]
pub enum Error {
    /// No checksum/file row matched the request.
    #[error("not found")]
    NotFound,
    /// Recovered content's hash did not match its recorded checksum.
    #[error("authentication failed: expected {expected}, computed {computed}")]
    AuthenticationFailed {
        /// Checksum the caller asked to recover.
        expected: String,
        /// Hash actually computed over the reconstructed bytes.
        computed: String,
    },
    /// A delta chain exceeded the dataset's configured `MaxDeltaChain`
    /// (defensive: `MetadataStore` should never hand back a chain this
    /// long, since it enforces the bound at insert time).
    #[error("delta chain too long: {length} > max {max}")]
    ChainTooLong {
        /// Observed recursion depth.
        length: u32,
        /// Configured maximum.
        max: u32,
    },
    /// The dataset is encrypted but no key material was supplied to the regenerator.
    #[error("content key required to decrypt this dataset")]
    MissingKeys,
    /// Underlying blob store failure.
    #[error(transparent)]
    BlobStore(#[from] blob_store::Error),
    /// Underlying crypto failure.
    #[error(transparent)]
    Crypto(#[from] crypto::Error),
    /// Underlying compression failure.
    #[error(transparent)]
    Compression(#[from] compression::Error),
    /// Underlying delta codec failure.
    #[error(transparent)]
    Delta(#[from] delta::Error),
    /// Underlying metadata store failure.
    #[error(transparent)]
    MetadataStore(#[from] metadata_store::Error),
    /// Underlying I/O failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Error> for tardis_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound => tardis_core::Error::NotFound,
            Error::AuthenticationFailed { .. } => tardis_core::Error::AuthenticationFailed,
            Error::ChainTooLong { length, max } => tardis_core::Error::ChainTooLong { length, max },
            Error::MissingKeys => tardis_core::Error::NotAuthenticated,
            Error::BlobStore(blob_store::Error::NotFound(_)) => tardis_core::Error::NotFound,
            Error::BlobStore(blob_store::Error::InvalidChecksum(s)) => {
                tardis_core::Error::CorruptBlob(s)
            }
            Error::BlobStore(blob_store::Error::Io(e)) => tardis_core::Error::Io(e),
            Error::Crypto(_) => tardis_core::Error::AuthenticationFailed,
            Error::Compression(compression::Error::Io(e)) => tardis_core::Error::Io(e),
            Error::Delta(delta::Error::MalformedDelta(m)) => tardis_core::Error::MalformedDelta(m),
            Error::Delta(delta::Error::BasisMismatch { offset, len, basis_len }) => {
                tardis_core::Error::MalformedDelta(format!(
                    "copy [{offset}, {offset}+{len}) exceeds basis length {basis_len}"
                ))
            }
            Error::Delta(delta::Error::Io(e)) => tardis_core::Error::Io(e),
            Error::MetadataStore(e) => e.into(),
            Error::Io(e) => tardis_core::Error::Io(e),
        }
    }
}
