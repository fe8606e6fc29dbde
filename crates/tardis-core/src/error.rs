//! Cross-cutting error type and the public error-code mapping (spec §6/§7).

use thiserror::Error;

/// Errors shared across the storage core. Component crates (`blob_store`,
/// `crypto`, `delta`, `metadata_store`, ...) define their own narrower
/// error enums; `regenerator`/`purge`/`session` fold those into this type
/// via `#[from]` so a caller has one type to match against.
#[derive(Debug, Error)]
pub enum Error {
    /// No row/blob exists for the given key.
    #[error("not found")]
    NotFound,
    /// A unique constraint (backup-set name, checksum) was violated.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The on-disk schema version has no known migration path.
    #[error("schema version mismatch: on-disk={on_disk}, supported={supported}")]
    SchemaMismatch {
        /// Schema version recorded in `Config.SchemaVersion`.
        on_disk: u32,
        /// Highest schema version this build understands.
        supported: u32,
    },
    /// A privileged operation was attempted before `authenticate` succeeded.
    #[error("not authenticated")]
    NotAuthenticated,
    /// Password/SRP-style challenge did not match the stored verifier.
    #[error("authentication failed")]
    AuthenticationFailed,
    /// A delta chain would exceed the dataset's configured `MaxDeltaChain`.
    #[error("delta chain too long: {length} > max {max}")]
    ChainTooLong {
        /// Computed chain length of the candidate checksum.
        length: u32,
        /// Configured maximum.
        max: u32,
    },
    /// A delta byte stream could not be parsed.
    #[error("malformed delta: {0}")]
    MalformedDelta(String),
    /// A delta's basis checksum has no corresponding row or blob.
    #[error("basis missing: {0}")]
    BasisMissing(String),
    /// Regenerated content's hash did not match its recorded checksum.
    #[error("corrupt blob: {0}")]
    CorruptBlob(String),
    /// Underlying I/O failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable wire-level error code (spec §6), independent of the Rust error
/// type's structure. The HTTP gateway that would serialize these is out of
/// scope for this core; the mapping itself is part of the public contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// No error.
    Ok,
    /// `Error::NotFound`.
    NotFound,
    /// `Error::NotAuthenticated`.
    NotAuthenticated,
    /// `Error::AuthenticationFailed`.
    AuthFailed,
    /// `Error::SchemaMismatch`.
    SchemaMismatch,
    /// `Error::ChainTooLong`.
    ChainTooLong,
    /// `Error::Io`.
    IoError,
    /// `Error::MalformedDelta`.
    MalformedDelta,
    /// `Error::BasisMissing`.
    BasisMissing,
    /// `Error::AlreadyExists`.
    AlreadyExists,
}

impl From<&Error> for ErrorCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::NotFound => ErrorCode::NotFound,
            Error::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Error::SchemaMismatch { .. } => ErrorCode::SchemaMismatch,
            Error::NotAuthenticated => ErrorCode::NotAuthenticated,
            Error::AuthenticationFailed => ErrorCode::AuthFailed,
            Error::ChainTooLong { .. } => ErrorCode::ChainTooLong,
            Error::MalformedDelta(_) => ErrorCode::MalformedDelta,
            Error::BasisMissing(_) => ErrorCode::BasisMissing,
            Error::CorruptBlob(_) => ErrorCode::IoError,
            Error::Io(_) => ErrorCode::IoError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_not_found() {
        let e = Error::NotFound;
        assert_eq!(ErrorCode::from(&e), ErrorCode::NotFound);
    }

    #[test]
    fn maps_chain_too_long() {
        let e = Error::ChainTooLong { length: 6, max: 5 };
        assert_eq!(ErrorCode::from(&e), ErrorCode::ChainTooLong);
    }
}
