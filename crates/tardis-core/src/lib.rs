//! Shared primitives for the Tardis storage core: entity records (the
//! data model), the cross-cutting error type, and dataset configuration.

#![deny(unsafe_code)]

pub mod config;
pub mod digest;
pub mod error;
pub mod model;

pub use config::DatasetConfig;
pub use digest::RunningDigest;
pub use error::{Error, ErrorCode};
pub use model::*;

/// Version of the core library, as recorded in `Backups.ClientVersion`/`ServerVersion`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
