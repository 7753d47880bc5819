//! S3-compatible object storage gateway.
//!
//! Works against AWS S3 or any S3 API endpoint (R2, MinIO). The worker
//! talks to the [`ObjectStore`] trait so tests can substitute a fake.

pub mod error;
pub mod gateway;

pub use error::{StorageError, StorageResult};
pub use gateway::{ObjectStore, S3Gateway, StorageConfig};
