//! Payload caching and persistence.
//!
//! Opened payloads are copied into a scratch cache keyed by their SHA-256
//! hash, sharded into directories by the first byte of the hash (like Git
//! objects). The [`BlobStore`] tracks, per bound directory, which payload
//! each filename currently holds so unchanged payloads are never rewritten.

mod cache;
mod store;

pub use cache::BlobCache;
pub use store::{BlobStore, BlobWrite, StagedBlobs, StorageEstimate};
