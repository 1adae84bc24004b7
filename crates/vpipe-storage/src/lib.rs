//! S3-compatible object storage.
//!
//! This crate provides:
//! - The `ObjectStore` port (fetch native, publish artifacts, versioned delete)
//! - An S3 client usable against AWS, Cloudflare R2 or MinIO
//! - A versioned in-memory store for tests

pub mod client;
pub mod error;
pub mod memory;
pub mod store;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryObjectStore, StoredObject};
pub use store::{Bucket, ObjectStore};
