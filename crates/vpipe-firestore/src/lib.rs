//! Firestore REST API client and the record stores built on it.
//!
//! This crate provides:
//! - `VideoRecordStore` for reading, merging into and deleting video records
//! - `AccountStore` for tier lookup and storage accounting
//! - Firestore-backed and in-memory implementations of both
//! - Service account authentication via gcp_auth, retries and request metrics

pub mod accounts;
pub mod client;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod records;
pub mod retry;
pub mod token_cache;
pub mod types;

pub use accounts::{AccountRepository, AccountStore};
pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use memory::{MemoryAccountStore, MemoryRecordStore};
pub use records::{VideoRecordStore, VideoRepository};
pub use retry::RetryConfig;
pub use types::{Document, FromFirestoreValue, Precondition, ToFirestoreValue, Value};
