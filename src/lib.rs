//! pantry-sync — offline-first mutation and synchronization engine.
//!
//! A client mutates household pantry data (inventory batches, the product
//! catalog, user profiles) against a local store while connectivity comes
//! and goes. Every mutation applies locally first, is tracked by per-record
//! sync metadata, and is pushed to the single remote authority when online —
//! retried by an explicit drain pass otherwise. Conflicting concurrent
//! profile edits reconcile through a three-way merge.
//!
//! Storage and network adapters are abstract collaborators (`store::traits`);
//! in-memory reference implementations live in `store::memory`.

pub mod clock;
pub mod connectivity;
pub mod domain;
pub mod engine;
pub mod error;
pub mod policy;
pub mod store;
pub mod types;

pub use error::{EngineError, RemoteError, Result, StoreError, ValidationError};
pub use types::{
    DrainOutcome, Quantity, QuantityUnit, ReadPolicy, SyncMetadata, SyncOperation, SyncState,
    SyncStateKind, WriteOutcome,
};
