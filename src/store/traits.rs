//! Collaborator traits for the mutation engines.
//!
//! `LocalStore` is the narrow durable-storage trait implemented by concrete
//! backends (in-memory here; SQLite/IndexedDB adapters live outside this
//! crate). `RemoteGateway` is the network boundary. `SyncMetadataStore`
//! holds the per-record sync bookkeeping with its two composite-key indexes.
//!
//! All traits are object-safe so engines can hold `Arc<dyn Trait>`.

use async_trait::async_trait;

use crate::domain::inventory::{InventoryItem, MergeKey};
use crate::domain::profile::Profile;
use crate::domain::Record;
use crate::error::{RemoteError, Result};
use crate::types::{SyncMetadata, SyncOperation, SyncStateKind};

// ============================================================================
// LocalStore
// ============================================================================

/// Durable keyed storage for domain records, safe for concurrent access from
/// multiple engine instances (keyed upsert is atomic per key).
#[async_trait]
pub trait LocalStore<T: Record>: Send + Sync {
    async fn get(&self, scope: &str, id: &str) -> Result<Option<T>>;

    /// Insert or replace a record by (scope, id).
    async fn upsert(&self, record: T) -> Result<()>;

    /// Replace several records in one call. Used by consume, which touches
    /// multiple batches at once.
    async fn update_many(&self, records: Vec<T>) -> Result<()>;

    async fn list_by_scope(&self, scope: &str) -> Result<Vec<T>>;
}

/// Inventory-specific lookups on top of `LocalStore<InventoryItem>`.
#[async_trait]
pub trait InventoryStore: LocalStore<InventoryItem> {
    /// Find the `Active` record with exactly this merge key, if any.
    async fn find_by_merge_key(&self, key: &MergeKey) -> Result<Option<InventoryItem>>;

    /// All `Active` batches of one product in one household — the FEFO
    /// candidate set.
    async fn list_active_by_product(
        &self,
        scope: &str,
        product_id: &str,
    ) -> Result<Vec<InventoryItem>>;

    /// Whether a storage location id is known for this household. Add
    /// validation rejects references to unknown locations.
    async fn location_exists(&self, scope: &str, location_id: &str) -> Result<bool>;
}

/// Profile storage with the last-synced baseline used by three-way merge.
#[async_trait]
pub trait ProfileStore: LocalStore<Profile> {
    /// The last mutually-agreed snapshot (the merge base). `None` before the
    /// first successful sync.
    async fn synced_baseline(&self, user_id: &str) -> Result<Option<Profile>>;

    async fn set_synced_baseline(&self, profile: Profile) -> Result<()>;
}

// ============================================================================
// RemoteGateway
// ============================================================================

/// The network boundary to the single remote authority. Failures surface as
/// `RemoteError` — never silently swallowed; write paths capture them into
/// sync metadata for later retry.
#[async_trait]
pub trait RemoteGateway<T: Record>: Send + Sync {
    async fn fetch(&self, scope: &str, id: &str) -> Result<Option<T>, RemoteError>;

    async fn query(&self, scope: &str) -> Result<Vec<T>, RemoteError>;

    async fn upsert(&self, records: &[T]) -> Result<(), RemoteError>;
}

// ============================================================================
// SyncMetadataStore
// ============================================================================

/// Durable storage for `SyncMetadata`, one row per (record, scope, operation)
/// tuple, with a secondary index by idempotency request id. Implementations
/// must keep the two indexes consistent on every write.
#[async_trait]
pub trait SyncMetadataStore: Send + Sync {
    async fn upsert(&self, rows: Vec<SyncMetadata>) -> Result<()>;

    async fn get(
        &self,
        record_id: &str,
        scope: &str,
        operation: SyncOperation,
    ) -> Result<Option<SyncMetadata>>;

    /// Idempotency lookup: resolve a caller-supplied request id to the
    /// metadata row written by the original call, if any.
    async fn get_by_request_id(
        &self,
        request_id: &str,
        scope: &str,
        operation: SyncOperation,
    ) -> Result<Option<SyncMetadata>>;

    /// Up to `limit` rows in the given state for a scope, oldest attempt
    /// first.
    async fn list_by_state(
        &self,
        scope: &str,
        state: SyncStateKind,
        limit: usize,
    ) -> Result<Vec<SyncMetadata>>;

    /// Remove every metadata row for a record. Only called when the owning
    /// record is permanently purged.
    async fn purge_record(&self, record_id: &str, scope: &str) -> Result<()>;
}
