//! In-memory reference implementations of the storage collaborators.
//!
//! These are the default adapters for embedded/test use. They hold plain
//! maps behind `parking_lot` locks; no guard is ever held across an await
//! point. Durable backends implement the same traits outside this crate.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::inventory::{InventoryItem, ItemStatus, MergeKey};
use crate::domain::profile::Profile;
use crate::domain::Record;
use crate::error::Result;
use crate::types::{SyncMetadata, SyncOperation, SyncStateKind};

use super::traits::{InventoryStore, LocalStore, ProfileStore, SyncMetadataStore};

// ============================================================================
// MemoryStore
// ============================================================================

/// Generic in-memory `LocalStore` keyed by (scope, id).
pub struct MemoryStore<T: Record> {
    records: RwLock<HashMap<(String, String), T>>,
    _marker: PhantomData<T>,
}

impl<T: Record> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            _marker: PhantomData,
        }
    }

    /// Number of records across all scopes. Test observability.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl<T: Record> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> LocalStore<T> for MemoryStore<T> {
    async fn get(&self, scope: &str, id: &str) -> Result<Option<T>> {
        let records = self.records.read();
        Ok(records.get(&(scope.to_string(), id.to_string())).cloned())
    }

    async fn upsert(&self, record: T) -> Result<()> {
        let key = (record.scope_id().to_string(), record.id().to_string());
        self.records.write().insert(key, record);
        Ok(())
    }

    async fn update_many(&self, records: Vec<T>) -> Result<()> {
        let mut map = self.records.write();
        for record in records {
            let key = (record.scope_id().to_string(), record.id().to_string());
            map.insert(key, record);
        }
        Ok(())
    }

    async fn list_by_scope(&self, scope: &str) -> Result<Vec<T>> {
        let records = self.records.read();
        let mut out: Vec<T> = records
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|(_, r)| r.clone())
            .collect();
        // Deterministic order for callers and tests.
        out.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(out)
    }
}

// ============================================================================
// MemoryInventoryStore
// ============================================================================

/// Inventory store with merge-key and product lookups plus a registered
/// location set for reference validation.
pub struct MemoryInventoryStore {
    items: MemoryStore<InventoryItem>,
    locations: RwLock<HashSet<(String, String)>>,
}

impl MemoryInventoryStore {
    pub fn new() -> Self {
        Self {
            items: MemoryStore::new(),
            locations: RwLock::new(HashSet::new()),
        }
    }

    /// Register a storage location for a household.
    pub fn add_location(&self, scope: impl Into<String>, location_id: impl Into<String>) {
        self.locations
            .write()
            .insert((scope.into(), location_id.into()));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for MemoryInventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore<InventoryItem> for MemoryInventoryStore {
    async fn get(&self, scope: &str, id: &str) -> Result<Option<InventoryItem>> {
        self.items.get(scope, id).await
    }

    async fn upsert(&self, record: InventoryItem) -> Result<()> {
        self.items.upsert(record).await
    }

    async fn update_many(&self, records: Vec<InventoryItem>) -> Result<()> {
        self.items.update_many(records).await
    }

    async fn list_by_scope(&self, scope: &str) -> Result<Vec<InventoryItem>> {
        self.items.list_by_scope(scope).await
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn find_by_merge_key(&self, key: &MergeKey) -> Result<Option<InventoryItem>> {
        let records = self.items.records.read();
        Ok(records
            .values()
            .find(|item| item.status == ItemStatus::Active && item.merge_key() == *key)
            .cloned())
    }

    async fn list_active_by_product(
        &self,
        scope: &str,
        product_id: &str,
    ) -> Result<Vec<InventoryItem>> {
        let records = self.items.records.read();
        let mut out: Vec<InventoryItem> = records
            .values()
            .filter(|item| {
                item.household_id == scope
                    && item.product_id == product_id
                    && item.status == ItemStatus::Active
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn location_exists(&self, scope: &str, location_id: &str) -> Result<bool> {
        let locations = self.locations.read();
        Ok(locations.contains(&(scope.to_string(), location_id.to_string())))
    }
}

// ============================================================================
// MemoryProfileStore
// ============================================================================

pub struct MemoryProfileStore {
    profiles: MemoryStore<Profile>,
    baselines: RwLock<HashMap<String, Profile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self {
            profiles: MemoryStore::new(),
            baselines: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore<Profile> for MemoryProfileStore {
    async fn get(&self, scope: &str, id: &str) -> Result<Option<Profile>> {
        self.profiles.get(scope, id).await
    }

    async fn upsert(&self, record: Profile) -> Result<()> {
        self.profiles.upsert(record).await
    }

    async fn update_many(&self, records: Vec<Profile>) -> Result<()> {
        self.profiles.update_many(records).await
    }

    async fn list_by_scope(&self, scope: &str) -> Result<Vec<Profile>> {
        self.profiles.list_by_scope(scope).await
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn synced_baseline(&self, user_id: &str) -> Result<Option<Profile>> {
        Ok(self.baselines.read().get(user_id).cloned())
    }

    async fn set_synced_baseline(&self, profile: Profile) -> Result<()> {
        self.baselines.write().insert(profile.id.clone(), profile);
        Ok(())
    }
}

// ============================================================================
// MemoryMetadataStore
// ============================================================================

type MetadataKey = (String, String, SyncOperation);

struct MetadataInner {
    /// Primary index: (record_id, scope_id, operation) → row.
    rows: HashMap<MetadataKey, SyncMetadata>,
    /// Secondary index: (request_id, scope_id, operation) → primary key.
    /// Kept consistent with `rows` on every write.
    by_request: HashMap<MetadataKey, MetadataKey>,
}

/// In-memory `SyncMetadataStore` with the two composite-key indexes.
pub struct MemoryMetadataStore {
    inner: RwLock<MetadataInner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MetadataInner {
                rows: HashMap::new(),
                by_request: HashMap::new(),
            }),
        }
    }

    /// Total row count. Test observability.
    pub fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().rows.is_empty()
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncMetadataStore for MemoryMetadataStore {
    async fn upsert(&self, rows: Vec<SyncMetadata>) -> Result<()> {
        let mut inner = self.inner.write();
        for row in rows {
            let key = (
                row.record_id.clone(),
                row.scope_id.clone(),
                row.operation,
            );
            if let Some(request_id) = &row.idempotency_request_id {
                inner.by_request.insert(
                    (request_id.clone(), row.scope_id.clone(), row.operation),
                    key.clone(),
                );
            }
            inner.rows.insert(key, row);
        }
        Ok(())
    }

    async fn get(
        &self,
        record_id: &str,
        scope: &str,
        operation: SyncOperation,
    ) -> Result<Option<SyncMetadata>> {
        let inner = self.inner.read();
        Ok(inner
            .rows
            .get(&(record_id.to_string(), scope.to_string(), operation))
            .cloned())
    }

    async fn get_by_request_id(
        &self,
        request_id: &str,
        scope: &str,
        operation: SyncOperation,
    ) -> Result<Option<SyncMetadata>> {
        let inner = self.inner.read();
        let primary = inner
            .by_request
            .get(&(request_id.to_string(), scope.to_string(), operation));
        Ok(primary.and_then(|key| inner.rows.get(key)).cloned())
    }

    async fn list_by_state(
        &self,
        scope: &str,
        state: SyncStateKind,
        limit: usize,
    ) -> Result<Vec<SyncMetadata>> {
        let inner = self.inner.read();
        let mut out: Vec<SyncMetadata> = inner
            .rows
            .values()
            .filter(|row| row.scope_id == scope && row.state.kind() == state)
            .cloned()
            .collect();
        out.sort_by_key(|row| row.last_attempt_at);
        out.truncate(limit);
        Ok(out)
    }

    async fn purge_record(&self, record_id: &str, scope: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .rows
            .retain(|(rid, sid, _), _| !(rid == record_id && sid == scope));
        inner.by_request.retain(|(_, sid, _), primary| {
            !(primary.0 == record_id && sid == scope)
        });
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
