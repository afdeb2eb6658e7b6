//! Product catalog engine: upsert plus policy-driven read-through reads.
//!
//! Reads serve the local store first; depending on the caller's `ReadPolicy`
//! a detached background task refreshes the local copy from the remote.
//! Those tasks are fire-and-forget: their failures are logged and swallowed,
//! and they never delay or fail the read that triggered them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::Clock;
use crate::connectivity::ConnectivityOracle;
use crate::domain::product::Product;
use crate::domain::Record;
use crate::error::{EngineError, Result, ValidationError};
use crate::store::{LocalStore, RemoteGateway, SyncMetadataStore};
use crate::types::{
    DrainOutcome, QuantityUnit, ReadPolicy, SyncMetadata, SyncOperation, WriteOutcome,
};

use super::drainer::drain_pending;
use super::complete_write;

// ============================================================================
// Inputs
// ============================================================================

#[derive(Debug, Clone)]
pub struct UpsertProductInput {
    pub household_id: String,
    /// `None` creates a new product; `Some` updates an existing one.
    pub id: Option<String>,
    pub name: String,
    pub brand: Option<String>,
    pub barcode: Option<String>,
    pub category: Option<String>,
    pub default_unit: QuantityUnit,
    pub request_id: Option<String>,
}

// ============================================================================
// ProductEngine
// ============================================================================

pub struct ProductEngine {
    store: Arc<dyn LocalStore<Product>>,
    remote: Arc<dyn RemoteGateway<Product>>,
    metadata: Arc<dyn SyncMetadataStore>,
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn ConnectivityOracle>,
    op_lock: Mutex<()>,
}

impl ProductEngine {
    pub fn new(
        store: Arc<dyn LocalStore<Product>>,
        remote: Arc<dyn RemoteGateway<Product>>,
        metadata: Arc<dyn SyncMetadataStore>,
        clock: Arc<dyn Clock>,
        connectivity: Arc<dyn ConnectivityOracle>,
    ) -> Self {
        Self {
            store,
            remote,
            metadata,
            clock,
            connectivity,
            op_lock: Mutex::new(()),
        }
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Create or update a product. Local write first, then the standard
    /// metadata/remote tail.
    pub async fn upsert(&self, input: UpsertProductInput) -> Result<WriteOutcome<Product>> {
        let _guard = self.op_lock.lock().await;
        validate_upsert(&input)?;

        let operation = if input.id.is_some() {
            SyncOperation::Update
        } else {
            SyncOperation::Add
        };

        if let Some(request_id) = input.request_id.as_deref() {
            if let Some(row) = self
                .metadata
                .get_by_request_id(request_id, &input.household_id, operation)
                .await?
            {
                if let Some(record) = self.store.get(&input.household_id, &row.record_id).await? {
                    return Ok(WriteOutcome {
                        record,
                        sync_state: row.state,
                    });
                }
            }
        }

        let now = self.clock.now();
        let product = match &input.id {
            Some(id) => {
                let mut existing = self
                    .store
                    .get(&input.household_id, id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound {
                        kind: "product",
                        id: id.clone(),
                    })?;
                existing.name = input.name.clone();
                existing.brand = input.brand.clone();
                existing.barcode = input.barcode.clone();
                existing.category = input.category.clone();
                existing.default_unit = input.default_unit;
                existing.touch(now);
                existing
            }
            None => Product {
                id: Product::generate_id(),
                household_id: input.household_id.clone(),
                name: input.name.clone(),
                brand: input.brand.clone(),
                barcode: input.barcode.clone(),
                category: input.category.clone(),
                default_unit: input.default_unit,
                created_at: now,
                updated_at: now,
            },
        };

        self.store.upsert(product.clone()).await?;
        let row = SyncMetadata::pending(
            &product.id,
            &product.household_id,
            operation,
            now,
            input.request_id,
        );
        let sync_state = complete_write(
            &self.connectivity,
            self.remote.as_ref(),
            self.metadata.as_ref(),
            self.clock.as_ref(),
            std::slice::from_ref(&product),
            vec![row],
        )
        .await?;

        Ok(WriteOutcome {
            record: product,
            sync_state,
        })
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    /// Policy-driven single read. A local miss under `LocalOnly` is simply
    /// `None`; under the remote-backed policies a miss goes to the gateway
    /// when online and is a `Connectivity` error when offline — callers can
    /// tell "we don't know" from "doesn't exist".
    pub async fn get(
        &self,
        household_id: &str,
        id: &str,
        policy: ReadPolicy,
    ) -> Result<Option<Product>> {
        let _guard = self.op_lock.lock().await;

        if let Some(local) = self.store.get(household_id, id).await? {
            if self.should_refresh(&policy, &[local.updated_at]) {
                self.spawn_refresh_one(household_id.to_string(), id.to_string());
            }
            return Ok(Some(local));
        }

        match policy {
            ReadPolicy::LocalOnly => Ok(None),
            _ => {
                if !self.connectivity.is_online() {
                    return Err(EngineError::Connectivity("product fetch".to_string()));
                }
                let fetched = self.remote.fetch(household_id, id).await?;
                if let Some(product) = &fetched {
                    // Remote-sourced, already in sync — no metadata row.
                    self.store.upsert(product.clone()).await?;
                }
                Ok(fetched)
            }
        }
    }

    /// Policy-driven scope query with the same hit/miss rules as `get`.
    pub async fn query(&self, household_id: &str, policy: ReadPolicy) -> Result<Vec<Product>> {
        let _guard = self.op_lock.lock().await;

        let local = self.store.list_by_scope(household_id).await?;
        if !local.is_empty() {
            let ages: Vec<DateTime<Utc>> = local.iter().map(|p| p.updated_at).collect();
            if self.should_refresh(&policy, &ages) {
                self.spawn_refresh_scope(household_id.to_string());
            }
            return Ok(local);
        }

        match policy {
            ReadPolicy::LocalOnly => Ok(Vec::new()),
            _ => {
                if !self.connectivity.is_online() {
                    return Err(EngineError::Connectivity("product query".to_string()));
                }
                let fetched = self.remote.query(household_id).await?;
                if !fetched.is_empty() {
                    self.store.update_many(fetched.clone()).await?;
                }
                Ok(fetched)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Drain
    // -----------------------------------------------------------------------

    pub async fn sync_pending(&self, household_id: &str, limit: usize) -> Result<DrainOutcome> {
        let _guard = self.op_lock.lock().await;
        if !self.connectivity.is_online() {
            return Err(EngineError::Connectivity("product drain".to_string()));
        }
        drain_pending(
            self.store.as_ref(),
            self.remote.as_ref(),
            self.metadata.as_ref(),
            self.clock.as_ref(),
            household_id,
            limit,
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn should_refresh(&self, policy: &ReadPolicy, updated: &[DateTime<Utc>]) -> bool {
        match policy {
            ReadPolicy::LocalOnly => false,
            ReadPolicy::LocalThenRemoteAlwaysBackground => self.connectivity.is_online(),
            ReadPolicy::LocalThenRemoteIfStale { max_age } => {
                if !self.connectivity.is_online() {
                    return false;
                }
                let now = self.clock.now();
                updated.iter().any(|at| now - *at > *max_age)
            }
        }
    }

    /// Detached refresh of one record. The task holds no engine lock, so it
    /// cannot deadlock against the operation that spawned it.
    fn spawn_refresh_one(&self, household_id: String, id: String) {
        let store = Arc::clone(&self.store);
        let remote = Arc::clone(&self.remote);
        tokio::spawn(async move {
            match remote.fetch(&household_id, &id).await {
                Ok(Some(product)) => {
                    if let Err(err) = store.upsert(product).await {
                        debug!(%id, error = %err, "background refresh write failed");
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(%id, error = %err, "background refresh fetch failed");
                }
            }
        });
    }

    fn spawn_refresh_scope(&self, household_id: String) {
        let store = Arc::clone(&self.store);
        let remote = Arc::clone(&self.remote);
        tokio::spawn(async move {
            match remote.query(&household_id).await {
                Ok(products) if !products.is_empty() => {
                    if let Err(err) = store.update_many(products).await {
                        debug!(scope = %household_id, error = %err, "background refresh write failed");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(scope = %household_id, error = %err, "background refresh query failed");
                }
            }
        });
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_upsert(input: &UpsertProductInput) -> Result<(), ValidationError> {
    if input.household_id.trim().is_empty() {
        return Err(ValidationError::new("household_id", "must not be empty"));
    }
    if input.name.trim().is_empty() {
        return Err(ValidationError::new("name", "must not be empty"));
    }
    if let Some(id) = &input.id {
        if id.trim().is_empty() {
            return Err(ValidationError::new("id", "must not be empty when set"));
        }
    }
    Ok(())
}
