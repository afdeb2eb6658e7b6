//! Inventory mutation engine: add / consume / move / archive / date updates.
//!
//! All operations on one engine instance run one-at-a-time under an internal
//! async lock (engines for other aggregates run independently). The local
//! write always lands; only the remote phase can fail, and that failure is
//! captured into sync metadata rather than surfaced as an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::Clock;
use crate::connectivity::ConnectivityOracle;
use crate::domain::inventory::{InventoryItem, ItemStatus, MergeKey};
use crate::domain::Record;
use crate::error::{EngineError, Result, ValidationError};
use crate::policy::fefo;
use crate::store::{InventoryStore, RemoteGateway, SyncMetadataStore};
use crate::types::{
    ConsumeReceipt, ConsumedAmount, DrainOutcome, Quantity, QuantityUnit, SyncMetadata,
    SyncOperation, SyncState, WriteOutcome,
};

use super::drainer::drain_pending;
use super::complete_write;

// ============================================================================
// Inputs
// ============================================================================

#[derive(Debug, Clone)]
pub struct AddItemInput {
    pub household_id: String,
    pub product_id: String,
    pub name: String,
    pub quantity: Quantity,
    pub storage_location_id: String,
    pub expiry_date: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub lot_code: Option<String>,
    /// Extraction confidence in [0, 1]; `None` for manual entry.
    pub confidence: Option<f64>,
    /// Caller-supplied idempotency token — retried calls with the same id
    /// replay the original result instead of re-applying the mutation.
    pub request_id: Option<String>,
}

impl AddItemInput {
    fn merge_key(&self) -> MergeKey {
        MergeKey {
            household_id: self.household_id.clone(),
            product_id: self.product_id.clone(),
            expiry_date: self.expiry_date,
            opened_at: self.opened_at,
            storage_location_id: self.storage_location_id.clone(),
            lot_code: self.lot_code.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumeInput {
    pub household_id: String,
    pub product_id: String,
    pub amount: f64,
    pub unit: QuantityUnit,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MoveItemInput {
    pub household_id: String,
    pub item_id: String,
    pub storage_location_id: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateDatesInput {
    pub household_id: String,
    pub item_id: String,
    pub expiry_date: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
}

// ============================================================================
// Outcomes
// ============================================================================

/// One batch's share of a completed consumption, in FEFO walk order.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedBatch {
    /// The batch after the consumption was applied.
    pub item: InventoryItem,
    pub amount: f64,
}

/// Result of a consume operation. Partial fulfillment is not an error —
/// `remainder` carries whatever could not be consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeOutcome {
    pub consumed: Vec<ConsumedBatch>,
    pub remainder: f64,
    pub sync_state: SyncState,
    /// True when an idempotency token matched a previous call and the
    /// mutation was not re-applied.
    pub already_applied: bool,
}

// ============================================================================
// InventoryEngine
// ============================================================================

pub struct InventoryEngine {
    store: Arc<dyn InventoryStore>,
    remote: Arc<dyn RemoteGateway<InventoryItem>>,
    metadata: Arc<dyn SyncMetadataStore>,
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn ConnectivityOracle>,
    /// Serializes all operations on this engine instance.
    op_lock: Mutex<()>,
}

impl InventoryEngine {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        remote: Arc<dyn RemoteGateway<InventoryItem>>,
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
    // Add
    // -----------------------------------------------------------------------

    /// Add a batch. An `Active` record with an identical merge key absorbs
    /// the quantity instead of creating a duplicate; a merge candidate with
    /// a different unit is a hard error, never a silent conversion.
    pub async fn add(&self, input: AddItemInput) -> Result<WriteOutcome<InventoryItem>> {
        let _guard = self.op_lock.lock().await;
        validate_add(&input)?;
        if !self
            .store
            .location_exists(&input.household_id, &input.storage_location_id)
            .await?
        {
            return Err(EngineError::NotFound {
                kind: "storage location",
                id: input.storage_location_id.clone(),
            });
        }

        if let Some(replayed) = self
            .replay(
                input.request_id.as_deref(),
                &input.household_id,
                SyncOperation::Add,
            )
            .await?
        {
            return Ok(replayed);
        }

        let now = self.clock.now();
        let item = match self.store.find_by_merge_key(&input.merge_key()).await? {
            Some(mut existing) => {
                let summed = existing
                    .quantity
                    .checked_add(&input.quantity)
                    .ok_or_else(|| EngineError::IncompatibleUnit {
                        existing: existing.quantity.unit.to_string(),
                        incoming: input.quantity.unit.to_string(),
                    })?;
                existing.quantity = summed;
                existing.touch(now);
                debug!(item_id = %existing.id, "merged addition into existing batch");
                existing
            }
            None => InventoryItem {
                id: InventoryItem::generate_id(),
                household_id: input.household_id.clone(),
                product_id: input.product_id.clone(),
                name: input.name.clone(),
                quantity: input.quantity,
                storage_location_id: input.storage_location_id.clone(),
                expiry_date: input.expiry_date,
                opened_at: input.opened_at,
                lot_code: input.lot_code.clone(),
                confidence: input.confidence,
                status: ItemStatus::Active,
                consumed_at: None,
                created_at: now,
                updated_at: now,
            },
        };

        self.store.upsert(item.clone()).await?;
        let row = SyncMetadata::pending(
            &item.id,
            &item.household_id,
            SyncOperation::Add,
            now,
            input.request_id,
        );
        let sync_state = complete_write(
            &self.connectivity,
            self.remote.as_ref(),
            self.metadata.as_ref(),
            self.clock.as_ref(),
            std::slice::from_ref(&item),
            vec![row],
        )
        .await?;

        Ok(WriteOutcome {
            record: item,
            sync_state,
        })
    }

    // -----------------------------------------------------------------------
    // Consume
    // -----------------------------------------------------------------------

    /// Consume an amount of a product across its batches in FEFO order.
    /// Batches drained to exactly zero transition to `Consumed` with a
    /// `consumed_at` stamp; partially drained batches stay `Active`.
    pub async fn consume(&self, input: ConsumeInput) -> Result<ConsumeOutcome> {
        let _guard = self.op_lock.lock().await;
        validate_consume(&input)?;

        // A matching token means the consumption already ran; do not apply
        // it again. The receipt persisted on the row reconstructs the
        // original outcome.
        if let Some(request_id) = input.request_id.as_deref() {
            if let Some(row) = self
                .metadata
                .get_by_request_id(request_id, &input.household_id, SyncOperation::Consume)
                .await?
            {
                return self.replay_consume(&input.household_id, row).await;
            }
        }

        let batches = self
            .store
            .list_active_by_product(&input.household_id, &input.product_id)
            .await?;
        let plan = fefo::plan_consumption(&batches, input.amount, input.unit)?;

        if plan.allocations.is_empty() {
            // Nothing available — no local mutation, nothing to sync.
            return Ok(ConsumeOutcome {
                consumed: Vec::new(),
                remainder: plan.remainder,
                sync_state: SyncState::Synced,
                already_applied: false,
            });
        }

        let now = self.clock.now();
        let mut touched = Vec::with_capacity(plan.allocations.len());
        let mut consumed = Vec::with_capacity(plan.allocations.len());
        for allocation in &plan.allocations {
            // Allocations only ever name candidate batches.
            let Some(mut item) = batches
                .iter()
                .find(|b| b.id == allocation.item_id)
                .cloned()
            else {
                continue;
            };
            item.quantity = item.quantity.saturating_sub(allocation.amount);
            if item.quantity.is_zero() {
                item.status = ItemStatus::Consumed;
                item.consumed_at = Some(now);
            }
            item.touch(now);
            touched.push(item.clone());
            consumed.push(ConsumedBatch {
                item,
                amount: allocation.amount,
            });
        }

        self.store.update_many(touched.clone()).await?;
        let receipt = ConsumeReceipt {
            allocations: plan
                .allocations
                .iter()
                .map(|a| ConsumedAmount {
                    item_id: a.item_id.clone(),
                    amount: a.amount,
                })
                .collect(),
            remainder: plan.remainder,
        };
        let rows = touched
            .iter()
            .map(|item| {
                let mut row = SyncMetadata::pending(
                    &item.id,
                    &item.household_id,
                    SyncOperation::Consume,
                    now,
                    input.request_id.clone(),
                );
                row.consume_receipt = Some(receipt.clone());
                row
            })
            .collect();
        let sync_state = complete_write(
            &self.connectivity,
            self.remote.as_ref(),
            self.metadata.as_ref(),
            self.clock.as_ref(),
            &touched,
            rows,
        )
        .await?;

        Ok(ConsumeOutcome {
            consumed,
            remainder: plan.remainder,
            sync_state,
            already_applied: false,
        })
    }

    // -----------------------------------------------------------------------
    // Move / archive / date updates
    // -----------------------------------------------------------------------

    /// Move a batch to another storage location.
    pub async fn move_item(&self, input: MoveItemInput) -> Result<WriteOutcome<InventoryItem>> {
        let _guard = self.op_lock.lock().await;
        validate_item_ref(&input.household_id, &input.item_id)?;
        require_non_empty("storage_location_id", &input.storage_location_id)?;
        if !self
            .store
            .location_exists(&input.household_id, &input.storage_location_id)
            .await?
        {
            return Err(EngineError::NotFound {
                kind: "storage location",
                id: input.storage_location_id.clone(),
            });
        }
        if let Some(replayed) = self
            .replay(
                input.request_id.as_deref(),
                &input.household_id,
                SyncOperation::Update,
            )
            .await?
        {
            return Ok(replayed);
        }

        self.mutate_item(
            &input.household_id,
            &input.item_id,
            SyncOperation::Update,
            input.request_id,
            |item| item.storage_location_id = input.storage_location_id.clone(),
        )
        .await
    }

    /// Archive a batch. Deletion is a status change, not a physical remove —
    /// history survives and replays stay idempotent.
    pub async fn archive(
        &self,
        household_id: &str,
        item_id: &str,
        request_id: Option<String>,
    ) -> Result<WriteOutcome<InventoryItem>> {
        let _guard = self.op_lock.lock().await;
        validate_item_ref(household_id, item_id)?;
        if let Some(replayed) = self
            .replay(request_id.as_deref(), household_id, SyncOperation::Delete)
            .await?
        {
            return Ok(replayed);
        }

        self.mutate_item(
            household_id,
            item_id,
            SyncOperation::Delete,
            request_id,
            |item| item.status = ItemStatus::Archived,
        )
        .await
    }

    /// Replace a batch's expiry and opened-at dates.
    pub async fn update_dates(
        &self,
        input: UpdateDatesInput,
    ) -> Result<WriteOutcome<InventoryItem>> {
        let _guard = self.op_lock.lock().await;
        validate_item_ref(&input.household_id, &input.item_id)?;
        if let Some(replayed) = self
            .replay(
                input.request_id.as_deref(),
                &input.household_id,
                SyncOperation::Update,
            )
            .await?
        {
            return Ok(replayed);
        }

        self.mutate_item(
            &input.household_id,
            &input.item_id,
            SyncOperation::Update,
            input.request_id,
            |item| {
                item.expiry_date = input.expiry_date;
                item.opened_at = input.opened_at;
            },
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get(&self, household_id: &str, item_id: &str) -> Result<Option<InventoryItem>> {
        let _guard = self.op_lock.lock().await;
        self.store.get(household_id, item_id).await
    }

    pub async fn list(&self, household_id: &str) -> Result<Vec<InventoryItem>> {
        let _guard = self.op_lock.lock().await;
        self.store.list_by_scope(household_id).await
    }

    // -----------------------------------------------------------------------
    // Drain
    // -----------------------------------------------------------------------

    /// Retry all pending/failed inventory mutations for a household.
    pub async fn sync_pending(&self, household_id: &str, limit: usize) -> Result<DrainOutcome> {
        let _guard = self.op_lock.lock().await;
        if !self.connectivity.is_online() {
            return Err(EngineError::Connectivity("inventory drain".to_string()));
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

    /// Rebuild a consume outcome from the receipt persisted on its metadata
    /// row. Batches purged since the original pass are omitted.
    async fn replay_consume(
        &self,
        household_id: &str,
        row: SyncMetadata,
    ) -> Result<ConsumeOutcome> {
        let mut consumed = Vec::new();
        let mut remainder = 0.0;
        if let Some(receipt) = &row.consume_receipt {
            remainder = receipt.remainder;
            for allocation in &receipt.allocations {
                if let Some(item) = self.store.get(household_id, &allocation.item_id).await? {
                    consumed.push(ConsumedBatch {
                        item,
                        amount: allocation.amount,
                    });
                }
            }
        }
        Ok(ConsumeOutcome {
            consumed,
            remainder,
            sync_state: row.state,
            already_applied: true,
        })
    }

    /// Idempotency replay for single-record operations: a matching token
    /// whose record still exists returns the stored outcome verbatim.
    async fn replay(
        &self,
        request_id: Option<&str>,
        scope: &str,
        operation: SyncOperation,
    ) -> Result<Option<WriteOutcome<InventoryItem>>> {
        let Some(request_id) = request_id else {
            return Ok(None);
        };
        let Some(row) = self
            .metadata
            .get_by_request_id(request_id, scope, operation)
            .await?
        else {
            return Ok(None);
        };
        let Some(record) = self.store.get(scope, &row.record_id).await? else {
            return Ok(None);
        };
        Ok(Some(WriteOutcome {
            record,
            sync_state: row.state,
        }))
    }

    /// Shared single-record mutation tail: load, apply, touch, write local,
    /// write metadata, attempt remote.
    async fn mutate_item<F>(
        &self,
        household_id: &str,
        item_id: &str,
        operation: SyncOperation,
        request_id: Option<String>,
        apply: F,
    ) -> Result<WriteOutcome<InventoryItem>>
    where
        F: FnOnce(&mut InventoryItem),
    {
        let mut item = self
            .store
            .get(household_id, item_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "inventory item",
                id: item_id.to_string(),
            })?;

        let now = self.clock.now();
        apply(&mut item);
        item.touch(now);
        self.store.upsert(item.clone()).await?;

        let row = SyncMetadata::pending(&item.id, household_id, operation, now, request_id);
        let sync_state = complete_write(
            &self.connectivity,
            self.remote.as_ref(),
            self.metadata.as_ref(),
            self.clock.as_ref(),
            std::slice::from_ref(&item),
            vec![row],
        )
        .await?;

        Ok(WriteOutcome {
            record: item,
            sync_state,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_add(input: &AddItemInput) -> Result<(), ValidationError> {
    require_non_empty("household_id", &input.household_id)?;
    require_non_empty("product_id", &input.product_id)?;
    require_non_empty("name", &input.name)?;
    require_non_empty("storage_location_id", &input.storage_location_id)?;
    if input.quantity.value <= 0.0 {
        return Err(ValidationError::new("quantity.value", "must be positive"));
    }
    if let Some(confidence) = input.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ValidationError::new("confidence", "must be within [0, 1]"));
        }
    }
    Ok(())
}

fn validate_consume(input: &ConsumeInput) -> Result<(), ValidationError> {
    require_non_empty("household_id", &input.household_id)?;
    require_non_empty("product_id", &input.product_id)?;
    if input.amount <= 0.0 {
        return Err(ValidationError::new("amount", "must be positive"));
    }
    Ok(())
}

fn validate_item_ref(household_id: &str, item_id: &str) -> Result<(), ValidationError> {
    require_non_empty("household_id", household_id)?;
    require_non_empty("item_id", item_id)?;
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    Ok(())
}
