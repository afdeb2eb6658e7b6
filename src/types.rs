//! Core shared types: quantities, the sync state machine, per-record sync
//! metadata, and operation outcome shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Quantity
// ============================================================================

/// Unit of measure for an inventory quantity. No implicit conversion exists
/// between units — combining mismatched units is a hard error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantityUnit {
    Gram,
    Kilogram,
    Milliliter,
    Liter,
    Piece,
    Pack,
}

impl std::fmt::Display for QuantityUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A non-negative amount with a unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: QuantityUnit,
}

impl Quantity {
    pub fn new(value: f64, unit: QuantityUnit) -> Self {
        Self { value, unit }
    }

    pub fn is_zero(&self) -> bool {
        self.value <= f64::EPSILON
    }

    /// Sum two quantities of the same unit. `None` on unit mismatch.
    pub fn checked_add(&self, other: &Quantity) -> Option<Quantity> {
        if self.unit != other.unit {
            return None;
        }
        Some(Quantity::new(self.value + other.value, self.unit))
    }

    /// Subtract, clamping at zero. Consumption never produces a negative value.
    pub fn saturating_sub(&self, amount: f64) -> Quantity {
        Quantity::new((self.value - amount).max(0.0), self.unit)
    }
}

// ============================================================================
// Sync state machine
// ============================================================================

/// Which mutation a sync metadata row tracks. Part of the metadata key —
/// the same record can have independent pending rows for, say, an `Update`
/// and a `Consume` at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncOperation {
    Add,
    Update,
    Delete,
    Consume,
}

/// Per-record sync lifecycle state.
///
/// Transitions: `PendingUpsert`/`PendingDelete` → `Synced` on remote success,
/// → `Failed` on remote failure; `Failed` → `Synced` on a later retry,
/// `Failed` → `Failed` (retry count bumped) when a retry fails again.
/// Nothing leaves `Synced` except a new mutation re-entering at pending.
///
/// `next_retry_at` is an extension point for scheduled backoff — nothing in
/// the engine sets or reads it; retries are driven by explicit drain calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncState {
    PendingUpsert,
    PendingDelete,
    Synced,
    Failed {
        retry_count: u32,
        last_error: String,
        next_retry_at: Option<DateTime<Utc>>,
    },
}

impl SyncState {
    pub fn kind(&self) -> SyncStateKind {
        match self {
            SyncState::PendingUpsert => SyncStateKind::PendingUpsert,
            SyncState::PendingDelete => SyncStateKind::PendingDelete,
            SyncState::Synced => SyncStateKind::Synced,
            SyncState::Failed { .. } => SyncStateKind::Failed,
        }
    }

    /// True for any state the drainer should retry (pending or failed).
    pub fn needs_sync(&self) -> bool {
        !matches!(self, SyncState::Synced)
    }
}

/// Payload-free discriminant of `SyncState`, used for store queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStateKind {
    PendingUpsert,
    PendingDelete,
    Synced,
    Failed,
}

// ============================================================================
// SyncMetadata
// ============================================================================

/// One batch's share in a persisted consume receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumedAmount {
    pub item_id: String,
    pub amount: f64,
}

/// Outcome snapshot of a consume pass, persisted on each of its metadata
/// rows. A replayed request id reconstructs the original result from this
/// instead of re-applying the consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumeReceipt {
    /// Allocations in the original FEFO walk order.
    pub allocations: Vec<ConsumedAmount>,
    pub remainder: f64,
}

/// Bookkeeping row for one (record, scope, operation) tuple.
///
/// Created on the first local mutation with a pending state; updated to
/// `Synced` or `Failed` after each remote attempt. Never deleted except when
/// the owning record is permanently purged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub record_id: String,
    pub scope_id: String,
    pub operation: SyncOperation,
    pub state: SyncState,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_attempt_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Caller-supplied idempotency token, when the originating mutation had one.
    pub idempotency_request_id: Option<String>,
    /// Set on `Consume` rows only — the outcome snapshot for replay.
    pub consume_receipt: Option<ConsumeReceipt>,
}

impl SyncMetadata {
    /// Fresh pending row for a new local mutation. `Delete` operations enter
    /// at `PendingDelete`, everything else at `PendingUpsert`.
    pub fn pending(
        record_id: impl Into<String>,
        scope_id: impl Into<String>,
        operation: SyncOperation,
        now: DateTime<Utc>,
        request_id: Option<String>,
    ) -> Self {
        let state = if operation == SyncOperation::Delete {
            SyncState::PendingDelete
        } else {
            SyncState::PendingUpsert
        };
        Self {
            record_id: record_id.into(),
            scope_id: scope_id.into(),
            operation,
            state,
            retry_count: 0,
            last_error: None,
            last_attempt_at: now,
            last_synced_at: None,
            idempotency_request_id: request_id,
            consume_receipt: None,
        }
    }

    /// Transition to `Synced`: retry count reset, error cleared.
    pub fn mark_synced(&mut self, now: DateTime<Utc>) {
        self.state = SyncState::Synced;
        self.retry_count = 0;
        self.last_error = None;
        self.last_attempt_at = now;
        self.last_synced_at = Some(now);
    }

    /// Transition to `Failed`: retry count bumped, error captured.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        let error = error.into();
        self.retry_count += 1;
        self.state = SyncState::Failed {
            retry_count: self.retry_count,
            last_error: error.clone(),
            next_retry_at: None,
        };
        self.last_error = Some(error);
        self.last_attempt_at = now;
    }
}

// ============================================================================
// Operation outcomes
// ============================================================================

/// Result of a write operation: the mutated record plus the sync state the
/// presentation layer needs ("saved, syncing…" vs "saved, sync failed").
/// Remote failure never rolls back the local write, so the record is always
/// present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome<T> {
    pub record: T,
    pub sync_state: SyncState,
}

/// Per-record failure collected during a drain pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSyncError {
    pub record_id: String,
    pub error: String,
}

/// Aggregate result of a pending-sync drain. One row's failure never aborts
/// the batch — failures are collected here, never thrown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainOutcome {
    pub synced: usize,
    pub failed: usize,
    /// Rows whose owning record has disappeared — skipped, not failed.
    pub skipped: usize,
    pub errors: Vec<RecordSyncError>,
}

impl DrainOutcome {
    pub fn merge(&mut self, other: DrainOutcome) {
        self.synced += other.synced;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }
}

// ============================================================================
// Read policy
// ============================================================================

/// How a read should combine the local store with the remote gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Serve exactly what the local store has. Never touches the network.
    LocalOnly,
    /// Serve local; spawn a background refresh when the local entry is older
    /// than `max_age`.
    LocalThenRemoteIfStale { max_age: chrono::Duration },
    /// Serve local; spawn a background refresh on every hit.
    LocalThenRemoteAlwaysBackground,
}

// ============================================================================
// Tests
// ============================================================================
