//! Mutation engines — one per aggregate, each a serialized actor.
//!
//! Every write follows the same contract: validate → local write → pending
//! metadata → (if online) remote push → metadata update. Remote failure
//! degrades the returned sync state but never rolls back the local write.
//! The shared helpers here implement the metadata half of that contract.

pub mod drainer;
pub mod inventory;
pub mod product;
pub mod profile;

use std::sync::Arc;

use tracing::warn;

use crate::clock::Clock;
use crate::connectivity::ConnectivityOracle;
use crate::domain::Record;
use crate::error::Result;
use crate::store::{RemoteGateway, SyncMetadataStore};
use crate::types::{SyncMetadata, SyncState};

/// Write pending metadata rows, guarding against stale overwrites: a row
/// already holding a later `last_attempt_at` (e.g. a Synced update from a
/// faster concurrent operation) is never clobbered by an older stamp.
pub(crate) async fn record_pending<M>(metadata: &M, rows: Vec<SyncMetadata>) -> Result<()>
where
    M: SyncMetadataStore + ?Sized,
{
    let mut to_write = Vec::with_capacity(rows.len());
    for row in rows {
        let existing = metadata
            .get(&row.record_id, &row.scope_id, row.operation)
            .await?;
        match existing {
            Some(ref current) if current.last_attempt_at > row.last_attempt_at => continue,
            _ => to_write.push(row),
        }
    }
    if !to_write.is_empty() {
        metadata.upsert(to_write).await?;
    }
    Ok(())
}

/// Push a batch of records to the remote and record the outcome on every
/// metadata row. Returns the resulting sync state for the caller's outcome;
/// the remote error itself is captured into the rows, not propagated.
pub(crate) async fn push_batch<T, R, M>(
    remote: &R,
    metadata: &M,
    clock: &dyn Clock,
    records: &[T],
    mut rows: Vec<SyncMetadata>,
) -> Result<SyncState>
where
    T: Record,
    R: RemoteGateway<T> + ?Sized,
    M: SyncMetadataStore + ?Sized,
{
    let now = clock.now();
    match remote.upsert(records).await {
        Ok(()) => {
            for row in &mut rows {
                row.mark_synced(now);
            }
            metadata.upsert(rows).await?;
            Ok(SyncState::Synced)
        }
        Err(err) => {
            warn!(error = %err, count = records.len(), "remote upsert failed; will retry on drain");
            for row in &mut rows {
                row.mark_failed(err.message.clone(), now);
            }
            let state = rows
                .first()
                .map(|row| row.state.clone())
                .unwrap_or(SyncState::Synced);
            metadata.upsert(rows).await?;
            Ok(state)
        }
    }
}

/// The tail of every write operation: persist pending metadata, then either
/// stop there (offline — a normal, successful outcome) or attempt the remote
/// push and record its result.
pub(crate) async fn complete_write<T, R, M>(
    connectivity: &Arc<dyn ConnectivityOracle>,
    remote: &R,
    metadata: &M,
    clock: &dyn Clock,
    records: &[T],
    rows: Vec<SyncMetadata>,
) -> Result<SyncState>
where
    T: Record,
    R: RemoteGateway<T> + ?Sized,
    M: SyncMetadataStore + ?Sized,
{
    let pending_state = rows
        .first()
        .map(|row| row.state.clone())
        .unwrap_or(SyncState::Synced);
    record_pending(metadata, rows.clone()).await?;

    if !connectivity.is_online() {
        return Ok(pending_state);
    }
    push_batch(remote, metadata, clock, records, rows).await
}

// ============================================================================
// Tests
// ============================================================================
