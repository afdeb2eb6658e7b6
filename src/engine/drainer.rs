//! Pending-sync drain: retry every locally-pending or failed mutation
//! against the remote once connectivity is back.
//!
//! Each row is handled independently — one failure never aborts the batch.
//! Rows whose owning record has disappeared are skipped, not failed.

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::domain::Record;
use crate::error::Result;
use crate::store::{LocalStore, RemoteGateway, SyncMetadataStore};
use crate::types::{DrainOutcome, RecordSyncError, SyncMetadata, SyncStateKind};

/// Collect up to `limit` unsynced rows for a scope: pending upserts first,
/// then pending deletes, then earlier failures.
pub(crate) async fn collect_unsynced<M>(
    metadata: &M,
    scope: &str,
    limit: usize,
) -> Result<Vec<SyncMetadata>>
where
    M: SyncMetadataStore + ?Sized,
{
    let mut rows = Vec::new();
    for kind in [
        SyncStateKind::PendingUpsert,
        SyncStateKind::PendingDelete,
        SyncStateKind::Failed,
    ] {
        if rows.len() >= limit {
            break;
        }
        let remaining = limit - rows.len();
        rows.extend(metadata.list_by_state(scope, kind, remaining).await?);
    }
    Ok(rows)
}

/// Drain all unsynced metadata rows for a scope against the remote.
///
/// Caller is responsible for checking connectivity first; engines only
/// invoke this when the oracle reports online.
pub async fn drain_pending<T, L, R, M>(
    local: &L,
    remote: &R,
    metadata: &M,
    clock: &dyn Clock,
    scope: &str,
    limit: usize,
) -> Result<DrainOutcome>
where
    T: Record,
    L: LocalStore<T> + ?Sized,
    R: RemoteGateway<T> + ?Sized,
    M: SyncMetadataStore + ?Sized,
{
    let rows = collect_unsynced(metadata, scope, limit).await?;
    let mut outcome = DrainOutcome::default();

    for mut row in rows {
        let record = match local.get(scope, &row.record_id).await? {
            Some(record) => record,
            None => {
                // Record purged or never landed locally — nothing to push.
                outcome.skipped += 1;
                continue;
            }
        };

        let now = clock.now();
        match remote.upsert(&[record]).await {
            Ok(()) => {
                row.mark_synced(now);
                outcome.synced += 1;
            }
            Err(err) => {
                warn!(record_id = %row.record_id, error = %err, "drain retry failed");
                row.mark_failed(err.message.clone(), now);
                outcome.errors.push(RecordSyncError {
                    record_id: row.record_id.clone(),
                    error: err.message,
                });
                outcome.failed += 1;
            }
        }
        // Each row is updated on its own so a later storage error cannot
        // lose earlier rows' outcomes.
        metadata.upsert(vec![row]).await?;
    }

    debug!(
        scope,
        synced = outcome.synced,
        failed = outcome.failed,
        skipped = outcome.skipped,
        "drain pass complete"
    );
    Ok(outcome)
}
