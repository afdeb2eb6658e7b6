//! Profile engine: local-first profile edits reconciled against the remote
//! authority with a three-way merge.
//!
//! Unlike inventory and product pushes, a profile sync never blindly
//! overwrites the remote: it merges base/local/remote per `policy::merge`
//! and only pushes when the merged result actually differs from the remote
//! snapshot — otherwise it adopts the remote as the new synced baseline.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::Clock;
use crate::connectivity::ConnectivityOracle;
use crate::domain::profile::Profile;
use crate::domain::Record;
use crate::error::{EngineError, Result, ValidationError};
use crate::policy::merge::{content_equal, merge_profiles, ThreeWaySnapshot};
use crate::store::{ProfileStore, RemoteGateway, SyncMetadataStore};
use crate::types::{
    DrainOutcome, RecordSyncError, SyncMetadata, SyncOperation, SyncState, WriteOutcome,
};

use super::drainer::collect_unsynced;
use super::record_pending;

pub struct ProfileEngine {
    store: Arc<dyn ProfileStore>,
    remote: Arc<dyn RemoteGateway<Profile>>,
    metadata: Arc<dyn SyncMetadataStore>,
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn ConnectivityOracle>,
    op_lock: Mutex<()>,
}

impl ProfileEngine {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        remote: Arc<dyn RemoteGateway<Profile>>,
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

    /// Save a locally edited profile. Applies immediately to the local
    /// store; when online, reconciles with the remote via three-way merge.
    pub async fn save(
        &self,
        mut profile: Profile,
        request_id: Option<String>,
    ) -> Result<WriteOutcome<Profile>> {
        let _guard = self.op_lock.lock().await;
        validate_profile(&profile)?;

        if let Some(request_id) = request_id.as_deref() {
            if let Some(row) = self
                .metadata
                .get_by_request_id(request_id, &profile.id, SyncOperation::Update)
                .await?
            {
                if let Some(record) = self.store.get(&profile.id, &row.record_id).await? {
                    return Ok(WriteOutcome {
                        record,
                        sync_state: row.state,
                    });
                }
            }
        }

        let now = self.clock.now();
        profile.touch(now);
        self.store.upsert(profile.clone()).await?;

        let row = SyncMetadata::pending(
            &profile.id,
            &profile.id,
            SyncOperation::Update,
            now,
            request_id,
        );
        let pending_state = row.state.clone();
        record_pending(self.metadata.as_ref(), vec![row.clone()]).await?;

        if !self.connectivity.is_online() {
            return Ok(WriteOutcome {
                record: profile,
                sync_state: pending_state,
            });
        }

        let (record, sync_state) = self.sync_inner(&profile.id, vec![row]).await?;
        Ok(WriteOutcome { record, sync_state })
    }

    /// Reconcile the local profile with the remote. Requires connectivity.
    pub async fn sync(&self, user_id: &str) -> Result<WriteOutcome<Profile>> {
        let _guard = self.op_lock.lock().await;
        if !self.connectivity.is_online() {
            return Err(EngineError::Connectivity("profile sync".to_string()));
        }

        let row = match self
            .metadata
            .get(user_id, user_id, SyncOperation::Update)
            .await?
        {
            Some(row) => row,
            None => SyncMetadata::pending(
                user_id,
                user_id,
                SyncOperation::Update,
                self.clock.now(),
                None,
            ),
        };
        let (record, sync_state) = self.sync_inner(user_id, vec![row]).await?;
        Ok(WriteOutcome { record, sync_state })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get(&self, user_id: &str) -> Result<Option<Profile>> {
        let _guard = self.op_lock.lock().await;
        self.store.get(user_id, user_id).await
    }

    // -----------------------------------------------------------------------
    // Drain
    // -----------------------------------------------------------------------

    /// Retry pending profile syncs. All outstanding rows for the scope ride
    /// on one merge pass — a profile has a single record.
    pub async fn sync_pending(&self, user_id: &str, limit: usize) -> Result<DrainOutcome> {
        let _guard = self.op_lock.lock().await;
        if !self.connectivity.is_online() {
            return Err(EngineError::Connectivity("profile drain".to_string()));
        }

        let rows = collect_unsynced(self.metadata.as_ref(), user_id, limit).await?;
        if rows.is_empty() {
            return Ok(DrainOutcome::default());
        }
        let row_count = rows.len();

        if self.store.get(user_id, user_id).await?.is_none() {
            return Ok(DrainOutcome {
                skipped: row_count,
                ..DrainOutcome::default()
            });
        }

        let (_, sync_state) = self.sync_inner(user_id, rows).await?;
        match sync_state {
            SyncState::Synced => Ok(DrainOutcome {
                synced: row_count,
                ..DrainOutcome::default()
            }),
            SyncState::Failed { last_error, .. } => Ok(DrainOutcome {
                failed: row_count,
                errors: vec![RecordSyncError {
                    record_id: user_id.to_string(),
                    error: last_error,
                }],
                ..DrainOutcome::default()
            }),
            // sync_inner only ever resolves to Synced or Failed.
            other => {
                debug!(?other, "unexpected post-sync state");
                Ok(DrainOutcome::default())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    /// One merge-and-push pass. Remote failures are captured into the given
    /// metadata rows, never propagated — the caller gets the local record
    /// plus a `Failed` state instead.
    async fn sync_inner(
        &self,
        user_id: &str,
        mut rows: Vec<SyncMetadata>,
    ) -> Result<(Profile, SyncState)> {
        let local = self
            .store
            .get(user_id, user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "profile",
                id: user_id.to_string(),
            })?;

        let base = self.store.synced_baseline(user_id).await?;
        let attempt = async {
            let remote_snap = self.remote.fetch(user_id, user_id).await?;

            let merged = match &remote_snap {
                None => local.clone(),
                Some(remote) => merge_profiles(&ThreeWaySnapshot {
                    base,
                    local: local.clone(),
                    remote: remote.clone(),
                }),
            };

            let needs_push = match &remote_snap {
                None => true,
                Some(remote) => !content_equal(&merged, remote),
            };
            if needs_push {
                self.remote.upsert(std::slice::from_ref(&merged)).await?;
                debug!(%user_id, "pushed merged profile to remote");
            } else {
                debug!(%user_id, "merged profile equals remote; adopting as baseline");
            }
            Ok::<Profile, crate::error::RemoteError>(merged)
        }
        .await;

        let now = self.clock.now();
        match attempt {
            Ok(merged) => {
                self.store.upsert(merged.clone()).await?;
                self.store.set_synced_baseline(merged.clone()).await?;
                for row in &mut rows {
                    row.mark_synced(now);
                }
                self.metadata.upsert(rows).await?;
                Ok((merged, SyncState::Synced))
            }
            Err(err) => {
                for row in &mut rows {
                    row.mark_failed(err.message.clone(), now);
                }
                let state = rows
                    .first()
                    .map(|row| row.state.clone())
                    .unwrap_or(SyncState::Synced);
                self.metadata.upsert(rows).await?;
                Ok((local, state))
            }
        }
    }
}

fn validate_profile(profile: &Profile) -> Result<(), ValidationError> {
    if profile.id.trim().is_empty() {
        return Err(ValidationError::new("id", "must not be empty"));
    }
    if profile.display_name.trim().is_empty() {
        return Err(ValidationError::new("display_name", "must not be empty"));
    }
    Ok(())
}
