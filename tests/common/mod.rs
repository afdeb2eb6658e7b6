//! Shared test fixtures: a recording mock remote gateway with failure
//! injection, plus clock/connectivity helpers.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use pantry_sync::clock::ManualClock;
use pantry_sync::connectivity::StaticConnectivity;
use pantry_sync::domain::Record;
use pantry_sync::error::RemoteError;
use pantry_sync::store::RemoteGateway;

// ============================================================================
// MockGateway
// ============================================================================

struct GatewayInner<T> {
    records: HashMap<(String, String), T>,
    fail_upserts: bool,
    fail_fetches: bool,
    fail_record_ids: HashSet<String>,
    upsert_calls: usize,
    fetch_calls: usize,
    query_calls: usize,
}

/// Recording in-memory remote authority. Counts every call and can be
/// switched into failure mode per direction.
pub struct MockGateway<T> {
    inner: Mutex<GatewayInner<T>>,
}

impl<T: Record> MockGateway<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GatewayInner {
                records: HashMap::new(),
                fail_upserts: false,
                fail_fetches: false,
                fail_record_ids: HashSet::new(),
                upsert_calls: 0,
                fetch_calls: 0,
                query_calls: 0,
            }),
        }
    }

    pub fn set_fail_upserts(&self, fail: bool) {
        self.inner.lock().fail_upserts = fail;
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.inner.lock().fail_fetches = fail;
    }

    /// Fail upserts that include this specific record id.
    pub fn fail_record(&self, id: impl Into<String>) {
        self.inner.lock().fail_record_ids.insert(id.into());
    }

    pub fn upsert_calls(&self) -> usize {
        self.inner.lock().upsert_calls
    }

    pub fn fetch_calls(&self) -> usize {
        self.inner.lock().fetch_calls
    }

    pub fn query_calls(&self) -> usize {
        self.inner.lock().query_calls
    }

    pub fn remote_calls(&self) -> usize {
        let inner = self.inner.lock();
        inner.upsert_calls + inner.fetch_calls + inner.query_calls
    }

    /// Seed the remote side directly, bypassing counters.
    pub fn seed(&self, record: T) {
        let key = (record.scope_id().to_string(), record.id().to_string());
        self.inner.lock().records.insert(key, record);
    }

    pub fn stored(&self, scope: &str, id: &str) -> Option<T> {
        self.inner
            .lock()
            .records
            .get(&(scope.to_string(), id.to_string()))
            .cloned()
    }

    pub fn stored_count(&self) -> usize {
        self.inner.lock().records.len()
    }
}

#[async_trait]
impl<T: Record> RemoteGateway<T> for MockGateway<T> {
    async fn fetch(&self, scope: &str, id: &str) -> Result<Option<T>, RemoteError> {
        let mut inner = self.inner.lock();
        inner.fetch_calls += 1;
        if inner.fail_fetches {
            return Err(RemoteError::new("mock fetch failure"));
        }
        Ok(inner
            .records
            .get(&(scope.to_string(), id.to_string()))
            .cloned())
    }

    async fn query(&self, scope: &str) -> Result<Vec<T>, RemoteError> {
        let mut inner = self.inner.lock();
        inner.query_calls += 1;
        if inner.fail_fetches {
            return Err(RemoteError::new("mock query failure"));
        }
        let mut out: Vec<T> = inner
            .records
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|(_, r)| r.clone())
            .collect();
        out.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(out)
    }

    async fn upsert(&self, records: &[T]) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        inner.upsert_calls += 1;
        if inner.fail_upserts {
            return Err(RemoteError::new("mock upsert failure"));
        }
        if records
            .iter()
            .any(|r| inner.fail_record_ids.contains(r.id()))
        {
            return Err(RemoteError::new("mock upsert failure"));
        }
        for record in records {
            let key = (record.scope_id().to_string(), record.id().to_string());
            inner.records.insert(key, record.clone());
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Opt-in log output for debugging a failing test: `RUST_LOG=debug cargo test`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn clock_at(secs: i64) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(at(secs)))
}

pub fn online() -> Arc<StaticConnectivity> {
    Arc::new(StaticConnectivity::new(true))
}

pub fn offline() -> Arc<StaticConnectivity> {
    Arc::new(StaticConnectivity::new(false))
}
