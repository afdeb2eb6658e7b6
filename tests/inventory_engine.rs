//! Inventory engine integration tests: offline-first write path, merge
//! semantics, idempotency replay, FEFO consumption, and drain retries.

mod common;

use std::sync::Arc;

use chrono::TimeZone;
use chrono::Utc;

use pantry_sync::clock::ManualClock;
use pantry_sync::connectivity::StaticConnectivity;
use pantry_sync::domain::inventory::ItemStatus;
use pantry_sync::engine::inventory::{
    AddItemInput, ConsumeInput, InventoryEngine, MoveItemInput, UpdateDatesInput,
};
use pantry_sync::error::EngineError;
use pantry_sync::store::memory::{MemoryInventoryStore, MemoryMetadataStore};
use pantry_sync::store::SyncMetadataStore;
use pantry_sync::types::{Quantity, QuantityUnit, SyncOperation, SyncState};

use common::{at, clock_at, init_tracing, offline, online, MockGateway};

struct Fixture {
    engine: InventoryEngine,
    store: Arc<MemoryInventoryStore>,
    gateway: Arc<MockGateway<pantry_sync::domain::inventory::InventoryItem>>,
    metadata: Arc<MemoryMetadataStore>,
    clock: Arc<ManualClock>,
    connectivity: Arc<StaticConnectivity>,
}

fn fixture(is_online: bool) -> Fixture {
    init_tracing();
    let store = Arc::new(MemoryInventoryStore::new());
    store.add_location("h1", "fridge");
    store.add_location("h1", "pantry");
    let gateway = Arc::new(MockGateway::new());
    let metadata = Arc::new(MemoryMetadataStore::new());
    let clock = clock_at(1_000);
    let connectivity = if is_online { online() } else { offline() };

    let engine = InventoryEngine::new(
        store.clone(),
        gateway.clone(),
        metadata.clone(),
        clock.clone(),
        connectivity.clone(),
    );
    Fixture {
        engine,
        store,
        gateway,
        metadata,
        clock,
        connectivity,
    }
}

fn add_input(qty: f64) -> AddItemInput {
    AddItemInput {
        household_id: "h1".into(),
        product_id: "p1".into(),
        name: "Milk".into(),
        quantity: Quantity::new(qty, QuantityUnit::Liter),
        storage_location_id: "fridge".into(),
        expiry_date: Some(at(10_000)),
        opened_at: None,
        lot_code: None,
        confidence: None,
        request_id: None,
    }
}

// ---------------------------------------------------------------------------
// Offline / online write paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offline_add_is_pending_and_never_touches_remote() {
    let f = fixture(false);
    let outcome = f.engine.add(add_input(2.0)).await.unwrap();

    assert_eq!(outcome.sync_state, SyncState::PendingUpsert);
    assert_eq!(f.gateway.remote_calls(), 0);
    // Local write landed regardless.
    assert_eq!(f.store.len(), 1);

    let row = f
        .metadata
        .get(&outcome.record.id, "h1", SyncOperation::Add)
        .await
        .unwrap()
        .expect("metadata row exists");
    assert_eq!(row.state, SyncState::PendingUpsert);
    assert_eq!(row.retry_count, 0);
}

#[tokio::test]
async fn online_add_syncs_immediately() {
    let f = fixture(true);
    let outcome = f.engine.add(add_input(2.0)).await.unwrap();

    assert_eq!(outcome.sync_state, SyncState::Synced);
    assert_eq!(f.gateway.upsert_calls(), 1);
    assert!(f.gateway.stored("h1", &outcome.record.id).is_some());

    let row = f
        .metadata
        .get(&outcome.record.id, "h1", SyncOperation::Add)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.state, SyncState::Synced);
    assert!(row.last_synced_at.is_some());
}

#[tokio::test]
async fn remote_failure_degrades_state_but_keeps_local_write() {
    let f = fixture(true);
    f.gateway.set_fail_upserts(true);

    let outcome = f.engine.add(add_input(2.0)).await.unwrap();
    match &outcome.sync_state {
        SyncState::Failed {
            retry_count,
            last_error,
            ..
        } => {
            assert_eq!(*retry_count, 1);
            assert!(last_error.contains("mock upsert failure"));
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    // The caller still receives the mutated record.
    assert_eq!(f.store.len(), 1);

    // Drain after connectivity is healthy again.
    f.gateway.set_fail_upserts(false);
    f.clock.advance(chrono::Duration::seconds(60));
    let drained = f.engine.sync_pending("h1", 10).await.unwrap();
    assert_eq!(drained.synced, 1);
    assert_eq!(drained.failed, 0);

    let row = f
        .metadata
        .get(&outcome.record.id, "h1", SyncOperation::Add)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.state, SyncState::Synced);
    assert_eq!(row.retry_count, 0);
}

#[tokio::test]
async fn sync_pending_requires_connectivity() {
    let f = fixture(false);
    let err = f.engine.sync_pending("h1", 10).await.unwrap_err();
    assert!(matches!(err, EngineError::Connectivity(_)));
}

// ---------------------------------------------------------------------------
// Merge-or-create
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_merge_key_sums_quantities() {
    let f = fixture(false);
    let first = f.engine.add(add_input(2.0)).await.unwrap();
    f.clock.advance(chrono::Duration::seconds(30));
    let second = f.engine.add(add_input(3.0)).await.unwrap();

    assert_eq!(first.record.id, second.record.id);
    assert_eq!(f.store.len(), 1);
    assert_eq!(second.record.quantity.value, 5.0);
    assert!(second.record.updated_at > first.record.created_at);
}

#[tokio::test]
async fn differing_merge_key_field_creates_new_record() {
    let f = fixture(false);
    f.engine.add(add_input(2.0)).await.unwrap();

    let mut moved = add_input(3.0);
    moved.storage_location_id = "pantry".into();
    f.engine.add(moved).await.unwrap();

    let mut undated = add_input(1.0);
    undated.expiry_date = None;
    f.engine.add(undated).await.unwrap();

    assert_eq!(f.store.len(), 3);
}

#[tokio::test]
async fn merge_with_mismatched_unit_is_rejected() {
    let f = fixture(false);
    f.engine.add(add_input(2.0)).await.unwrap();

    let mut grams = add_input(500.0);
    grams.quantity = Quantity::new(500.0, QuantityUnit::Gram);
    let err = f.engine.add(grams).await.unwrap_err();
    assert!(matches!(err, EngineError::IncompatibleUnit { .. }));
    // No silent conversion, no extra record.
    assert_eq!(f.store.len(), 1);
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_request_id_replays_without_reapplying() {
    let f = fixture(false);
    let mut input = add_input(2.0);
    input.request_id = Some("req-1".into());

    let first = f.engine.add(input.clone()).await.unwrap();
    let second = f.engine.add(input).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(f.store.len(), 1);
    assert_eq!(
        first.record.quantity.value, 2.0,
        "quantity must not be applied twice"
    );

    let row = f
        .metadata
        .get(&first.record.id, "h1", SyncOperation::Add)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.retry_count, 0);
    assert_eq!(row.state, SyncState::PendingUpsert);
}

#[tokio::test]
async fn repeated_consume_request_id_is_not_applied_twice() {
    let f = fixture(false);
    f.engine.add(add_input(5.0)).await.unwrap();

    let input = ConsumeInput {
        household_id: "h1".into(),
        product_id: "p1".into(),
        amount: 2.0,
        unit: QuantityUnit::Liter,
        request_id: Some("req-c".into()),
    };
    let first = f.engine.consume(input.clone()).await.unwrap();
    assert!(!first.already_applied);

    let second = f.engine.consume(input).await.unwrap();
    assert!(second.already_applied);
    assert_eq!(second.consumed, first.consumed);
    assert_eq!(second.remainder, first.remainder);

    let items = f.engine.list("h1").await.unwrap();
    assert_eq!(items[0].quantity.value, 3.0, "consumed only once");
}

#[tokio::test]
async fn consume_replay_returns_the_original_outcome() {
    let f = fixture(false);
    f.engine.add(add_input(5.0)).await.unwrap();

    // Short stock: the original pass reports a remainder the caller acts on.
    let input = ConsumeInput {
        household_id: "h1".into(),
        product_id: "p1".into(),
        amount: 8.0,
        unit: QuantityUnit::Liter,
        request_id: Some("req-short".into()),
    };
    let first = f.engine.consume(input.clone()).await.unwrap();
    assert_eq!(first.consumed.len(), 1);
    assert_eq!(first.consumed[0].amount, 5.0);
    assert_eq!(first.remainder, 3.0);

    // A timed-out caller retrying must see what actually happened, not an
    // empty result.
    let replayed = f.engine.consume(input).await.unwrap();
    assert!(replayed.already_applied);
    assert_eq!(replayed.consumed.len(), 1);
    assert_eq!(replayed.consumed[0].item.id, first.consumed[0].item.id);
    assert_eq!(replayed.consumed[0].amount, 5.0);
    assert_eq!(replayed.remainder, 3.0);
    assert_eq!(replayed.sync_state, first.sync_state);
}

// ---------------------------------------------------------------------------
// Validation — no side effects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validation_failure_has_no_side_effects() {
    let f = fixture(true);

    let mut empty_name = add_input(2.0);
    empty_name.name = "  ".into();
    assert!(matches!(
        f.engine.add(empty_name).await.unwrap_err(),
        EngineError::Validation(_)
    ));

    let mut zero_qty = add_input(0.0);
    zero_qty.quantity = Quantity::new(0.0, QuantityUnit::Liter);
    assert!(matches!(
        f.engine.add(zero_qty).await.unwrap_err(),
        EngineError::Validation(_)
    ));

    let mut bad_confidence = add_input(1.0);
    bad_confidence.confidence = Some(1.5);
    assert!(matches!(
        f.engine.add(bad_confidence).await.unwrap_err(),
        EngineError::Validation(_)
    ));

    assert!(f.store.is_empty());
    assert!(f.metadata.is_empty());
    assert_eq!(f.gateway.remote_calls(), 0);
}

#[tokio::test]
async fn item_mutations_validate_identifiers() {
    let f = fixture(true);

    assert!(matches!(
        f.engine.archive("", "item-1", None).await.unwrap_err(),
        EngineError::Validation(_)
    ));
    assert!(matches!(
        f.engine.archive("h1", " ", None).await.unwrap_err(),
        EngineError::Validation(_)
    ));
    assert!(matches!(
        f.engine
            .update_dates(UpdateDatesInput {
                household_id: "h1".into(),
                item_id: "".into(),
                expiry_date: None,
                opened_at: None,
                request_id: None,
            })
            .await
            .unwrap_err(),
        EngineError::Validation(_)
    ));
    assert!(matches!(
        f.engine
            .move_item(MoveItemInput {
                household_id: "".into(),
                item_id: "item-1".into(),
                storage_location_id: "fridge".into(),
                request_id: None,
            })
            .await
            .unwrap_err(),
        EngineError::Validation(_)
    ));

    assert!(f.metadata.is_empty());
    assert_eq!(f.gateway.remote_calls(), 0);
}

#[tokio::test]
async fn unknown_location_is_not_found() {
    let f = fixture(true);
    let mut input = add_input(2.0);
    input.storage_location_id = "garage".into();
    let err = f.engine.add(input).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "storage location", .. }));
    assert!(f.store.is_empty());
}

// ---------------------------------------------------------------------------
// Consume
// ---------------------------------------------------------------------------

async fn seed_batches(f: &Fixture) -> Vec<String> {
    // Expiries [Jan 5, Jan 2, none] with quantities [3, 5, 2].
    let mut ids = Vec::new();
    for (qty, expiry) in [
        (3.0, Some(Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap())),
        (5.0, Some(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap())),
        (2.0, None),
    ] {
        let mut input = add_input(qty);
        input.quantity = Quantity::new(qty, QuantityUnit::Piece);
        input.expiry_date = expiry;
        let outcome = f.engine.add(input).await.unwrap();
        ids.push(outcome.record.id);
        f.clock.advance(chrono::Duration::seconds(1));
    }
    ids
}

#[tokio::test]
async fn consume_walks_batches_in_fefo_order() {
    let f = fixture(false);
    let ids = seed_batches(&f).await;

    let outcome = f
        .engine
        .consume(ConsumeInput {
            household_id: "h1".into(),
            product_id: "p1".into(),
            amount: 6.0,
            unit: QuantityUnit::Piece,
            request_id: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.remainder, 0.0);
    assert_eq!(outcome.consumed.len(), 2);
    // Earliest expiry first: the Jan 2 batch fully, then 1 from Jan 5.
    assert_eq!(outcome.consumed[0].item.id, ids[1]);
    assert_eq!(outcome.consumed[0].amount, 5.0);
    assert_eq!(outcome.consumed[1].item.id, ids[0]);
    assert_eq!(outcome.consumed[1].amount, 1.0);

    // Fully drained batch is consumed with a stamp; partial stays active.
    assert_eq!(outcome.consumed[0].item.status, ItemStatus::Consumed);
    assert!(outcome.consumed[0].item.consumed_at.is_some());
    assert_eq!(outcome.consumed[1].item.status, ItemStatus::Active);
    assert!(outcome.consumed[1].item.consumed_at.is_none());

    // The undated batch is untouched.
    let undated = f.engine.get("h1", &ids[2]).await.unwrap().unwrap();
    assert_eq!(undated.quantity.value, 2.0);
    assert_eq!(undated.status, ItemStatus::Active);
}

#[tokio::test]
async fn consume_short_stock_reports_true_remainder() {
    let f = fixture(false);
    seed_batches(&f).await;

    let outcome = f
        .engine
        .consume(ConsumeInput {
            household_id: "h1".into(),
            product_id: "p1".into(),
            amount: 100.0,
            unit: QuantityUnit::Piece,
            request_id: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.remainder, 90.0);
    assert_eq!(outcome.consumed.len(), 3);
    for batch in &outcome.consumed {
        assert_eq!(batch.item.status, ItemStatus::Consumed);
    }
}

#[tokio::test]
async fn consume_writes_one_metadata_row_per_touched_batch() {
    let f = fixture(false);
    let ids = seed_batches(&f).await;

    f.engine
        .consume(ConsumeInput {
            household_id: "h1".into(),
            product_id: "p1".into(),
            amount: 6.0,
            unit: QuantityUnit::Piece,
            request_id: None,
        })
        .await
        .unwrap();

    for id in &ids[..2] {
        let row = f
            .metadata
            .get(id, "h1", SyncOperation::Consume)
            .await
            .unwrap();
        assert!(row.is_some(), "consume row for {id}");
        // Independent from the Add rows on the same records.
        assert!(f
            .metadata
            .get(id, "h1", SyncOperation::Add)
            .await
            .unwrap()
            .is_some());
    }
}

// ---------------------------------------------------------------------------
// Move / archive / dates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn move_item_updates_location() {
    let f = fixture(false);
    let added = f.engine.add(add_input(2.0)).await.unwrap();

    let moved = f
        .engine
        .move_item(MoveItemInput {
            household_id: "h1".into(),
            item_id: added.record.id.clone(),
            storage_location_id: "pantry".into(),
            request_id: None,
        })
        .await
        .unwrap();
    assert_eq!(moved.record.storage_location_id, "pantry");
    assert_eq!(moved.sync_state, SyncState::PendingUpsert);
}

#[tokio::test]
async fn archive_is_a_status_change_not_a_removal() {
    let f = fixture(false);
    let added = f.engine.add(add_input(2.0)).await.unwrap();

    let archived = f
        .engine
        .archive("h1", &added.record.id, None)
        .await
        .unwrap();
    assert_eq!(archived.record.status, ItemStatus::Archived);
    assert_eq!(archived.sync_state, SyncState::PendingDelete);
    // Record still readable for history and replay.
    assert!(f.engine.get("h1", &added.record.id).await.unwrap().is_some());
}

#[tokio::test]
async fn update_dates_replaces_both_date_fields() {
    let f = fixture(false);
    let added = f.engine.add(add_input(2.0)).await.unwrap();

    let updated = f
        .engine
        .update_dates(UpdateDatesInput {
            household_id: "h1".into(),
            item_id: added.record.id.clone(),
            expiry_date: Some(at(20_000)),
            opened_at: Some(at(1_500)),
            request_id: None,
        })
        .await
        .unwrap();
    assert_eq!(updated.record.expiry_date, Some(at(20_000)));
    assert_eq!(updated.record.opened_at, Some(at(1_500)));

    let cleared = f
        .engine
        .update_dates(UpdateDatesInput {
            household_id: "h1".into(),
            item_id: added.record.id.clone(),
            expiry_date: None,
            opened_at: None,
            request_id: None,
        })
        .await
        .unwrap();
    assert_eq!(cleared.record.expiry_date, None);
    assert_eq!(cleared.record.opened_at, None);
}

#[tokio::test]
async fn mutating_missing_item_is_not_found() {
    let f = fixture(false);
    let err = f.engine.archive("h1", "ghost", None).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "inventory item", .. }));
}

// ---------------------------------------------------------------------------
// Drain across operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn drain_retries_everything_accumulated_offline() {
    let f = fixture(false);
    let a = f.engine.add(add_input(2.0)).await.unwrap();
    f.engine
        .archive("h1", &a.record.id, None)
        .await
        .unwrap();

    let mut other = add_input(1.0);
    other.storage_location_id = "pantry".into();
    f.engine.add(other).await.unwrap();

    f.connectivity.set_online(true);
    let drained = f.engine.sync_pending("h1", 10).await.unwrap();
    // Add + Delete rows on record a, Add row on the other record.
    assert_eq!(drained.synced, 3);
    assert_eq!(drained.failed + drained.skipped, 0);
    assert_eq!(f.gateway.stored_count(), 2);
}
