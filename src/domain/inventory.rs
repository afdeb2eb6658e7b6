//! Inventory batches: one record per physical batch of a product in a
//! storage location, with FEFO-relevant expiry data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Record;
use crate::types::Quantity;

/// Lifecycle status of a batch. `Consumed` and `Archived` are terminal for
/// merge purposes — only `Active` batches are merge candidates or FEFO
/// consumption sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    Active,
    Consumed,
    /// Soft delete. Archival preserves history and keeps idempotent replay
    /// possible; records are only ever physically removed by an explicit
    /// purge.
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub household_id: String,
    pub product_id: String,
    pub name: String,
    pub quantity: Quantity,
    pub storage_location_id: String,
    pub expiry_date: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub lot_code: Option<String>,
    /// Extraction confidence in [0, 1] when the item came from automated
    /// capture; `None` for manual entry.
    pub confidence: Option<f64>,
    pub status: ItemStatus,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// The tuple that decides whether a new addition combines with this
    /// batch. Exact-match on every field, including presence/absence of the
    /// optional ones — no fuzzy matching, no calendar-day normalization.
    pub fn merge_key(&self) -> MergeKey {
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

impl Record for InventoryItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn scope_id(&self) -> &str {
        &self.household_id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// Merge identity for inventory additions (see `InventoryItem::merge_key`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeKey {
    pub household_id: String,
    pub product_id: String,
    pub expiry_date: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub storage_location_id: String,
    pub lot_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QuantityUnit;
    use chrono::TimeZone;

    fn item() -> InventoryItem {
        let t = Utc.timestamp_opt(1_000, 0).unwrap();
        InventoryItem {
            id: "i1".into(),
            household_id: "h1".into(),
            product_id: "p1".into(),
            name: "Milk".into(),
            quantity: Quantity::new(1.0, QuantityUnit::Liter),
            storage_location_id: "fridge".into(),
            expiry_date: Some(t),
            opened_at: None,
            lot_code: None,
            confidence: None,
            status: ItemStatus::Active,
            consumed_at: None,
            created_at: t,
            updated_at: t,
        }
    }

    #[test]
    fn merge_key_equality_is_exact() {
        let a = item();
        let mut b = item();
        assert_eq!(a.merge_key(), b.merge_key());

        b.storage_location_id = "pantry".into();
        assert_ne!(a.merge_key(), b.merge_key());
    }

    #[test]
    fn merge_key_distinguishes_absent_optional_fields() {
        let a = item();
        let mut b = item();
        b.expiry_date = None;
        assert_ne!(a.merge_key(), b.merge_key());

        let mut c = item();
        c.lot_code = Some("LOT-7".into());
        assert_ne!(a.merge_key(), c.merge_key());
    }

    #[test]
    fn merge_key_exact_instant_not_calendar_day() {
        let a = item();
        let mut b = item();
        // Same day, different time of day — not merge candidates.
        b.expiry_date = Some(Utc.timestamp_opt(1_000 + 3_600, 0).unwrap());
        assert_ne!(a.merge_key(), b.merge_key());
    }
}
