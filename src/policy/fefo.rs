//! FEFO (first-expires-first-out) consumption planning.
//!
//! Pure function over a snapshot of one product's batches. Batches with no
//! expiry date sort strictly after all dated batches — a missing expiry is
//! explicitly last, never implicitly soonest or latest. Ties break by
//! ascending creation time.

use std::cmp::Ordering;

use crate::domain::inventory::{InventoryItem, ItemStatus};
use crate::error::{EngineError, Result};
use crate::types::QuantityUnit;

/// One batch's share of a planned consumption, in walk order.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub item_id: String,
    pub amount: f64,
}

/// Output of `plan_consumption`. `remainder` is what could not be fulfilled;
/// partial fulfillment is not an error — the caller decides how to present
/// it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionPlan {
    pub allocations: Vec<Allocation>,
    pub remainder: f64,
}

impl ConsumptionPlan {
    pub fn fulfilled(&self) -> bool {
        self.remainder <= f64::EPSILON
    }
}

/// Plan a consumption of `requested` units across the given batches.
///
/// Filters to `Active` batches, orders them FEFO, and walks the sequence
/// consuming `min(remaining, available)` from each. Zero-quantity batches
/// are skipped without error. An active batch with a different unit is a
/// hard error — units are never converted.
pub fn plan_consumption(
    items: &[InventoryItem],
    requested: f64,
    unit: QuantityUnit,
) -> Result<ConsumptionPlan> {
    let mut candidates: Vec<&InventoryItem> = items
        .iter()
        .filter(|item| item.status == ItemStatus::Active)
        .collect();

    if let Some(mismatch) = candidates.iter().find(|item| item.quantity.unit != unit) {
        return Err(EngineError::IncompatibleUnit {
            existing: mismatch.quantity.unit.to_string(),
            incoming: unit.to_string(),
        });
    }

    candidates.sort_by(|a, b| fefo_order(a, b));

    let mut remaining = requested;
    let mut allocations = Vec::new();

    for item in candidates {
        if remaining <= f64::EPSILON {
            break;
        }
        let available = item.quantity.value;
        if available <= f64::EPSILON {
            continue;
        }
        let take = remaining.min(available);
        allocations.push(Allocation {
            item_id: item.id.clone(),
            amount: take,
        });
        remaining -= take;
    }

    Ok(ConsumptionPlan {
        allocations,
        remainder: remaining.max(0.0),
    })
}

fn fefo_order(a: &InventoryItem, b: &InventoryItem) -> Ordering {
    match (a.expiry_date, b.expiry_date) {
        (Some(ea), Some(eb)) => ea.cmp(&eb).then(a.created_at.cmp(&b.created_at)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.created_at.cmp(&b.created_at),
    }
}

// ============================================================================
// Tests
// ============================================================================
