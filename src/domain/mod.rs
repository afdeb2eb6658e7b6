//! Domain aggregates: inventory items, products, and user profiles.
//!
//! All three are versioned records with a stable identity key, a scope
//! (household or user), and `created_at`/`updated_at` auto-fields.

pub mod inventory;
pub mod product;
pub mod profile;

use chrono::{DateTime, Utc};

/// Common shape shared by every syncable aggregate.
///
/// Invariants: `id` is immutable after creation; `updated_at` strictly
/// increases on every accepted mutation (engines stamp it via `touch`).
pub trait Record: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn scope_id(&self) -> &str;
    fn updated_at(&self) -> DateTime<Utc>;
    fn touch(&mut self, now: DateTime<Utc>);
}
