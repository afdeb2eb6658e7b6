//! Product catalog entries, scoped per household.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Record;
use crate::types::QuantityUnit;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub household_id: String,
    pub name: String,
    pub brand: Option<String>,
    pub barcode: Option<String>,
    pub category: Option<String>,
    pub default_unit: QuantityUnit,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }
}

impl Record for Product {
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
