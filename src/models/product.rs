use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stocked product.
///
/// Identity fields are immutable once stock exists against the product;
/// only descriptive metadata may change afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    /// Stock keeping unit, unique per catalog.
    pub sku: String,
    /// Manufacturer article number.
    pub article_number: String,
    pub name: String,
    /// Unit of measure for quantities, e.g. "EA".
    pub unit_of_measure: String,
    /// Expected shelf life in weeks, counted from the manufacture week.
    pub shelf_life_weeks: u32,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn new(
        sku: impl Into<String>,
        article_number: impl Into<String>,
        name: impl Into<String>,
        shelf_life_weeks: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sku: sku.into(),
            article_number: article_number.into(),
            name: name.into(),
            unit_of_measure: "EA".to_string(),
            shelf_life_weeks,
            created_at: Utc::now(),
        }
    }
}
