use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role a storage location plays in the warehouse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    /// Permanent storage bin.
    Bin,
    /// Staging area for picked, outbound-ready stock.
    Staging,
    /// Transient receiving dock.
    Dock,
    /// Locked-down storage for restricted stock.
    Quarantine,
}

/// A physical storage location with a declared unit capacity.
///
/// Exists independent of stock. `occupied_units` is maintained by the
/// capacity registry and is the only mutable quantity here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Location code, unique within its warehouse.
    pub code: String,
    pub warehouse_id: Uuid,
    pub kind: LocationKind,
    /// Declared maximum number of units this location can hold.
    pub max_units: i32,
    pub occupied_units: i32,
    /// Locked locations reject any stock increase.
    pub locked: bool,
    pub created_at: DateTime<Utc>,
}

impl Location {
    pub fn new(code: impl Into<String>, warehouse_id: Uuid, kind: LocationKind, max_units: i32) -> Self {
        Self {
            code: code.into(),
            warehouse_id,
            kind,
            max_units,
            occupied_units: 0,
            locked: false,
            created_at: Utc::now(),
        }
    }

    pub fn available_units(&self) -> i32 {
        self.max_units - self.occupied_units
    }

    pub fn can_accept(&self, units: i32) -> bool {
        !self.locked && self.occupied_units + units <= self.max_units
    }
}
