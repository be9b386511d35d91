use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scan events a unique unit can go through after issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum UnitEvent {
    Picked,
    Delivered,
    Returned,
}

/// Lifecycle status of a unique unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Active,
    Picked,
    Delivered,
    Returned,
}

impl UnitStatus {
    /// Status after applying a scan event, or `None` when the event is not
    /// legal from the current status (double pickup scan, delivery scan
    /// before pickup, and so on).
    pub fn apply(self, event: UnitEvent) -> Option<UnitStatus> {
        match (self, event) {
            (UnitStatus::Active, UnitEvent::Picked) => Some(UnitStatus::Picked),
            (UnitStatus::Picked, UnitEvent::Delivered) => Some(UnitStatus::Delivered),
            (UnitStatus::Delivered, UnitEvent::Returned) => Some(UnitStatus::Returned),
            _ => None,
        }
    }
}

/// One per physical item requiring scan verification.
///
/// The sticker code is globally unique and immutable once issued; the unit
/// is bound to exactly one lot at issue time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UniqueUnit {
    pub code: String,
    pub lot_id: Uuid,
    pub status: UnitStatus,
    pub issued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UniqueUnit {
    pub fn new(code: impl Into<String>, lot_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            code: code.into(),
            lot_id,
            status: UnitStatus::Active,
            issued_at: now,
            updated_at: now,
        }
    }
}
