use chrono::{DateTime, Duration, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Four-digit week/year manufacture code ("DOT" code), e.g. `2219` for
/// week 22 of 2019. Expiry dates are derived from it together with the
/// product's shelf life.
///
/// Ordering is chronological (older codes sort first), which lets callers
/// apply oldest-first picking on `query_available` results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ManufactureCode {
    year: i32,
    week: u8,
}

impl ManufactureCode {
    /// Parses a `WWYY` code. The week must exist in the ISO week calendar
    /// of the decoded year.
    pub fn parse(s: &str) -> Result<Self, ServiceError> {
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ServiceError::ValidationError(format!(
                "manufacture code '{}' is not a 4-digit WWYY code",
                s
            )));
        }
        let week: u8 = s[..2].parse().map_err(|_| {
            ServiceError::ValidationError(format!("manufacture code '{}' has no week", s))
        })?;
        let yy: i32 = s[2..].parse().map_err(|_| {
            ServiceError::ValidationError(format!("manufacture code '{}' has no year", s))
        })?;
        let year = 2000 + yy;
        if week == 0 || NaiveDate::from_isoywd_opt(year, week as u32, Weekday::Mon).is_none() {
            return Err(ServiceError::ValidationError(format!(
                "manufacture code '{}': week {} does not exist in {}",
                s, week, year
            )));
        }
        Ok(Self { year, week })
    }

    /// Monday of the manufacture week.
    pub fn manufactured_on(&self) -> Option<NaiveDate> {
        NaiveDate::from_isoywd_opt(self.year, self.week as u32, Weekday::Mon)
    }

    /// Expiry date derived from the product shelf life.
    pub fn expiry(&self, shelf_life_weeks: u32) -> Option<NaiveDate> {
        self.manufactured_on()
            .map(|d| d + Duration::weeks(shelf_life_weeks as i64))
    }

    pub fn week(&self) -> u8 {
        self.week
    }

    pub fn year(&self) -> i32 {
        self.year
    }
}

impl fmt::Display for ManufactureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}", self.week, self.year % 100)
    }
}

impl TryFrom<String> for ManufactureCode {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ManufactureCode::parse(&s).map_err(|e| e.to_string())
    }
}

impl From<ManufactureCode> for String {
    fn from(code: ManufactureCode) -> Self {
        code.to_string()
    }
}

/// Identity of a lot: one product, one batch/manufacture-code combination,
/// at one location. Quantities always attach to exactly one key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LotKey {
    pub product_id: Uuid,
    pub batch: String,
    pub manufacture_code: ManufactureCode,
    pub warehouse_id: Uuid,
    pub location: String,
}

/// The atomic unit of inventory.
///
/// Created when stock first lands in a location; retired (kept for audit,
/// never deleted) when its quantity reaches exactly zero. The quantity is
/// never negative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id: Uuid,
    pub key: LotKey,
    pub expires_on: Option<NaiveDate>,
    pub quantity: i32,
    pub unit_cost: Option<Decimal>,
    pub retired: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lot {
    pub fn new(key: LotKey, quantity: i32, expires_on: Option<NaiveDate>, unit_cost: Option<Decimal>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            key,
            expires_on,
            quantity,
            unit_cost,
            retired: false,
            created_at: now,
            updated_at: now,
        }
    }
}
