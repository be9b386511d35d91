use dashmap::mapref::entry::Entry;
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    models::{
        lot::Lot,
        unique_unit::{UniqueUnit, UnitEvent, UnitStatus},
    },
    store::Store,
};

const CODE_PREFIX: &str = "SU";
const CODE_LEN: usize = 10;

/// Registry of per-physical-unit sticker codes.
///
/// Issues globally-unique scan codes bound to a lot at issue time and
/// validates the pickup/delivery/return scan sequence. Independent of
/// quantity bookkeeping: retiring a lot does not touch its units.
#[derive(Clone)]
pub struct UniqueUnitService {
    store: Arc<Store>,
}

impl UniqueUnitService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Issues `count` fresh sticker codes bound to the given lot.
    ///
    /// Codes are never reused: a generated code that collides with any
    /// previously issued one (active or historical) is discarded and
    /// regenerated.
    #[instrument(skip(self), fields(lot_id = %lot_id))]
    pub fn issue(&self, lot_id: Uuid, count: i32) -> Result<Vec<String>, ServiceError> {
        if count < 1 {
            return Err(ServiceError::ValidationError(
                "unit count must be positive".into(),
            ));
        }
        if self.store.lot(lot_id).is_none() {
            return Err(ServiceError::not_found("Lot", lot_id));
        }

        let mut codes = Vec::with_capacity(count as usize);
        while codes.len() < count as usize {
            let candidate = self.generate_code();
            // Vacant-entry insert; a colliding candidate is regenerated.
            if let Entry::Vacant(slot) = self.store.units.entry(candidate.clone()) {
                slot.insert(UniqueUnit::new(candidate.clone(), lot_id));
                codes.push(candidate);
            }
        }
        info!(issued = codes.len(), "Unique units issued");
        Ok(codes)
    }

    /// Resolves a sticker code to its bound lot and current status.
    pub fn resolve(&self, code: &str) -> Result<(Lot, UnitStatus), ServiceError> {
        let unit = self
            .store
            .unit(code)
            .ok_or_else(|| ServiceError::not_found("Unique unit", code))?;
        let lot = self
            .store
            .lot(unit.lot_id)
            .ok_or_else(|| ServiceError::not_found("Lot", unit.lot_id))?;
        Ok((lot, unit.status))
    }

    /// Applies a scan event to a unit, enforcing the status sequence.
    #[instrument(skip(self))]
    pub fn mark_event(&self, code: &str, event: UnitEvent) -> Result<UnitStatus, ServiceError> {
        let mut unit = self
            .store
            .units
            .get_mut(code)
            .ok_or_else(|| ServiceError::not_found("Unique unit", code))?;
        let next = unit.status.apply(event).ok_or_else(|| {
            ServiceError::InvalidStateTransition(format!(
                "unit {} is {} and cannot record a {} scan",
                code, unit.status, event
            ))
        })?;
        unit.status = next;
        unit.updated_at = chrono::Utc::now();
        Ok(next)
    }

    fn generate_code(&self) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CODE_LEN)
            .map(|b| (b as char).to_ascii_uppercase())
            .collect();
        format!("{}-{}", CODE_PREFIX, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::lot::{Lot, LotKey, ManufactureCode};

    fn seeded_store() -> (Arc<Store>, Uuid) {
        let store = Arc::new(Store::new());
        let key = LotKey {
            product_id: Uuid::new_v4(),
            batch: "B1".into(),
            manufacture_code: ManufactureCode::parse("0124").unwrap(),
            warehouse_id: Uuid::new_v4(),
            location: "A1".into(),
        };
        let lot = Lot::new(key, 5, None, None);
        let lot_id = lot.id;
        store.lots.insert(lot_id, lot);
        (store, lot_id)
    }

    #[test]
    fn issued_codes_are_unique_and_bound() {
        let (store, lot_id) = seeded_store();
        let svc = UniqueUnitService::new(store);

        let mut all = svc.issue(lot_id, 50).unwrap();
        all.extend(svc.issue(lot_id, 50).unwrap());
        let mut deduped = all.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), all.len());

        for code in &all {
            let (lot, status) = svc.resolve(code).unwrap();
            assert_eq!(lot.id, lot_id);
            assert_eq!(status, UnitStatus::Active);
        }
    }

    #[test]
    fn issue_rejects_unknown_lot_and_bad_count() {
        let (store, lot_id) = seeded_store();
        let svc = UniqueUnitService::new(store);
        assert_eq!(
            svc.issue(Uuid::new_v4(), 1).unwrap_err().code(),
            "not_found"
        );
        assert_eq!(svc.issue(lot_id, 0).unwrap_err().code(), "validation_error");
    }

    #[test]
    fn mark_event_walks_the_status_sequence() {
        let (store, lot_id) = seeded_store();
        let svc = UniqueUnitService::new(store);
        let code = svc.issue(lot_id, 1).unwrap().remove(0);

        assert_eq!(
            svc.mark_event(&code, UnitEvent::Picked).unwrap(),
            UnitStatus::Picked
        );
        // Second pickup scan of the same code must fail.
        assert_eq!(
            svc.mark_event(&code, UnitEvent::Picked).unwrap_err().code(),
            "invalid_state_transition"
        );
        assert_eq!(
            svc.mark_event(&code, UnitEvent::Delivered).unwrap(),
            UnitStatus::Delivered
        );
        assert_eq!(
            svc.mark_event(&code, UnitEvent::Returned).unwrap(),
            UnitStatus::Returned
        );
    }
}
