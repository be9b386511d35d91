use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    context::RequestContext,
    errors::ServiceError,
    models::location::{Location, LocationKind},
    store::Store,
};

/// Input for registering a storage location.
#[derive(Debug, Clone, Validate)]
pub struct RegisterLocationCommand {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    pub kind: LocationKind,
    #[validate(range(min = 1))]
    pub max_units: i32,
}

/// Registry of per-location capacity counters.
///
/// Pure bookkeeping: it knows how many units a location holds and may hold,
/// and nothing about why stock moves. The ledger calls `reserve`/`release`
/// symmetrically around every quantity change, under the location's hold.
#[derive(Clone)]
pub struct CapacityService {
    store: Arc<Store>,
}

impl CapacityService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Registers a location in the context warehouse.
    #[instrument(skip(self, ctx), fields(warehouse_id = %ctx.warehouse_id()))]
    pub fn register_location(
        &self,
        ctx: &RequestContext,
        cmd: RegisterLocationCommand,
    ) -> Result<Location, ServiceError> {
        cmd.validate()?;
        let key = (ctx.warehouse_id(), cmd.code.clone());
        let location = Location::new(cmd.code, ctx.warehouse_id(), cmd.kind, cmd.max_units);
        match self.store.locations.entry(key) {
            Entry::Occupied(_) => Err(ServiceError::ValidationError(format!(
                "location {} already registered",
                location.code
            ))),
            Entry::Vacant(slot) => {
                slot.insert(location.clone());
                info!(code = %location.code, kind = %location.kind, max_units = location.max_units, "Location registered");
                Ok(location)
            }
        }
    }

    /// Locks or unlocks a location. Locked locations reject any increase.
    pub fn set_locked(
        &self,
        ctx: &RequestContext,
        code: &str,
        locked: bool,
    ) -> Result<(), ServiceError> {
        let mut location = self
            .store
            .locations
            .get_mut(&(ctx.warehouse_id(), code.to_string()))
            .ok_or_else(|| ServiceError::not_found("Location", code))?;
        location.locked = locked;
        Ok(())
    }

    pub fn get(&self, ctx: &RequestContext, code: &str) -> Result<Location, ServiceError> {
        self.store
            .location(ctx.warehouse_id(), code)
            .ok_or_else(|| ServiceError::not_found("Location", code))
    }

    /// Claims `units` of capacity at a location.
    ///
    /// Caller must hold the location. Fails without mutating when the
    /// location is locked or the claim would exceed the declared maximum.
    pub(crate) fn reserve(
        &self,
        warehouse_id: Uuid,
        code: &str,
        units: i32,
    ) -> Result<(), ServiceError> {
        let mut location = self
            .store
            .locations
            .get_mut(&(warehouse_id, code.to_string()))
            .ok_or_else(|| ServiceError::not_found("Location", code))?;
        if location.locked {
            return Err(ServiceError::CapacityExceeded(format!(
                "location {} is locked and rejects stock increases",
                code
            )));
        }
        if !location.can_accept(units) {
            return Err(ServiceError::CapacityExceeded(format!(
                "location {} cannot accept {} units (occupied {}/{})",
                code, units, location.occupied_units, location.max_units
            )));
        }
        location.occupied_units += units;
        Ok(())
    }

    /// Returns `units` of capacity at a location.
    ///
    /// Caller must hold the location. Never fails on the counter itself so
    /// compensation paths cannot get stuck; occupancy floors at zero.
    pub(crate) fn release(
        &self,
        warehouse_id: Uuid,
        code: &str,
        units: i32,
    ) -> Result<(), ServiceError> {
        let mut location = self
            .store
            .locations
            .get_mut(&(warehouse_id, code.to_string()))
            .ok_or_else(|| ServiceError::not_found("Location", code))?;
        location.occupied_units = (location.occupied_units - units).max(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (CapacityService, RequestContext) {
        let store = Arc::new(Store::new());
        let ctx = RequestContext::new(Uuid::new_v4(), "tester");
        (CapacityService::new(store), ctx)
    }

    fn register(svc: &CapacityService, ctx: &RequestContext, code: &str, max: i32) {
        svc.register_location(
            ctx,
            RegisterLocationCommand {
                code: code.into(),
                kind: LocationKind::Bin,
                max_units: max,
            },
        )
        .unwrap();
    }

    #[test]
    fn reserve_enforces_declared_maximum() {
        let (svc, ctx) = service();
        register(&svc, &ctx, "A1", 10);

        svc.reserve(ctx.warehouse_id(), "A1", 10).unwrap();
        let err = svc.reserve(ctx.warehouse_id(), "A1", 1).unwrap_err();
        assert_eq!(err.code(), "capacity_exceeded");
        assert_eq!(svc.get(&ctx, "A1").unwrap().occupied_units, 10);
    }

    #[test]
    fn locked_location_rejects_increase_but_allows_release() {
        let (svc, ctx) = service();
        register(&svc, &ctx, "A1", 10);
        svc.reserve(ctx.warehouse_id(), "A1", 5).unwrap();
        svc.set_locked(&ctx, "A1", true).unwrap();

        assert_eq!(
            svc.reserve(ctx.warehouse_id(), "A1", 1).unwrap_err().code(),
            "capacity_exceeded"
        );
        svc.release(ctx.warehouse_id(), "A1", 5).unwrap();
        assert_eq!(svc.get(&ctx, "A1").unwrap().occupied_units, 0);
    }

    #[test]
    fn release_floors_at_zero() {
        let (svc, ctx) = service();
        register(&svc, &ctx, "A1", 10);
        svc.reserve(ctx.warehouse_id(), "A1", 3).unwrap();
        svc.release(ctx.warehouse_id(), "A1", 5).unwrap();
        assert_eq!(svc.get(&ctx, "A1").unwrap().occupied_units, 0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let (svc, ctx) = service();
        register(&svc, &ctx, "A1", 10);
        let err = svc
            .register_location(
                &ctx,
                RegisterLocationCommand {
                    code: "A1".into(),
                    kind: LocationKind::Bin,
                    max_units: 5,
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
}
