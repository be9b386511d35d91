use uuid::Uuid;

/// Warehouse scope and actor identity for a single operation.
///
/// Every workflow call takes an explicit context; there is no ambient
/// "current warehouse" or "current user" anywhere in the core. Operations
/// reject entities that belong to a different warehouse than the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    warehouse_id: Uuid,
    actor: String,
}

impl RequestContext {
    pub fn new(warehouse_id: Uuid, actor: impl Into<String>) -> Self {
        Self {
            warehouse_id,
            actor: actor.into(),
        }
    }

    pub fn warehouse_id(&self) -> Uuid {
        self.warehouse_id
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }
}
