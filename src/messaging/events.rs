use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Published once after a container finished booting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Start {
    pub container: String,
    pub container_id: Uuid,
    pub at: DateTime<Utc>,
}

/// Published once when a container starts shutting down, before any
/// singleton is destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stop {
    pub container: String,
    pub container_id: Uuid,
    pub at: DateTime<Utc>,
}

impl Start {
    pub(crate) fn now(container: &str, container_id: Uuid) -> Self {
        Self {
            container: container.to_string(),
            container_id,
            at: Utc::now(),
        }
    }
}

impl Stop {
    pub(crate) fn now(container: &str, container_id: Uuid) -> Self {
        Self {
            container: container.to_string(),
            container_id,
            at: Utc::now(),
        }
    }
}
