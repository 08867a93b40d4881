//! Service status: collaborator health plus counters.

use serde::{Deserialize, Serialize};
use telemetry::{health, metrics, HealthReport, MetricsSnapshot};

use crate::state::SessionApi;

/// Status snapshot for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub health: HealthReport,
    pub metrics: MetricsSnapshot,
    /// Sessions held by the registry, ended ones included
    pub tracked_sessions: usize,
}

impl SessionApi {
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            health: health().report(),
            metrics: metrics().snapshot(),
            tracked_sessions: self.registry.len(),
        }
    }
}
