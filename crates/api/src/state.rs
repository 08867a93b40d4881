//! Shared state behind the session operations.

use std::sync::Arc;

use guard_core::{RiskScorer, TimeoutPolicyResolver};
use registry::SessionRegistry;
use worker::Reporter;

/// Entry point for authentication and request-handling code.
///
/// Cheap to clone; every clone shares the same registry.
#[derive(Clone)]
pub struct SessionApi {
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) resolver: Arc<TimeoutPolicyResolver>,
    pub(crate) scorer: Arc<RiskScorer>,
    pub(crate) reporter: Reporter,
}

impl SessionApi {
    pub fn new(
        registry: Arc<SessionRegistry>,
        resolver: Arc<TimeoutPolicyResolver>,
        scorer: Arc<RiskScorer>,
        reporter: Reporter,
    ) -> Self {
        Self {
            registry,
            resolver,
            scorer,
            reporter,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Arc<TimeoutPolicyResolver> {
        &self.resolver
    }
}
