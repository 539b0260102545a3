use std::sync::Arc;

use rmeter_core::{LifecycleRegistry, remote::sim::SimConnector};

use crate::config::AgentConfig;

/// Lifecycle registry backed by the simulated endpoint.
///
/// Local workers and worker processes build it from the same config, so both resolve the same
/// names against the same devices.
pub fn registry(config: &AgentConfig) -> LifecycleRegistry {
    let connector = SimConnector::new().with_devices(config.sim_devices.iter().cloned());
    LifecycleRegistry::new(Arc::new(connector))
}
