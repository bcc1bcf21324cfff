//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::registry::Instance;

/// Select the instance with the fewest in-flight calls.
/// In case of tie, the first one is selected (stability).
pub fn pick(instances: &[Arc<Instance>]) -> &Arc<Instance> {
    instances
        .iter()
        .min_by_key(|i| i.active_connections())
        .unwrap_or(&instances[0])
}
