//! Uniform random load balancing strategy. Keeps no per-service state.

use std::sync::Arc;

use crate::registry::Instance;

pub fn pick(instances: &[Arc<Instance>]) -> &Arc<Instance> {
    &instances[fastrand::usize(..instances.len())]
}
