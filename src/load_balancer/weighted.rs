//! Weighted round-robin load balancing strategy.
//!
//! Over `total = Σ weights` consecutive calls, instance `i` is picked exactly
//! `weight[i]` times. Picks are grouped by instance order: weights `[3, 1]`
//! on `[A, B]` yield `A, A, A, B`.

use std::sync::Arc;

use crate::load_balancer::SelectionState;
use crate::registry::Instance;

pub fn pick<'a>(state: &SelectionState, instances: &'a [Arc<Instance>]) -> &'a Arc<Instance> {
    let weights: Vec<u64> = instances
        .iter()
        .map(|i| u64::from(state.weight_of(i)))
        .collect();
    let total: u64 = weights.iter().sum();
    let count = state.next();
    let target = count % total.max(1) + 1;

    let mut cumulative = 0;
    for (instance, weight) in instances.iter().zip(&weights) {
        cumulative += weight;
        if cumulative >= target {
            return instance;
        }
    }
    // Unreachable while every weight is >= 1.
    &instances[0]
}
