//! Round-robin load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::SelectionState;
use crate::registry::Instance;

/// Pick `instances[c mod len]` and advance the service counter.
pub fn pick<'a>(state: &SelectionState, instances: &'a [Arc<Instance>]) -> &'a Arc<Instance> {
    let count = state.next();
    let index = (count % instances.len() as u64) as usize;
    &instances[index]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::{ids, instance};

    #[test]
    fn test_round_robin() {
        let state = SelectionState::default();
        let backends = vec![instance("a", 1), instance("b", 1)];

        let picks: Vec<_> = (0..3).map(|_| pick(&state, &backends).clone()).collect();
        assert_eq!(ids(&picks), vec!["a", "b", "a"]);
    }

    #[test]
    fn test_even_distribution() {
        let state = SelectionState::default();
        let backends = vec![instance("a", 1), instance("b", 1), instance("c", 1)];

        // M = 10 calls over N = 3 instances: each gets 3 or 4, in cyclic order.
        let picks: Vec<_> = (0..10).map(|_| pick(&state, &backends).clone()).collect();
        assert_eq!(
            ids(&picks),
            vec!["a", "b", "c", "a", "b", "c", "a", "b", "c", "a"]
        );
        assert_eq!(state.counter(), 10);
    }
}
