//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher has the healthy instances of a service (from the registry)
//!     → LoadBalancer::select(service, instances)
//!         - 0 instances → NoHealthyInstances
//!         - 1 instance  → returned directly, no bookkeeping
//!         - otherwise the service's Strategy picks:
//!             round_robin.rs  (rotate through instances)
//!             weighted.rs     (rotate, proportional to weight)
//!             least_conn.rs   (fewest in-flight calls)
//!             random.rs       (uniform)
//!     → Arc<Instance>
//! ```
//!
//! # Design Decisions
//! - Selection never touches instance health or connection counts
//! - Per-service state is created lazily and lives for the process lifetime
//! - One map entry per service; services never contend with each other

pub mod least_conn;
pub mod random;
pub mod round_robin;
pub mod weighted;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::{merge_services, GatewayConfig};
use crate::error::GatewayError;
use crate::registry::Instance;

/// Instance selection strategy.
///
/// Parsed leniently: unknown names fall back to round-robin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Strategy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    Random,
}

impl Strategy {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "weighted_round_robin" | "weighted" | "weighted_rr" => Strategy::WeightedRoundRobin,
            "least_connections" | "least_conn" | "least_connection" => Strategy::LeastConnections,
            "random" => Strategy::Random,
            "round_robin" | "roundrobin" | "rr" => Strategy::RoundRobin,
            other => {
                tracing::warn!(strategy = %other, "Unknown load balancing strategy, using round_robin");
                Strategy::RoundRobin
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::WeightedRoundRobin => "weighted_round_robin",
            Strategy::LeastConnections => "least_connections",
            Strategy::Random => "random",
        }
    }
}

impl From<String> for Strategy {
    fn from(name: String) -> Self {
        Strategy::parse(&name)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-service selection state: a call counter and weight overrides.
#[derive(Debug, Default)]
pub struct SelectionState {
    counter: AtomicU64,
    weights: RwLock<HashMap<String, u32>>,
}

impl SelectionState {
    /// Claim the next counter value.
    pub(crate) fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Effective weight: override, else declared weight (never below 1).
    pub(crate) fn weight_of(&self, instance: &Instance) -> u32 {
        let weights = self.weights.read().unwrap_or_else(|e| e.into_inner());
        weights
            .get(instance.id())
            .copied()
            .unwrap_or_else(|| instance.weight())
            .max(1)
    }

    fn weights(&self) -> BTreeMap<String, u32> {
        let weights = self.weights.read().unwrap_or_else(|e| e.into_inner());
        weights.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

/// Chooses one instance among the healthy instances of a service.
#[derive(Debug, Default)]
pub struct LoadBalancer {
    default_strategy: Strategy,
    overrides: HashMap<String, Strategy>,
    states: DashMap<String, Arc<SelectionState>>,
}

impl LoadBalancer {
    pub fn new(default_strategy: Strategy) -> Self {
        Self {
            default_strategy,
            ..Self::default()
        }
    }

    /// Default strategy plus per-service overrides from configuration.
    ///
    /// A repeated service id takes its strategy from its first record.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let overrides = merge_services(&config.services)
            .into_iter()
            .filter_map(|m| m.config.strategy.map(|strategy| (m.config.id, strategy)))
            .collect();
        Self {
            default_strategy: config.load_balancer.strategy,
            overrides,
            states: DashMap::new(),
        }
    }

    /// Override the strategy of one service.
    pub fn with_strategy(mut self, service_id: impl Into<String>, strategy: Strategy) -> Self {
        self.overrides.insert(service_id.into(), strategy);
        self
    }

    pub fn strategy_for(&self, service_id: &str) -> Strategy {
        self.overrides
            .get(service_id)
            .copied()
            .unwrap_or(self.default_strategy)
    }

    /// Select one of `instances` (the caller's healthy subset).
    pub fn select(
        &self,
        service_id: &str,
        instances: &[Arc<Instance>],
    ) -> Result<Arc<Instance>, GatewayError> {
        let chosen = match instances {
            [] => return Err(GatewayError::NoHealthyInstances(service_id.to_string())),
            [only] => only,
            _ => match self.strategy_for(service_id) {
                Strategy::RoundRobin => round_robin::pick(&self.state(service_id), instances),
                Strategy::WeightedRoundRobin => weighted::pick(&self.state(service_id), instances),
                Strategy::LeastConnections => least_conn::pick(instances),
                Strategy::Random => random::pick(instances),
            },
        };
        Ok(chosen.clone())
    }

    /// Pin the weight of one instance, overriding its declared weight.
    pub fn set_weight(&self, service_id: &str, instance_id: &str, weight: NonZeroU32) {
        let state = self.state(service_id);
        let mut weights = state.weights.write().unwrap_or_else(|e| e.into_inner());
        weights.insert(instance_id.to_string(), weight.get());
        tracing::info!(
            service = %service_id,
            instance = %instance_id,
            weight = weight.get(),
            "Weight override set"
        );
    }

    /// Drop a weight override. Returns true if one existed.
    pub fn clear_weight(&self, service_id: &str, instance_id: &str) -> bool {
        match self.states.get(service_id) {
            Some(state) => {
                let mut weights = state.weights.write().unwrap_or_else(|e| e.into_inner());
                let removed = weights.remove(instance_id).is_some();
                if removed {
                    tracing::info!(
                        service = %service_id,
                        instance = %instance_id,
                        "Weight override cleared"
                    );
                }
                removed
            }
            None => false,
        }
    }

    /// Counters and weight overrides of every service seen so far.
    pub fn snapshot(&self) -> LoadBalancerSnapshot {
        let mut counters = BTreeMap::new();
        let mut weights = BTreeMap::new();
        for entry in self.states.iter() {
            counters.insert(entry.key().clone(), entry.value().counter());
            let overrides = entry.value().weights();
            if !overrides.is_empty() {
                weights.insert(entry.key().clone(), overrides);
            }
        }
        LoadBalancerSnapshot {
            strategy: self.default_strategy,
            overrides: self
                .overrides
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            counters,
            weights,
        }
    }

    fn state(&self, service_id: &str) -> Arc<SelectionState> {
        // Fast path: no allocation once the service has been seen.
        if let Some(state) = self.states.get(service_id) {
            return state.value().clone();
        }
        self.states
            .entry(service_id.to_string())
            .or_default()
            .clone()
    }
}

/// Serializable balancer state.
#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancerSnapshot {
    /// Default strategy.
    pub strategy: Strategy,
    /// Per-service strategy overrides.
    pub overrides: BTreeMap<String, Strategy>,
    /// Call counter per service.
    pub counters: BTreeMap<String, u64>,
    /// Weight overrides per service, by instance id.
    pub weights: BTreeMap<String, BTreeMap<String, u32>>,
}


#[cfg(test)]
mod tests {
    use super::test_support::{ids, instance};
    use super::*;

    #[test]
    fn test_empty_set_fails() {
        for strategy in [
            Strategy::RoundRobin,
            Strategy::WeightedRoundRobin,
            Strategy::LeastConnections,
            Strategy::Random,
        ] {
            let lb = LoadBalancer::new(strategy);
            let err = lb.select("svc", &[]).unwrap_err();
            assert!(matches!(err, GatewayError::NoHealthyInstances(ref s) if s == "svc"));
        }
    }

    #[test]
    fn test_single_instance_bypasses_bookkeeping() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let only = instance("a", 1);
        for _ in 0..3 {
            let picked = lb.select("svc", std::slice::from_ref(&only)).unwrap();
            assert_eq!(picked.id(), "a");
        }
        assert!(lb.snapshot().counters.is_empty());
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(Strategy::parse("round-robin"), Strategy::RoundRobin);
        assert_eq!(Strategy::parse("weighted"), Strategy::WeightedRoundRobin);
        assert_eq!(Strategy::parse("least_conn"), Strategy::LeastConnections);
        assert_eq!(Strategy::parse("Random"), Strategy::Random);
        assert_eq!(Strategy::parse("fastest"), Strategy::RoundRobin);
        assert_eq!(
            serde_json::to_string(&Strategy::LeastConnections).unwrap(),
            "\"least_connections\""
        );
    }

    #[test]
    fn test_per_service_override() {
        let lb = LoadBalancer::new(Strategy::RoundRobin)
            .with_strategy("payments", Strategy::LeastConnections);
        assert_eq!(lb.strategy_for("payments"), Strategy::LeastConnections);
        assert_eq!(lb.strategy_for("users"), Strategy::RoundRobin);

        let a = instance("a", 1);
        let b = instance("b", 1);
        a.adjust_connections(1);
        let set = vec![a, b];
        for _ in 0..3 {
            assert_eq!(lb.select("payments", &set).unwrap().id(), "b");
        }
    }

    #[test]
    fn test_weight_override_and_snapshot() {
        let lb = LoadBalancer::new(Strategy::WeightedRoundRobin);
        let set = vec![instance("a", 1), instance("b", 1)];
        lb.set_weight("svc", "b", NonZeroU32::new(3).unwrap());

        let picks: Vec<_> = (0..4).map(|_| lb.select("svc", &set).unwrap()).collect();
        assert_eq!(ids(&picks), vec!["a", "b", "b", "b"]);

        let snapshot = lb.snapshot();
        assert_eq!(snapshot.strategy, Strategy::WeightedRoundRobin);
        assert_eq!(snapshot.counters["svc"], 4);
        assert_eq!(snapshot.weights["svc"]["b"], 3);

        assert!(lb.clear_weight("svc", "b"));
        assert!(!lb.clear_weight("svc", "b"));
        assert!(!lb.clear_weight("other", "b"));
        assert!(lb.snapshot().weights.is_empty());
    }

    #[test]
    fn test_repeated_service_keeps_first_strategy() {
        let mut config = GatewayConfig::default();
        let mut first = crate::config::ServiceConfig::new("payments", "http://127.0.0.1:3000");
        first.strategy = Some(Strategy::LeastConnections);
        let mut second = crate::config::ServiceConfig::new("payments", "http://127.0.0.1:3001");
        second.strategy = Some(Strategy::Random);
        let mut orders = crate::config::ServiceConfig::new("orders", "http://127.0.0.1:4000");
        orders.strategy = Some(Strategy::WeightedRoundRobin);
        config.services = vec![first, second, orders];

        let lb = LoadBalancer::from_config(&config);
        assert_eq!(lb.strategy_for("payments"), Strategy::LeastConnections);
        assert_eq!(lb.strategy_for("orders"), Strategy::WeightedRoundRobin);
        assert_eq!(lb.strategy_for("users"), config.load_balancer.strategy);
    }

    #[test]
    fn test_services_have_independent_counters() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let set = vec![instance("a", 1), instance("b", 1)];
        assert_eq!(lb.select("one", &set).unwrap().id(), "a");
        assert_eq!(lb.select("two", &set).unwrap().id(), "a");
        assert_eq!(lb.select("one", &set).unwrap().id(), "b");
    }

    #[test]
    fn test_concurrent_round_robin_loses_no_increments() {
        const THREADS: usize = 8;
        const CALLS: usize = 1000;

        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let set = vec![
            instance("a", 1),
            instance("b", 1),
            instance("c", 1),
            instance("d", 1),
        ];

        let mut counts: HashMap<String, usize> = HashMap::new();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        (0..CALLS)
                            .map(|_| lb.select("svc", &set).unwrap().id().to_string())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            for handle in handles {
                for id in handle.join().unwrap() {
                    *counts.entry(id).or_default() += 1;
                }
            }
        });

        assert_eq!(lb.snapshot().counters["svc"], (THREADS * CALLS) as u64);
        for id in ["a", "b", "c", "d"] {
            assert_eq!(counts[id], THREADS * CALLS / 4, "instance {}", id);
        }
    }
}
