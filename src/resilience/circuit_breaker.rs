//! Per-service circuit breaker.
//!
//! # States
//! - Closed: calls pass through, outcomes are counted
//! - Open: calls fail fast until the cooldown elapses
//! - Half-Open: exactly one trial call is admitted
//!
//! # State Transitions
//! ```text
//! Closed    → Open:      trip policy fires (consecutive failures or error rate)
//! Open      → Half-Open: first call after reset_timeout becomes the trial
//! Half-Open → Closed:    trial succeeds (failure counters reset)
//! Half-Open → Open:      trial fails (cooldown restarts)
//! Half-Open → Open:      trial withdrawn (cooldown kept, next call is a new trial)
//! ```
//!
//! # Design Decisions
//! - Admission hands out a [`Permit`]; the permit is the only way to report
//!   an outcome, so every fired call is resolved exactly once
//! - A permit dropped without an outcome never reached an instance. Its
//!   admission is withdrawn: `fires` is given back and a half-open trial
//!   quietly returns to open with its earlier transition time
//! - Every transition bumps a generation number. Outcomes from an older
//!   generation still feed the statistics but never drive a transition
//! - All state lives behind one short-lived mutex; nothing awaits while
//!   holding it
//! - Time comes from `tokio::time::Instant` so tests can pause the clock

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{merge_services, CircuitBreakerConfig, GatewayConfig, TripPolicy};
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::resilience::latency::LatencyTracker;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge value exported to metrics.
    pub fn as_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Result of one fired call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome {
    pub success: bool,
    pub timed_out: bool,
    pub latency: Duration,
}

impl Outcome {
    pub fn success(latency: Duration) -> Self {
        Self {
            success: true,
            timed_out: false,
            latency,
        }
    }

    pub fn failure(latency: Duration) -> Self {
        Self {
            success: false,
            timed_out: false,
            latency,
        }
    }

    /// A timeout counts as a failure.
    pub fn timeout(latency: Duration) -> Self {
        Self {
            success: false,
            timed_out: true,
            latency,
        }
    }
}

/// Admission refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    /// Time until the breaker will consider a trial call.
    pub retry_after: Duration,
}

/// Lifetime counters.
///
/// Counted since the breaker was created and left alone when it closes.
/// The counts a successful trial resets are
/// [`BreakerSnapshot::consecutive_failures`] and [`BreakerSnapshot::window`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub fires: u64,
    pub rejects: u64,
    pub fallbacks: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
}

/// Counts over the rolling window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowCounts {
    pub calls: u64,
    pub failures: u64,
    pub timeouts: u64,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    start: Instant,
    counts: WindowCounts,
}

/// Time-bucketed outcome counts; old buckets fall off as time moves.
#[derive(Debug)]
struct RollingWindow {
    span: Duration,
    bucket_len: Duration,
    buckets: VecDeque<Bucket>,
}

impl RollingWindow {
    fn new(span: Duration, buckets: u32) -> Self {
        let bucket_len = (span / buckets.max(1)).max(Duration::from_millis(1));
        Self {
            span,
            bucket_len,
            buckets: VecDeque::with_capacity(buckets as usize),
        }
    }

    fn roll(&mut self, now: Instant) {
        while let Some(front) = self.buckets.front() {
            if front.start + self.span <= now {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, now: Instant, success: bool, timed_out: bool) {
        self.roll(now);
        let fresh = match self.buckets.back() {
            Some(back) => back.start + self.bucket_len <= now,
            None => true,
        };
        if fresh {
            self.buckets.push_back(Bucket {
                start: now,
                counts: WindowCounts::default(),
            });
        }
        if let Some(bucket) = self.buckets.back_mut() {
            bucket.counts.calls += 1;
            if !success {
                bucket.counts.failures += 1;
            }
            if timed_out {
                bucket.counts.timeouts += 1;
            }
        }
    }

    fn totals(&self) -> WindowCounts {
        self.buckets.iter().fold(WindowCounts::default(), |acc, b| WindowCounts {
            calls: acc.calls + b.counts.calls,
            failures: acc.failures + b.counts.failures,
            timeouts: acc.timeouts + b.counts.timeouts,
        })
    }

    fn reset(&mut self) {
        self.buckets.clear();
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    generation: u64,
    opened_at: Option<Instant>,
    last_transition: SystemTime,
    /// `last_transition` before the current trial moved the breaker to half-open.
    pre_trial_transition: Option<SystemTime>,
    trial_in_flight: bool,
    consecutive_failures: u32,
    window: RollingWindow,
    counters: Counters,
    latency: LatencyTracker,
}

/// Circuit breaker guarding one service.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let inner = BreakerInner {
            state: CircuitState::Closed,
            generation: 0,
            opened_at: None,
            last_transition: SystemTime::now(),
            pre_trial_transition: None,
            trial_in_flight: false,
            consecutive_failures: 0,
            window: RollingWindow::new(config.rolling_window(), config.rolling_buckets),
            counters: Counters::default(),
            latency: LatencyTracker::new(config.latency_smoothing),
        };
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(inner),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Ask to fire one call.
    ///
    /// Closed admits everything. Open rejects until the cooldown has
    /// elapsed, then admits the caller as the half-open trial. Half-open
    /// rejects while the trial is outstanding.
    pub fn acquire(self: &Arc<Self>) -> Result<Permit, Rejected> {
        let now = Instant::now();
        let mut inner = self.lock();

        let state = inner.state;
        let trial = match state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                let cooldown = self.config.reset_timeout();
                if elapsed < cooldown {
                    return Err(self.reject(&mut inner, cooldown - elapsed));
                }
                let previous = inner.last_transition;
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.pre_trial_transition = Some(previous);
                inner.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(self.reject(&mut inner, Duration::ZERO));
                }
                inner.trial_in_flight = true;
                true
            }
        };

        inner.counters.fires += 1;
        Ok(Permit {
            breaker: Arc::clone(self),
            generation: inner.generation,
            trial,
            resolved: false,
        })
    }

    fn reject(&self, inner: &mut BreakerInner, retry_after: Duration) -> Rejected {
        inner.counters.rejects += 1;
        inner.counters.fallbacks += 1;
        metrics::record_circuit_rejection(&self.service);
        Rejected { retry_after }
    }

    fn record_outcome(&self, generation: u64, trial: bool, outcome: Outcome) {
        let now = Instant::now();
        let mut inner = self.lock();

        if outcome.success {
            inner.counters.successes += 1;
        } else {
            inner.counters.failures += 1;
        }
        if outcome.timed_out {
            inner.counters.timeouts += 1;
        }
        inner.latency.record(outcome.latency);
        inner.window.record(now, outcome.success, outcome.timed_out);

        if generation != inner.generation {
            tracing::trace!(service = %self.service, "Outcome from an earlier breaker generation");
            return;
        }

        let state = inner.state;
        match state {
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                inner.pre_trial_transition = None;
                if outcome.success {
                    inner.consecutive_failures = 0;
                    inner.window.reset();
                    inner.opened_at = None;
                    self.transition(&mut inner, CircuitState::Closed);
                } else {
                    inner.opened_at = Some(now);
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Closed => {
                if outcome.success {
                    inner.consecutive_failures = 0;
                } else {
                    inner.consecutive_failures += 1;
                    if self.should_trip(&inner) {
                        inner.opened_at = Some(now);
                        self.transition(&mut inner, CircuitState::Open);
                    }
                }
            }
            _ => {}
        }
    }

    /// Take back an admission that never reached an instance.
    fn withdraw(&self, generation: u64, trial: bool) {
        let mut inner = self.lock();
        inner.counters.fires = inner.counters.fires.saturating_sub(1);
        if trial && generation == inner.generation && inner.state == CircuitState::HalfOpen {
            // No generation bump; the open period continues.
            inner.trial_in_flight = false;
            inner.state = CircuitState::Open;
            if let Some(previous) = inner.pre_trial_transition.take() {
                inner.last_transition = previous;
            }
            metrics::record_circuit_state(&self.service, CircuitState::Open.as_u8());
            tracing::trace!(service = %self.service, "Trial withdrawn, breaker still open");
        }
    }

    fn should_trip(&self, inner: &BreakerInner) -> bool {
        match self.config.policy {
            TripPolicy::Consecutive => inner.consecutive_failures >= self.config.failure_threshold,
            TripPolicy::ErrorRate => {
                let window = inner.window.totals();
                if window.calls == 0 || window.calls < u64::from(self.config.volume_threshold) {
                    return false;
                }
                let rate = window.failures as f64 * 100.0 / window.calls as f64;
                rate >= self.config.error_threshold_percentage
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.last_transition = SystemTime::now();

        match to {
            CircuitState::Open => tracing::warn!(
                service = %self.service,
                from = from.as_str(),
                consecutive_failures = inner.consecutive_failures,
                "Circuit opened"
            ),
            CircuitState::HalfOpen => tracing::debug!(
                service = %self.service,
                "Circuit half-open, admitting trial call"
            ),
            CircuitState::Closed => tracing::info!(service = %self.service, "Circuit closed"),
        }
        metrics::record_circuit_state(&self.service, to.as_u8());
    }

    /// Point-in-time statistics.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.window.roll(now);

        let retry_after_ms = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.config
                    .reset_timeout()
                    .saturating_sub(now.saturating_duration_since(opened_at))
                    .as_millis() as u64,
            ),
            _ => None,
        };

        BreakerSnapshot {
            service: self.service.clone(),
            state: inner.state,
            counters: inner.counters,
            window: inner.window.totals(),
            consecutive_failures: inner.consecutive_failures,
            latency_mean: inner.latency.mean_ms(),
            percentiles: inner.latency.percentiles(),
            last_transition_ms: inner
                .last_transition
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            retry_after_ms,
        }
    }
}

/// Permission to fire one call.
///
/// Resolve it with [`record`](Permit::record) once the call has reached an
/// instance. Dropping it unresolved withdraws the admission.
#[derive(Debug)]
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    trial: bool,
    resolved: bool,
}

impl Permit {
    /// True when this call is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Report how the call went.
    pub fn record(mut self, outcome: Outcome) {
        self.resolved = true;
        self.breaker.record_outcome(self.generation, self.trial, outcome);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.withdraw(self.generation, self.trial);
        }
    }
}

/// Serializable breaker statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    /// Since process start.
    #[serde(flatten)]
    pub counters: Counters,
    /// Since the breaker last closed, limited to the rolling window.
    pub window: WindowCounts,
    /// Since the last success; zero right after the breaker closes.
    pub consecutive_failures: u32,
    /// Moving-average latency in milliseconds.
    pub latency_mean: f64,
    /// Latency percentiles in milliseconds, keyed by quantile.
    pub percentiles: BTreeMap<String, f64>,
    /// Unix time of the last state change, in milliseconds.
    pub last_transition_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Breakers for every service, created on first use.
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakers {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            overrides: HashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Default settings plus per-service overrides, with one breaker
    /// created up front for every configured service.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut breakers = Self::new(config.circuit_breaker.clone());
        let merged = merge_services(&config.services);
        for service in &merged {
            if let Some(custom) = &service.config.circuit_breaker {
                breakers
                    .overrides
                    .insert(service.config.id.clone(), custom.clone());
            }
        }
        for service in &merged {
            breakers.get(&service.config.id);
        }
        breakers
    }

    /// The breaker for a service.
    pub fn get(&self, service_id: &str) -> Arc<CircuitBreaker> {
        if let Some(entry) = self.breakers.get(service_id) {
            return entry.value().clone();
        }
        self.breakers
            .entry(service_id.to_string())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(service_id)
                    .cloned()
                    .unwrap_or_else(|| self.default_config.clone());
                Arc::new(CircuitBreaker::new(service_id, config))
            })
            .clone()
    }

    /// Admit a call to `service_id` or fail with [`GatewayError::CircuitOpen`].
    pub fn acquire(&self, service_id: &str) -> Result<Permit, GatewayError> {
        self.get(service_id)
            .acquire()
            .map_err(|rejected| GatewayError::CircuitOpen {
                service: service_id.to_string(),
                retry_after: rejected.retry_after,
            })
    }

    /// Statistics for every breaker, ordered by service id.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|e| e.value().snapshot()).collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }
}
