//! Dispatcher behavior with a scripted upstream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use tokio::time::Instant;

use service_gateway::config::{CircuitBreakerConfig, InstanceConfig, ServiceConfig};
use service_gateway::health::HealthCheckResult;
use service_gateway::load_balancer::{LoadBalancer, Strategy};
use service_gateway::registry::{Instance, Registry};
use service_gateway::resilience::{CircuitBreakers, CircuitState};
use service_gateway::{Dispatcher, GatewayError, Upstream, UpstreamError};

/// Knobs the test flips at runtime.
#[derive(Default)]
struct Script {
    failing: AtomicBool,
    /// Sleep this long before answering (milliseconds).
    delay_ms: AtomicUsize,
    calls: AtomicUsize,
}

/// Upstream driven by a shared [`Script`].
#[derive(Clone, Default)]
struct Scripted(Arc<Script>);

impl std::ops::Deref for Scripted {
    type Target = Script;

    fn deref(&self) -> &Script {
        &self.0
    }
}

impl Upstream for Scripted {
    async fn forward(
        &self,
        instance: &Instance,
        _service: &ServiceConfig,
        _request: Request<Body>,
    ) -> Result<Response<Body>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError::Request("connection reset".into()));
        }
        Ok(Response::builder()
            .status(200)
            .header("x-instance", instance.id())
            .body(Body::empty())
            .unwrap())
    }
}

fn payments(instances: usize) -> ServiceConfig {
    let mut service = ServiceConfig::new("payments", "http://10.0.0.1:3000");
    for n in 1..instances {
        service.instances.push(InstanceConfig {
            id: Some(format!("I{}", n + 1)),
            url: format!("http://10.0.0.{}:3000", n + 1),
            weight: 1,
        });
    }
    service
}

fn build(service: ServiceConfig, breaker: CircuitBreakerConfig) -> (Dispatcher<Scripted>, Scripted) {
    let registry = Arc::new(Registry::from_config(&[service], true));
    let upstream = Scripted::default();
    let dispatcher = Dispatcher::new(
        registry,
        Arc::new(LoadBalancer::new(Strategy::RoundRobin)),
        Arc::new(CircuitBreakers::new(breaker)),
        upstream.clone(),
    );
    (dispatcher, upstream)
}

fn request() -> Request<Body> {
    Request::builder().uri("/api/payments/1").body(Body::empty()).unwrap()
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

fn picked(response: &Response<Body>) -> String {
    response.headers()["x-instance"].to_str().unwrap().to_string()
}

#[tokio::test]
async fn test_unhealthy_instance_is_skipped_until_it_recovers() {
    let (dispatcher, _) = build(payments(2), CircuitBreakerConfig::default());
    let registry = dispatcher.registry().clone();
    registry
        .set_health(
            "payments",
            "I2",
            HealthCheckResult::failure(Some(500), "status 500", Duration::ZERO),
        )
        .unwrap();

    for _ in 0..10 {
        let response = dispatcher.dispatch("payments", request(), deadline()).await.unwrap();
        assert_eq!(picked(&response), "payments-0");
    }

    registry
        .set_health("payments", "I2", HealthCheckResult::success(200, Duration::ZERO))
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..4 {
        let response = dispatcher.dispatch("payments", request(), deadline()).await.unwrap();
        seen.push(picked(&response));
    }
    assert!(seen.contains(&"I2".to_string()));
    assert!(seen.contains(&"payments-0".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_rejects_then_admits_trial_after_cooldown() {
    let breaker = CircuitBreakerConfig {
        failure_threshold: 5,
        reset_timeout_secs: 30,
        ..CircuitBreakerConfig::default()
    };
    let (dispatcher, upstream) = build(payments(2), breaker);
    upstream.failing.store(true, Ordering::SeqCst);

    for _ in 0..5 {
        let err = dispatcher.dispatch("payments", request(), deadline()).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamFailure { .. }));
    }
    let cb = dispatcher.breakers().get("payments");
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 5);

    for second in 0..30u64 {
        let err = dispatcher.dispatch("payments", request(), deadline()).await.unwrap_err();
        match err {
            GatewayError::CircuitOpen { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_secs(30 - second));
            }
            other => panic!("expected CircuitOpen, got {}", other),
        }
        assert_eq!(cb.snapshot().counters.rejects, second + 1);
        tokio::time::advance(Duration::from_millis(999)).await;
        tokio::time::advance(Duration::from_millis(1)).await;
    }
    // Rejected calls never reach an instance or count as fired.
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 5);
    assert_eq!(cb.snapshot().counters.fires, 5);

    tokio::time::advance(Duration::from_secs(1)).await;
    upstream.failing.store(false, Ordering::SeqCst);
    dispatcher.dispatch("payments", request(), deadline()).await.unwrap();

    assert_eq!(upstream.calls.load(Ordering::SeqCst), 6);
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.snapshot().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_maps_to_upstream_timeout() {
    let (dispatcher, upstream) = build(payments(1), CircuitBreakerConfig::default());
    upstream.delay_ms.store(10_000, Ordering::SeqCst);

    let deadline = Instant::now() + Duration::from_secs(1);
    let err = dispatcher.dispatch("payments", request(), deadline).await.unwrap_err();
    assert!(matches!(err, GatewayError::UpstreamTimeout { ref instance, .. } if instance == "payments-0"));
    assert_eq!(err.status_code(), 504);

    let snap = dispatcher.breakers().get("payments").snapshot();
    assert_eq!(snap.counters.timeouts, 1);
    assert_eq!(snap.counters.failures, 1);
    assert_eq!(dispatcher.registry().instances("payments").unwrap()[0].active_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_dispatch_still_releases_bookkeeping() {
    let (dispatcher, upstream) = build(payments(1), CircuitBreakerConfig::default());
    upstream.delay_ms.store(60_000, Ordering::SeqCst);
    let instance = dispatcher.registry().instances("payments").unwrap()[0].clone();

    {
        let call = dispatcher.dispatch("payments", request(), Instant::now() + Duration::from_secs(120));
        tokio::pin!(call);
        // Drive the call until it is parked inside the upstream.
        let polled = tokio::time::timeout(Duration::from_secs(1), &mut call).await;
        assert!(polled.is_err());
        assert_eq!(instance.active_connections(), 1);
    }

    assert_eq!(instance.active_connections(), 0);
    let snap = dispatcher.breakers().get("payments").snapshot();
    assert_eq!(snap.counters.timeouts, 1);
    assert_eq!(snap.counters.fires, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_trial_reports_failure() {
    let breaker = CircuitBreakerConfig {
        failure_threshold: 1,
        reset_timeout_secs: 30,
        ..CircuitBreakerConfig::default()
    };
    let (dispatcher, upstream) = build(payments(1), breaker);
    upstream.failing.store(true, Ordering::SeqCst);
    dispatcher.dispatch("payments", request(), deadline()).await.unwrap_err();

    tokio::time::advance(Duration::from_secs(31)).await;
    upstream.failing.store(false, Ordering::SeqCst);
    upstream.delay_ms.store(60_000, Ordering::SeqCst);
    {
        let trial = dispatcher.dispatch("payments", request(), Instant::now() + Duration::from_secs(120));
        tokio::pin!(trial);
        assert!(tokio::time::timeout(Duration::from_secs(1), &mut trial).await.is_err());
    }

    // The trial was cut short, which counts as a timeout and re-opens.
    assert_eq!(dispatcher.breakers().get("payments").state(), CircuitState::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_keeps_round_robin_exact() {
    let (dispatcher, _) = build(payments(4), CircuitBreakerConfig::default());
    let dispatcher = Arc::new(dispatcher);

    let tasks: Vec<_> = (0..200)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let response = dispatcher.dispatch("payments", request(), deadline()).await.unwrap();
                picked(&response)
            })
        })
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for task in tasks {
        *counts.entry(task.await.unwrap()).or_default() += 1;
    }
    assert_eq!(counts.len(), 4);
    assert!(counts.values().all(|&n| n == 50), "{:?}", counts);
    for instance in dispatcher.registry().instances("payments").unwrap() {
        assert_eq!(instance.active_connections(), 0);
    }
}
