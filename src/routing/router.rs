//! Path → service lookup.
//!
//! # Responsibilities
//! - Compile every service's patterns at startup
//! - Resolve a request path to a logical service id
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in configuration order; first match wins
//! - Explicit no-match (`None`) rather than a silent default service

use crate::config::ServiceConfig;
use crate::routing::matcher::{PathParams, PathPattern};

#[derive(Debug, Clone)]
struct Route {
    service_id: String,
    pattern: PathPattern,
}

/// A resolved route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub service_id: &'a str,
    pub pattern: &'a str,
    pub params: PathParams,
}

#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn from_services(services: &[ServiceConfig]) -> Self {
        let routes: Vec<Route> = services
            .iter()
            .flat_map(|service| {
                service.patterns.iter().map(|pattern| Route {
                    service_id: service.id.clone(),
                    pattern: PathPattern::parse(pattern),
                })
            })
            .collect();

        tracing::debug!(routes = routes.len(), "Routes compiled");
        Self { routes }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First route, in configuration order, whose pattern matches `path`.
    pub fn resolve(&self, path: &str) -> Option<RouteMatch<'_>> {
        self.routes.iter().find_map(|route| {
            route.pattern.captures(path).map(|params| RouteMatch {
                service_id: &route.service_id,
                pattern: route.pattern.as_str(),
                params,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(id: &str, patterns: &[&str]) -> ServiceConfig {
        let mut service = ServiceConfig::new(id, "http://127.0.0.1:3000");
        service.patterns = patterns.iter().map(|p| p.to_string()).collect();
        service
    }

    #[test]
    fn test_resolve() {
        let router = Router::from_services(&[
            service("payments", &["/api/payments/*"]),
            service("users", &["/api/users/:id", "/api/users"]),
        ]);

        assert_eq!(router.resolve("/api/payments/7").unwrap().service_id, "payments");
        let users = router.resolve("/api/users/9").unwrap();
        assert_eq!(users.service_id, "users");
        assert_eq!(users.pattern, "/api/users/:id");
        assert_eq!(router.resolve("/api/users").unwrap().pattern, "/api/users");
        assert!(router.resolve("/metrics").is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let router = Router::from_services(&[
            service("catch-all", &["/*"]),
            service("payments", &["/api/payments/*"]),
        ]);
        assert_eq!(router.resolve("/api/payments").unwrap().service_id, "catch-all");
    }
}
