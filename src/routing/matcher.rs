//! Path pattern matching.
//!
//! # Pattern Syntax
//! - `literal` segments match exactly (case-sensitive)
//! - `:name` matches any single non-empty segment and captures it
//! - a trailing `*` matches the remainder, including nothing at all
//!
//! # Design Decisions
//! - Patterns are split into segments once, at startup
//! - Empty segments are ignored, so `/a//b/` matches like `/a/b`
//! - No regex; matching is a single pass over the segments

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest,
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
}

/// Values captured by `:name` segments, in pattern order.
pub type PathParams = Vec<(String, String)>;

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let parts: Vec<&str> = split(pattern).collect();
        let last = parts.len().saturating_sub(1);
        let segments = parts
            .iter()
            .enumerate()
            .map(|(i, part)| match *part {
                "*" if i == last => Segment::Rest,
                p if p.len() > 1 && p.starts_with(':') => Segment::Param(p[1..].to_string()),
                p => Segment::Literal(p.to_string()),
            })
            .collect();

        Self {
            source: pattern.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }

    /// Match `path`, returning the captured parameters on success.
    pub fn captures(&self, path: &str) -> Option<PathParams> {
        let mut params = Vec::new();
        let mut parts = split(path);

        for segment in &self.segments {
            match segment {
                Segment::Rest => return Some(params),
                Segment::Literal(expected) => {
                    if parts.next()? != expected {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.next()?;
                    params.push((name.clone(), value.to_string()));
                }
            }
        }

        parts.next().is_none().then_some(params)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        let pattern = PathPattern::parse("/api/health");
        assert!(pattern.matches("/api/health"));
        assert!(pattern.matches("/api/health/"));
        assert!(!pattern.matches("/api/health/deep"));
        assert!(!pattern.matches("/api/HEALTH"));
        assert!(!pattern.matches("/api"));
    }

    #[test]
    fn test_params() {
        let pattern = PathPattern::parse("/api/users/:id/orders");
        let params = pattern.captures("/api/users/42/orders").unwrap();
        assert_eq!(params, vec![("id".to_string(), "42".to_string())]);
        assert!(!pattern.matches("/api/users/orders"));
    }

    #[test]
    fn test_trailing_wildcard() {
        let pattern = PathPattern::parse("/api/payments/*");
        assert!(pattern.matches("/api/payments"));
        assert!(pattern.matches("/api/payments/"));
        assert!(pattern.matches("/api/payments/42/refunds"));
        assert!(!pattern.matches("/api/paymentsx"));
        assert!(!pattern.matches("/api/orders/1"));
    }

    #[test]
    fn test_root_patterns() {
        assert!(PathPattern::parse("/").matches("/"));
        assert!(!PathPattern::parse("/").matches("/anything"));
        assert!(PathPattern::parse("/*").matches("/anything/at/all"));
    }

    #[test]
    fn test_inner_star_is_literal() {
        let pattern = PathPattern::parse("/a/*/b");
        assert!(pattern.matches("/a/*/b"));
        assert!(!pattern.matches("/a/x/b"));
    }
}
