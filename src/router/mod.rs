//! Message routing.
//!
//! A message is routed in two steps:
//! - its body must fully match one of the keyword patterns
//! - its destination address must map to a configured endpoint

mod matcher;
mod table;

pub use matcher::{CompiledPattern, PatternMatcher};
pub use table::RouteTable;

/// Outcome of matching and routing a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// No pattern matched the body.
    NoMatch,
    /// A pattern matched but the destination is not mapped.
    NoRoute { pattern: usize },
    Routed { pattern: usize, endpoint: usize },
}

impl RouteDecision {
    /// Match `body` then look up `destination`.
    pub fn decide(
        matcher: &PatternMatcher,
        routes: &RouteTable,
        body: &str,
        destination: &str,
    ) -> Self {
        let Some(pattern) = matcher.match_body(body) else {
            return RouteDecision::NoMatch;
        };
        match routes.route(destination) {
            Some(endpoint) => RouteDecision::Routed { pattern, endpoint },
            None => RouteDecision::NoRoute { pattern },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MappingConfig, PatternConfig};

    #[test]
    fn test_decide() {
        let matcher = PatternMatcher::compile(&[PatternConfig {
            pattern: "STOP".into(),
            flags: vec![],
        }])
        .unwrap();
        let routes = RouteTable::build(
            &[MappingConfig {
                number: "100".into(),
                endpoint: 0,
            }],
            1,
        )
        .unwrap();

        assert_eq!(
            RouteDecision::decide(&matcher, &routes, "STOP", "100"),
            RouteDecision::Routed { pattern: 0, endpoint: 0 }
        );
        assert_eq!(
            RouteDecision::decide(&matcher, &routes, "STOP", "200"),
            RouteDecision::NoRoute { pattern: 0 }
        );
        assert_eq!(
            RouteDecision::decide(&matcher, &routes, "GO", "100"),
            RouteDecision::NoMatch
        );
    }
}
