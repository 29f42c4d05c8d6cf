//! Destination-number routing.

use std::collections::HashMap;

use tracing::debug;

use crate::config::{ConfigError, MappingConfig};

/// Static map from destination address to endpoint index.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, usize>,
}

impl RouteTable {
    /// Build the table, checking every index against `endpoint_count`.
    pub fn build(mappings: &[MappingConfig], endpoint_count: usize) -> Result<Self, ConfigError> {
        let mut routes = HashMap::with_capacity(mappings.len());

        for mapping in mappings {
            if mapping.endpoint >= endpoint_count {
                return Err(ConfigError::InvalidMapping {
                    number: mapping.number.clone(),
                    endpoint: mapping.endpoint,
                    count: endpoint_count,
                });
            }
            if routes
                .insert(mapping.number.clone(), mapping.endpoint)
                .is_some()
            {
                return Err(ConfigError::DuplicateMapping(mapping.number.clone()));
            }
        }

        debug!(routes = routes.len(), "route table built");
        Ok(Self { routes })
    }

    /// Endpoint index for an exact destination match.
    pub fn route(&self, destination: &str) -> Option<usize> {
        self.routes.get(destination).copied()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(number: &str, endpoint: usize) -> MappingConfig {
        MappingConfig {
            number: number.to_string(),
            endpoint,
        }
    }

    #[test]
    fn test_exact_lookup() {
        let table =
            RouteTable::build(&[mapping("16035151212", 0), mapping("16035151213", 1)], 2).unwrap();

        assert_eq!(table.route("16035151212"), Some(0));
        assert_eq!(table.route("16035151213"), Some(1));
        assert_eq!(table.route("1603515121"), None);
        assert_eq!(table.route("+16035151212"), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_out_of_range_index() {
        let result = RouteTable::build(&[mapping("1", 2)], 2);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidMapping { endpoint: 2, count: 2, .. })
        ));
    }

    #[test]
    fn test_duplicate_destination() {
        let result = RouteTable::build(&[mapping("1", 0), mapping("1", 0)], 1);
        assert!(matches!(result, Err(ConfigError::DuplicateMapping(n)) if n == "1"));
    }
}
