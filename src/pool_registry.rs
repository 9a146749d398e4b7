use std::collections::HashMap;

use ipnet::Ipv4Net;

use crate::error::{Error, Result};

/// Configured mapping from a required-range name to the parent supernets the
/// allocator may carve blocks from. Built once at startup, read-only after.
#[derive(Debug, Clone)]
pub struct PoolRegistry {
    pools: HashMap<String, Vec<Ipv4Net>>,
}

impl PoolRegistry {
    pub fn new(pools: HashMap<String, Vec<Ipv4Net>>) -> Self {
        Self { pools }
    }

    /// Parent supernets for the named range, in configured order.
    pub fn resolve(&self, required_range: &str) -> Result<&[Ipv4Net]> {
        self.pools
            .get(required_range)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::UnknownRange(required_range.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_configured_range_in_order() {
        let mut pools = HashMap::new();
        pools.insert(
            "lab".to_string(),
            vec!["10.0.0.0/16".parse().unwrap(), "10.1.0.0/16".parse().unwrap()],
        );
        let registry = PoolRegistry::new(pools);
        let parents = registry.resolve("lab").unwrap();
        assert_eq!(parents.len(), 2);
        assert_eq!(parents[0].to_string(), "10.0.0.0/16");
    }

    #[test]
    fn unknown_range_is_an_error() {
        let registry = PoolRegistry::new(HashMap::new());
        assert!(matches!(
            registry.resolve("prod"),
            Err(Error::UnknownRange(_))
        ));
    }
}
