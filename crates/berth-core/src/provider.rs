//! Registered-spec lookup.

use std::collections::HashMap;

use crate::spec::ProxySpec;

/// Source of registered proxy specs. Specs are immutable once registered.
pub trait SpecProvider: Send + Sync {
    fn get_spec(&self, id: &str) -> Option<ProxySpec>;
    fn get_specs(&self) -> Vec<ProxySpec>;
}

/// Fixed in-memory spec registry, filled at startup.
pub struct MemorySpecProvider {
    specs: HashMap<String, ProxySpec>,
}

impl MemorySpecProvider {
    pub fn new(specs: Vec<ProxySpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }
}

impl SpecProvider for MemorySpecProvider {
    fn get_spec(&self, id: &str) -> Option<ProxySpec> {
        self.specs.get(id).cloned()
    }

    fn get_specs(&self) -> Vec<ProxySpec> {
        let mut specs: Vec<ProxySpec> = self.specs.values().cloned().collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id() {
        let provider = MemorySpecProvider::new(vec![ProxySpec::new("a"), ProxySpec::new("b")]);
        assert!(provider.get_spec("a").is_some());
        assert!(provider.get_spec("nope").is_none());
        assert_eq!(provider.get_specs().len(), 2);
    }
}
