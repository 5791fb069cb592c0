use crate::adapter::ChainAdapter;
use otcd_core::{ChainId, OtcError};
use std::collections::HashMap;
use std::sync::Arc;

/// `ChainId -> Arc<dyn ChainAdapter>`, built once at startup from config and
/// shared read-only across engine tick and queue processor tasks.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ChainId, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.adapters.insert(adapter.chain_id().clone(), adapter);
    }

    pub fn get(&self, chain: &ChainId) -> Result<Arc<dyn ChainAdapter>, OtcError> {
        self.adapters
            .get(chain)
            .cloned()
            .ok_or_else(|| OtcError::UnknownChain(chain.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;

    #[test]
    fn unregistered_chain_errors() {
        let registry = AdapterRegistry::new();
        let result = registry.get(&ChainId::new("nope"));
        assert!(matches!(result, Err(OtcError::UnknownChain(_))));
    }

    #[test]
    fn registered_chain_resolves() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(MockAdapter::new_utxo("alpha-utxo")));
        assert!(registry.get(&ChainId::new("alpha-utxo")).is_ok());
    }
}
