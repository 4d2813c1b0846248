use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::spec::OperationKind;
use crate::strategies::{DynamicBroadcastInDimStrategy, DynamicReshapeStrategy, ReshapeStrategy};
use crate::strategy::BufferizableOp;

/// Immutable table of bufferization strategies keyed by operation kind.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<OperationKind, Arc<dyn BufferizableOp>>,
}

/// One-time setup phase for a [`StrategyRegistry`].
#[derive(Default)]
pub struct StrategyRegistryBuilder {
    strategies: HashMap<OperationKind, Arc<dyn BufferizableOp>>,
}

impl StrategyRegistryBuilder {
    /// Registers `strategy` under its own kind, replacing any earlier entry.
    pub fn register(mut self, strategy: Arc<dyn BufferizableOp>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    pub fn build(self) -> StrategyRegistry {
        StrategyRegistry {
            strategies: self.strategies,
        }
    }
}

impl StrategyRegistry {
    pub fn builder() -> StrategyRegistryBuilder {
        StrategyRegistryBuilder::default()
    }

    /// Registry holding exactly the reshape, dynamic reshape and dynamic
    /// broadcast strategies.
    pub fn with_default_strategies() -> Self {
        Self::builder()
            .register(Arc::new(ReshapeStrategy))
            .register(Arc::new(DynamicReshapeStrategy))
            .register(Arc::new(DynamicBroadcastInDimStrategy))
            .build()
    }

    pub fn lookup(&self, kind: OperationKind) -> Option<&Arc<dyn BufferizableOp>> {
        self.strategies.get(&kind)
    }

    pub fn contains(&self, kind: OperationKind) -> bool {
        self.strategies.contains_key(&kind)
    }

    /// Registered kinds in sorted order.
    pub fn kinds(&self) -> Vec<OperationKind> {
        let mut kinds: Vec<OperationKind> = self.strategies.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&'static str> = self
            .kinds()
            .into_iter()
            .filter_map(|kind| self.lookup(kind).map(|strategy| strategy.name()))
            .collect();
        f.debug_struct("StrategyRegistry")
            .field("strategies", &names)
            .finish()
    }
}

static DEFAULT_REGISTRY: OnceLock<Arc<StrategyRegistry>> = OnceLock::new();

/// Process-wide registry of the default strategies, built on first use.
pub fn default_registry() -> Arc<StrategyRegistry> {
    DEFAULT_REGISTRY
        .get_or_init(|| Arc::new(StrategyRegistry::with_default_strategies()))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_exactly_three_kinds() {
        let registry = default_registry();
        assert_eq!(
            registry.kinds(),
            vec![
                OperationKind::Reshape,
                OperationKind::DynamicReshape,
                OperationKind::DynamicBroadcastInDim,
            ]
        );
        for kind in registry.kinds() {
            let strategy = registry.lookup(kind).expect("registered strategy");
            assert_eq!(strategy.kind(), kind);
        }
        assert!(registry.lookup(OperationKind::ElementwiseBinary).is_none());
    }

    #[test]
    fn default_registry_is_shared() {
        assert!(Arc::ptr_eq(&default_registry(), &default_registry()));
    }

    #[test]
    fn builder_keeps_one_entry_per_kind() {
        let registry = StrategyRegistry::builder()
            .register(Arc::new(ReshapeStrategy))
            .register(Arc::new(ReshapeStrategy))
            .build();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(OperationKind::Reshape));
    }
}
