//! Build context shared by all operators of one generation run
//!
//! Instead of process globals, the counter that keeps generated identifiers
//! unique, the configuration and the cost model travel together in a
//! [`BuildContext`]. Cloning a context shares the counter; creating a fresh
//! context starts a new, independent (and therefore reproducible) naming
//! sequence.

use crate::config::GeneratorConfig;
use crate::error::Result;
use opgen_cost::{CostModel, FpgaCostModel};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic unique-name source
#[derive(Debug, Clone, Default)]
pub struct UniqueNames {
    counter: Arc<AtomicU64>,
}

impl UniqueNames {
    /// Create a new independent counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Next raw identifier
    pub fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// A fresh name of the form `{prefix}_{n}`
    pub fn fresh(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.next_id())
    }
}

/// Everything an operator needs from its environment
#[derive(Debug, Clone)]
pub struct BuildContext {
    config: Arc<GeneratorConfig>,
    cost: Arc<dyn CostModel>,
    names: UniqueNames,
}

impl BuildContext {
    /// Create a context with the FPGA cost model of the configured target
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        let cost = match config.timing {
            Some(timing) => FpgaCostModel::with_timing(config.target, timing)?,
            None => FpgaCostModel::new(config.target),
        };
        Ok(Self {
            config: Arc::new(config),
            cost: Arc::new(cost),
            names: UniqueNames::new(),
        })
    }

    /// Create a context with a caller-supplied cost model
    pub fn with_cost_model(config: GeneratorConfig, cost: Arc<dyn CostModel>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            cost,
            names: UniqueNames::new(),
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn cost_model(&self) -> &Arc<dyn CostModel> {
        &self.cost
    }

    pub fn names(&self) -> &UniqueNames {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opgen_cost::Target;

    #[test]
    fn test_names_are_unique_across_clones() {
        let names = UniqueNames::new();
        let shared = names.clone();
        assert_eq!(names.fresh("fa"), "fa_0");
        assert_eq!(shared.fresh("fa"), "fa_1");
        assert_eq!(names.fresh("ha"), "ha_2");
    }

    #[test]
    fn test_independent_contexts_restart() {
        let a = BuildContext::new(GeneratorConfig::default()).unwrap();
        let b = BuildContext::new(GeneratorConfig::default()).unwrap();
        assert_eq!(a.names().next_id(), 0);
        assert_eq!(b.names().next_id(), 0);
        assert_eq!(a.clone().names().next_id(), 1);
    }

    #[test]
    fn test_context_uses_configured_target() {
        let ctx = BuildContext::new(GeneratorConfig::for_target(Target::Ice40)).unwrap();
        assert_eq!(ctx.cost_model().target(), Target::Ice40);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = GeneratorConfig::default().with_frequency(-5.0);
        assert!(BuildContext::new(config).is_err());
    }
}
