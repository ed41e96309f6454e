//! Build configuration
//!
//! Configuration can be created programmatically or loaded from TOML:
//!
//! ```toml
//! target = "kintex7"
//! frequency_mhz = 400.0
//! pipeline = true
//! use_hard_multipliers = true
//!
//! [compression]
//! use_specialized = true
//! register_penalty = 0.5
//! max_rounds = 64
//! ```

use crate::error::{GenError, Result};
use crate::TimePs;
use opgen_cost::{Target, TargetTiming};
use serde::{Deserialize, Serialize};

/// Configuration shared by every operator of one generation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Technology family (selects eligible specialized compressors)
    pub target: Target,
    /// Target clock frequency
    pub frequency_mhz: f64,
    /// Insert pipeline registers to meet the clock period
    pub pipeline: bool,
    /// Allow hard multiplier blocks for partial products
    pub use_hard_multipliers: bool,
    /// Bit heap compression settings
    pub compression: CompressionConfig,
    /// Override of the target's default timing constants
    pub timing: Option<TargetTiming>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            target: Target::Generic,
            frequency_mhz: 200.0,
            pipeline: true,
            use_hard_multipliers: true,
            compression: CompressionConfig::default(),
            timing: None,
        }
    }
}

impl GeneratorConfig {
    /// Create config for a target with default settings
    pub fn for_target(target: Target) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    /// Set the target frequency
    pub fn with_frequency(mut self, frequency_mhz: f64) -> Self {
        self.frequency_mhz = frequency_mhz;
        self
    }

    /// Disable pipelining: everything lands in cycle 0
    pub fn unpipelined(mut self) -> Self {
        self.pipeline = false;
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| GenError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Clock period in picoseconds
    pub fn period_ps(&self) -> TimePs {
        1.0e6 / self.frequency_mhz
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !self.frequency_mhz.is_finite() || self.frequency_mhz <= 0.0 {
            return Err(GenError::Config(format!(
                "frequency must be positive, got {} MHz",
                self.frequency_mhz
            )));
        }
        if let Some(timing) = &self.timing {
            timing.validate()?;
        }
        self.compression.validate()
    }
}

/// Bit heap compression settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Register technology-specific compressors from the catalog
    pub use_specialized: bool,
    /// Relative cost added to a candidate that would open a new cycle
    pub register_penalty: f64,
    /// Safety bound on compression rounds
    pub max_rounds: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            use_specialized: true,
            register_penalty: 0.5,
            max_rounds: 64,
        }
    }
}

impl CompressionConfig {
    /// Only the generic full and half adders
    pub fn generic_only() -> Self {
        Self {
            use_specialized: false,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.register_penalty.is_finite() || self.register_penalty < 0.0 {
            return Err(GenError::Config(format!(
                "register penalty must be non-negative, got {}",
                self.register_penalty
            )));
        }
        if self.max_rounds == 0 {
            return Err(GenError::Config("max_rounds must be at least 1".to_string()));
        }
        Ok(())
    }
}
