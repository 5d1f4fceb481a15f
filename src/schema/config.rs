//! Configuration types for sampler runs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::RegionSpec;

/// Default horizon cap for coupling from the past (2^27 steps).
pub const DEFAULT_MAX_HORIZON: u32 = 1 << 27;

fn default_bias() -> f32 {
    1.0
}

/// Top-level sampler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Region to sample configurations of.
    pub region: RegionSpec,
    /// Bias parameter q. Configurations are weighted by q^statistic; 1.0 is uniform.
    #[serde(default = "default_bias")]
    pub bias: f32,
    /// Coupling-from-the-past settings.
    #[serde(default)]
    pub cftp: CftpConfig,
    /// Batch Glauber continuation settings.
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// GPU backend settings.
    #[serde(default)]
    pub gpu: GpuConfig,
    /// Growth diagram settings (RSK sampling).
    #[serde(default)]
    pub growth: GrowthConfig,
    /// Random seed for reproducibility. Drawn from entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            region: RegionSpec::default(),
            bias: 1.0,
            cftp: CftpConfig::default(),
            sampling: SamplingConfig::default(),
            gpu: GpuConfig::default(),
            growth: GrowthConfig::default(),
            seed: None,
        }
    }
}

/// Horizon schedule for coupling from the past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CftpConfig {
    /// First horizon tried. Doubled after every epoch that fails to coalesce.
    pub initial_horizon: u32,
    /// Horizon at which an uncoalesced run is reported as a timeout.
    pub max_horizon: u32,
}

impl Default for CftpConfig {
    fn default() -> Self {
        Self {
            initial_horizon: 1,
            max_horizon: DEFAULT_MAX_HORIZON,
        }
    }
}

/// Batch Glauber continuation settings.
///
/// `steps_per_chain` is a burn-in heuristic, not a mixing-time bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Local steps applied to every chain before its observable is read.
    pub steps_per_chain: u32,
    /// Chains dispatched per batch.
    pub chains_per_batch: u32,
    /// Histogram bin count (10-20).
    pub histogram_bins: usize,
    /// Path position whose height is observed. Midpoint when absent.
    #[serde(default)]
    pub observe_at: Option<u32>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            steps_per_chain: 1_000_000,
            chains_per_batch: 5000,
            histogram_bins: 20,
            observe_at: None,
        }
    }
}

/// GPU backend settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuConfig {
    /// Try to use the GPU. The CPU path is used when false or when no adapter exists.
    pub enabled: bool,
    /// Wall-clock limit for one batch readback.
    pub timeout_ms: u64,
    /// Local steps per dispatch. Long chains are split to keep each dispatch short.
    pub steps_per_dispatch: u32,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 10_000,
            steps_per_dispatch: 65_536,
        }
    }
}

/// Distribution of growth diagram matrix entries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WeightLaw {
    /// P(w = k) = (1 - q) q^k. One uniform per cell.
    Geometric { q: f32 },
    /// Number of successes in `trials` Bernoulli(p) draws. `trials` uniforms per cell.
    Binomial { trials: u32, p: f32 },
}

impl Default for WeightLaw {
    fn default() -> Self {
        WeightLaw::Geometric { q: 0.5 }
    }
}

/// RSK growth diagram settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthConfig {
    /// Side length n of the n x n matrix.
    pub size: usize,
    /// Law of the matrix entries.
    pub law: WeightLaw,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            size: 64,
            law: WeightLaw::default(),
        }
    }
}

/// Largest supported growth diagram side.
pub const MAX_GROWTH_SIZE: usize = 256;

/// Smallest tail `1 - u` a geometric draw sees. Uniforms are multiples of
/// 2^-24 below 1.
const MIN_TAIL: f32 = 1.0 / 16_777_216.0;

impl SamplerConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: SamplerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.bias.is_finite() && self.bias > 0.0) {
            return Err(ConfigError::InvalidBias(self.bias));
        }
        self.cftp.validate()?;
        self.sampling.validate()?;
        if self.gpu.timeout_ms == 0 || self.gpu.steps_per_dispatch == 0 {
            return Err(ConfigError::InvalidGpuSettings);
        }
        self.growth.validate()?;
        self.region.validate()
    }
}

impl CftpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_horizon == 0
            || self.initial_horizon > self.max_horizon
            || self.max_horizon > 1 << 31
        {
            return Err(ConfigError::InvalidHorizon {
                initial: self.initial_horizon,
                max: self.max_horizon,
            });
        }
        Ok(())
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains_per_batch == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if !(10..=20).contains(&self.histogram_bins) {
            return Err(ConfigError::InvalidBinCount(self.histogram_bins));
        }
        Ok(())
    }
}

impl GrowthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size == 0 || self.size > MAX_GROWTH_SIZE {
            return Err(ConfigError::InvalidGrowthSize(self.size));
        }
        match self.law {
            WeightLaw::Geometric { q } if !(q > 0.0 && q < 1.0) => {
                return Err(ConfigError::InvalidWeightLaw);
            }
            WeightLaw::Binomial { trials, p } if trials == 0 || !(0.0..=1.0).contains(&p) => {
                return Err(ConfigError::InvalidWeightLaw);
            }
            _ => {}
        }
        // Every shape part and every intermediate of the growth rule is
        // bounded by the total weight or twice a path sum.
        let n = self.size as u64;
        let bound = (n * n + 4 * n).saturating_mul(self.law.max_weight());
        if bound > u32::MAX as u64 {
            return Err(ConfigError::WeightOverflow {
                size: self.size,
                max_weight: self.law.max_weight(),
            });
        }
        Ok(())
    }
}

impl WeightLaw {
    /// Uniforms consumed by one cell.
    pub fn randoms_per_cell(&self) -> u32 {
        match *self {
            WeightLaw::Geometric { .. } => 1,
            WeightLaw::Binomial { trials, .. } => trials,
        }
    }

    /// Largest entry `weight` can return.
    pub fn max_weight(&self) -> u64 {
        match *self {
            WeightLaw::Geometric { q } => {
                let w = (MIN_TAIL as f64).ln() / (q as f64).ln();
                if w.is_finite() { w.floor() as u64 + 1 } else { u64::MAX }
            }
            WeightLaw::Binomial { trials, .. } => trials as u64,
        }
    }

    /// Turn one cell's slice of uniforms into a matrix entry.
    pub fn weight(&self, uniforms: &[f32]) -> u32 {
        match *self {
            WeightLaw::Geometric { q } => {
                let u = (1.0 - uniforms[0]).max(MIN_TAIL);
                (u.ln() / q.ln()).floor() as u32
            }
            WeightLaw::Binomial { p, .. } => uniforms.iter().filter(|&&u| u < p).count() as u32,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Bias parameter must be finite and positive, got {0}")]
    InvalidBias(f32),
    #[error("Invalid horizon schedule: initial {initial}, max {max}")]
    InvalidHorizon { initial: u32, max: u32 },
    #[error("Chains per batch must be non-zero")]
    InvalidBatchSize,
    #[error("Histogram bin count must be within 10..=20, got {0}")]
    InvalidBinCount(usize),
    #[error("GPU timeout and steps per dispatch must be non-zero")]
    InvalidGpuSettings,
    #[error("Growth diagram size must be within 1..=256, got {0}")]
    InvalidGrowthSize(usize),
    #[error("Weight law parameters out of range")]
    InvalidWeightLaw,
    #[error("Growth diagram of size {size} with entries up to {max_weight} overflows 32-bit shapes")]
    WeightOverflow { size: usize, max_weight: u64 },
    #[error("Region dimensions must be non-zero")]
    EmptyRegion,
    #[error("Region is too large: {0} cells")]
    RegionTooLarge(usize),
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        SamplerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_bias() {
        let config = SamplerConfig {
            bias: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBias(_))));
    }

    #[test]
    fn test_invalid_horizon() {
        let cftp = CftpConfig {
            initial_horizon: 64,
            max_horizon: 32,
        };
        assert!(cftp.validate().is_err());
    }

    #[test]
    fn test_bin_count_bounds() {
        let mut sampling = SamplingConfig::default();
        sampling.histogram_bins = 9;
        assert!(sampling.validate().is_err());
        sampling.histogram_bins = 10;
        assert!(sampling.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sampler.json");
        fs::write(
            &path,
            r#"{
                "region": { "type": "LatticePath", "right": 4, "up": 3 },
                "bias": 0.5,
                "seed": 7
            }"#,
        )
        .unwrap();

        let config = SamplerConfig::from_file(&path).unwrap();
        assert_eq!(config.region, RegionSpec::LatticePath { right: 4, up: 3 });
        assert_eq!(config.bias, 0.5);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.cftp, CftpConfig::default());
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SamplerConfig::from_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_geometric_weight() {
        let law = WeightLaw::Geometric { q: 0.5 };
        assert_eq!(law.weight(&[0.0]), 0);
        assert_eq!(law.weight(&[0.4]), 0);
        // 1 - 0.6 = 0.4, log(0.4)/log(0.5) = 1.32
        assert_eq!(law.weight(&[0.6]), 1);
        assert_eq!(law.weight(&[0.9]), 3);
    }

    #[test]
    fn test_geometric_weight_is_capped_at_unit_tail() {
        let law = WeightLaw::Geometric { q: 0.5 };
        // Largest uniform below 1 leaves a tail of 2^-24.
        let top = 1.0 - 1.0 / 16_777_216.0;
        let heaviest = law.weight(&[top]);
        assert!((23..=24).contains(&heaviest), "weight {heaviest}");
        assert_eq!(law.weight(&[1.0]), heaviest);
        assert!(law.max_weight() >= heaviest as u64);
    }

    #[test]
    fn test_growth_rejects_weights_that_overflow() {
        let near_one = GrowthConfig {
            size: 200,
            law: WeightLaw::Geometric { q: 0.999_999_94 },
        };
        assert!(matches!(
            near_one.validate(),
            Err(ConfigError::WeightOverflow { size: 200, .. })
        ));

        let largest = GrowthConfig {
            size: MAX_GROWTH_SIZE,
            law: WeightLaw::Geometric { q: 0.999 },
        };
        assert!(largest.validate().is_ok());
        let n = MAX_GROWTH_SIZE as u64;
        assert!((n * n + 4 * n) * largest.law.max_weight() <= u32::MAX as u64);
    }

    #[test]
    fn test_binomial_weight() {
        let law = WeightLaw::Binomial { trials: 4, p: 0.5 };
        assert_eq!(law.randoms_per_cell(), 4);
        assert_eq!(law.weight(&[0.1, 0.6, 0.4, 0.9]), 2);
    }
}
