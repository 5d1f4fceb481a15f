//! Sampling session over any of the supported regions.
//!
//! A [`TilingEngine`] owns one validated region and a bias parameter. It
//! draws exact samples, runs local steps on configurations it produced and
//! exports them as cell records. Nothing is shared between engines; drop
//! one to release its region.

use serde::{Deserialize, Serialize};

use super::cftp::{CftpError, CftpProgress, CftpRun, CftpSample, Generation};
use super::domino::{DominoRegion, VertexHeights};
use super::glauber::run_local_steps;
use super::height::{HeightError, HeightFunction};
use super::hexagon::{Hexagon, StackHeights};
use super::lattice_path::{LatticePath, PathSteps};
use super::model::{Bias, CellRecord, MonotoneModel, RegionError};
use super::rng::Pcg32;
use crate::schema::{CftpConfig, ConfigError, RegionSpec, SamplerConfig};

/// A validated region.
#[derive(Debug, Clone)]
pub enum Region {
    LatticePath(LatticePath),
    Hexagon(Hexagon),
    Domino(DominoRegion),
}

impl Region {
    /// Validate a region description and build its model.
    pub fn from_spec(spec: &RegionSpec) -> Result<Self, EngineError> {
        spec.validate()?;
        Ok(match spec {
            RegionSpec::LatticePath { right, up } => Region::LatticePath(LatticePath::new(*right, *up)),
            RegionSpec::Hexagon { a, b, c } => Region::Hexagon(Hexagon::new(*a, *b, *c)),
            RegionSpec::Rectangle { .. } | RegionSpec::AztecDiamond { .. } | RegionSpec::Cells { .. } => {
                Region::Domino(DominoRegion::new(&spec.domino_cells())?)
            }
        })
    }

    pub fn num_sites(&self) -> usize {
        match self {
            Region::LatticePath(m) => m.num_sites(),
            Region::Hexagon(m) => m.num_sites(),
            Region::Domino(m) => m.num_sites(),
        }
    }

    pub fn minimal(&self) -> Configuration {
        match self {
            Region::LatticePath(m) => Configuration::Path(m.minimal()),
            Region::Hexagon(m) => Configuration::Stacks(m.minimal()),
            Region::Domino(m) => Configuration::Heights(m.minimal()),
        }
    }

    pub fn maximal(&self) -> Configuration {
        match self {
            Region::LatticePath(m) => Configuration::Path(m.maximal()),
            Region::Hexagon(m) => Configuration::Stacks(m.maximal()),
            Region::Domino(m) => Configuration::Heights(m.maximal()),
        }
    }
}

/// A configuration of the engine's region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Configuration {
    Path(PathSteps),
    Stacks(StackHeights),
    Heights(VertexHeights),
}

/// Outcome of [`TilingEngine::init_region`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RegionStatus {
    Valid { sites: usize },
    Invalid { reason: String },
}

impl RegionStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, RegionStatus::Valid { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No region has been initialised")]
    NoRegion,
    #[error("Invalid region: {0}")]
    Region(#[from] RegionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cftp(#[from] CftpError),
    #[error("Configuration does not belong to the current region")]
    ConfigurationMismatch,
    #[error("Height function reconstruction failed: {0}")]
    Height(#[from] HeightError),
}

/// Exact sampling session for one region.
#[derive(Debug, Default)]
pub struct TilingEngine {
    region: Option<Region>,
    bias: Bias,
    cftp: CftpConfig,
    generation: Generation,
}

impl TilingEngine {
    pub fn new(cftp: CftpConfig) -> Self {
        Self {
            cftp,
            ..Default::default()
        }
    }

    /// Engine with the region, bias and horizon schedule of `config`.
    pub fn from_config(config: &SamplerConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let mut engine = Self::new(config.cftp);
        engine.set_bias_parameter(config.bias)?;
        engine.region = Some(Region::from_spec(&config.region)?);
        Ok(engine)
    }

    /// Validate and install a region. An invalid description clears the
    /// current region.
    pub fn init_region(&mut self, spec: &RegionSpec) -> RegionStatus {
        self.generation.advance();
        match Region::from_spec(spec) {
            Ok(region) => {
                let sites = region.num_sites();
                log::info!("Region initialised: {} sites", sites);
                self.region = Some(region);
                RegionStatus::Valid { sites }
            }
            Err(e) => {
                log::warn!("Rejected region: {e}");
                self.region = None;
                RegionStatus::Invalid {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Install a domino region from `(x, y, kind)` triples; kind 0 marks an
    /// excluded cell.
    pub fn init_region_triples(&mut self, triples: &[[i32; 3]]) -> RegionStatus {
        self.init_region(&RegionSpec::from_triples(triples))
    }

    pub fn region(&self) -> Option<&Region> {
        self.region.as_ref()
    }

    fn current(&self) -> Result<&Region, EngineError> {
        self.region.as_ref().ok_or(EngineError::NoRegion)
    }

    pub fn set_bias_parameter(&mut self, q: f32) -> Result<(), EngineError> {
        if !(q.is_finite() && q > 0.0) {
            return Err(ConfigError::InvalidBias(q).into());
        }
        self.generation.advance();
        self.bias = Bias::new(q);
        Ok(())
    }

    pub fn bias(&self) -> Bias {
        self.bias
    }

    /// Counter that cancels running requests when advanced. Changing the
    /// region or the bias advances it.
    pub fn generation(&self) -> Generation {
        self.generation.clone()
    }

    /// Draw one exact sample.
    pub fn run_cftp(&self, seed: u64) -> Result<CftpSample<Configuration>, EngineError> {
        self.run_cftp_observed(seed, |_| {})
    }

    /// Draw one exact sample, reporting every epoch.
    pub fn run_cftp_observed(
        &self,
        seed: u64,
        observer: impl FnMut(CftpProgress),
    ) -> Result<CftpSample<Configuration>, EngineError> {
        fn drive<M: MonotoneModel>(
            engine: &TilingEngine,
            model: &M,
            seed: u64,
            observer: impl FnMut(CftpProgress),
            wrap: fn(M::Config) -> Configuration,
        ) -> Result<CftpSample<Configuration>, EngineError> {
            let sample = CftpRun::new(model, engine.bias, seed, &engine.cftp)
                .with_watch(engine.generation.watch())
                .run_observed(observer)?;
            Ok(CftpSample {
                config: wrap(sample.config),
                horizon: sample.horizon,
                epochs: sample.epochs,
            })
        }

        match self.current()? {
            Region::LatticePath(m) => drive(self, m, seed, observer, Configuration::Path),
            Region::Hexagon(m) => drive(self, m, seed, observer, Configuration::Stacks),
            Region::Domino(m) => drive(self, m, seed, observer, Configuration::Heights),
        }
    }

    /// Apply `count` local steps at bias `q`. Returns how many changed the
    /// configuration.
    pub fn perform_local_steps(
        &self,
        config: &mut Configuration,
        count: u64,
        q: f32,
        rng: &mut Pcg32,
    ) -> Result<u64, EngineError> {
        if !(q.is_finite() && q > 0.0) {
            return Err(ConfigError::InvalidBias(q).into());
        }
        let bias = Bias::new(q);
        match (self.current()?, config) {
            (Region::LatticePath(m), Configuration::Path(c)) if m.is_valid(c) => {
                Ok(run_local_steps(m, c, count, bias, rng))
            }
            (Region::Hexagon(m), Configuration::Stacks(c)) if m.is_valid(c) => {
                Ok(run_local_steps(m, c, count, bias, rng))
            }
            (Region::Domino(m), Configuration::Heights(c)) if m.is_valid(c) => {
                Ok(run_local_steps(m, c, count, bias, rng))
            }
            _ => Err(EngineError::ConfigurationMismatch),
        }
    }

    /// Whether `config` is a valid configuration of the current region.
    pub fn is_valid(&self, config: &Configuration) -> bool {
        match (self.region.as_ref(), config) {
            (Some(Region::LatticePath(m)), Configuration::Path(c)) => m.is_valid(c),
            (Some(Region::Hexagon(m)), Configuration::Stacks(c)) => m.is_valid(c),
            (Some(Region::Domino(m)), Configuration::Heights(c)) => m.is_valid(c),
            _ => false,
        }
    }

    /// The q-weighted statistic of `config`.
    pub fn statistic(&self, config: &Configuration) -> Result<u64, EngineError> {
        match (self.current()?, config) {
            (Region::LatticePath(m), Configuration::Path(c)) => Ok(m.statistic(c)),
            (Region::Hexagon(m), Configuration::Stacks(c)) => Ok(m.statistic(c)),
            (Region::Domino(m), Configuration::Heights(c)) => Ok(m.statistic(c)),
            _ => Err(EngineError::ConfigurationMismatch),
        }
    }

    /// Local-state records of `config`.
    pub fn export_configuration(&self, config: &Configuration) -> Result<Vec<CellRecord>, EngineError> {
        if !self.is_valid(config) {
            return Err(EngineError::ConfigurationMismatch);
        }
        match (self.current()?, config) {
            (Region::LatticePath(m), Configuration::Path(c)) => Ok(m.export(c)),
            (Region::Hexagon(m), Configuration::Stacks(c)) => Ok(m.export(c)),
            (Region::Domino(m), Configuration::Heights(c)) => Ok(m.export(c)),
            _ => Err(EngineError::ConfigurationMismatch),
        }
    }

    /// Height function of exported records, zero at the first vertex they
    /// touch.
    pub fn height_function(&self, records: &[CellRecord]) -> Result<HeightFunction, EngineError> {
        let graph = match self.current()? {
            Region::LatticePath(m) => m.height_graph(records),
            Region::Hexagon(m) => m.height_graph(records),
            Region::Domino(m) => m.height_graph(records),
        };
        let start = graph
            .vertices()
            .first()
            .copied()
            .ok_or(EngineError::ConfigurationMismatch)?;
        Ok(graph.solve(start)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::height::VisitOrder;

    fn engine_with(spec: RegionSpec) -> TilingEngine {
        let mut engine = TilingEngine::default();
        assert!(engine.init_region(&spec).is_valid());
        engine
    }

    #[test]
    fn test_operations_need_a_region() {
        let engine = TilingEngine::default();
        assert!(matches!(engine.run_cftp(1), Err(EngineError::NoRegion)));
    }

    #[test]
    fn test_invalid_region_clears_state() {
        let mut engine = engine_with(RegionSpec::LatticePath { right: 3, up: 2 });
        let status = engine.init_region(&RegionSpec::Rectangle {
            width: 3,
            height: 3,
        });
        assert!(!status.is_valid());
        assert!(engine.region().is_none());

        let status = engine.init_region(&RegionSpec::Hexagon { a: 0, b: 2, c: 2 });
        assert!(matches!(status, RegionStatus::Invalid { .. }));
    }

    #[test]
    fn test_triples_describe_domino_regions() {
        let mut engine = TilingEngine::default();
        let triples = [[0, 0, 1], [1, 0, 1], [0, 1, 1], [1, 1, 1], [5, 5, 0]];
        assert_eq!(
            engine.init_region_triples(&triples),
            RegionStatus::Valid { sites: 1 }
        );
    }

    #[test]
    fn test_sample_step_export_roundtrip() {
        for spec in [
            RegionSpec::LatticePath { right: 5, up: 4 },
            RegionSpec::Hexagon { a: 2, b: 3, c: 2 },
            RegionSpec::AztecDiamond { order: 3 },
        ] {
            let mut engine = engine_with(spec);
            engine.set_bias_parameter(0.9).unwrap();
            let sample = engine.run_cftp(7).unwrap();
            assert!(engine.is_valid(&sample.config));

            let mut config = sample.config;
            let mut rng = Pcg32::keyed(7, 1);
            engine
                .perform_local_steps(&mut config, 500, 1.2, &mut rng)
                .unwrap();
            assert!(engine.is_valid(&config));

            let records = engine.export_configuration(&config).unwrap();
            let heights = engine.height_function(&records).unwrap();
            let region = engine.region().unwrap();
            let graph = match region {
                Region::LatticePath(m) => m.height_graph(&records),
                Region::Hexagon(m) => m.height_graph(&records),
                Region::Domino(m) => m.height_graph(&records),
            };
            let last = graph.vertices()[graph.vertex_count() - 1];
            let other = graph.solve_with_order(last, VisitOrder::Reverse).unwrap();
            assert!(heights.same_differences(&other));
        }
    }

    #[test]
    fn test_configuration_mismatch() {
        let engine = engine_with(RegionSpec::LatticePath { right: 2, up: 2 });
        let mut foreign = Configuration::Stacks(vec![0; 4]);
        let mut rng = Pcg32::keyed(1, 1);
        assert!(matches!(
            engine.perform_local_steps(&mut foreign, 1, 1.0, &mut rng),
            Err(EngineError::ConfigurationMismatch)
        ));
        assert!(matches!(
            engine.export_configuration(&Configuration::Path(vec![1, 1, 1, 1])),
            Err(EngineError::ConfigurationMismatch)
        ));
    }

    #[test]
    fn test_bias_validation() {
        let mut engine = TilingEngine::default();
        assert!(engine.set_bias_parameter(0.0).is_err());
        assert!(engine.set_bias_parameter(f32::NAN).is_err());
        engine.set_bias_parameter(2.0).unwrap();
        assert_eq!(engine.bias().q(), 2.0);
    }

    #[test]
    fn test_from_config() {
        let config = SamplerConfig {
            region: RegionSpec::Rectangle {
                width: 4,
                height: 2,
            },
            bias: 0.5,
            ..Default::default()
        };
        let engine = TilingEngine::from_config(&config).unwrap();
        let sample = engine.run_cftp(3).unwrap();
        assert_eq!(engine.export_configuration(&sample.config).unwrap().len(), 4);
    }
}
