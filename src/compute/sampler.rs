//! Observable sampling: one exact start state, many forward chains.
//!
//! A collector draws one exact sample by coupling from the past for each
//! region and bias, packs it, and runs batches of independent chains from
//! it, recording the height of every chain at one path position. The
//! histogram is rebuilt from all samples after every batch. A failing GPU
//! batch is rerun on the CPU and every later batch stays on the CPU.

use std::collections::HashMap;

use super::cftp::{CftpError, Generation, run_seed, sample_exact};
use super::glauber::{BackendError, BatchRequest, ChainBackend, CpuChains};
use super::lattice_path::{LatticePath, PackedPath};
use super::model::Bias;
use super::rng::entropy_seed;
use super::stats::Histogram;
use crate::schema::{ConfigError, RegionSpec, SamplerConfig};

/// Progress reported after every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingProgress {
    pub collected: usize,
    pub requested: usize,
    pub batches: u32,
    pub backend: &'static str,
}

/// Observables gathered by [`SampleCollector::collect`].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    pub samples: Vec<u32>,
    pub histogram: Histogram,
    /// Exact start state shared by every chain.
    pub start: PackedPath,
    /// Path position whose height was recorded.
    pub observe_at: u32,
    /// Whether any batch had to be rerun on the CPU.
    pub fell_back: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SamplingError {
    #[error("Observable sampling needs a lattice path region, got {0:?}")]
    UnsupportedRegion(RegionSpec),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Exact start state unavailable: {0}")]
    Cftp(#[from] CftpError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Sampling request was superseded")]
    Cancelled,
}

/// Start-state cache key: path shape and the bit pattern of q.
type StartKey = (u32, u32, u32);

/// Collects midpoint-height samples for lattice-path regions.
pub struct SampleCollector {
    config: SamplerConfig,
    seed: u64,
    cpu: CpuChains,
    backend: Option<Box<dyn ChainBackend>>,
    starts: HashMap<StartKey, PackedPath>,
    generation: Generation,
}

impl SampleCollector {
    /// CPU-only collector.
    pub fn new(config: SamplerConfig) -> Result<Self, SamplingError> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(entropy_seed);
        Ok(Self {
            config,
            seed,
            cpu: CpuChains::new(),
            backend: None,
            starts: HashMap::new(),
            generation: Generation::new(),
        })
    }

    /// Collector that tries the GPU first when the config enables it.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn with_gpu(config: SamplerConfig) -> Result<Self, SamplingError> {
        let enabled = config.gpu.enabled;
        let gpu_config = config.gpu;
        let mut collector = Self::new(config)?;
        if enabled {
            match pollster::block_on(super::gpu::GpuChains::new(&gpu_config)) {
                Ok(gpu) => collector.backend = Some(Box::new(gpu)),
                Err(e) => log::warn!("GPU unavailable, sampling on CPU: {e}"),
            }
        }
        Ok(collector)
    }

    /// Use `backend` for batches until it fails.
    pub fn with_backend(mut self, backend: Box<dyn ChainBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Name of the backend the next batch will use.
    pub fn backend_name(&self) -> &'static str {
        self.backend.as_ref().map_or(self.cpu.name(), |b| b.name())
    }

    /// Counter that cancels in-flight collections when advanced.
    pub fn generation(&self) -> Generation {
        self.generation.clone()
    }

    pub fn cached_starts(&self) -> usize {
        self.starts.len()
    }

    /// Replace the configuration. Cached start states survive unless the
    /// seed or the horizon schedule changes; a config without a seed keeps
    /// the current one.
    pub fn reconfigure(&mut self, config: SamplerConfig) -> Result<(), SamplingError> {
        config.validate()?;
        let seed = config.seed.unwrap_or(self.seed);
        if seed != self.seed || config.cftp != self.config.cftp {
            self.starts.clear();
        }
        self.seed = seed;
        self.config = config;
        Ok(())
    }

    /// Change the bias parameter. Start states are cached per bias.
    pub fn set_bias(&mut self, q: f32) -> Result<(), SamplingError> {
        if !(q.is_finite() && q > 0.0) {
            return Err(ConfigError::InvalidBias(q).into());
        }
        self.config.bias = q;
        Ok(())
    }

    fn model(&self) -> Result<LatticePath, SamplingError> {
        match self.config.region {
            RegionSpec::LatticePath { right, up } => Ok(LatticePath::new(right, up)),
            ref other => Err(SamplingError::UnsupportedRegion(other.clone())),
        }
    }

    /// Exact start state for the current region and bias, cached.
    pub fn start_state(&mut self) -> Result<PackedPath, SamplingError> {
        let model = self.model()?;
        let key = (model.right(), model.up(), self.config.bias.to_bits());
        if let Some(start) = self.starts.get(&key) {
            return Ok(start.clone());
        }
        let sample = sample_exact(
            &model,
            Bias::new(self.config.bias),
            run_seed(self.seed, 0),
            &self.config.cftp,
        )?;
        log::info!(
            "Exact start state for {}x{} paths after {} epochs (horizon {})",
            model.right(),
            model.up(),
            sample.epochs,
            sample.horizon
        );
        let start = PackedPath::from_steps(&sample.config);
        self.starts.insert(key, start.clone());
        Ok(start)
    }

    /// Collect `count` observables.
    pub fn collect(&mut self, count: usize) -> Result<SampleSet, SamplingError> {
        self.collect_observed(count, |_, _| {})
    }

    /// Collect `count` observables, reporting progress after every batch.
    pub fn collect_observed(
        &mut self,
        count: usize,
        mut progress: impl FnMut(SamplingProgress, &Histogram),
    ) -> Result<SampleSet, SamplingError> {
        let watch = self.generation.watch();
        let model = self.model()?;
        let start = self.start_state()?;
        let observe_at = self
            .config
            .sampling
            .observe_at
            .unwrap_or_else(|| model.midpoint());
        let bins = self.config.sampling.histogram_bins;
        let chain_seed = run_seed(self.seed, 1);

        if start.len() < 2 {
            return self.collect_fixed(count, start, observe_at, progress);
        }

        let mut samples = Vec::with_capacity(count);
        let mut histogram = Histogram::from_samples(&samples, bins);
        let mut batches = 0;
        let mut fell_back = false;

        while samples.len() < count {
            if watch.is_stale() {
                return Err(SamplingError::Cancelled);
            }
            let chains = (count - samples.len()).min(self.config.sampling.chains_per_batch as usize);
            let request = BatchRequest {
                start: &start,
                num_chains: chains as u32,
                steps_per_chain: self.config.sampling.steps_per_chain,
                bias: Bias::new(self.config.bias),
                seed: chain_seed,
                first_chain: samples.len() as u32,
                observe_at,
            };

            let mut batch = None;
            if let Some(backend) = self.backend.as_mut() {
                match backend.sample_batch(&request) {
                    Ok(observed) => batch = Some(observed),
                    Err(e) => {
                        log::warn!("{} batch failed, continuing on CPU: {e}", backend.name());
                        self.backend = None;
                        fell_back = true;
                    }
                }
            }
            let observed = match batch {
                Some(observed) => observed,
                None => self.cpu.sample_batch(&request)?,
            };

            samples.extend(observed);
            batches += 1;
            histogram = Histogram::from_samples(&samples, bins);
            log::info!(
                "Batch {}: {}/{} samples on {}",
                batches,
                samples.len(),
                count,
                self.backend_name()
            );
            progress(
                SamplingProgress {
                    collected: samples.len(),
                    requested: count,
                    batches,
                    backend: self.backend_name(),
                },
                &histogram,
            );
        }

        if watch.is_stale() {
            return Err(SamplingError::Cancelled);
        }
        Ok(SampleSet {
            samples,
            histogram,
            start,
            observe_at,
            fell_back,
        })
    }
}

impl SampleCollector {
    /// A path with no site has one configuration, so every observable
    /// equals the start state's.
    fn collect_fixed(
        &self,
        count: usize,
        start: PackedPath,
        observe_at: u32,
        mut progress: impl FnMut(SamplingProgress, &Histogram),
    ) -> Result<SampleSet, SamplingError> {
        if observe_at > start.len() {
            return Err(BackendError::ObservePosition {
                position: observe_at,
                len: start.len(),
            }
            .into());
        }
        let samples = vec![start.height_at(observe_at); count];
        let histogram = Histogram::from_samples(&samples, self.config.sampling.histogram_bins);
        log::info!("Path of {} steps has a single configuration", start.len());
        progress(
            SamplingProgress {
                collected: count,
                requested: count,
                batches: 0,
                backend: self.backend_name(),
            },
            &histogram,
        );
        Ok(SampleSet {
            samples,
            histogram,
            start,
            observe_at,
            fell_back: false,
        })
    }
}
