//! Glauber dynamics: forward local-update chains.
//!
//! After an exact start state is known, many independent chains are run
//! forward from it and one observable is read from each. Chain `c` of a
//! batch draws from `Pcg32::keyed(seed, c)`, so a batch is reproducible on
//! any backend that follows the same stream layout.

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

use super::gpu::GpuError;
use super::lattice_path::{PackedPath, packed_height, packed_update};
use super::model::{Bias, MonotoneModel};
use super::rng::{Decision, Pcg32};

/// Apply `count` decisions drawn from `rng`. Returns how many changed the
/// configuration.
pub fn run_local_steps<M: MonotoneModel>(
    model: &M,
    config: &mut M::Config,
    count: u64,
    bias: Bias,
    rng: &mut Pcg32,
) -> u64 {
    let mut changed = 0;
    for _ in 0..count {
        if model.apply(config, Decision::draw(rng), bias) {
            changed += 1;
        }
    }
    changed
}

/// One batch of independent lattice-path chains.
#[derive(Debug, Clone, Copy)]
pub struct BatchRequest<'a> {
    /// Shared start state of every chain.
    pub start: &'a PackedPath,
    pub num_chains: u32,
    pub steps_per_chain: u32,
    pub bias: Bias,
    pub seed: u64,
    /// Stream index of the batch's first chain.
    pub first_chain: u32,
    /// Path position whose height is reported.
    pub observe_at: u32,
}

impl BatchRequest<'_> {
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.start.len() < 2 {
            return Err(BackendError::PathTooShort(self.start.len()));
        }
        if self.observe_at > self.start.len() {
            return Err(BackendError::ObservePosition {
                position: self.observe_at,
                len: self.start.len(),
            });
        }
        Ok(())
    }

    /// Random stream of chain `index` within the batch.
    pub fn chain_rng(&self, index: u32) -> Pcg32 {
        Pcg32::keyed(self.seed, self.first_chain.wrapping_add(index))
    }
}

/// Backend running batches of lattice-path chains.
pub trait ChainBackend {
    fn name(&self) -> &'static str;

    /// Run every chain of the batch and return one observable per chain.
    fn sample_batch(&mut self, request: &BatchRequest<'_>) -> Result<Vec<u32>, BackendError>;
}

/// Errors raised by a chain backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Path must have at least two steps, got {0}")]
    PathTooShort(u32),
    #[error("Observed position {position} is outside a path of {len} steps")]
    ObservePosition { position: u32, len: u32 },
    #[error("GPU backend failed: {0}")]
    Gpu(#[from] GpuError),
}

/// Run one chain on packed words in place.
#[inline]
pub fn run_packed_chain(words: &mut [u32], len: u32, steps: u32, bias: Bias, rng: &mut Pcg32) {
    let sites = len - 1;
    let add = bias.add_probability();
    for _ in 0..steps {
        let d = Decision::draw(rng);
        packed_update(words, d.site % sites, d.threshold, add);
    }
}

/// CPU chain backend. Chains run in parallel on native targets.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuChains;

impl CpuChains {
    pub fn new() -> Self {
        Self
    }

    fn run_chain(request: &BatchRequest<'_>, index: u32) -> u32 {
        let mut words = request.start.words().to_vec();
        let mut rng = request.chain_rng(index);
        run_packed_chain(
            &mut words,
            request.start.len(),
            request.steps_per_chain,
            request.bias,
            &mut rng,
        );
        packed_height(&words, request.observe_at)
    }
}

impl ChainBackend for CpuChains {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn sample_batch(&mut self, request: &BatchRequest<'_>) -> Result<Vec<u32>, BackendError> {
        request.validate()?;

        #[cfg(not(target_arch = "wasm32"))]
        let observed = (0..request.num_chains)
            .into_par_iter()
            .map(|c| Self::run_chain(request, c))
            .collect();

        #[cfg(target_arch = "wasm32")]
        let observed = (0..request.num_chains)
            .map(|c| Self::run_chain(request, c))
            .collect();

        Ok(observed)
    }
}
