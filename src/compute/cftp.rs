//! Coupling from the past with a doubling horizon.
//!
//! Each epoch restarts the minimal and maximal configurations at virtual
//! time `-T`, applies the decisions for indices `T-1, ..., 0` to both and
//! checks whether they agree. Decision `t` depends only on the seed and
//! `t`, so an epoch at `2T` replays the previous epoch's decisions as its
//! last `T` steps. The first coalesced state is an exact sample.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::model::{Bias, MonotoneModel};
use super::rng::{Decision, DecisionStream, pcg_hash};
use crate::schema::CftpConfig;

/// Monotonically increasing request counter.
///
/// Long-running loops take a [`GenerationWatch`] when they start and abort
/// once the counter has moved on.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    counter: Arc<AtomicU64>,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Invalidate every outstanding watch. Returns the new generation.
    pub fn advance(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn watch(&self) -> GenerationWatch {
        GenerationWatch {
            counter: Arc::clone(&self.counter),
            snapshot: self.current(),
        }
    }
}

/// Snapshot of a [`Generation`].
#[derive(Debug, Clone)]
pub struct GenerationWatch {
    counter: Arc<AtomicU64>,
    snapshot: u64,
}

impl GenerationWatch {
    /// Whether a newer request has started since the snapshot.
    pub fn is_stale(&self) -> bool {
        self.counter.load(Ordering::Acquire) != self.snapshot
    }
}

/// State of a [`CftpRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CftpPhase {
    /// The next epoch will run at this horizon.
    Running { horizon: u32 },
    Coalesced,
    TimedOut,
    Cancelled,
}

/// Progress report emitted after every epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CftpProgress {
    pub epoch: u32,
    /// Horizon of the epoch that just finished.
    pub horizon: u32,
    pub phase: CftpPhase,
}

/// An exact sample together with the horizon that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CftpSample<C> {
    pub config: C,
    pub horizon: u32,
    pub epochs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CftpError {
    #[error("Chains did not coalesce within a horizon of {max_horizon} steps")]
    Timeout { max_horizon: u32 },
    #[error("Sampling request was superseded")]
    Cancelled,
}

/// One coupling-from-the-past request, advanced an epoch at a time.
pub struct CftpRun<'a, M: MonotoneModel> {
    model: &'a M,
    stream: DecisionStream,
    bias: Bias,
    max_horizon: u32,
    phase: CftpPhase,
    epochs: u32,
    last_horizon: u32,
    sample: Option<M::Config>,
    watch: Option<GenerationWatch>,
}

impl<'a, M: MonotoneModel> CftpRun<'a, M> {
    pub fn new(model: &'a M, bias: Bias, seed: u64, config: &CftpConfig) -> Self {
        Self {
            model,
            stream: DecisionStream::new(seed),
            bias,
            max_horizon: config.max_horizon,
            phase: CftpPhase::Running {
                horizon: config.initial_horizon.max(1),
            },
            epochs: 0,
            last_horizon: 0,
            sample: None,
            watch: None,
        }
    }

    /// Abort at the next epoch boundary once `watch` goes stale.
    pub fn with_watch(mut self, watch: GenerationWatch) -> Self {
        self.watch = Some(watch);
        self
    }

    pub fn phase(&self) -> CftpPhase {
        self.phase
    }

    pub fn epochs(&self) -> u32 {
        self.epochs
    }

    pub fn stream(&self) -> &DecisionStream {
        &self.stream
    }

    /// Run one epoch.
    pub fn advance(&mut self) -> CftpPhase {
        self.advance_with(|_, _| {})
    }

    /// Run one epoch, reporting every decision as `(index, decision)` in
    /// the order it is applied.
    pub fn advance_with(&mut self, mut on_decision: impl FnMut(u32, Decision)) -> CftpPhase {
        let CftpPhase::Running { horizon } = self.phase else {
            return self.phase;
        };
        if self.watch.as_ref().is_some_and(GenerationWatch::is_stale) {
            self.phase = CftpPhase::Cancelled;
            return self.phase;
        }

        let mut lower = self.model.minimal();
        let mut upper = self.model.maximal();
        for t in (0..horizon).rev() {
            let decision = self.stream.decision(t);
            on_decision(t, decision);
            self.model.apply(&mut lower, decision, self.bias);
            self.model.apply(&mut upper, decision, self.bias);
        }
        self.epochs += 1;
        self.last_horizon = horizon;

        self.phase = if lower == upper {
            self.sample = Some(lower);
            CftpPhase::Coalesced
        } else if horizon >= self.max_horizon {
            CftpPhase::TimedOut
        } else {
            CftpPhase::Running {
                horizon: horizon.saturating_mul(2).min(self.max_horizon),
            }
        };
        log::debug!(
            "CFTP epoch {}: horizon {} -> {:?}",
            self.epochs,
            horizon,
            self.phase
        );
        self.phase
    }

    /// Take the sample of a coalesced run.
    pub fn finish(self) -> Result<CftpSample<M::Config>, CftpError> {
        match (self.phase, self.sample) {
            (CftpPhase::Coalesced, Some(config)) => Ok(CftpSample {
                config,
                horizon: self.last_horizon,
                epochs: self.epochs,
            }),
            (CftpPhase::Cancelled, _) => Err(CftpError::Cancelled),
            _ => Err(CftpError::Timeout {
                max_horizon: self.max_horizon,
            }),
        }
    }

    /// Run epochs until the run coalesces, times out or is cancelled.
    pub fn run(self) -> Result<CftpSample<M::Config>, CftpError> {
        self.run_observed(|_| {})
    }

    /// Like [`CftpRun::run`], reporting progress after every epoch.
    pub fn run_observed(
        mut self,
        mut observer: impl FnMut(CftpProgress),
    ) -> Result<CftpSample<M::Config>, CftpError> {
        while let CftpPhase::Running { horizon } = self.phase {
            let phase = self.advance();
            if phase != CftpPhase::Cancelled {
                observer(CftpProgress {
                    epoch: self.epochs,
                    horizon,
                    phase,
                });
            }
        }
        if self.phase == CftpPhase::TimedOut {
            log::warn!(
                "CFTP timed out after {} epochs (horizon {})",
                self.epochs,
                self.max_horizon
            );
        }
        self.finish()
    }
}

/// Draw one exact sample.
pub fn sample_exact<M: MonotoneModel>(
    model: &M,
    bias: Bias,
    seed: u64,
    config: &CftpConfig,
) -> Result<CftpSample<M::Config>, CftpError> {
    CftpRun::new(model, bias, seed, config).run()
}

/// Decision-stream seed of run `run` in a family of independent runs.
pub fn run_seed(seed: u64, run: u32) -> u64 {
    let lo = pcg_hash(seed as u32 ^ pcg_hash(run));
    let hi = pcg_hash((seed >> 32) as u32 ^ pcg_hash(lo ^ run));
    ((hi as u64) << 32) | lo as u64
}

/// Independent exact samples for runs `runs` of the family named by `seed`.
///
/// Run `r` uses the stream seeded by [`run_seed`], so the GPU batch driver
/// produces the same samples for the same runs.
pub fn sample_runs<M: MonotoneModel>(
    model: &M,
    bias: Bias,
    seed: u64,
    runs: Range<u32>,
    config: &CftpConfig,
) -> Vec<Result<CftpSample<M::Config>, CftpError>> {
    runs.map(|r| sample_exact(model, bias, run_seed(seed, r), config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::domino::DominoRegion;
    use crate::compute::hexagon::Hexagon;
    use crate::compute::lattice_path::LatticePath;
    use crate::compute::stats::{chi_squared, q_binomial, q_binomial_coefficients};
    use crate::schema::RegionSpec;
    use std::collections::HashMap;
    use std::hash::Hash;

    fn counts<M>(model: &M, bias: Bias, runs: u64) -> HashMap<M::Config, u64>
    where
        M: MonotoneModel,
        M::Config: Eq + Hash,
    {
        let config = CftpConfig::default();
        let mut counts = HashMap::new();
        for seed in 0..runs {
            let sample = sample_exact(model, bias, seed, &config).unwrap();
            assert!(model.is_valid(&sample.config));
            *counts.entry(sample.config).or_insert(0) += 1;
        }
        counts
    }

    fn uniform_chi_squared<C>(counts: &HashMap<C, u64>, states: usize, runs: u64) -> f64 {
        let observed: Vec<f64> = counts.values().map(|&c| c as f64).collect();
        let expected = vec![runs as f64 / states as f64; observed.len()];
        chi_squared(&observed, &expected)
    }

    #[test]
    fn test_coalesced_sample_is_valid() {
        let model = LatticePath::new(6, 5);
        let sample = sample_exact(&model, Bias::new(0.8), 3, &CftpConfig::default()).unwrap();
        assert!(model.is_valid(&sample.config));
        assert!(sample.horizon.is_power_of_two());
        assert_eq!(sample.horizon, 1 << (sample.epochs - 1));
    }

    #[test]
    fn test_same_seed_same_sample() {
        let model = Hexagon::new(3, 3, 3);
        let config = CftpConfig::default();
        let a = sample_exact(&model, Bias::uniform(), 17, &config).unwrap();
        let b = sample_exact(&model, Bias::uniform(), 17, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_replay_across_doubling() {
        let model = LatticePath::new(30, 30);
        let config = CftpConfig {
            initial_horizon: 64,
            ..Default::default()
        };
        let mut run = CftpRun::new(&model, Bias::uniform(), 5, &config);

        let mut first = HashMap::new();
        let phase = run.advance_with(|t, d| {
            first.insert(t, d);
        });
        assert_eq!(phase, CftpPhase::Running { horizon: 128 });
        assert_eq!(first.len(), 64);

        let mut second = Vec::new();
        run.advance_with(|t, d| second.push((t, d)));
        assert_eq!(second.len(), 128);
        // The last 64 decisions of the longer epoch are the earlier epoch's.
        for &(t, d) in &second[64..] {
            assert_eq!(first.get(&t), Some(&d));
        }
        let fresh: Vec<u32> = second[..64].iter().map(|&(t, _)| t).collect();
        assert!(fresh.iter().all(|&t| t >= 64));
    }

    #[test]
    fn test_timeout_is_reported() {
        let model = LatticePath::new(30, 30);
        let config = CftpConfig {
            initial_horizon: 1,
            max_horizon: 64,
        };
        let mut horizons = Vec::new();
        let result =
            CftpRun::new(&model, Bias::uniform(), 1, &config).run_observed(|p| horizons.push(p.horizon));
        assert_eq!(result, Err(CftpError::Timeout { max_horizon: 64 }));
        assert_eq!(horizons, vec![1, 2, 4, 8, 16, 32, 64]);
    }

    #[test]
    fn test_stale_generation_cancels() {
        let model = LatticePath::new(30, 30);
        let generation = Generation::new();
        let mut run = CftpRun::new(&model, Bias::uniform(), 1, &CftpConfig::default())
            .with_watch(generation.watch());
        assert!(matches!(run.advance(), CftpPhase::Running { .. }));
        generation.advance();
        assert_eq!(run.advance(), CftpPhase::Cancelled);
        assert_eq!(run.finish(), Err(CftpError::Cancelled));
    }

    #[test]
    fn test_run_seeds_are_distinct() {
        let seeds: std::collections::HashSet<u64> = (0..1000).map(|r| run_seed(42, r)).collect();
        assert_eq!(seeds.len(), 1000);
        let model = LatticePath::new(3, 3);
        let samples = sample_runs(&model, Bias::uniform(), 42, 10..14, &CftpConfig::default());
        assert_eq!(samples.len(), 4);
        let direct = sample_exact(&model, Bias::uniform(), run_seed(42, 12), &CftpConfig::default());
        assert_eq!(samples[2], direct);
    }

    #[test]
    fn test_uniform_lattice_paths() {
        // 4 right-steps and 3 up-steps: 35 paths.
        let model = LatticePath::new(4, 3);
        let runs = 10_000;
        let counts = counts(&model, Bias::uniform(), runs);
        assert_eq!(counts.len(), 35);
        // 34 degrees of freedom; the 0.1% critical value is about 65.2.
        let stat = uniform_chi_squared(&counts, 35, runs);
        assert!(stat < 70.0, "chi-squared {stat}");
    }

    #[test]
    fn test_biased_lattice_paths_follow_q_weights() {
        let model = LatticePath::new(4, 3);
        let q = 0.5f64;
        let runs = 10_000u64;
        let counts = counts(&model, Bias::new(q as f32), runs);

        let mut by_area = vec![0u64; 13];
        for (path, count) in &counts {
            by_area[model.statistic(path) as usize] += count;
        }
        let paths_by_area = q_binomial_coefficients(7, 3);
        assert_eq!(paths_by_area.iter().sum::<u64>(), 35);

        let z = q_binomial(7, 3, q);
        for area in 0..5 {
            let p = paths_by_area[area] as f64 * q.powi(area as i32) / z;
            let observed = by_area[area] as f64 / runs as f64;
            let sigma = (p * (1.0 - p) / runs as f64).sqrt();
            assert!(
                (observed - p).abs() < 5.0 * sigma,
                "area {area}: observed {observed}, expected {p}"
            );
        }
        // The minimal path alone outweighs every path of area 4.
        assert!(by_area[0] > by_area[4]);
        let minimal = counts.get(&model.minimal()).copied().unwrap_or(0);
        let maximal = counts.get(&model.maximal()).copied().unwrap_or(0);
        assert!(minimal > 20 * (maximal + 1));
    }

    #[test]
    fn test_uniform_domino_tilings() {
        let model = DominoRegion::new(
            &RegionSpec::Rectangle {
                width: 4,
                height: 4,
            }
            .domino_cells(),
        )
        .unwrap();
        let runs = 3600;
        let counts = counts(&model, Bias::uniform(), runs);
        assert_eq!(counts.len(), 36);
        let stat = uniform_chi_squared(&counts, 36, runs);
        assert!(stat < 72.0, "chi-squared {stat}");
    }

    #[test]
    fn test_uniform_plane_partitions() {
        // Plane partitions in a 2 x 2 x 2 box: 20.
        let model = Hexagon::new(2, 2, 2);
        let runs = 4000;
        let counts = counts(&model, Bias::uniform(), runs);
        assert_eq!(counts.len(), 20);
        let stat = uniform_chi_squared(&counts, 20, runs);
        assert!(stat < 48.0, "chi-squared {stat}");
    }
}
