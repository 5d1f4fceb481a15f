//! Batched lattice-path chains and coupling from the past on the GPU.
//!
//! Every chain (or run) is one invocation that owns its packed path words
//! and its two PCG words, so invocations never share memory. Long chains
//! are split into dispatches of at most `steps_per_dispatch` steps; the
//! host waits once per batch (once per epoch for coupling from the past).

use std::time::Duration;

use super::{GpuContext, GpuError, bind_buffers, storage_layout, workgroups_for};
use crate::compute::cftp::run_seed;
use crate::compute::glauber::{BackendError, BatchRequest, ChainBackend};
use crate::compute::lattice_path::{LatticePath, PackedPath};
use crate::compute::model::{Bias, MonotoneModel};
use crate::schema::{CftpConfig, GpuConfig};

const CHAIN_SHADER: &str = include_str!("shaders/glauber_chains.wgsl");
const CFTP_SHADER: &str = include_str!("shaders/cftp_paths.wgsl");

/// Uniform block of `glauber_chains.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ChainParams {
    len: u32,
    words_per_chain: u32,
    num_chains: u32,
    steps: u32,
    add_probability: f32,
    observe_at: u32,
    _pad0: u32,
    _pad1: u32,
}

/// Uniform block of `cftp_paths.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct CftpParams {
    len: u32,
    words_per_path: u32,
    num_runs: u32,
    horizon: u32,
    add_probability: f32,
    t_low: u32,
    t_high: u32,
    _pad: u32,
}

/// Result of a batch of coupling-from-the-past runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCftpBatch {
    /// Lower path of every run; an exact sample where `coalesced` is set.
    pub samples: Vec<PackedPath>,
    pub coalesced: Vec<bool>,
    /// Horizon at which each run coalesced, 0 for runs that timed out.
    pub horizons: Vec<u32>,
}

/// GPU lattice-path chain backend.
pub struct GpuChains {
    context: GpuContext,
    steps_per_dispatch: u32,

    chain_layout: wgpu::BindGroupLayout,
    chain_pipeline: wgpu::ComputePipeline,
    observe_pipeline: wgpu::ComputePipeline,

    cftp_layout: wgpu::BindGroupLayout,
    init_pipeline: wgpu::ComputePipeline,
    apply_pipeline: wgpu::ComputePipeline,
    compare_pipeline: wgpu::ComputePipeline,
}

impl GpuChains {
    pub async fn new(config: &GpuConfig) -> Result<Self, GpuError> {
        let context =
            GpuContext::new("Lattice Path Chains", Duration::from_millis(config.timeout_ms)).await?;
        let device = context.device();

        let chain_layout = storage_layout(device, "Chain Bind Group Layout", &[false, false, false]);
        let chain_pipeline = context.pipeline("Chain Pipeline", CHAIN_SHADER, "main", &chain_layout);
        let observe_pipeline =
            context.pipeline("Observe Pipeline", CHAIN_SHADER, "observe", &chain_layout);

        let cftp_layout =
            storage_layout(device, "CFTP Bind Group Layout", &[true, true, false, false]);
        let init_pipeline =
            context.pipeline("CFTP Init Pipeline", CFTP_SHADER, "init_runs", &cftp_layout);
        let apply_pipeline =
            context.pipeline("CFTP Apply Pipeline", CFTP_SHADER, "apply_decisions", &cftp_layout);
        let compare_pipeline =
            context.pipeline("CFTP Compare Pipeline", CFTP_SHADER, "compare_runs", &cftp_layout);

        Ok(Self {
            context,
            steps_per_dispatch: config.steps_per_dispatch.max(1),
            chain_layout,
            chain_pipeline,
            observe_pipeline,
            cftp_layout,
            init_pipeline,
            apply_pipeline,
            compare_pipeline,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Run a batch of chains and read back one height per chain.
    pub fn run_batch(&self, request: &BatchRequest<'_>) -> Result<Vec<u32>, GpuError> {
        self.context.check()?;
        let num_chains = request.num_chains;
        if num_chains == 0 {
            return Ok(Vec::new());
        }
        let len = request.start.len();
        let words = PackedPath::words_for(len);

        let rng_states: Vec<u32> = (0..num_chains)
            .flat_map(|c| request.chain_rng(c).words())
            .collect();
        let paths: Vec<u32> = request
            .start
            .words()
            .iter()
            .copied()
            .cycle()
            .take(words * num_chains as usize)
            .collect();
        self.context.check_size("Chain Paths", paths.len())?;

        let rng_buffer = self.context.storage_buffer("Chain RNG States", &rng_states);
        let path_buffer = self.context.storage_buffer("Chain Paths", &paths);
        let observed_buffer = self
            .context
            .zeroed_buffer("Chain Observables", num_chains as usize)?;

        let params = |steps: u32| ChainParams {
            len,
            words_per_chain: words as u32,
            num_chains,
            steps,
            add_probability: request.bias.add_probability(),
            observe_at: request.observe_at,
            _pad0: 0,
            _pad1: 0,
        };
        let workgroups = workgroups_for(num_chains);
        let device = self.context.device();

        let mut remaining = request.steps_per_chain;
        let mut dispatches = 0;
        loop {
            let steps = remaining.min(self.steps_per_dispatch);
            remaining -= steps;
            let params_buffer = self.context.uniform_buffer("Chain Params", &params(steps));
            let bind_group = bind_buffers(
                device,
                "Chain Bind Group",
                &self.chain_layout,
                &params_buffer,
                &[&rng_buffer, &path_buffer, &observed_buffer],
            );

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Chain Encoder"),
            });
            if steps > 0 {
                self.context
                    .dispatch(&mut encoder, "Chain Pass", &self.chain_pipeline, &bind_group, workgroups);
                dispatches += 1;
            }
            if remaining == 0 {
                self.context.dispatch(
                    &mut encoder,
                    "Observe Pass",
                    &self.observe_pipeline,
                    &bind_group,
                    workgroups,
                );
            }
            self.context.queue().submit(Some(encoder.finish()));
            if remaining == 0 {
                break;
            }
        }

        log::debug!(
            "GPU batch: {} chains x {} steps in {} dispatches",
            num_chains,
            request.steps_per_chain,
            dispatches
        );
        self.context.read_words(&observed_buffer, num_chains as usize)
    }

    /// Run `num_runs` independent coupling-from-the-past runs on a path
    /// model. Run `r` uses the decision stream of [`run_seed`]`(seed,
    /// first_run + r)`, the same stream the CPU driver uses.
    pub fn cftp_batch(
        &self,
        model: &LatticePath,
        bias: Bias,
        seed: u64,
        first_run: u32,
        num_runs: u32,
        config: &CftpConfig,
    ) -> Result<PathCftpBatch, GpuError> {
        self.context.check()?;
        let len = model.len() as u32;
        if len < 2 || num_runs == 0 {
            let sample = PackedPath::from_steps(&model.minimal());
            return Ok(PathCftpBatch {
                samples: vec![sample; num_runs as usize],
                coalesced: vec![true; num_runs as usize],
                horizons: vec![config.initial_horizon.max(1); num_runs as usize],
            });
        }
        let words = PackedPath::words_for(len);

        let seeds: Vec<u32> = (0..num_runs)
            .flat_map(|r| {
                let s = run_seed(seed, first_run.wrapping_add(r));
                [s as u32, (s >> 32) as u32]
            })
            .collect();
        let mut extremes = PackedPath::from_steps(&model.minimal()).words().to_vec();
        extremes.extend_from_slice(PackedPath::from_steps(&model.maximal()).words());

        let seed_buffer = self.context.storage_buffer("CFTP Seeds", &seeds);
        let extremes_buffer = self.context.storage_buffer("CFTP Extremes", &extremes);
        let path_buffer = self
            .context
            .zeroed_buffer("CFTP Paths", 2 * words * num_runs as usize)?;
        let status_buffer = self.context.zeroed_buffer("CFTP Status", num_runs as usize)?;

        let device = self.context.device();
        let workgroups = workgroups_for(num_runs);
        let bind = |params: &CftpParams| {
            let params_buffer = self.context.uniform_buffer("CFTP Params", params);
            bind_buffers(
                device,
                "CFTP Bind Group",
                &self.cftp_layout,
                &params_buffer,
                &[&seed_buffer, &extremes_buffer, &path_buffer, &status_buffer],
            )
        };

        let mut horizon = config.initial_horizon.max(1);
        let mut status;
        loop {
            let base = CftpParams {
                len,
                words_per_path: words as u32,
                num_runs,
                horizon,
                add_probability: bias.add_probability(),
                t_low: 0,
                t_high: horizon,
                _pad: 0,
            };

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("CFTP Init Encoder"),
            });
            self.context
                .dispatch(&mut encoder, "CFTP Init Pass", &self.init_pipeline, &bind(&base), workgroups);
            self.context.queue().submit(Some(encoder.finish()));

            let mut t_high = horizon;
            while t_high > 0 {
                let t_low = t_high.saturating_sub(self.steps_per_dispatch);
                let chunk = CftpParams {
                    t_low,
                    t_high,
                    ..base
                };
                let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("CFTP Apply Encoder"),
                });
                self.context.dispatch(
                    &mut encoder,
                    "CFTP Apply Pass",
                    &self.apply_pipeline,
                    &bind(&chunk),
                    workgroups,
                );
                self.context.queue().submit(Some(encoder.finish()));
                t_high = t_low;
            }

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("CFTP Compare Encoder"),
            });
            self.context.dispatch(
                &mut encoder,
                "CFTP Compare Pass",
                &self.compare_pipeline,
                &bind(&base),
                workgroups,
            );
            self.context.queue().submit(Some(encoder.finish()));

            status = self.context.read_words(&status_buffer, num_runs as usize)?;
            let done = status.iter().filter(|&&s| s != 0).count();
            log::debug!("GPU CFTP horizon {horizon}: {done}/{num_runs} runs coalesced");
            if done == num_runs as usize || horizon >= config.max_horizon {
                break;
            }
            horizon = horizon.saturating_mul(2).min(config.max_horizon);
        }

        let all_paths = self
            .context
            .read_words(&path_buffer, 2 * words * num_runs as usize)?;
        let samples = (0..num_runs as usize)
            .map(|r| {
                let lower = &all_paths[2 * r * words..(2 * r + 1) * words];
                PackedPath::from_words(len, lower.to_vec())
            })
            .collect();
        Ok(PathCftpBatch {
            samples,
            coalesced: status.iter().map(|&s| s != 0).collect(),
            horizons: status,
        })
    }
}

impl ChainBackend for GpuChains {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn sample_batch(&mut self, request: &BatchRequest<'_>) -> Result<Vec<u32>, BackendError> {
        request.validate()?;
        Ok(self.run_batch(request)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::cftp::sample_runs;
    use crate::compute::glauber::CpuChains;

    fn gpu(config: &GpuConfig) -> Option<GpuChains> {
        match pollster::block_on(GpuChains::new(config)) {
            Ok(chains) => Some(chains),
            Err(GpuError::NoAdapter) => {
                eprintln!("Skipping GPU test: no adapter available");
                None
            }
            Err(e) => panic!("Failed to create GPU chains: {:?}", e),
        }
    }

    #[test]
    fn test_gpu_chains_match_cpu_streams() {
        // Small dispatches exercise the chunked path.
        let config = GpuConfig {
            steps_per_dispatch: 700,
            ..Default::default()
        };
        let Some(mut gpu) = gpu(&config) else {
            return;
        };
        let model = LatticePath::new(40, 30);
        let start = PackedPath::from_steps(&model.minimal());
        let request = BatchRequest {
            start: &start,
            num_chains: 300,
            steps_per_chain: 5000,
            bias: Bias::new(0.8),
            seed: 12,
            first_chain: 100,
            observe_at: 35,
        };
        let on_gpu = gpu.sample_batch(&request).unwrap();
        let on_cpu = CpuChains::new().sample_batch(&request).unwrap();
        assert_eq!(on_gpu, on_cpu);
    }

    #[test]
    fn test_gpu_cftp_matches_cpu_samples() {
        let config = GpuConfig {
            steps_per_dispatch: 256,
            ..Default::default()
        };
        let Some(gpu) = gpu(&config) else {
            return;
        };
        let model = LatticePath::new(6, 5);
        let bias = Bias::new(0.7);
        let cftp = CftpConfig::default();
        let batch = gpu.cftp_batch(&model, bias, 99, 10, 128, &cftp).unwrap();
        assert!(batch.coalesced.iter().all(|&c| c));

        let cpu = sample_runs(&model, bias, 99, 10..138, &cftp);
        for ((sample, horizon), expected) in batch.samples.iter().zip(&batch.horizons).zip(cpu) {
            let expected = expected.unwrap();
            assert_eq!(sample.to_steps(), expected.config);
            assert_eq!(*horizon, expected.horizon);
        }
    }

    #[test]
    fn test_gpu_cftp_reports_uncoalesced_runs() {
        let Some(gpu) = gpu(&GpuConfig::default()) else {
            return;
        };
        let model = LatticePath::new(30, 30);
        let cftp = CftpConfig {
            initial_horizon: 1,
            max_horizon: 64,
        };
        let batch = gpu
            .cftp_batch(&model, Bias::uniform(), 1, 0, 8, &cftp)
            .unwrap();
        assert_eq!(batch.coalesced, vec![false; 8]);
        assert_eq!(batch.horizons, vec![0; 8]);
    }
}
