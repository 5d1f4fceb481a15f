//! Growth-diagram wavefront on the GPU.
//!
//! Anti-diagonals are processed strictly in order, one compute pass per
//! diagonal, one invocation per cell. Passes recorded into one encoder run
//! in submission order, which is the barrier between diagonals; the host
//! waits once for the whole diagram.

use std::time::Duration;

use super::{GpuContext, GpuError, bind_buffers, storage_layout, workgroups_for};
use crate::compute::growth::GrowthDiagram;
use crate::schema::{GpuConfig, WeightLaw};

const GROWTH_SHADER: &str = include_str!("shaders/growth_diagram.wgsl");

/// Uniform block of `growth_diagram.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct GrowthParams {
    n: u32,
    diagonal: u32,
    first_row: u32,
    cells: u32,
    randoms_per_cell: u32,
    law: u32,
    q: f32,
    p: f32,
}

/// GPU growth diagram sampler.
pub struct GpuGrowth {
    context: GpuContext,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl GpuGrowth {
    pub async fn new(config: &GpuConfig) -> Result<Self, GpuError> {
        let context =
            GpuContext::new("Growth Diagram", Duration::from_millis(config.timeout_ms)).await?;
        let layout = storage_layout(
            context.device(),
            "Growth Bind Group Layout",
            &[true, false, false],
        );
        let pipeline = context.pipeline("Growth Pipeline", GROWTH_SHADER, "main", &layout);
        Ok(Self {
            context,
            layout,
            pipeline,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Build the diagram for the weights encoded by `uniforms`
    /// (`law.randoms_per_cell()` per cell, row-major).
    pub fn run(
        &self,
        n: usize,
        law: &WeightLaw,
        uniforms: &[f32],
    ) -> Result<GrowthDiagram, GpuError> {
        self.context.check()?;
        if n == 0 {
            return Ok(GrowthDiagram::empty(0, Vec::new()));
        }
        let shape_words = (n + 1) * (n + 1) * n;
        self.context.check_size("Growth Uniforms", uniforms.len())?;

        let uniform_buffer = self.context.storage_buffer("Growth Uniforms", uniforms);
        let weight_buffer = self.context.zeroed_buffer("Growth Weights", n * n)?;
        let shape_buffer = self.context.zeroed_buffer("Growth Shapes", shape_words)?;

        let (law_kind, q, p) = match *law {
            WeightLaw::Geometric { q } => (0, q, 0.0),
            WeightLaw::Binomial { p, .. } => (1, 0.0, p),
        };

        let device = self.context.device();
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Growth Encoder"),
        });
        for d in 0..2 * n - 1 {
            let first_row = d.saturating_sub(n - 1);
            let last_row = d.min(n - 1);
            let cells = (last_row - first_row + 1) as u32;
            let params = GrowthParams {
                n: n as u32,
                diagonal: d as u32,
                first_row: first_row as u32,
                cells,
                randoms_per_cell: law.randoms_per_cell(),
                law: law_kind,
                q,
                p,
            };
            let params_buffer = self.context.uniform_buffer("Growth Params", &params);
            let bind_group = bind_buffers(
                device,
                "Growth Bind Group",
                &self.layout,
                &params_buffer,
                &[&uniform_buffer, &weight_buffer, &shape_buffer],
            );
            self.context.dispatch(
                &mut encoder,
                "Growth Diagonal Pass",
                &self.pipeline,
                &bind_group,
                workgroups_for(cells),
            );
        }
        self.context.queue().submit(Some(encoder.finish()));

        let shapes = self.context.read_words(&shape_buffer, shape_words)?;
        let weights = self.context.read_words(&weight_buffer, n * n)?;
        log::debug!("GPU growth diagram {n}x{n}: {} diagonals", 2 * n - 1);
        Ok(GrowthDiagram::from_parts(n, weights, shapes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::growth::{CpuGrowth, growth_uniforms, last_passage};

    fn gpu() -> Option<GpuGrowth> {
        match pollster::block_on(GpuGrowth::new(&GpuConfig::default())) {
            Ok(growth) => Some(growth),
            Err(GpuError::NoAdapter) => {
                eprintln!("Skipping GPU test: no adapter available");
                None
            }
            Err(e) => panic!("Failed to create GPU growth: {:?}", e),
        }
    }

    #[test]
    fn test_gpu_growth_matches_cpu() {
        let Some(gpu) = gpu() else {
            return;
        };
        // Binomial entries only compare uniforms, so both sides agree exactly.
        let law = WeightLaw::Binomial { trials: 3, p: 0.4 };
        let n = 24;
        let uniforms = growth_uniforms(n, &law, 5);
        let on_gpu = gpu.run(n, &law, &uniforms).unwrap();
        let on_cpu = CpuGrowth::new().run(n, &law, &uniforms);
        assert_eq!(on_gpu, on_cpu);
    }

    #[test]
    fn test_gpu_growth_geometric_invariants() {
        let Some(gpu) = gpu() else {
            return;
        };
        let law = WeightLaw::Geometric { q: 0.6 };
        let n = 32;
        let diagram = gpu.run(n, &law, &growth_uniforms(n, &law, 11)).unwrap();
        let total: u32 = diagram.weights().iter().sum();
        assert_eq!(diagram.output().iter().sum::<u32>(), total);
        assert_eq!(diagram.first_row(), last_passage(n, diagram.weights()));
    }
}
