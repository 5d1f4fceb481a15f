//! RSK growth diagrams.
//!
//! An n x n matrix of non-negative integer weights is turned into a family
//! of integer partitions on the vertices of the grid. The partition at
//! vertex (i, j) depends only on the three partitions at (i-1, j),
//! (i, j-1), (i-1, j-1) and the weight of cell (i, j), so all cells on one
//! anti-diagonal can be computed together. The final shape has size equal
//! to the total weight and first row equal to the last-passage time.

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

use super::cftp::run_seed;
use super::rng::Pcg32;
use crate::schema::WeightLaw;

/// Cells `(row, col)` of an n x n grid with `row + col == diagonal`.
pub fn anti_diagonal(n: usize, diagonal: usize) -> impl Iterator<Item = (usize, usize)> {
    let first = diagonal.saturating_sub(n.saturating_sub(1));
    let last = diagonal.min(n.saturating_sub(1));
    (first..=last)
        .filter(move |_| n > 0 && diagonal < 2 * n - 1)
        .map(move |r| (r, diagonal - r))
}

/// Pre-generated uniforms, `law.randoms_per_cell()` per cell in row-major order.
pub fn growth_uniforms(n: usize, law: &WeightLaw, seed: u64) -> Vec<f32> {
    let per_cell = law.randoms_per_cell() as usize;
    let mut uniforms = Vec::with_capacity(n * n * per_cell);
    for cell in 0..(n * n) as u32 {
        let mut rng = Pcg32::keyed(seed, cell);
        uniforms.extend((0..per_cell).map(|_| rng.next_f32()));
    }
    uniforms
}

/// Matrix weights drawn from each cell's slice of uniforms.
pub fn cell_weights(n: usize, law: &WeightLaw, uniforms: &[f32]) -> Vec<u32> {
    let per_cell = law.randoms_per_cell() as usize;
    (0..n * n)
        .map(|cell| law.weight(&uniforms[cell * per_cell..(cell + 1) * per_cell]))
        .collect()
}

/// Last-passage time to the far corner over up-right paths.
pub fn last_passage(n: usize, weights: &[u32]) -> u32 {
    let mut g = vec![0u32; (n + 1) * (n + 1)];
    for r in 1..=n {
        for c in 1..=n {
            let best = g[(r - 1) * (n + 1) + c].max(g[r * (n + 1) + c - 1]);
            g[r * (n + 1) + c] = best + weights[(r - 1) * n + c - 1];
        }
    }
    g[(n + 1) * (n + 1) - 1]
}

/// Local growth rule.
///
/// `rho`, `mu`, `nu` are the shapes at the lower-left, lower and left
/// vertices; every slice has the same length.
#[inline]
pub fn grow_shape(rho: &[u32], mu: &[u32], nu: &[u32], weight: u32, out: &mut [u32]) {
    if out.is_empty() {
        return;
    }
    out[0] = mu[0].max(nu[0]) + weight;
    for k in 1..out.len() {
        out[k] = mu[k].max(nu[k]) + mu[k - 1].min(nu[k - 1]) - rho[k - 1];
    }
}

/// Shapes on every vertex of an n x n growth diagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrowthDiagram {
    n: usize,
    weights: Vec<u32>,
    /// `(n + 1)^2` shapes of `n` parts each, vertex-major.
    shapes: Vec<u32>,
}

impl GrowthDiagram {
    /// Diagram with zero shapes everywhere, ready to be filled.
    pub fn empty(n: usize, weights: Vec<u32>) -> Self {
        Self {
            n,
            weights,
            shapes: vec![0; (n + 1) * (n + 1) * n],
        }
    }

    pub fn from_parts(n: usize, weights: Vec<u32>, shapes: Vec<u32>) -> Self {
        debug_assert_eq!(shapes.len(), (n + 1) * (n + 1) * n);
        Self { n, weights, shapes }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn weights(&self) -> &[u32] {
        &self.weights
    }

    fn vertex(&self, i: usize, j: usize) -> usize {
        (i * (self.n + 1) + j) * self.n
    }

    /// Shape at grid vertex (i, j), padded with zeros to `n` parts.
    pub fn shape(&self, i: usize, j: usize) -> &[u32] {
        let start = self.vertex(i, j);
        &self.shapes[start..start + self.n]
    }

    /// Shape at the far corner.
    pub fn output(&self) -> &[u32] {
        self.shape(self.n, self.n)
    }

    /// Length of the first row of the output shape.
    pub fn first_row(&self) -> u32 {
        self.output().first().copied().unwrap_or(0)
    }

    /// Output shape without trailing zero parts.
    pub fn partition(&self) -> Vec<u32> {
        self.output().iter().copied().take_while(|&p| p > 0).collect()
    }
}

/// CPU growth diagram sampler, one anti-diagonal at a time.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuGrowth;

impl CpuGrowth {
    pub fn new() -> Self {
        Self
    }

    /// Build the diagram for the weights encoded by `uniforms`.
    pub fn run(&self, n: usize, law: &WeightLaw, uniforms: &[f32]) -> GrowthDiagram {
        let weights = cell_weights(n, law, uniforms);
        let mut diagram = GrowthDiagram::empty(n, weights);
        if n == 0 {
            return diagram;
        }

        for d in 0..2 * n - 1 {
            let cells: Vec<(usize, usize)> = anti_diagonal(n, d).collect();
            let grow = |&(r, c): &(usize, usize)| {
                let mut out = vec![0u32; n];
                grow_shape(
                    diagram.shape(r, c),
                    diagram.shape(r, c + 1),
                    diagram.shape(r + 1, c),
                    diagram.weights[r * n + c],
                    &mut out,
                );
                out
            };

            #[cfg(not(target_arch = "wasm32"))]
            let grown: Vec<Vec<u32>> = cells.par_iter().map(grow).collect();

            #[cfg(target_arch = "wasm32")]
            let grown: Vec<Vec<u32>> = cells.iter().map(grow).collect();

            for (&(r, c), shape) in cells.iter().zip(grown) {
                let start = diagram.vertex(r + 1, c + 1);
                diagram.shapes[start..start + n].copy_from_slice(&shape);
            }
        }
        diagram
    }

    /// Last-passage times of `count` independent diagrams. Diagram `s`
    /// draws its uniforms from `run_seed(seed, s)`.
    pub fn sample_first_rows(&self, n: usize, law: &WeightLaw, seed: u64, count: u32) -> Vec<u32> {
        (0..count)
            .map(|s| {
                let uniforms = growth_uniforms(n, law, run_seed(seed, s));
                self.run(n, law, &uniforms).first_row()
            })
            .collect()
    }
}
