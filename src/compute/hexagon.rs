//! Lozenge tilings of an a x b x c hexagon.
//!
//! A tiling is read as a stack of unit cubes in an a x b x c box: column
//! (i, j) holds `h[i][j]` cubes, and heights never increase along rows or
//! columns. Site (i, j) adds or removes the top cube of its column, subject
//! to its neighbours. The q-weight counts cubes.

use super::height::HeightGraph;
use super::model::{Bias, CellRecord, MonotoneModel};

/// Top face of a column.
pub const LOZENGE_TOP: u32 = 0;
/// Face normal to the x axis.
pub const LOZENGE_X: u32 = 1;
/// Face normal to the y axis.
pub const LOZENGE_Y: u32 = 2;

/// Row-major column heights.
pub type StackHeights = Vec<i32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hexagon {
    a: usize,
    b: usize,
    c: i32,
}

impl Hexagon {
    pub fn new(a: u32, b: u32, c: u32) -> Self {
        Self {
            a: a as usize,
            b: b as usize,
            c: c as i32,
        }
    }

    /// Number of lozenges in any tiling.
    pub fn lozenge_count(&self) -> usize {
        let c = self.c as usize;
        self.a * self.b + self.b * c + c * self.a
    }

    #[inline]
    fn bounds(&self, h: &[i32], i: usize, j: usize) -> (i32, i32) {
        let b = self.b;
        let mut upper = self.c;
        if i > 0 {
            upper = upper.min(h[(i - 1) * b + j]);
        }
        if j > 0 {
            upper = upper.min(h[i * b + j - 1]);
        }
        let mut lower = 0;
        if i + 1 < self.a {
            lower = lower.max(h[(i + 1) * b + j]);
        }
        if j + 1 < b {
            lower = lower.max(h[i * b + j + 1]);
        }
        (lower, upper)
    }
}

impl MonotoneModel for Hexagon {
    type Config = StackHeights;

    fn num_sites(&self) -> usize {
        self.a * self.b
    }

    fn minimal(&self) -> StackHeights {
        vec![0; self.a * self.b]
    }

    fn maximal(&self) -> StackHeights {
        vec![self.c; self.a * self.b]
    }

    #[inline]
    fn update(&self, h: &mut StackHeights, site: usize, threshold: f32, bias: Bias) -> bool {
        let (i, j) = (site / self.b, site % self.b);
        let (lower, upper) = self.bounds(h, i, j);
        let current = h[site];
        let next = if threshold < bias.add_probability() {
            (current + 1).min(upper)
        } else {
            (current - 1).max(lower)
        };
        h[site] = next;
        next != current
    }

    fn precedes(&self, x: &StackHeights, y: &StackHeights) -> bool {
        x.iter().zip(y.iter()).all(|(a, b)| a <= b)
    }

    fn is_valid(&self, h: &StackHeights) -> bool {
        if h.len() != self.a * self.b {
            return false;
        }
        (0..self.a).all(|i| {
            (0..self.b).all(|j| {
                let v = h[i * self.b + j];
                let (lower, upper) = self.bounds(h, i, j);
                (0..=self.c).contains(&v) && lower <= v && v <= upper
            })
        })
    }

    fn statistic(&self, h: &StackHeights) -> u64 {
        h.iter().map(|&v| v as u64).sum()
    }

    fn export(&self, h: &StackHeights) -> Vec<CellRecord> {
        let (a, b, c) = (self.a, self.b, self.c);
        let mut records = Vec::with_capacity(self.lozenge_count());

        for i in 0..a {
            for j in 0..b {
                let z = h[i * b + j];
                records.push(CellRecord::new(i as i32 - z, j as i32 - z, LOZENGE_TOP));
            }
        }
        for j in 0..b {
            for k in 0..c {
                let x = (0..a).filter(|&i| h[i * b + j] > k).count() as i32;
                records.push(CellRecord::new(x - k, j as i32 - k, LOZENGE_X));
            }
        }
        for i in 0..a {
            for k in 0..c {
                let y = (0..b).filter(|&j| h[i * b + j] > k).count() as i32;
                records.push(CellRecord::new(i as i32 - k, y - k, LOZENGE_Y));
            }
        }
        records
    }

    /// Vertices are projected lattice points; the height is the z coordinate.
    fn height_graph(&self, records: &[CellRecord]) -> HeightGraph {
        let mut graph = HeightGraph::new();
        for r in records {
            let base = (r.x, r.y);
            let corners: [(i32, i32, i32); 3] = match r.state {
                LOZENGE_TOP => [(1, 0, 0), (0, 1, 0), (1, 1, 0)],
                LOZENGE_X => [(0, 1, 0), (-1, -1, 1), (-1, 0, 1)],
                _ => [(1, 0, 0), (-1, -1, 1), (0, -1, 1)],
            };
            for (dx, dy, dz) in corners {
                graph.add_difference(base, (r.x + dx, r.y + dy), dz);
            }
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::height::VisitOrder;
    use crate::compute::rng::{Decision, Pcg32};
    use proptest::prelude::*;

    fn random_stack(model: &Hexagon, seed: u64) -> StackHeights {
        let mut rng = Pcg32::keyed(seed, 0);
        let mut h = model.minimal();
        for _ in 0..600 {
            model.apply(&mut h, Decision::draw(&mut rng), Bias::uniform());
        }
        h
    }

    #[test]
    fn test_extremes_valid() {
        let model = Hexagon::new(3, 4, 2);
        assert!(model.is_valid(&model.minimal()));
        assert!(model.is_valid(&model.maximal()));
        assert_eq!(model.statistic(&model.maximal()), 24);
    }

    #[test]
    fn test_update_respects_neighbours() {
        let model = Hexagon::new(2, 2, 3);
        let mut h = model.minimal();
        // Column (1, 1) is capped by its empty neighbours.
        assert!(!model.update(&mut h, 3, 0.0, Bias::uniform()));
        assert!(model.update(&mut h, 0, 0.0, Bias::uniform()));
        assert_eq!(h, vec![1, 0, 0, 0]);
    }

    #[test]
    fn test_export_counts_lozenges() {
        let model = Hexagon::new(3, 2, 4);
        let h = random_stack(&model, 5);
        let records = model.export(&h);
        assert_eq!(records.len(), model.lozenge_count());
        for kind in [LOZENGE_TOP, LOZENGE_X, LOZENGE_Y] {
            let count = records.iter().filter(|r| r.state == kind).count();
            let expected = match kind {
                LOZENGE_TOP => 6,
                LOZENGE_X => 8,
                _ => 12,
            };
            assert_eq!(count, expected);
        }
    }

    #[test]
    fn test_height_function_recovers_stacks() {
        let model = Hexagon::new(3, 3, 3);
        let h = random_stack(&model, 12);
        let records = model.export(&h);
        let graph = model.height_graph(&records);

        let start = (records[0].x, records[0].y);
        let forward = graph.solve(start).unwrap();
        let other = (records[records.len() - 1].x, records[records.len() - 1].y);
        let reverse = graph.solve_with_order(other, VisitOrder::Reverse).unwrap();
        assert!(forward.same_differences(&reverse));

        // Record 0 is the top face of column (0, 0), whose corner sits at z = h[0].
        let heights = forward.normalized_at(start, h[0]).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let z = h[i * 3 + j];
                let v = (i as i32 - z, j as i32 - z);
                assert_eq!(heights.get(v), Some(z));
            }
        }
    }

    proptest! {
        #[test]
        fn prop_update_is_monotone(
            a in 1u32..4,
            b in 1u32..4,
            c in 1u32..4,
            seed_a in any::<u64>(),
            seed_b in any::<u64>(),
            decision_seed in any::<u64>(),
            q in 0.2f32..3.0,
        ) {
            let model = Hexagon::new(a, b, c);
            let lower = random_stack(&model, seed_a);
            let other = random_stack(&model, seed_b);
            let upper: StackHeights = lower.iter().zip(&other).map(|(x, y)| *x.max(y)).collect();
            prop_assert!(model.is_valid(&upper));

            let (mut x, mut y) = (lower, upper);
            let mut rng = Pcg32::keyed(decision_seed, 2);
            let bias = Bias::new(q);
            for _ in 0..200 {
                let d = Decision::draw(&mut rng);
                model.apply(&mut x, d, bias);
                model.apply(&mut y, d, bias);
                prop_assert!(model.is_valid(&x) && model.is_valid(&y));
                prop_assert!(model.precedes(&x, &y));
            }
        }
    }
}
