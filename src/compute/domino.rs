//! Domino tilings of simply connected cell regions.
//!
//! Cell (x, y) is black when x + y is even. Orienting every lattice edge so
//! that its black cell lies on the left, a tiling's height function rises by
//! 1 along an edge no domino crosses and falls by 3 along an edge a domino
//! crosses. Boundary edges are never crossed, so boundary heights are fixed.
//!
//! The minimal and maximal height functions are shortest-path distances in
//! the system of difference constraints; a negative cycle means the region
//! has no tiling. A local move raises or lowers one interior vertex by 4,
//! which rotates the two dominoes covering the 2 x 2 block around it.

use std::collections::{HashMap, HashSet, VecDeque};

use super::height::{HeightGraph, Vertex};
use super::model::{Bias, CellRecord, MonotoneModel, RegionError};

/// Domino covering (x, y) and (x + 1, y).
pub const DOMINO_HORIZONTAL: u32 = 0;
/// Domino covering (x, y) and (x, y + 1).
pub const DOMINO_VERTICAL: u32 = 1;

/// Height per region vertex, indexed like [`DominoRegion::vertices`].
pub type VertexHeights = Vec<i32>;

#[inline]
fn is_black(cell: (i32, i32)) -> bool {
    (cell.0 + cell.1).rem_euclid(2) == 0
}

/// The four edges of a cell, oriented with the black cell on the left,
/// each paired with the cell across it.
fn oriented_edges(cell: (i32, i32)) -> [(Vertex, Vertex, (i32, i32)); 4] {
    let (x, y) = cell;
    let ccw = [
        ((x, y), (x + 1, y), (x, y - 1)),
        ((x + 1, y), (x + 1, y + 1), (x + 1, y)),
        ((x + 1, y + 1), (x, y + 1), (x, y + 1)),
        ((x, y + 1), (x, y), (x - 1, y)),
    ];
    if is_black(cell) {
        ccw
    } else {
        ccw.map(|(a, b, across)| (b, a, across))
    }
}

#[derive(Debug, Clone, Copy)]
struct RegionEdge {
    from: usize,
    to: usize,
    interior: bool,
}

/// A simply connected, tileable set of unit cells.
#[derive(Debug, Clone)]
pub struct DominoRegion {
    cells: Vec<(i32, i32)>,
    cell_set: HashSet<(i32, i32)>,
    vertices: Vec<Vertex>,
    vertex_index: HashMap<Vertex, usize>,
    edges: Vec<RegionEdge>,
    /// Interior vertex ids; these are the sites.
    sites: Vec<usize>,
    /// Lattice neighbours of each site.
    neighbours: Vec<[usize; 4]>,
    min_heights: VertexHeights,
    max_heights: VertexHeights,
}

impl DominoRegion {
    /// Validate a cell set and compute its extremal height functions.
    pub fn new(cells: &[(i32, i32)]) -> Result<Self, RegionError> {
        let mut cells: Vec<(i32, i32)> = cells.to_vec();
        cells.sort_unstable();
        cells.dedup();
        if cells.is_empty() {
            return Err(RegionError::Empty);
        }
        let cell_set: HashSet<(i32, i32)> = cells.iter().copied().collect();

        let black = cells.iter().filter(|&&c| is_black(c)).count();
        let white = cells.len() - black;
        if black != white {
            return Err(RegionError::Unbalanced { black, white });
        }
        check_connected(&cells, &cell_set)?;
        check_no_holes(&cells)?;

        // Vertices in sorted order; vertex 0 is the lowest corner of the
        // leftmost column and therefore on the boundary.
        let mut vertices: Vec<Vertex> = cells
            .iter()
            .flat_map(|&(x, y)| [(x, y), (x + 1, y), (x, y + 1), (x + 1, y + 1)])
            .collect();
        vertices.sort_unstable();
        vertices.dedup();
        let vertex_index: HashMap<Vertex, usize> =
            vertices.iter().enumerate().map(|(i, &v)| (v, i)).collect();

        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for &cell in &cells {
            for (a, b, across) in oriented_edges(cell) {
                if seen.insert((a, b)) {
                    edges.push(RegionEdge {
                        from: vertex_index[&a],
                        to: vertex_index[&b],
                        interior: cell_set.contains(&across),
                    });
                }
            }
        }

        let mut sites = Vec::new();
        let mut neighbours = Vec::new();
        for (id, &(x, y)) in vertices.iter().enumerate() {
            let surrounded = [(x - 1, y - 1), (x, y - 1), (x - 1, y), (x, y)]
                .iter()
                .all(|c| cell_set.contains(c));
            if surrounded {
                sites.push(id);
                neighbours.push([
                    vertex_index[&(x - 1, y)],
                    vertex_index[&(x + 1, y)],
                    vertex_index[&(x, y - 1)],
                    vertex_index[&(x, y + 1)],
                ]);
            }
        }

        // Constraint h(b) - h(a) <= w stored as arc a -> b with weight w.
        let n = vertices.len();
        let mut forward: Vec<Vec<(usize, i32)>> = vec![Vec::new(); n];
        let mut backward: Vec<Vec<(usize, i32)>> = vec![Vec::new(); n];
        for e in &edges {
            let back = if e.interior { 3 } else { -1 };
            for (a, b, w) in [(e.from, e.to, 1), (e.to, e.from, back)] {
                forward[a].push((b, w));
                backward[b].push((a, w));
            }
        }

        let max_heights = shortest_paths(&forward, 0).ok_or(RegionError::NotTileable)?;
        let to_base = shortest_paths(&backward, 0).ok_or(RegionError::NotTileable)?;
        let min_heights: VertexHeights = to_base.iter().map(|d| -d).collect();
        if min_heights.iter().zip(&max_heights).any(|(lo, hi)| lo > hi) {
            return Err(RegionError::NotTileable);
        }

        log::debug!(
            "Domino region: {} cells, {} vertices, {} interior sites",
            cells.len(),
            n,
            sites.len()
        );

        Ok(Self {
            cells,
            cell_set,
            vertices,
            vertex_index,
            edges,
            sites,
            neighbours,
            min_heights,
            max_heights,
        })
    }

    /// Region cells in sorted order.
    pub fn cells(&self) -> &[(i32, i32)] {
        &self.cells
    }

    /// Region vertices; heights are indexed in this order.
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn vertex_id(&self, v: Vertex) -> Option<usize> {
        self.vertex_index.get(&v).copied()
    }

    pub fn contains_cell(&self, cell: (i32, i32)) -> bool {
        self.cell_set.contains(&cell)
    }

    /// Number of dominoes in any tiling.
    pub fn domino_count(&self) -> usize {
        self.cells.len() / 2
    }
}

/// Single-source shortest paths (SPFA). `None` on a negative cycle.
fn shortest_paths(arcs: &[Vec<(usize, i32)>], source: usize) -> Option<Vec<i32>> {
    let n = arcs.len();
    let mut dist = vec![i32::MAX; n];
    let mut hops = vec![0usize; n];
    let mut queued = vec![false; n];
    let mut queue = VecDeque::from([source]);
    dist[source] = 0;
    queued[source] = true;

    while let Some(u) = queue.pop_front() {
        queued[u] = false;
        for &(v, w) in &arcs[u] {
            let candidate = dist[u] + w;
            if candidate < dist[v] {
                dist[v] = candidate;
                hops[v] = hops[u] + 1;
                if hops[v] >= n {
                    return None;
                }
                if !queued[v] {
                    queued[v] = true;
                    queue.push_back(v);
                }
            }
        }
    }
    Some(dist)
}

fn check_connected(
    cells: &[(i32, i32)],
    cell_set: &HashSet<(i32, i32)>,
) -> Result<(), RegionError> {
    let mut seen = HashSet::from([cells[0]]);
    let mut queue = VecDeque::from([cells[0]]);
    while let Some((x, y)) = queue.pop_front() {
        for next in [(x + 1, y), (x - 1, y), (x, y + 1), (x, y - 1)] {
            if cell_set.contains(&next) && seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    if seen.len() == cells.len() {
        Ok(())
    } else {
        Err(RegionError::Disconnected)
    }
}

/// A connected union of closed cells has Euler characteristic
/// `V - E + F = 1 - holes`.
fn check_no_holes(cells: &[(i32, i32)]) -> Result<(), RegionError> {
    let mut vertices = HashSet::with_capacity(2 * cells.len());
    // Unit edges keyed by their lower-left end and direction.
    let mut edges = HashSet::with_capacity(4 * cells.len());
    for &(x, y) in cells {
        vertices.extend([(x, y), (x + 1, y), (x, y + 1), (x + 1, y + 1)]);
        edges.extend([
            (x, y, true),
            (x, y + 1, true),
            (x, y, false),
            (x + 1, y, false),
        ]);
    }
    let euler = vertices.len() as i64 - edges.len() as i64 + cells.len() as i64;
    if euler == 1 {
        Ok(())
    } else {
        Err(RegionError::NotSimplyConnected)
    }
}

impl MonotoneModel for DominoRegion {
    type Config = VertexHeights;

    fn num_sites(&self) -> usize {
        self.sites.len()
    }

    fn minimal(&self) -> VertexHeights {
        self.min_heights.clone()
    }

    fn maximal(&self) -> VertexHeights {
        self.max_heights.clone()
    }

    #[inline]
    fn update(&self, h: &mut VertexHeights, site: usize, threshold: f32, bias: Bias) -> bool {
        let v = self.sites[site];
        let around = self.neighbours[site].map(|w| h[w]);
        let lower = around.iter().copied().max().unwrap_or(h[v]) - 3;
        let upper = around.iter().copied().min().unwrap_or(h[v]) + 3;
        let current = h[v];
        let next = if threshold < bias.add_probability() {
            current + 4 * ((upper - current) / 4)
        } else {
            current - 4 * ((current - lower) / 4)
        };
        h[v] = next;
        next != current
    }

    fn precedes(&self, a: &VertexHeights, b: &VertexHeights) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| x <= y)
    }

    fn is_valid(&self, h: &VertexHeights) -> bool {
        h.len() == self.vertices.len()
            && h[0] == 0
            && self.edges.iter().all(|e| {
                let diff = h[e.to] - h[e.from];
                diff == 1 || (e.interior && diff == -3)
            })
    }

    fn statistic(&self, h: &VertexHeights) -> u64 {
        h.iter()
            .zip(&self.min_heights)
            .map(|(v, lo)| ((v - lo) / 4) as u64)
            .sum()
    }

    fn export(&self, h: &VertexHeights) -> Vec<CellRecord> {
        let mut records: Vec<CellRecord> = self
            .edges
            .iter()
            .filter(|e| e.interior && h[e.to] - h[e.from] == -3)
            .map(|e| {
                let (ax, ay) = self.vertices[e.from];
                let (bx, by) = self.vertices[e.to];
                if ay == by {
                    CellRecord::new(ax.min(bx), ay - 1, DOMINO_VERTICAL)
                } else {
                    CellRecord::new(ax - 1, ay.min(by), DOMINO_HORIZONTAL)
                }
            })
            .collect();
        records.sort_unstable_by_key(|r| (r.y, r.x, r.state));
        records
    }

    fn height_graph(&self, records: &[CellRecord]) -> HeightGraph {
        let mut graph = HeightGraph::new();
        for r in records {
            let first = (r.x, r.y);
            let second = if r.state == DOMINO_HORIZONTAL {
                (r.x + 1, r.y)
            } else {
                (r.x, r.y + 1)
            };
            for (cell, partner) in [(first, second), (second, first)] {
                for (a, b, across) in oriented_edges(cell) {
                    let delta = if across == partner { -3 } else { 1 };
                    graph.add_difference(a, b, delta);
                }
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
    use crate::schema::RegionSpec;
    use proptest::prelude::*;

    fn rectangle(width: u32, height: u32) -> DominoRegion {
        DominoRegion::new(&RegionSpec::Rectangle { width, height }.domino_cells()).unwrap()
    }

    fn random_tiling(model: &DominoRegion, seed: u64) -> VertexHeights {
        let mut rng = Pcg32::keyed(seed, 0);
        let mut h = model.minimal();
        for _ in 0..2000 {
            model.apply(&mut h, Decision::draw(&mut rng), Bias::uniform());
        }
        h
    }

    #[test]
    fn test_extremes_are_valid_tilings() {
        let model = rectangle(4, 3);
        let (min, max) = (model.minimal(), model.maximal());
        assert!(model.is_valid(&min));
        assert!(model.is_valid(&max));
        assert!(model.precedes(&min, &max));
        assert_ne!(min, max);
        assert_eq!(model.export(&min).len(), 6);
    }

    #[test]
    fn test_two_by_two_has_one_site() {
        let model = rectangle(2, 2);
        assert_eq!(model.num_sites(), 1);
        let (min, max) = (model.minimal(), model.maximal());
        let centre = model.vertex_id((1, 1)).unwrap();
        assert_eq!(max[centre] - min[centre], 4);
        let states: Vec<u32> = model.export(&min).iter().map(|r| r.state).collect();
        let other: Vec<u32> = model.export(&max).iter().map(|r| r.state).collect();
        assert_ne!(states, other);
    }

    #[test]
    fn test_rejects_unbalanced() {
        let cells = RegionSpec::Rectangle {
            width: 3,
            height: 3,
        }
        .domino_cells();
        assert!(matches!(
            DominoRegion::new(&cells),
            Err(RegionError::Unbalanced { black: 5, white: 4 })
        ));
    }

    #[test]
    fn test_rejects_hole() {
        let mut cells = RegionSpec::Rectangle {
            width: 4,
            height: 4,
        }
        .domino_cells();
        cells.retain(|&c| c != (1, 1) && c != (2, 1));
        assert_eq!(
            DominoRegion::new(&cells).unwrap_err(),
            RegionError::NotSimplyConnected
        );
    }

    fn staircase(steps: i32) -> Vec<(i32, i32)> {
        (0..steps).flat_map(|k| [(k, k), (k + 1, k)]).collect()
    }

    #[test]
    fn test_rejects_hole_in_thin_ring() {
        // Ring of width one around a single missing cell.
        let ring: Vec<(i32, i32)> = RegionSpec::Rectangle {
            width: 3,
            height: 3,
        }
        .domino_cells()
        .into_iter()
        .filter(|&c| c != (1, 1))
        .collect();
        assert_eq!(check_no_holes(&ring), Err(RegionError::NotSimplyConnected));
        assert_eq!(check_no_holes(&staircase(8)), Ok(()));
    }

    #[test]
    fn test_long_staircase_validates_quickly() {
        // The bounding box of a diagonal staircase is quadratic in its length.
        let cells = staircase(100_000);
        let start = std::time::Instant::now();
        assert_eq!(check_no_holes(&cells), Ok(()));
        assert!(start.elapsed() < std::time::Duration::from_secs(10));

        let region = DominoRegion::new(&staircase(2_000)).unwrap();
        assert_eq!(region.domino_count(), 2_000);
    }

    #[test]
    fn test_rejects_disconnected() {
        let cells = vec![(0, 0), (1, 0), (5, 5), (6, 5)];
        assert_eq!(
            DominoRegion::new(&cells).unwrap_err(),
            RegionError::Disconnected
        );
    }

    #[test]
    fn test_rejects_balanced_untileable() {
        // A black cell with three white leaves cannot cover them all.
        let cells = vec![
            (1, 0),
            (0, 1),
            (1, 1),
            (2, 1),
            (1, 2),
            (1, 3),
            (0, 3),
            (2, 3),
            (-1, 3),
            (3, 3),
            (0, 4),
            (2, 4),
        ];
        assert_eq!(
            DominoRegion::new(&cells).unwrap_err(),
            RegionError::NotTileable
        );
    }

    #[test]
    fn test_export_is_perfect_cover() {
        let model =
            DominoRegion::new(&RegionSpec::AztecDiamond { order: 4 }.domino_cells()).unwrap();
        let h = random_tiling(&model, 8);
        let records = model.export(&h);
        assert_eq!(records.len(), model.domino_count());

        let mut covered = HashSet::new();
        for r in &records {
            let second = if r.state == DOMINO_HORIZONTAL {
                (r.x + 1, r.y)
            } else {
                (r.x, r.y + 1)
            };
            for cell in [(r.x, r.y), second] {
                assert!(model.contains_cell(cell));
                assert!(covered.insert(cell), "cell {cell:?} covered twice");
            }
        }
        assert_eq!(covered.len(), model.cells().len());
    }

    #[test]
    fn test_height_function_from_records() {
        let model = rectangle(6, 4);
        let h = random_tiling(&model, 21);
        let graph = model.height_graph(&model.export(&h));
        assert_eq!(graph.vertex_count(), model.vertices().len());

        let forward = graph.solve((0, 0)).unwrap();
        let reverse = graph
            .solve_with_order((6, 4), VisitOrder::Reverse)
            .unwrap();
        assert!(forward.same_differences(&reverse));
        for (id, &v) in model.vertices().iter().enumerate() {
            assert_eq!(forward.get(v), Some(h[id]));
        }
    }

    #[test]
    fn test_four_by_four_reaches_all_tilings() {
        let model = rectangle(4, 4);
        let mut rng = Pcg32::new(3, 9);
        let mut h = model.minimal();
        let mut seen = HashSet::new();
        for _ in 0..50_000 {
            model.apply(&mut h, Decision::draw(&mut rng), Bias::uniform());
            seen.insert(h.clone());
        }
        assert_eq!(seen.len(), 36);
    }

    proptest! {
        #[test]
        fn prop_update_is_monotone(
            width in 1u32..5,
            half_height in 1u32..3,
            seed_a in any::<u64>(),
            seed_b in any::<u64>(),
            decision_seed in any::<u64>(),
            q in 0.2f32..3.0,
        ) {
            let model = rectangle(width, 2 * half_height);
            let lower = random_tiling(&model, seed_a);
            let other = random_tiling(&model, seed_b);
            let upper: VertexHeights = lower.iter().zip(&other).map(|(x, y)| *x.max(y)).collect();
            prop_assert!(model.is_valid(&upper));

            let (mut a, mut b) = (lower, upper);
            let mut rng = Pcg32::keyed(decision_seed, 3);
            let bias = Bias::new(q);
            for _ in 0..200 {
                let d = Decision::draw(&mut rng);
                model.apply(&mut a, d, bias);
                model.apply(&mut b, d, bias);
                prop_assert!(model.is_valid(&a) && model.is_valid(&b));
                prop_assert!(model.precedes(&a, &b));
            }
        }
    }
}
