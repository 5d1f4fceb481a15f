//! Monotone lattice paths with a fixed number of right and up steps.
//!
//! A path is a step sequence; its height after k steps is the number of
//! up-steps among the first k. Site i exchanges steps i and i+1, which
//! raises or lowers the height after i+1 steps by one and changes the area
//! above the minimal path by one.

use super::height::HeightGraph;
use super::model::{Bias, CellRecord, MonotoneModel};

/// Step value for an up-step.
pub const UP: u8 = 1;
/// Step value for a right-step.
pub const RIGHT: u8 = 0;

/// Step sequence of a path (`UP` / `RIGHT` per position).
pub type PathSteps = Vec<u8>;

/// Paths from (0, 0) to (right, up).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatticePath {
    right: u32,
    up: u32,
}

impl LatticePath {
    pub fn new(right: u32, up: u32) -> Self {
        Self { right, up }
    }

    pub fn right(&self) -> u32 {
        self.right
    }

    pub fn up(&self) -> u32 {
        self.up
    }

    /// Total number of steps.
    pub fn len(&self) -> usize {
        (self.right + self.up) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Default observed position (the midpoint).
    pub fn midpoint(&self) -> u32 {
        (self.right + self.up) / 2
    }

    /// Heights h(0..=len).
    pub fn heights(&self, steps: &[u8]) -> Vec<i32> {
        let mut heights = Vec::with_capacity(steps.len() + 1);
        let mut h = 0;
        heights.push(h);
        for &s in steps {
            h += s as i32;
            heights.push(h);
        }
        heights
    }

    /// Height after `k` steps.
    pub fn height_at(&self, steps: &[u8], k: usize) -> u32 {
        steps[..k.min(steps.len())]
            .iter()
            .map(|&s| s as u32)
            .sum()
    }

    /// Rebuild a step sequence from heights h(0..=len).
    pub fn from_heights(&self, heights: &[i32]) -> PathSteps {
        heights.windows(2).map(|w| (w[1] - w[0]) as u8).collect()
    }
}

impl MonotoneModel for LatticePath {
    type Config = PathSteps;

    fn num_sites(&self) -> usize {
        self.len().saturating_sub(1)
    }

    fn minimal(&self) -> PathSteps {
        let mut steps = vec![RIGHT; self.right as usize];
        steps.extend(std::iter::repeat_n(UP, self.up as usize));
        steps
    }

    fn maximal(&self) -> PathSteps {
        let mut steps = vec![UP; self.up as usize];
        steps.extend(std::iter::repeat_n(RIGHT, self.right as usize));
        steps
    }

    #[inline]
    fn update(&self, steps: &mut PathSteps, site: usize, threshold: f32, bias: Bias) -> bool {
        if steps[site] == steps[site + 1] {
            return false;
        }
        let (first, second) = if threshold < bias.add_probability() {
            (UP, RIGHT)
        } else {
            (RIGHT, UP)
        };
        let changed = steps[site] != first;
        steps[site] = first;
        steps[site + 1] = second;
        changed
    }

    fn precedes(&self, a: &PathSteps, b: &PathSteps) -> bool {
        let (mut ha, mut hb) = (0u32, 0u32);
        for (&sa, &sb) in a.iter().zip(b.iter()) {
            ha += sa as u32;
            hb += sb as u32;
            if ha > hb {
                return false;
            }
        }
        true
    }

    fn is_valid(&self, steps: &PathSteps) -> bool {
        steps.len() == self.len()
            && steps.iter().all(|&s| s == UP || s == RIGHT)
            && steps.iter().filter(|&&s| s == UP).count() == self.up as usize
    }

    fn statistic(&self, steps: &PathSteps) -> u64 {
        // Each (up, right) pair in that order adds one unit of area.
        let mut ups = 0u64;
        let mut area = 0u64;
        for &s in steps {
            if s == UP {
                ups += 1;
            } else {
                area += ups;
            }
        }
        area
    }

    fn export(&self, steps: &PathSteps) -> Vec<CellRecord> {
        steps
            .iter()
            .enumerate()
            .map(|(k, &s)| CellRecord::new(k as i32, 0, s as u32))
            .collect()
    }

    fn height_graph(&self, records: &[CellRecord]) -> HeightGraph {
        let mut graph = HeightGraph::new();
        for r in records {
            graph.add_difference((r.x, 0), (r.x + 1, 0), r.state as i32);
        }
        graph
    }
}

/// A path packed into 32-bit words, bit i set for an up-step at position i.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedPath {
    len: u32,
    words: Vec<u32>,
}

impl PackedPath {
    /// Words needed for a path of `len` steps.
    pub fn words_for(len: u32) -> usize {
        len.div_ceil(32).max(1) as usize
    }

    pub fn from_steps(steps: &[u8]) -> Self {
        let len = steps.len() as u32;
        let mut words = vec![0u32; Self::words_for(len)];
        for (i, &s) in steps.iter().enumerate() {
            if s == UP {
                words[i / 32] |= 1 << (i % 32);
            }
        }
        Self { len, words }
    }

    pub fn from_words(len: u32, words: Vec<u32>) -> Self {
        debug_assert_eq!(words.len(), Self::words_for(len));
        Self { len, words }
    }

    pub fn to_steps(&self) -> PathSteps {
        (0..self.len as usize)
            .map(|i| ((self.words[i / 32] >> (i % 32)) & 1) as u8)
            .collect()
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    /// Number of up-steps among the first `k`.
    pub fn height_at(&self, k: u32) -> u32 {
        packed_height(&self.words, k.min(self.len))
    }
}

/// Popcount of the first `k` bits of a packed path.
#[inline]
pub fn packed_height(words: &[u32], k: u32) -> u32 {
    let full = (k / 32) as usize;
    let mut h: u32 = words[..full].iter().map(|w| w.count_ones()).sum();
    let rem = k % 32;
    if rem > 0 {
        h += (words[full] & ((1u32 << rem) - 1)).count_ones();
    }
    h
}

/// Heat-bath update on a packed path. Mirrors the chain shader bit for bit.
#[inline]
pub fn packed_update(words: &mut [u32], site: u32, threshold: f32, add_probability: f32) {
    let i = site as usize;
    let j = i + 1;
    let a = (words[i / 32] >> (i % 32)) & 1;
    let b = (words[j / 32] >> (j % 32)) & 1;
    if a == b {
        return;
    }
    let up_first = threshold < add_probability;
    if (a == 1) == up_first {
        return;
    }
    words[i / 32] ^= 1 << (i % 32);
    words[j / 32] ^= 1 << (j % 32);
}
