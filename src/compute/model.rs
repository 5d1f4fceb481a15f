//! Monotone local-update models.
//!
//! Every sampled model exposes its configurations as integer height
//! functions ordered pointwise. The heat-bath update at a site moves the
//! height toward its upper bound when the threshold falls below
//! `q / (1 + q)` and toward its lower bound otherwise. Because both bounds
//! are monotone in the neighbouring heights, applying one decision to two
//! ordered configurations keeps them ordered, which is what coupling from
//! the past relies on.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use super::height::HeightGraph;
use super::rng::Decision;

/// Bias parameter q together with its "add" probability `q / (1 + q)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bias {
    q: f32,
    add_probability: f32,
}

impl Bias {
    pub fn new(q: f32) -> Self {
        Self {
            q,
            add_probability: q / (1.0 + q),
        }
    }

    /// The uniform measure.
    pub fn uniform() -> Self {
        Self::new(1.0)
    }

    pub fn q(&self) -> f32 {
        self.q
    }

    /// Threshold below which a move goes in the "add" direction.
    pub fn add_probability(&self) -> f32 {
        self.add_probability
    }
}

impl Default for Bias {
    fn default() -> Self {
        Self::uniform()
    }
}

/// One exported local state: a cell (or step) coordinate and its state.
///
/// The layout is fixed so the records can be handed to a host as a flat
/// `i32`/`u32` array.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable,
)]
pub struct CellRecord {
    pub x: i32,
    pub y: i32,
    pub state: u32,
}

impl CellRecord {
    pub fn new(x: i32, y: i32, state: u32) -> Self {
        Self { x, y, state }
    }
}

/// A finite region whose configurations carry a monotone heat-bath chain.
pub trait MonotoneModel {
    type Config: Clone + PartialEq + Debug + Send + Sync;

    /// Number of sites a decision can select.
    fn num_sites(&self) -> usize;

    /// Pointwise minimal configuration.
    fn minimal(&self) -> Self::Config;

    /// Pointwise maximal configuration.
    fn maximal(&self) -> Self::Config;

    /// Heat-bath update at `site`. Returns whether the configuration changed.
    fn update(&self, config: &mut Self::Config, site: usize, threshold: f32, bias: Bias) -> bool;

    /// `a <= b` in the height order.
    fn precedes(&self, a: &Self::Config, b: &Self::Config) -> bool;

    /// Whether every local constraint of the region holds.
    fn is_valid(&self, config: &Self::Config) -> bool;

    /// Statistic weighted by q (area or volume above the minimal configuration).
    fn statistic(&self, config: &Self::Config) -> u64;

    /// Local-state records describing the configuration.
    fn export(&self, config: &Self::Config) -> Vec<CellRecord>;

    /// Height-difference graph reconstructed from exported records.
    fn height_graph(&self, records: &[CellRecord]) -> HeightGraph;

    /// Apply one decision. A region without sites is left unchanged.
    #[inline]
    fn apply(&self, config: &mut Self::Config, decision: Decision, bias: Bias) -> bool {
        let sites = self.num_sites();
        if sites == 0 {
            return false;
        }
        let site = (decision.site % sites as u32) as usize;
        self.update(config, site, decision.threshold, bias)
    }
}

/// Reasons a region admits no configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    #[error("Region has no cells")]
    Empty,
    #[error("Region is not colour balanced: {black} black cells, {white} white cells")]
    Unbalanced { black: usize, white: usize },
    #[error("Region is not connected")]
    Disconnected,
    #[error("Region has a hole")]
    NotSimplyConnected,
    #[error("Region admits no tiling")]
    NotTileable,
    #[error("Invalid region: {0}")]
    Invalid(String),
}
