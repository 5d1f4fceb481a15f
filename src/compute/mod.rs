//! Compute module - Exact and approximate sampling of monotone tiling models.

mod cftp;
mod domino;
mod engine;
mod glauber;
mod growth;
mod height;
mod hexagon;
mod lattice_path;
mod model;
mod rng;
mod sampler;
mod stats;

pub mod gpu;

pub use cftp::*;
pub use domino::*;
pub use engine::*;
pub use glauber::*;
pub use growth::*;
pub use height::*;
pub use hexagon::*;
pub use lattice_path::*;
pub use model::*;
pub use rng::*;
pub use sampler::*;
pub use stats::*;
