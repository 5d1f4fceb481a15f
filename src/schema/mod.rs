//! Schema module - Configuration and region types for sampler runs.

mod config;
mod region;

pub use config::*;
pub use region::*;
