//! Tiling sampler - Exact and fast sampling of random tilings.
//!
//! This crate draws samples of monotone discrete models (lattice paths,
//! lozenge tilings of a hexagon, domino tilings of simply connected
//! regions) using coupling from the past, continues them with batched
//! Glauber chains on the CPU or the GPU, and samples RSK growth diagrams
//! with a GPU wavefront.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration and region descriptions
//! - `compute`: Models, coupling from the past, chains, growth diagrams and
//!   the GPU backends
//!
//! # Example
//!
//! ```rust,no_run
//! use tiling_sampler::{
//!     compute::TilingEngine,
//!     schema::RegionSpec,
//! };
//!
//! let mut engine = TilingEngine::default();
//! let status = engine.init_region(&RegionSpec::AztecDiamond { order: 8 });
//! assert!(status.is_valid());
//!
//! engine.set_bias_parameter(1.0).unwrap();
//! let sample = engine.run_cftp(42).unwrap();
//! let dominoes = engine.export_configuration(&sample.config).unwrap();
//!
//! println!("{} dominoes after {} epochs", dominoes.len(), sample.epochs);
//! ```

pub mod compute;
pub mod schema;

// WebAssembly bindings (only for wasm32 target)
#[cfg(target_arch = "wasm32")]
pub mod wasm;

// Re-export commonly used types
pub use compute::{SampleCollector, SampleSet, TilingEngine};
pub use schema::{RegionSpec, SamplerConfig};
