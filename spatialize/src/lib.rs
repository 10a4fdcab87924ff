//! spatialize - force layout and spatialization passes for large graphs
//!
//! Lays out a small set of anchors (characters) with a force simulation and
//! places tens of thousands of leaves (posts) around them through an ordered
//! pipeline of deterministic geometric passes.
//!
//! ```rust,ignore
//! use spatialize::{EngineKind, ForceSimulation, PassConfig, Pipeline, SimulationConfig};
//!
//! let mut sim = ForceSimulation::new(&anchors, &edges, SimulationConfig::default(), EngineKind::Auto)?;
//! sim.run(300);
//! let output = Pipeline::new().run(&leaves, &sim.anchors(), &[PassConfig::new("dispersion")]);
//! ```

pub mod anchor_index;
pub mod decimate;
pub mod events;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod io;
pub mod model;
pub mod noise;
pub mod passes;
pub mod pipeline;
pub mod random;
pub mod runner;
pub mod simulation;

pub use anchor_index::AnchorIndex;
pub use decimate::DecimationConfig;
pub use model::{Anchor, Edge, Leaf, Vec3};
pub use passes::{PassConfig, PassRegistry};
pub use pipeline::{Pipeline, PipelineOutput, PipelineReport};
pub use runner::{LayoutStore, PipelineRunner};
pub use simulation::{EngineKind, ForceSimulation, SimulationConfig};
