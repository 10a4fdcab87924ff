//! GPU-accelerated force layout
//!
//! Runs the anchor force simulation as WebGPU compute shaders via wgpu.
//! Positions are vec3 throughout, and the physics matches the CPU engines in
//! [`crate::simulation`]: repulsion gathered over shared-memory tiles, springs
//! from a CSR adjacency, then one integration pass.
//!
//! # Example
//!
//! ```rust,ignore
//! use spatialize::simulation::{EngineKind, ForceSimulation, SimulationConfig};
//!
//! let mut sim = ForceSimulation::new(&anchors, &edges, SimulationConfig::default(), EngineKind::Gpu)?;
//! sim.run(300);
//! let laid_out = sim.anchors();
//! ```

mod shaders;
mod simulation;
mod types;

use thiserror::Error;

pub use shaders::ForceShaders;
pub use simulation::GpuEngine;
pub use types::{GpuNode, GpuSpring, SimulationUniforms, SpringAdjacency, WORKGROUP_SIZE};

/// Errors raised while setting up or reading back the GPU engine
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("failed to map GPU buffer: {0}")]
    BufferMap(String),
}
