//! JSON payloads accepted from JavaScript
//!
//! These reuse the record types of `spatialize::io`, so the browser sends the
//! same shapes the CLI reads from disk.

use serde::Deserialize;
use spatialize::io::{AnchorRecord, EdgeRecord, LeafRecord};
use spatialize::{DecimationConfig, EngineKind, PassConfig, SimulationConfig};

/// Input of `WasmForceSimulation::new`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SimulationInput {
    pub anchors: Vec<AnchorRecord>,
    pub edges: Vec<EdgeRecord>,
    pub simulation: SimulationConfig,
    /// `gpu` is not available in the browser build
    pub engine: EngineKind,
}

/// Input of `spatialize`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LayoutInput {
    pub anchors: Vec<AnchorRecord>,
    pub leaves: Vec<LeafRecord>,
    pub passes: Vec<PassConfig>,
    pub decimation: DecimationConfig,
}
