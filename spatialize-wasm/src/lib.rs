//! WebAssembly bindings for spatialize
//!
//! Exposes the anchor force simulation and the pass pipeline to a browser
//! so the layout work can run off the main thread (e.g. in a Web Worker).
//! The bindings are thin wrappers over plain Rust functions that exchange
//! JSON strings; those functions are what the tests exercise.

mod payload;

use spatialize::decimate::decimate;
use spatialize::io::{self, ExportReport, SpatializationExport};
use spatialize::{Anchor, EngineKind, ForceSimulation, Pipeline, Vec3};
use wasm_bindgen::prelude::*;

pub use payload::{LayoutInput, SimulationInput};

/// Initialize WASM panic hook for better error messages
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

/// Build a simulation from a [`SimulationInput`] JSON document
pub fn build_simulation(input_json: &str) -> Result<ForceSimulation, String> {
    let input: SimulationInput = serde_json::from_str(input_json).map_err(|e| format!("invalid simulation input: {e}"))?;
    let engine = match input.engine {
        EngineKind::Gpu => return Err("the gpu engine is not available in the browser build".to_string()),
        other => other,
    };
    let anchors = io::anchors_from_records(input.anchors);
    let edges = io::edges_from_records(input.edges, &input.simulation);
    ForceSimulation::new(&anchors, &edges, input.simulation, engine).map_err(|e| e.to_string())
}

/// Run the pipeline on a [`LayoutInput`] JSON document and return the export JSON
pub fn run_layout(input_json: &str) -> Result<String, String> {
    let input: LayoutInput = serde_json::from_str(input_json).map_err(|e| format!("invalid layout input: {e}"))?;
    let anchors = io::anchors_from_records(input.anchors);
    let leaves = io::leaves_from_records(input.leaves);
    let (leaves, decimation) = if input.decimation.is_active() {
        let (leaves, report) = decimate(leaves, &input.decimation);
        (leaves, Some(report))
    } else {
        (leaves, None)
    };

    let output = Pipeline::new().run(&leaves, &anchors, &input.passes);
    let export = SpatializationExport::new(
        &anchors,
        &output.leaves,
        ExportReport {
            pipeline: output.report,
            simulation: None,
            decimation,
        },
    );
    export.to_json().map_err(|e| e.to_string())
}

/// Anchor positions as `[x0, y0, z0, x1, …]`, ready for a GPU buffer
pub fn flat_positions(anchors: &[Anchor]) -> Vec<f32> {
    anchors.iter().flat_map(|a| a.position.to_array()).collect()
}

/// Force simulation handle owned by JavaScript
#[wasm_bindgen]
pub struct WasmForceSimulation {
    inner: ForceSimulation,
}

#[wasm_bindgen]
impl WasmForceSimulation {
    #[wasm_bindgen(constructor)]
    pub fn new(input_json: &str) -> Result<WasmForceSimulation, JsValue> {
        build_simulation(input_json)
            .map(|inner| Self { inner })
            .map_err(|e| JsValue::from_str(&e))
    }

    /// Run `ticks` steps; returns how many anchors were restored from NaN
    pub fn step(&mut self, ticks: u32) -> u32 {
        self.inner.run(ticks as usize).sanitized as u32
    }

    /// Frame callback; true when a step ran
    pub fn on_frame(&mut self) -> bool {
        self.inner.on_frame().is_some()
    }

    pub fn start(&mut self) {
        self.inner.start();
    }

    pub fn pause(&mut self) {
        self.inner.pause();
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn engine(&self) -> String {
        self.inner.engine_name().to_string()
    }

    pub fn positions(&self) -> js_sys::Float32Array {
        js_sys::Float32Array::from(flat_positions(&self.inner.anchors()).as_slice())
    }

    /// Current anchors in the export format
    pub fn anchors_json(&self) -> Result<String, JsValue> {
        SpatializationExport::new(&self.inner.anchors(), &[], ExportReport::default())
            .to_json()
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Drag an anchor; `pin` keeps it in place afterwards
    pub fn move_anchor(&mut self, id: &str, x: f32, y: f32, z: f32, pin: bool) -> bool {
        self.inner.move_anchor(id, Vec3::new(x, y, z), pin)
    }
}

/// Run the pass pipeline; returns the export JSON
#[wasm_bindgen]
pub fn spatialize(input_json: &str) -> Result<String, JsValue> {
    run_layout(input_json).map_err(|e| JsValue::from_str(&e))
}
