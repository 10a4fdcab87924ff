//! Force simulation for the anchor graph
//!
//! Anchors repel each other (Coulomb-like, `sqrt(qᵢ·qⱼ) / d²`) and edges act as
//! springs toward their rest length. Three engines share the same physics:
//!
//! - [`SequentialEngine`]: straightforward pairwise loop, best for small graphs
//! - [`TiledEngine`]: gathers repulsion over fixed-size node tiles and
//!   refreshes a bounded round-robin batch of rows per step, parallel over rows
//!   (rayon), for graphs beyond a few hundred anchors
//! - `GpuEngine` (feature `gpu`): the tiled scheme as wgpu compute shaders
//!
//! [`ForceSimulation`] owns one engine together with the anchor metadata and
//! drives it from a frame loop.

mod sequential;
mod tiled;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::anchor_index::AnchorIndex;
use crate::model::{Anchor, Edge, Vec3, VecExt};

pub use sequential::SequentialEngine;
pub use tiled::TiledEngine;

// =============================================================================
// Default Constants
// =============================================================================

/// Default velocity decay (fraction of velocity kept each step)
pub const DEFAULT_VELOCITY_DECAY: f32 = 0.6;

/// Default maximum speed (prevents numerical explosion)
pub const DEFAULT_MAX_SPEED: f32 = 50.0;

/// Default cutoff distance for repulsion
pub const DEFAULT_MAX_REPULSION_DISTANCE: f32 = 1000.0;

/// Squared distance below which a pair is considered colocated
pub const DEFAULT_EPSILON_SQ: f32 = 1e-6;

/// Default tile width of the tiled engine (and GPU workgroup)
pub const DEFAULT_TILE_SIZE: usize = 64;

/// Default rows whose repulsion the tiled engine refreshes per sub-step.
///
/// Half of [`SEQUENTIAL_LIMIT`], so above the limit one tiled sub-step never
/// evaluates more pairs than the sequential `n(n−1)/2` loop.
pub const DEFAULT_BATCH_ROWS: usize = 128;

/// Above this many anchors `EngineKind::Auto` picks the tiled engine
pub const SEQUENTIAL_LIMIT: usize = 256;

/// Radius of the Fibonacci sphere used for anchors without coordinates
pub const INITIAL_SPHERE_RADIUS: f32 = 100.0;

/// Parameters of the force simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationConfig {
    /// Fraction of the previous velocity kept each step (0-1)
    pub velocity_decay: f32,
    /// Maximum speed per step
    pub max_speed: f32,
    /// Pairs farther apart than this do not repel
    pub max_repulsion_distance: f32,
    /// Pairs closer than `sqrt(epsilon_sq)` are skipped
    pub epsilon_sq: f32,
    /// Time step
    pub dt: f32,
    /// Integration sub-steps per tick (each uses `dt / substeps`)
    pub substeps: u32,
    /// Pull toward `center` (0 = none)
    pub gravity: f32,
    /// Gravity center
    pub center: Vec3,
    /// Tile width of the tiled engine
    pub tile_size: usize,
    /// Rows whose repulsion the tiled engine refreshes per sub-step
    pub batch_rows: usize,
    /// Rest length for edges that do not carry one
    pub link_distance: f32,
    /// Spring strength for edges that do not carry one
    pub link_strength: f32,
    /// Step once every N rendered frames
    pub step_every_n_frames: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            velocity_decay: DEFAULT_VELOCITY_DECAY,
            max_speed: DEFAULT_MAX_SPEED,
            max_repulsion_distance: DEFAULT_MAX_REPULSION_DISTANCE,
            epsilon_sq: DEFAULT_EPSILON_SQ,
            dt: 1.0,
            substeps: 1,
            gravity: 0.0,
            center: Vec3::ZERO,
            tile_size: DEFAULT_TILE_SIZE,
            batch_rows: DEFAULT_BATCH_ROWS,
            link_distance: crate::model::DEFAULT_REST_DISTANCE,
            link_strength: crate::model::DEFAULT_EDGE_STRENGTH,
            step_every_n_frames: 1,
        }
    }
}

impl SimulationConfig {
    /// Clamp every field into a usable range
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        let finite_or = |v: f32, d: f32| if v.is_finite() { v } else { d };

        self.velocity_decay = finite_or(self.velocity_decay, defaults.velocity_decay).clamp(0.0, 0.999);
        self.max_speed = finite_or(self.max_speed, defaults.max_speed).max(1e-3);
        self.max_repulsion_distance =
            finite_or(self.max_repulsion_distance, defaults.max_repulsion_distance).max(0.0);
        self.epsilon_sq = finite_or(self.epsilon_sq, defaults.epsilon_sq).max(f32::MIN_POSITIVE);
        self.dt = finite_or(self.dt, defaults.dt).clamp(1e-4, 10.0);
        self.substeps = self.substeps.clamp(1, 64);
        self.gravity = finite_or(self.gravity, 0.0).clamp(0.0, 1.0);
        if !self.center.is_finite() {
            self.center = Vec3::ZERO;
        }
        self.tile_size = self.tile_size.clamp(1, 4096);
        self.batch_rows = self.batch_rows.max(1);
        self.link_distance = finite_or(self.link_distance, defaults.link_distance).max(0.0);
        self.link_strength = finite_or(self.link_strength, defaults.link_strength).max(0.0);
        self.step_every_n_frames = self.step_every_n_frames.max(1);
        self
    }

    /// Squared repulsion cutoff
    pub fn max_distance_sq(&self) -> f32 {
        self.max_repulsion_distance * self.max_repulsion_distance
    }

    /// Time step of one sub-step
    pub fn substep_dt(&self) -> f32 {
        self.dt / self.substeps as f32
    }
}

/// A simulated anchor: position, velocity and charge
#[derive(Debug, Clone, PartialEq)]
pub struct SimNode {
    pub id: String,
    pub position: Vec3,
    pub velocity: Vec3,
    /// Repulsion charge (magnitude, >= 0)
    pub charge: f32,
    /// Fixed nodes never move
    pub fixed: bool,
    /// Most recent finite position, restored when a step produces NaN/Infinity
    pub last_finite: Vec3,
}

impl SimNode {
    pub fn new(id: impl Into<String>, position: Vec3) -> Self {
        Self {
            id: id.into(),
            position,
            velocity: Vec3::ZERO,
            charge: crate::model::DEFAULT_CHARGE,
            fixed: false,
            last_finite: position,
        }
    }

    pub fn with_charge(mut self, charge: f32) -> Self {
        self.charge = charge;
        self
    }

    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }
}

/// A spring between two nodes (indices into the node array)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimEdge {
    pub source: usize,
    pub target: usize,
    pub rest_distance: f32,
    pub strength: f32,
}

/// Outcome of one simulation tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// Nodes whose position or velocity went non-finite and were restored
    pub sanitized: usize,
}

impl StepReport {
    pub fn merge(&mut self, other: StepReport) {
        self.sanitized += other.sanitized;
    }
}

/// A force-layout engine. All implementations converge to the same layout.
pub trait ForceEngine: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Advance the simulation by one tick (all sub-steps)
    fn step(&mut self) -> StepReport;

    /// Current node state
    fn read_nodes(&self) -> Vec<SimNode>;

    /// Overwrite node state (e.g. an anchor dragged by the user)
    fn update_nodes(&mut self, nodes: &[SimNode]);

    fn node_count(&self) -> usize;

    /// Total nodes restored from non-finite values since creation
    fn sanitized_total(&self) -> usize;
}

// =============================================================================
// Shared physics
// =============================================================================

/// Repulsion exerted on a node at `p` by a node at `other`.
///
/// Returns `None` for colocated pairs and pairs beyond the cutoff.
pub(crate) fn repulsion(
    p: Vec3,
    charge: f32,
    other: Vec3,
    other_charge: f32,
    config: &SimulationConfig,
) -> Option<Vec3> {
    let delta = p - other;
    let dist_sq = delta.length_squared();
    if !(dist_sq >= config.epsilon_sq) || dist_sq > config.max_distance_sq() {
        return None;
    }
    let dist = dist_sq.sqrt();
    let strength = (charge.max(0.0) * other_charge.max(0.0)).sqrt() / dist_sq;
    Some(delta * (strength / dist))
}

/// Deterministic unit direction for springs whose endpoints coincide
pub(crate) fn jiggle(source: usize, target: usize) -> Vec3 {
    let seed = (source as u32)
        .wrapping_mul(12345)
        .wrapping_add((target as u32).wrapping_mul(67890)) as f32;
    let component = |k: f32| ((seed * k).sin() * 43758.5453).fract() - 0.5;
    Vec3::new(component(1.0), component(1.1), component(1.2))
        .normalized(1e-6)
        .unwrap_or(Vec3::new(1.0, 0.0, 0.0))
}

/// Spring force on the source node (the target receives the opposite)
pub(crate) fn spring(source_pos: Vec3, target_pos: Vec3, edge: &SimEdge) -> Vec3 {
    let delta = target_pos - source_pos;
    let (dir, dist) = match delta.normalized(1e-6) {
        Some(dir) => (dir, delta.length()),
        None => (jiggle(edge.source, edge.target), 0.0),
    };
    dir * ((dist - edge.rest_distance) * edge.strength)
}

/// Apply decay, speed clamp and position update to one node.
///
/// Returns true when the node had to be restored from non-finite values.
pub(crate) fn integrate(node: &mut SimNode, force: Vec3, config: &SimulationConfig) -> bool {
    if node.fixed {
        node.velocity = Vec3::ZERO;
        return false;
    }

    let decay = config.velocity_decay;
    let velocity = (node.velocity * decay + force * (1.0 - decay)).clamp_length_max(config.max_speed);
    let position = node.position + velocity * config.substep_dt();

    if position.is_finite() && velocity.is_finite() {
        node.position = position;
        node.velocity = velocity;
        node.last_finite = position;
        false
    } else {
        node.position = node.last_finite;
        node.velocity = Vec3::ZERO;
        true
    }
}

/// Gravity toward the configured center
pub(crate) fn gravity(p: Vec3, config: &SimulationConfig) -> Vec3 {
    if config.gravity > 0.0 {
        (config.center - p) * config.gravity
    } else {
        Vec3::ZERO
    }
}

/// Position on a Fibonacci sphere, used to seed anchors without coordinates
pub fn fibonacci_sphere(index: usize, total: usize, radius: f32) -> Vec3 {
    let golden_ratio = (1.0 + 5.0_f32.sqrt()) / 2.0;
    let i = index as f32;
    let n = total.max(1) as f32;

    let theta = 2.0 * std::f32::consts::PI * i / golden_ratio;
    let phi = (1.0 - 2.0 * (i + 0.5) / n).clamp(-1.0, 1.0).acos();

    Vec3::new(
        radius * phi.sin() * theta.cos(),
        radius * phi.sin() * theta.sin(),
        radius * phi.cos(),
    )
}

// =============================================================================
// Engine selection
// =============================================================================

/// Which engine implementation to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Sequential for small graphs, tiled above [`SEQUENTIAL_LIMIT`] anchors
    #[default]
    Auto,
    Sequential,
    Tiled,
    Gpu,
}

impl EngineKind {
    /// Resolve `Auto` for a graph of `node_count` anchors
    pub fn resolve(self, node_count: usize) -> EngineKind {
        match self {
            EngineKind::Auto if node_count > SEQUENTIAL_LIMIT => EngineKind::Tiled,
            EngineKind::Auto => EngineKind::Sequential,
            other => other,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineKind::Auto => "auto",
            EngineKind::Sequential => "sequential",
            EngineKind::Tiled => "tiled",
            EngineKind::Gpu => "gpu",
        };
        f.write_str(name)
    }
}

impl FromStr for EngineKind {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(EngineKind::Auto),
            "sequential" | "cpu" => Ok(EngineKind::Sequential),
            "tiled" | "batched" => Ok(EngineKind::Tiled),
            "gpu" => Ok(EngineKind::Gpu),
            other => Err(SimulationError::UnknownEngine(other.to_string())),
        }
    }
}

/// Errors raised while creating a simulation
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("unknown engine: {0}")]
    UnknownEngine(String),

    #[error("GPU engine requested but the crate was built without the `gpu` feature")]
    GpuUnavailable,

    #[cfg(feature = "gpu")]
    #[error("GPU engine failed: {0}")]
    Gpu(#[from] crate::gpu::GpuError),
}

// =============================================================================
// Simulation owner
// =============================================================================

/// Counts gathered while building the simulated graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    /// Edges dropped because an endpoint did not resolve
    pub unresolved_edges: usize,
    /// Anchors seeded on the Fibonacci sphere (no or non-finite coordinates)
    pub seeded_anchors: usize,
    /// Duplicate anchor ids overwritten
    pub duplicate_anchors: usize,
}

/// Whether the simulation advances on every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Idle,
    Running,
}

/// A force simulation with an explicit lifecycle:
/// `new → start/step_once/on_frame… → dispose`
pub struct ForceSimulation {
    engine: Box<dyn ForceEngine>,
    anchors: Vec<Anchor>,
    config: SimulationConfig,
    mode: RunMode,
    frame: u64,
    ticks: u64,
    build: BuildReport,
}

impl ForceSimulation {
    /// Create a simulation over the given anchors and edges
    pub fn new(
        anchors: &[Anchor],
        edges: &[Edge],
        config: SimulationConfig,
        kind: EngineKind,
    ) -> Result<Self, SimulationError> {
        let config = config.sanitized();
        let (anchors, nodes, sim_edges, build) = build_graph(anchors, edges, &config);

        let edge_count = sim_edges.len();
        let kind = kind.resolve(nodes.len());
        let engine: Box<dyn ForceEngine> = match kind {
            EngineKind::Sequential | EngineKind::Auto => {
                Box::new(SequentialEngine::new(nodes, sim_edges, config.clone()))
            }
            EngineKind::Tiled => Box::new(TiledEngine::new(nodes, sim_edges, config.clone())),
            #[cfg(feature = "gpu")]
            EngineKind::Gpu => Box::new(crate::gpu::GpuEngine::new(&nodes, &sim_edges, config.clone())?),
            #[cfg(not(feature = "gpu"))]
            EngineKind::Gpu => return Err(SimulationError::GpuUnavailable),
        };

        tracing::info!(
            engine = engine.name(),
            anchors = anchors.len(),
            edges = edge_count,
            unresolved_edges = build.unresolved_edges,
            "created force simulation"
        );

        Ok(Self {
            engine,
            anchors,
            config,
            mode: RunMode::Idle,
            frame: 0,
            ticks: 0,
            build,
        })
    }

    /// Wrap an already constructed engine. `anchors` must match its node order.
    pub fn with_engine(engine: Box<dyn ForceEngine>, anchors: Vec<Anchor>, config: SimulationConfig) -> Self {
        Self {
            engine,
            anchors,
            config: config.sanitized(),
            mode: RunMode::Idle,
            frame: 0,
            ticks: 0,
            build: BuildReport::default(),
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn build_report(&self) -> BuildReport {
        self.build
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Ticks executed so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Enter continuous mode: `on_frame` steps the simulation
    pub fn start(&mut self) {
        self.mode = RunMode::Running;
    }

    /// Return to idle; `step_once` still works
    pub fn pause(&mut self) {
        self.mode = RunMode::Idle;
    }

    pub fn is_running(&self) -> bool {
        self.mode == RunMode::Running
    }

    /// Called once per rendered frame; steps every `step_every_n_frames`
    pub fn on_frame(&mut self) -> Option<StepReport> {
        if self.mode != RunMode::Running {
            return None;
        }
        self.frame += 1;
        if self.frame % self.config.step_every_n_frames as u64 != 0 {
            return None;
        }
        Some(self.advance())
    }

    /// Single on-demand step, regardless of mode
    pub fn step_once(&mut self) -> StepReport {
        self.advance()
    }

    /// Run `ticks` steps and return the accumulated report
    pub fn run(&mut self, ticks: usize) -> StepReport {
        let mut report = StepReport::default();
        for _ in 0..ticks {
            report.merge(self.advance());
        }
        report
    }

    fn advance(&mut self) -> StepReport {
        let report = self.engine.step();
        self.ticks += 1;
        if report.sanitized > 0 {
            tracing::warn!(
                sanitized = report.sanitized,
                tick = self.ticks,
                "restored anchors from non-finite state"
            );
        }
        report
    }

    /// Total anchors restored from non-finite values since creation
    pub fn sanitized_total(&self) -> usize {
        self.engine.sanitized_total()
    }

    /// Snapshot of the anchors with their current simulated positions
    pub fn anchors(&self) -> Vec<Anchor> {
        let nodes = self.engine.read_nodes();
        self.anchors
            .iter()
            .zip(nodes)
            .map(|(anchor, node)| Anchor {
                position: node.position,
                located: true,
                ..anchor.clone()
            })
            .collect()
    }

    /// Move (and optionally pin) one anchor, e.g. while the user drags it
    pub fn move_anchor(&mut self, id: &str, position: Vec3, pin: bool) -> bool {
        if !position.is_finite() {
            return false;
        }
        let Some(index) = self.anchors.iter().position(|a| a.id == id) else {
            return false;
        };
        let mut nodes = self.engine.read_nodes();
        let node = &mut nodes[index];
        node.position = position;
        node.last_finite = position;
        node.velocity = Vec3::ZERO;
        node.fixed = pin;
        self.engine.update_nodes(&nodes);
        true
    }

    /// Release the engine and its resources
    pub fn dispose(self) {
        tracing::debug!(engine = self.engine.name(), ticks = self.ticks, "disposed force simulation");
    }
}

/// Deduplicate anchors, seed missing positions and resolve edges to indices
fn build_graph(
    anchors: &[Anchor],
    edges: &[Edge],
    config: &SimulationConfig,
) -> (Vec<Anchor>, Vec<SimNode>, Vec<SimEdge>, BuildReport) {
    let index = AnchorIndex::build(anchors);
    let mut build = BuildReport {
        duplicate_anchors: index.duplicates(),
        ..BuildReport::default()
    };

    let anchors: Vec<Anchor> = index.anchors().cloned().collect();
    let total = anchors.len();

    let nodes: Vec<SimNode> = anchors
        .iter()
        .enumerate()
        .map(|(i, anchor)| {
            let position = if anchor.located && anchor.position.is_finite() {
                anchor.position
            } else {
                build.seeded_anchors += 1;
                fibonacci_sphere(i, total, INITIAL_SPHERE_RADIUS)
            };
            SimNode::new(anchor.id.clone(), position)
                .with_charge(if anchor.charge.is_finite() { anchor.charge.max(0.0) } else { 0.0 })
                .with_fixed(anchor.fixed)
        })
        .collect();

    let mut id_to_index: HashMap<&str, usize> = HashMap::with_capacity(total);
    for (i, anchor) in anchors.iter().enumerate() {
        id_to_index.insert(anchor.id.as_str(), i);
        if let Some(slug) = &anchor.slug {
            id_to_index.entry(slug.as_str()).or_insert(i);
        }
    }

    let sim_edges: Vec<SimEdge> = edges
        .iter()
        .filter_map(|e| {
            let source = id_to_index.get(e.source.as_str());
            let target = id_to_index.get(e.target.as_str());
            match (source, target) {
                (Some(&source), Some(&target)) if source != target => Some(SimEdge {
                    source,
                    target,
                    rest_distance: if e.rest_distance.is_finite() {
                        e.rest_distance.max(0.0)
                    } else {
                        config.link_distance
                    },
                    strength: if e.strength.is_finite() { e.strength.max(0.0) } else { config.link_strength },
                }),
                _ => {
                    build.unresolved_edges += 1;
                    None
                }
            }
        })
        .collect();

    if build.unresolved_edges > 0 {
        tracing::warn!(
            unresolved = build.unresolved_edges,
            "dropped edges with unresolved or self-referencing endpoints"
        );
    }

    let anchors = anchors
        .into_iter()
        .zip(&nodes)
        .map(|(anchor, node)| Anchor {
            position: node.position,
            located: true,
            ..anchor
        })
        .collect();

    (anchors, nodes, sim_edges, build)
}
