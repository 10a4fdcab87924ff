//! Pairwise CPU engine
//!
//! Visits every unordered pair once (`i < j`) and applies equal and opposite
//! forces, like a d3-force tick. O(n²) per step, fine up to a few hundred anchors.

use crate::model::Vec3;

use super::{ForceEngine, SimEdge, SimNode, SimulationConfig, StepReport, gravity, integrate, repulsion, spring};

pub struct SequentialEngine {
    nodes: Vec<SimNode>,
    edges: Vec<SimEdge>,
    config: SimulationConfig,
    forces: Vec<Vec3>,
    sanitized_total: usize,
}

impl SequentialEngine {
    pub fn new(nodes: Vec<SimNode>, edges: Vec<SimEdge>, config: SimulationConfig) -> Self {
        let forces = vec![Vec3::ZERO; nodes.len()];
        Self {
            nodes,
            edges,
            config,
            forces,
            sanitized_total: 0,
        }
    }

    fn accumulate_forces(&mut self) {
        self.forces.iter_mut().for_each(|f| *f = Vec3::ZERO);
        let n = self.nodes.len();

        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (&self.nodes[i], &self.nodes[j]);
                if let Some(force) = repulsion(a.position, a.charge, b.position, b.charge, &self.config) {
                    self.forces[i] += force;
                    self.forces[j] -= force;
                }
            }
        }

        for edge in &self.edges {
            let force = spring(self.nodes[edge.source].position, self.nodes[edge.target].position, edge);
            self.forces[edge.source] += force;
            self.forces[edge.target] -= force;
        }

        for (node, force) in self.nodes.iter().zip(self.forces.iter_mut()) {
            *force += gravity(node.position, &self.config);
        }
    }
}

impl ForceEngine for SequentialEngine {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn step(&mut self) -> StepReport {
        let mut report = StepReport::default();
        for _ in 0..self.config.substeps {
            self.accumulate_forces();
            for (node, &force) in self.nodes.iter_mut().zip(&self.forces) {
                if integrate(node, force, &self.config) {
                    report.sanitized += 1;
                }
            }
        }
        self.sanitized_total += report.sanitized;
        report
    }

    fn read_nodes(&self) -> Vec<SimNode> {
        self.nodes.clone()
    }

    fn update_nodes(&mut self, nodes: &[SimNode]) {
        if nodes.len() == self.nodes.len() {
            self.nodes.clone_from_slice(nodes);
        }
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn sanitized_total(&self) -> usize {
        self.sanitized_total
    }
}
