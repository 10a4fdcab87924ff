//! Tiled CPU engine
//!
//! Each node gathers repulsion from every other node, walking the node array in
//! fixed-size tiles of `(position, charge)` so a tile stays hot in cache. This
//! mirrors the GPU shader, where a tile is loaded into workgroup memory.
//!
//! A sub-step refreshes the repulsion of at most `batch_rows` nodes, taken
//! round-robin; the other nodes reuse the repulsion cached when their row was
//! last refreshed. One sub-step therefore costs at most `batch_rows · (n − 1)`
//! pair evaluations. Springs and gravity are always evaluated fresh.
//! Rows are processed in parallel with rayon when the `parallel` feature is on.

use crate::model::Vec3;

use super::{ForceEngine, SimEdge, SimNode, SimulationConfig, StepReport, gravity, integrate, repulsion, spring};

#[derive(Clone, Copy)]
struct Body {
    position: Vec3,
    charge: f32,
}

pub struct TiledEngine {
    nodes: Vec<SimNode>,
    edges: Vec<SimEdge>,
    config: SimulationConfig,
    bodies: Vec<Body>,
    /// Last computed repulsion per node
    repulsion: Vec<Vec3>,
    /// First row of the next batch
    cursor: usize,
    last_pair_evaluations: usize,
    sanitized_total: usize,
}

impl TiledEngine {
    pub fn new(nodes: Vec<SimNode>, edges: Vec<SimEdge>, config: SimulationConfig) -> Self {
        Self {
            bodies: Vec::with_capacity(nodes.len()),
            repulsion: vec![Vec3::ZERO; nodes.len()],
            nodes,
            edges,
            config,
            cursor: 0,
            last_pair_evaluations: 0,
            sanitized_total: 0,
        }
    }

    /// Repulsion pairs evaluated by the most recent `step`
    pub fn last_pair_evaluations(&self) -> usize {
        self.last_pair_evaluations
    }

    /// Repulsion on node `i` summed tile by tile
    fn gather(bodies: &[Body], i: usize, tile_size: usize, config: &SimulationConfig) -> Vec3 {
        let me = bodies[i];
        let mut force = Vec3::ZERO;
        for (t, tile) in bodies.chunks(tile_size).enumerate() {
            let base = t * tile_size;
            for (k, other) in tile.iter().enumerate() {
                if base + k == i {
                    continue;
                }
                if let Some(f) = repulsion(me.position, me.charge, other.position, other.charge, config) {
                    force += f;
                }
            }
        }
        force
    }

    /// Rows refreshed by the next sub-step
    fn batch(&self) -> Vec<usize> {
        let n = self.nodes.len();
        let rows = self.config.batch_rows.min(n);
        (0..rows).map(|k| (self.cursor + k) % n).collect()
    }

    /// Recompute the cached repulsion of one batch of rows; returns pairs evaluated
    fn refresh_repulsion(&mut self) -> usize {
        let n = self.nodes.len();
        if n == 0 {
            return 0;
        }
        let rows = self.batch();
        let bodies = &self.bodies;
        let config = &self.config;
        let tile_size = config.tile_size;

        #[cfg(feature = "parallel")]
        let fresh: Vec<Vec3> = {
            use rayon::prelude::*;
            rows.par_iter()
                .map(|&i| Self::gather(bodies, i, tile_size, config))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let fresh: Vec<Vec3> = rows
            .iter()
            .map(|&i| Self::gather(bodies, i, tile_size, config))
            .collect();

        for (&i, force) in rows.iter().zip(fresh) {
            self.repulsion[i] = force;
        }
        self.cursor = (self.cursor + rows.len()) % n;
        rows.len() * (n - 1)
    }

    /// Returns `(sanitized, pair evaluations)`
    fn substep(&mut self) -> (usize, usize) {
        self.bodies.clear();
        self.bodies.extend(self.nodes.iter().map(|n| Body {
            position: n.position,
            charge: n.charge,
        }));

        let pairs = self.refresh_repulsion();

        let mut forces: Vec<Vec3> = self
            .nodes
            .iter()
            .zip(&self.repulsion)
            .map(|(node, &rep)| rep + gravity(node.position, &self.config))
            .collect();
        for edge in &self.edges {
            let force = spring(self.nodes[edge.source].position, self.nodes[edge.target].position, edge);
            forces[edge.source] += force;
            forces[edge.target] -= force;
        }

        let mut sanitized = 0;
        for (node, force) in self.nodes.iter_mut().zip(forces) {
            if integrate(node, force, &self.config) {
                sanitized += 1;
            }
        }
        (sanitized, pairs)
    }
}

impl ForceEngine for TiledEngine {
    fn name(&self) -> &'static str {
        "tiled"
    }

    fn step(&mut self) -> StepReport {
        let mut report = StepReport::default();
        let mut pairs = 0;
        for _ in 0..self.config.substeps {
            let (sanitized, evaluated) = self.substep();
            report.sanitized += sanitized;
            pairs += evaluated;
        }
        self.last_pair_evaluations = pairs;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SequentialEngine;
    use crate::simulation::fibonacci_sphere;

    fn nodes(count: usize) -> Vec<SimNode> {
        (0..count)
            .map(|i| SimNode::new(format!("n{i}"), fibonacci_sphere(i, count, 30.0)))
            .collect()
    }

    #[test]
    fn single_step_matches_sequential() {
        let config = SimulationConfig {
            tile_size: 7,
            ..SimulationConfig::default()
        };
        let edges = vec![SimEdge {
            source: 0,
            target: 3,
            rest_distance: 20.0,
            strength: 0.2,
        }];
        let mut tiled = TiledEngine::new(nodes(40), edges.clone(), config.clone());
        let mut sequential = SequentialEngine::new(nodes(40), edges, config);

        tiled.step();
        sequential.step();

        for (a, b) in tiled.read_nodes().iter().zip(sequential.read_nodes()) {
            assert!(a.position.distance(b.position) < 1e-3, "{} differs", a.id);
        }
    }

    #[test]
    fn tile_size_does_not_change_result() {
        let mut small = TiledEngine::new(
            nodes(25),
            Vec::new(),
            SimulationConfig {
                tile_size: 1,
                ..SimulationConfig::default()
            },
        );
        let mut large = TiledEngine::new(
            nodes(25),
            Vec::new(),
            SimulationConfig {
                tile_size: 1024,
                ..SimulationConfig::default()
            },
        );

        small.step();
        large.step();

        for (a, b) in small.read_nodes().iter().zip(large.read_nodes()) {
            assert!(a.position.distance(b.position) < 1e-4);
        }
    }

    #[test]
    fn step_cost_is_bounded_by_batch_rows() {
        let config = SimulationConfig {
            batch_rows: 10,
            ..SimulationConfig::default()
        };
        let mut engine = TiledEngine::new(nodes(100), Vec::new(), config);

        engine.step();

        assert_eq!(engine.last_pair_evaluations(), 10 * 99);
    }

    #[test]
    fn default_batch_is_cheaper_than_pairwise_above_sequential_limit() {
        let n = crate::simulation::SEQUENTIAL_LIMIT + 44;
        let mut engine = TiledEngine::new(nodes(n), Vec::new(), SimulationConfig::default());

        engine.step();

        let pairwise = n * (n - 1) / 2;
        assert!(engine.last_pair_evaluations() <= pairwise);
    }

    #[test]
    fn batches_cover_every_row_round_robin() {
        let config = SimulationConfig {
            batch_rows: 4,
            ..SimulationConfig::default()
        };
        let mut engine = TiledEngine::new(nodes(10), Vec::new(), config);

        // Three sub-steps of four rows wrap around the ten nodes
        for _ in 0..3 {
            engine.step();
        }

        assert_eq!(engine.cursor, 2);
        assert!(engine.repulsion.iter().all(|f| f.length() > 0.0));
    }

    #[test]
    fn batched_engine_converges_like_full_refresh() {
        let edges: Vec<SimEdge> = [(0, 1), (1, 2), (2, 0)]
            .into_iter()
            .map(|(source, target)| SimEdge {
                source,
                target,
                rest_distance: 25.0,
                strength: 0.1,
            })
            .collect();
        let mut batched = TiledEngine::new(
            nodes(3),
            edges.clone(),
            SimulationConfig {
                batch_rows: 1,
                ..SimulationConfig::default()
            },
        );
        let mut full = TiledEngine::new(nodes(3), edges, SimulationConfig::default());

        for _ in 0..1500 {
            batched.step();
            full.step();
        }

        let sides = |engine: &TiledEngine| {
            let n = engine.read_nodes();
            let mut d = [
                n[0].position.distance(n[1].position),
                n[1].position.distance(n[2].position),
                n[2].position.distance(n[0].position),
            ];
            d.sort_by(f32::total_cmp);
            d
        };
        for (a, b) in sides(&batched).iter().zip(sides(&full)) {
            assert!((a - b).abs() < 0.1, "side {a} vs {b}");
        }
    }

    #[test]
    fn nan_velocity_is_counted_per_step() {
        let mut start = nodes(2);
        start[0].velocity = Vec3::new(f32::NAN, 0.0, 0.0);
        let mut engine = TiledEngine::new(start, Vec::new(), SimulationConfig::default());

        assert_eq!(engine.step().sanitized, 1);
        assert_eq!(engine.step().sanitized, 0);
        assert_eq!(engine.sanitized_total(), 1);
        assert!(engine.read_nodes()[0].velocity.is_finite());
    }

    #[test]
    fn empty_engine_steps() {
        let mut engine = TiledEngine::new(Vec::new(), Vec::new(), SimulationConfig::default());
        assert_eq!(engine.step(), StepReport::default());
        assert_eq!(engine.node_count(), 0);
        assert_eq!(engine.last_pair_evaluations(), 0);
    }
}
