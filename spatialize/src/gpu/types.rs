//! GPU buffer types for the force simulation
//!
//! These types are uploaded directly to GPU buffers.
//! All use f32/u32 and are repr(C) so the layout matches the WGSL structs.

use bytemuck::{Pod, Zeroable};

use crate::model::Vec3;
use crate::simulation::{SimEdge, SimNode, SimulationConfig};

/// Threads per workgroup; also the number of nodes in one shared-memory tile
pub const WORKGROUP_SIZE: u32 = 256;

/// A node in the GPU force simulation (48 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuNode {
    /// Position in 3D space
    pub position: [f32; 3],
    /// Repulsion charge (>= 0)
    pub charge: f32,
    /// Velocity in 3D space
    pub velocity: [f32; 3],
    /// 1.0 when the node never moves
    pub fixed: f32,
    /// Last finite position, restored when integration produces NaN/Infinity
    pub last_finite: [f32; 3],
    /// Padding for 16-byte alignment
    pub _padding: f32,
}

impl From<&SimNode> for GpuNode {
    fn from(node: &SimNode) -> Self {
        Self {
            position: node.position.to_array(),
            charge: node.charge,
            velocity: node.velocity.to_array(),
            fixed: if node.fixed { 1.0 } else { 0.0 },
            last_finite: node.last_finite.to_array(),
            _padding: 0.0,
        }
    }
}

impl GpuNode {
    /// Convert back, reattaching the node id
    pub fn to_sim_node(self, id: String) -> SimNode {
        SimNode {
            id,
            position: Vec3::from_array(self.position),
            velocity: Vec3::from_array(self.velocity),
            charge: self.charge,
            fixed: self.fixed > 0.5,
            last_finite: Vec3::from_array(self.last_finite),
        }
    }
}

/// One endpoint's view of a spring, stored in CSR order (grouped by node)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuSpring {
    /// Index of the node at the other end
    pub other: u32,
    /// Seed of the jiggle direction used when both endpoints coincide
    pub jiggle_seed: u32,
    /// Rest length
    pub rest_distance: f32,
    /// Spring constant
    pub strength: f32,
    /// +1 for the source endpoint, -1 for the target (flips the jiggle)
    pub orientation: f32,
    pub _padding: f32,
}

/// Spring adjacency in compressed sparse row form
#[derive(Debug, Clone, Default)]
pub struct SpringAdjacency {
    /// `offsets[i]..offsets[i + 1]` indexes the springs of node `i`
    pub offsets: Vec<u32>,
    pub springs: Vec<GpuSpring>,
}

impl SpringAdjacency {
    /// Build the adjacency for `node_count` nodes. Each edge appears twice.
    pub fn build(node_count: usize, edges: &[SimEdge]) -> Self {
        let mut degree = vec![0u32; node_count];
        for edge in edges {
            degree[edge.source] += 1;
            degree[edge.target] += 1;
        }

        let mut offsets = Vec::with_capacity(node_count + 1);
        let mut running = 0u32;
        offsets.push(0);
        for d in &degree {
            running += d;
            offsets.push(running);
        }

        let mut cursor: Vec<u32> = offsets[..node_count].to_vec();
        let mut springs = vec![GpuSpring::zeroed(); running as usize];
        for edge in edges {
            let seed = (edge.source as u32)
                .wrapping_mul(12345)
                .wrapping_add((edge.target as u32).wrapping_mul(67890));
            for (node, other, orientation) in [(edge.source, edge.target, 1.0), (edge.target, edge.source, -1.0)] {
                springs[cursor[node] as usize] = GpuSpring {
                    other: other as u32,
                    jiggle_seed: seed,
                    rest_distance: edge.rest_distance,
                    strength: edge.strength,
                    orientation,
                    _padding: 0.0,
                };
                cursor[node] += 1;
            }
        }

        Self { offsets, springs }
    }
}

/// Simulation parameters passed to the GPU as uniforms (48 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SimulationUniforms {
    pub node_count: u32,
    /// Time step of one sub-step
    pub substep_dt: f32,
    pub velocity_decay: f32,
    pub max_speed: f32,
    /// Gravity center
    pub center: [f32; 3],
    pub gravity: f32,
    /// Squared repulsion cutoff
    pub max_distance_sq: f32,
    /// Squared distance below which pairs are skipped
    pub epsilon_sq: f32,
    pub _padding: [f32; 2],
}

impl SimulationUniforms {
    pub fn new(node_count: u32, config: &SimulationConfig) -> Self {
        Self {
            node_count,
            substep_dt: config.substep_dt(),
            velocity_decay: config.velocity_decay,
            max_speed: config.max_speed,
            center: config.center.to_array(),
            gravity: config.gravity,
            max_distance_sq: config.max_distance_sq(),
            epsilon_sq: config.epsilon_sq,
            _padding: [0.0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_node_size() {
        assert_eq!(std::mem::size_of::<GpuNode>(), 48);
    }

    #[test]
    fn test_gpu_spring_size() {
        assert_eq!(std::mem::size_of::<GpuSpring>(), 24);
    }

    #[test]
    fn test_uniforms_size() {
        assert_eq!(std::mem::size_of::<SimulationUniforms>(), 48);
    }

    #[test]
    fn test_node_round_trip_keeps_fixed_flag() {
        let node = SimNode::new("a", Vec3::new(1.0, 2.0, 3.0)).with_fixed(true);
        let back = GpuNode::from(&node).to_sim_node("a".into());
        assert_eq!(back, node);
    }

    #[test]
    fn test_adjacency_lists_both_endpoints() {
        let edges = vec![
            SimEdge {
                source: 0,
                target: 2,
                rest_distance: 10.0,
                strength: 1.0,
            },
            SimEdge {
                source: 1,
                target: 2,
                rest_distance: 20.0,
                strength: 0.5,
            },
        ];
        let adjacency = SpringAdjacency::build(3, &edges);

        assert_eq!(adjacency.offsets, vec![0, 1, 2, 4]);
        assert_eq!(adjacency.springs.len(), 4);
        assert_eq!(adjacency.springs[0].other, 2);
        assert_eq!(adjacency.springs[0].orientation, 1.0);
        let of_node_2: Vec<u32> = adjacency.springs[2..4].iter().map(|s| s.other).collect();
        assert_eq!(of_node_2, vec![0, 1]);
        assert!(adjacency.springs[2..4].iter().all(|s| s.orientation == -1.0));
    }
}
