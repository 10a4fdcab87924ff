//! WGSL compute shaders for the GPU force simulation
//!
//! One tick runs two passes per sub-step:
//!
//! 1. `accumulate_forces`: each invocation owns one node. Repulsion is gathered
//!    tile by tile, with every workgroup staging `WORKGROUP_SIZE` node positions
//!    in workgroup memory. Springs come from the CSR adjacency.
//! 2. `integrate`: velocity decay, speed clamp, position update and the
//!    non-finite guard.

/// Common type definitions and bindings shared by both shaders
pub const TYPES: &str = r#"
const TILE: u32 = 256u;

struct Node {
    position: vec3<f32>,
    charge: f32,
    velocity: vec3<f32>,
    fixed: f32,
    last_finite: vec3<f32>,
    _padding: f32,
}

struct Spring {
    other: u32,
    jiggle_seed: u32,
    rest_distance: f32,
    strength: f32,
    orientation: f32,
    _padding: f32,
}

struct Uniforms {
    node_count: u32,
    substep_dt: f32,
    velocity_decay: f32,
    max_speed: f32,
    center: vec3<f32>,
    gravity: f32,
    max_distance_sq: f32,
    epsilon_sq: f32,
    _padding0: f32,
    _padding1: f32,
}

@group(0) @binding(0) var<storage, read_write> nodes: array<Node>;
@group(0) @binding(1) var<storage, read_write> forces: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> offsets: array<u32>;
@group(0) @binding(3) var<storage, read> springs: array<Spring>;
@group(0) @binding(4) var<uniform> uniforms: Uniforms;
@group(0) @binding(5) var<storage, read_write> sanitized: atomic<u32>;
"#;

/// Repulsion (tiled) + springs + gravity, written to the force buffer
pub const ACCUMULATE_FORCES: &str = r#"
var<workgroup> tile: array<vec4<f32>, 256>;

// Deterministic direction for springs whose endpoints coincide
fn jiggle(seed_bits: u32) -> vec3<f32> {
    let seed = f32(seed_bits);
    let j = vec3<f32>(
        fract(sin(seed) * 43758.5453) - 0.5,
        fract(sin(seed * 1.1) * 43758.5453) - 0.5,
        fract(sin(seed * 1.2) * 43758.5453) - 0.5,
    );
    let len = length(j);
    if (len < 1e-6) {
        return vec3<f32>(1.0, 0.0, 0.0);
    }
    return j / len;
}

@compute @workgroup_size(256)
fn accumulate_forces(
    @builtin(global_invocation_id) global_id: vec3<u32>,
    @builtin(local_invocation_id) local_id: vec3<u32>,
) {
    let i = global_id.x;
    let in_range = i < uniforms.node_count;

    var pos = vec3<f32>(0.0);
    var charge = 0.0;
    if (in_range) {
        pos = nodes[i].position;
        charge = max(nodes[i].charge, 0.0);
    }

    var force = vec3<f32>(0.0);
    let tile_count = (uniforms.node_count + TILE - 1u) / TILE;

    for (var t = 0u; t < tile_count; t++) {
        let load_index = t * TILE + local_id.x;
        if (load_index < uniforms.node_count) {
            tile[local_id.x] = vec4<f32>(nodes[load_index].position, max(nodes[load_index].charge, 0.0));
        } else {
            tile[local_id.x] = vec4<f32>(0.0);
        }
        workgroupBarrier();

        if (in_range) {
            for (var k = 0u; k < TILE; k++) {
                let j = t * TILE + k;
                if (j >= uniforms.node_count || j == i) {
                    continue;
                }
                let other = tile[k];
                let delta = pos - other.xyz;
                let dist_sq = dot(delta, delta);
                if (dist_sq < uniforms.epsilon_sq || dist_sq > uniforms.max_distance_sq) {
                    continue;
                }
                let dist = sqrt(dist_sq);
                force += delta * (sqrt(charge * other.w) / dist_sq / dist);
            }
        }
        workgroupBarrier();
    }

    if (!in_range) {
        return;
    }

    let spring_start = offsets[i];
    let spring_end = offsets[i + 1u];
    for (var s = spring_start; s < spring_end; s++) {
        let spring = springs[s];
        let delta = nodes[spring.other].position - pos;
        let dist = length(delta);
        if (dist < 1e-6) {
            force += jiggle(spring.jiggle_seed) * spring.orientation * (-spring.rest_distance * spring.strength);
        } else {
            force += delta / dist * ((dist - spring.rest_distance) * spring.strength);
        }
    }

    if (uniforms.gravity > 0.0) {
        force += (uniforms.center - pos) * uniforms.gravity;
    }

    forces[i] = vec4<f32>(force, 0.0);
}
"#;

/// Integration with the non-finite guard
pub const INTEGRATE: &str = r#"
fn is_finite3(v: vec3<f32>) -> bool {
    // An all-ones exponent marks NaN or infinity
    let exponent = bitcast<vec3<u32>>(v) & vec3<u32>(0x7f800000u);
    return all(exponent != vec3<u32>(0x7f800000u));
}

@compute @workgroup_size(256)
fn integrate(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if (i >= uniforms.node_count) {
        return;
    }

    var node = nodes[i];
    if (node.fixed > 0.5) {
        node.velocity = vec3<f32>(0.0);
        nodes[i] = node;
        return;
    }

    let decay = uniforms.velocity_decay;
    var velocity = node.velocity * decay + forces[i].xyz * (1.0 - decay);
    let speed = length(velocity);
    if (speed > uniforms.max_speed) {
        velocity = velocity * (uniforms.max_speed / speed);
    }
    let position = node.position + velocity * uniforms.substep_dt;

    if (is_finite3(position) && is_finite3(velocity)) {
        node.position = position;
        node.velocity = velocity;
        node.last_finite = position;
    } else {
        node.position = node.last_finite;
        node.velocity = vec3<f32>(0.0);
        atomicAdd(&sanitized, 1u);
    }

    nodes[i] = node;
}
"#;

/// Shader sources ready for module creation
pub struct ForceShaders {
    pub accumulate_forces: String,
    pub integrate: String,
}

impl ForceShaders {
    pub fn new() -> Self {
        Self {
            accumulate_forces: format!("{}\n{}", TYPES, ACCUMULATE_FORCES),
            integrate: format!("{}\n{}", TYPES, INTEGRATE),
        }
    }
}

impl Default for ForceShaders {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shaders_share_type_definitions() {
        let shaders = ForceShaders::new();
        assert!(shaders.accumulate_forces.starts_with(TYPES));
        assert!(shaders.integrate.starts_with(TYPES));
    }

    #[test]
    fn test_entry_points_present() {
        let shaders = ForceShaders::new();
        assert!(shaders.accumulate_forces.contains("fn accumulate_forces("));
        assert!(shaders.integrate.contains("fn integrate("));
    }

    #[test]
    fn test_tile_matches_workgroup_size() {
        let size = super::super::types::WORKGROUP_SIZE;
        assert!(TYPES.contains(&format!("const TILE: u32 = {size}u;")));
        assert!(ACCUMULATE_FORCES.contains(&format!("@workgroup_size({size})")));
    }
}
