//! Flow-field pass: Euler advection of every leaf through a static noise field

use super::{ParamMap, Params, Pass, PassContext, PassResult, map_leaves};
use crate::model::Leaf;
use crate::noise::{noise_vec3, sanitize_frequency};

/// Upper bound on advection frames
pub const MAX_FRAMES: u32 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct FlowFieldParams {
    /// Number of advection steps (>= 1)
    pub frames: u32,
    /// Spatial frequency of the field
    pub flow_scale: f32,
    /// Displacement per frame at full field strength
    pub flow_strength: f32,
    pub seed: u64,
}

impl Default for FlowFieldParams {
    fn default() -> Self {
        Self {
            frames: 8,
            flow_scale: 0.02,
            flow_strength: 1.0,
            seed: super::DEFAULT_SEED,
        }
    }
}

impl FlowFieldParams {
    pub fn from_params(map: &ParamMap) -> PassResult<Self> {
        let p = Params::new("flowField", map);
        let d = Self::default();
        Ok(Self {
            frames: p.count("frames", d.frames, MAX_FRAMES)?,
            flow_scale: p.number("flowScale", d.flow_scale)?,
            flow_strength: p.number("flowStrength", d.flow_strength)?,
            seed: p.seed()?,
        }
        .sanitized())
    }

    pub fn sanitized(mut self) -> Self {
        self.frames = self.frames.clamp(1, MAX_FRAMES);
        self.flow_scale = sanitize_frequency(self.flow_scale);
        self.flow_strength = self.flow_strength.clamp(-1e4, 1e4);
        self
    }
}

pub struct FlowFieldPass {
    params: FlowFieldParams,
}

impl FlowFieldPass {
    pub fn new(params: FlowFieldParams) -> Self {
        Self {
            params: params.sanitized(),
        }
    }
}

impl Pass for FlowFieldPass {
    fn name(&self) -> &str {
        "flowField"
    }

    fn apply(&self, leaves: &[Leaf], _ctx: &PassContext<'_>) -> PassResult<Vec<Leaf>> {
        let p = &self.params;
        Ok(map_leaves(leaves, |leaf| {
            let mut position = leaf.position;
            if position.is_finite() {
                for _ in 0..p.frames {
                    position += noise_vec3(p.seed, position, p.flow_scale) * p.flow_strength;
                }
            }
            Leaf {
                position,
                ..leaf.clone()
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor_index::AnchorIndex;
    use crate::model::Vec3;

    fn leaves() -> Vec<Leaf> {
        (0..50)
            .map(|i| Leaf::new(format!("p{i}"), "A").with_position(Vec3::new(i as f32 * 3.0, -(i as f32), 7.0)))
            .collect()
    }

    fn run(params: FlowFieldParams, input: &[Leaf]) -> Vec<Leaf> {
        let index = AnchorIndex::build(&[]);
        FlowFieldPass::new(params).apply(input, &PassContext::new(&index)).unwrap()
    }

    #[test]
    fn displacement_is_bounded_per_frame() {
        let params = FlowFieldParams {
            frames: 4,
            flow_strength: 2.0,
            ..FlowFieldParams::default()
        };
        let input = leaves();
        let output = run(params, &input);

        // Each frame moves at most |(1,1,1)| × strength
        let bound = 4.0 * 2.0 * 3.0_f32.sqrt() + 1e-3;
        for (before, after) in input.iter().zip(&output) {
            assert!(before.position.distance(after.position) <= bound);
        }
    }

    #[test]
    fn advection_is_deterministic() {
        let input = leaves();
        assert_eq!(run(FlowFieldParams::default(), &input), run(FlowFieldParams::default(), &input));
    }

    #[test]
    fn zero_strength_is_identity() {
        let params = FlowFieldParams {
            flow_strength: 0.0,
            ..FlowFieldParams::default()
        };
        let input = leaves();
        assert_eq!(run(params, &input), input);
    }

    #[test]
    fn frames_compose() {
        let input = leaves();
        let two = run(
            FlowFieldParams {
                frames: 2,
                ..FlowFieldParams::default()
            },
            &input,
        );
        let one = FlowFieldParams {
            frames: 1,
            ..FlowFieldParams::default()
        };
        let once_then_once = run(one.clone(), &run(one, &input));

        assert_eq!(two, once_then_once);
    }

    #[test]
    fn frames_are_at_least_one() {
        assert_eq!(
            FlowFieldParams {
                frames: 0,
                ..FlowFieldParams::default()
            }
            .sanitized()
            .frames,
            1
        );
    }

    #[test]
    fn non_finite_leaf_is_left_alone() {
        let input = vec![Leaf::new("nan", "A").with_position(Vec3::new(f32::NAN, 0.0, 0.0))];
        let output = run(FlowFieldParams::default(), &input);
        assert!(output[0].position.x.is_nan());
    }
}
