//! Spherize pass
//!
//! Keeps each leaf's direction from the center but redraws its distance, so
//! the whole set fills a ball. `volume_exponent = 1/3` gives uniform density
//! by volume; larger exponents pull leaves toward the center.

use rand::Rng;

use super::{ParamMap, Params, Pass, PassContext, PassResult, map_leaves};
use crate::model::{Leaf, Vec3, VecExt};
use crate::random::{keyed_rng, unit_direction};

const DIRECTION_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct SpherizeParams {
    pub sphere_radius: f32,
    pub volume_exponent: f32,
    pub min_radius: f32,
    /// Relative multiplicative perturbation of the new distance (0-1)
    pub jitter: f32,
    pub center: Vec3,
    pub seed: u64,
}

impl Default for SpherizeParams {
    fn default() -> Self {
        Self {
            sphere_radius: 200.0,
            volume_exponent: 1.0 / 3.0,
            min_radius: 0.0,
            jitter: 0.05,
            center: Vec3::ZERO,
            seed: super::DEFAULT_SEED,
        }
    }
}

impl SpherizeParams {
    pub fn from_params(map: &ParamMap) -> PassResult<Self> {
        let p = Params::new("spherize", map);
        let d = Self::default();
        Ok(Self {
            sphere_radius: p.number("sphereRadius", d.sphere_radius)?,
            volume_exponent: p.number("volumeExponent", d.volume_exponent)?,
            min_radius: p.number("minRadius", d.min_radius)?,
            jitter: p.number("jitter", d.jitter)?,
            center: p.center()?,
            seed: p.seed()?,
        }
        .sanitized())
    }

    pub fn sanitized(mut self) -> Self {
        self.min_radius = self.min_radius.max(0.0);
        self.sphere_radius = self.sphere_radius.max(self.min_radius);
        self.volume_exponent = self.volume_exponent.clamp(0.05, 4.0);
        self.jitter = self.jitter.clamp(0.0, 1.0);
        self
    }
}

pub struct SpherizePass {
    params: SpherizeParams,
}

impl SpherizePass {
    pub fn new(params: SpherizeParams) -> Self {
        Self {
            params: params.sanitized(),
        }
    }

    fn place(&self, leaf: &Leaf) -> Vec3 {
        let p = &self.params;
        let mut rng = keyed_rng(p.seed, &leaf.id);
        let u: f32 = rng.r#gen();
        let v: f32 = rng.r#gen();

        let direction = (leaf.position - p.center)
            .normalized(DIRECTION_EPSILON)
            .unwrap_or_else(|| unit_direction(&mut rng));

        let distance = (p.min_radius + (p.sphere_radius - p.min_radius) * u.powf(p.volume_exponent)) * (1.0 + p.jitter * v);
        p.center + direction * distance
    }
}

impl Pass for SpherizePass {
    fn name(&self) -> &str {
        "spherize"
    }

    fn apply(&self, leaves: &[Leaf], _ctx: &PassContext<'_>) -> PassResult<Vec<Leaf>> {
        Ok(map_leaves(leaves, |leaf| Leaf {
            position: self.place(leaf),
            ..leaf.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor_index::AnchorIndex;

    fn leaves(count: usize) -> Vec<Leaf> {
        (0..count)
            .map(|i| {
                let t = i as f32;
                Leaf::new(format!("p{i}"), "A").with_position(Vec3::new(t.sin() * 900.0, t.cos() * 40.0, t - 50.0))
            })
            .collect()
    }

    fn run(params: SpherizeParams, input: &[Leaf]) -> Vec<Leaf> {
        let index = AnchorIndex::build(&[]);
        SpherizePass::new(params).apply(input, &PassContext::new(&index)).unwrap()
    }

    #[test]
    fn every_leaf_lies_within_bound() {
        let params = SpherizeParams {
            min_radius: 20.0,
            ..SpherizeParams::default()
        };
        let output = run(params, &leaves(500));

        for leaf in &output {
            let d = leaf.position.length();
            assert!(d >= 20.0 - 1e-3, "distance {d} below min radius");
            assert!(d <= 200.0 * 1.05 + 1e-3, "distance {d} beyond sphere");
        }
    }

    #[test]
    fn direction_is_preserved() {
        let input = leaves(50);
        let output = run(SpherizeParams::default(), &input);

        for (before, after) in input.iter().zip(&output) {
            let a = before.position.normalized(1e-6).unwrap();
            let b = after.position.normalized(1e-6).unwrap();
            assert!(a.dot(b) > 0.9999);
        }
    }

    #[test]
    fn center_leaf_gets_a_direction() {
        let input = vec![Leaf::new("center", "A")];
        let output = run(SpherizeParams::default(), &input);
        assert!(output[0].position.is_finite());
    }

    #[test]
    fn non_finite_leaf_is_rescued() {
        let input = vec![Leaf::new("nan", "A").with_position(Vec3::new(f32::NAN, 1.0, 1.0))];
        let output = run(SpherizeParams::default(), &input);

        assert!(output[0].position.is_finite());
        assert!(output[0].position.length() <= 210.0 + 1e-3);
    }

    #[test]
    fn custom_center_is_used() {
        let center = Vec3::new(1000.0, 0.0, 0.0);
        let params = SpherizeParams {
            center,
            sphere_radius: 10.0,
            jitter: 0.0,
            ..SpherizeParams::default()
        };
        let output = run(params, &leaves(20));

        assert!(output.iter().all(|l| l.position.distance(center) <= 10.0 + 1e-3));
    }

    #[test]
    fn is_deterministic() {
        let input = leaves(30);
        assert_eq!(run(SpherizeParams::default(), &input), run(SpherizeParams::default(), &input));
    }

    #[test]
    fn parameters_are_clamped() {
        let params = SpherizeParams {
            volume_exponent: 0.0,
            jitter: -1.0,
            min_radius: 300.0,
            ..SpherizeParams::default()
        }
        .sanitized();

        assert_eq!(params.volume_exponent, 0.05);
        assert_eq!(params.jitter, 0.0);
        assert_eq!(params.sphere_radius, 300.0);
    }
}
