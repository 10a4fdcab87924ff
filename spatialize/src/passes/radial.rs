//! Radial displacement pass
//!
//! Pushes each leaf in or out along its direction from a center by a noise
//! value sampled on that direction, so the silhouette of the layout becomes
//! lumpy while the angular distribution stays intact.

use super::{ParamMap, Params, Pass, PassContext, PassResult, map_leaves};
use crate::model::{Leaf, Vec3};
use crate::noise::noise_at;

/// Leaves closer than this to their center are left unchanged
pub const RADIAL_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct RadialDisplacementParams {
    /// Maximum displacement (noise is in [-1, 1])
    pub intensity: f32,
    /// Frequency of the noise over the unit direction
    pub frequency: f32,
    pub center: Vec3,
    pub min_radius: f32,
    /// Use the leaf's anchor as center when it resolves
    pub per_anchor: bool,
    pub seed: u64,
}

impl Default for RadialDisplacementParams {
    fn default() -> Self {
        Self {
            intensity: 5.0,
            frequency: 1.0,
            center: Vec3::ZERO,
            min_radius: 0.0,
            per_anchor: false,
            seed: super::DEFAULT_SEED,
        }
    }
}

impl RadialDisplacementParams {
    pub fn from_params(map: &ParamMap) -> PassResult<Self> {
        let p = Params::new("radialDisplacement", map);
        let d = Self::default();
        Ok(Self {
            intensity: p.number("intensity", d.intensity)?,
            frequency: p.number("frequency", d.frequency)?,
            center: p.center()?,
            min_radius: p.number("minRadius", d.min_radius)?,
            per_anchor: p.flag("perAnchor", d.per_anchor)?,
            seed: p.seed()?,
        }
        .sanitized())
    }

    pub fn sanitized(mut self) -> Self {
        self.min_radius = self.min_radius.max(0.0);
        self
    }
}

pub struct RadialDisplacementPass {
    params: RadialDisplacementParams,
}

impl RadialDisplacementPass {
    pub fn new(params: RadialDisplacementParams) -> Self {
        Self {
            params: params.sanitized(),
        }
    }

    fn center_for(&self, leaf: &Leaf, ctx: &PassContext<'_>) -> Vec3 {
        if !self.params.per_anchor {
            return self.params.center;
        }
        ctx.index
            .resolve(&leaf.anchor_ref)
            .filter(|a| a.located && a.position.is_finite())
            .map_or(self.params.center, |a| a.position)
    }

    fn displace(&self, leaf: &Leaf, ctx: &PassContext<'_>) -> Vec3 {
        let p = &self.params;
        let center = self.center_for(leaf, ctx);
        let offset = leaf.position - center;
        let distance = offset.length();
        if !(distance >= RADIAL_EPSILON) || !distance.is_finite() {
            return leaf.position;
        }

        let direction = offset / distance;
        let n = noise_at(p.seed, direction, p.frequency);

        let mut new_distance = distance + p.intensity * n;
        if new_distance < p.min_radius {
            new_distance = p.min_radius;
        }
        center + direction * new_distance.max(RADIAL_EPSILON)
    }
}

impl Pass for RadialDisplacementPass {
    fn name(&self) -> &str {
        "radialDisplacement"
    }

    fn apply(&self, leaves: &[Leaf], ctx: &PassContext<'_>) -> PassResult<Vec<Leaf>> {
        if self.params.intensity == 0.0 {
            return Ok(leaves.to_vec());
        }
        Ok(map_leaves(leaves, |leaf| Leaf {
            position: self.displace(leaf, ctx),
            ..leaf.clone()
        }))
    }
}
