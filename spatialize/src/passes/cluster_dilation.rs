//! Cluster dilation pass
//!
//! Scales every leaf away from the centroid of the leaves sharing its anchor
//! reference (`p' = c + (p - c) × factor`), then adds a multi-octave noise
//! offset so the clusters look organic rather than spherical.

use std::collections::HashMap;

use super::{ParamMap, Params, Pass, PassContext, PassResult, map_leaves};
use crate::model::{Leaf, Vec3};
use crate::noise::{fbm, sanitize_frequency};

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterDilationParams {
    /// Scale around each cluster centroid (1 = unchanged)
    pub factor: f32,
    /// Base frequency of the noise offset
    pub noise_scale: f32,
    /// Maximum noise offset per axis
    pub noise_amplitude: f32,
    /// Noise octaves (frequencies f, 2f, 4f…)
    pub octaves: u32,
    pub seed: u64,
}

impl Default for ClusterDilationParams {
    fn default() -> Self {
        Self {
            factor: 1.0,
            noise_scale: 0.05,
            noise_amplitude: 15.0,
            octaves: 3,
            seed: super::DEFAULT_SEED,
        }
    }
}

impl ClusterDilationParams {
    pub fn from_params(map: &ParamMap) -> PassResult<Self> {
        let p = Params::new("clusterDilation", map);
        let d = Self::default();
        Ok(Self {
            factor: p.number("factor", p.number("dilatationFactor", d.factor)?)?,
            noise_scale: p.number("noiseScale", d.noise_scale)?,
            noise_amplitude: p.number("noiseAmplitude", d.noise_amplitude)?,
            octaves: p.count("octaves", d.octaves, 8)?,
            seed: p.seed()?,
        }
        .sanitized())
    }

    pub fn sanitized(mut self) -> Self {
        self.factor = self.factor.clamp(0.0, 100.0);
        self.noise_scale = sanitize_frequency(self.noise_scale);
        self.noise_amplitude = self.noise_amplitude.clamp(0.0, 1e4);
        self.octaves = self.octaves.clamp(1, 8);
        self
    }
}

pub struct ClusterDilationPass {
    params: ClusterDilationParams,
}

impl ClusterDilationPass {
    pub fn new(params: ClusterDilationParams) -> Self {
        Self {
            params: params.sanitized(),
        }
    }

    /// Mean position of the finite leaves of each anchor reference
    pub fn centroids(leaves: &[Leaf]) -> HashMap<&str, Vec3> {
        let mut sums: HashMap<&str, (Vec3, usize)> = HashMap::new();
        for leaf in leaves.iter().filter(|l| l.position.is_finite()) {
            let entry = sums.entry(leaf.anchor_ref.as_str()).or_insert((Vec3::ZERO, 0));
            entry.0 += leaf.position;
            entry.1 += 1;
        }
        sums.into_iter()
            .map(|(key, (sum, count))| (key, sum / count as f32))
            .collect()
    }

    fn offset(&self, p: Vec3) -> Vec3 {
        let c = &self.params;
        if c.noise_amplitude == 0.0 {
            return Vec3::ZERO;
        }
        Vec3::new(
            fbm(c.seed, p, c.noise_scale, c.octaves),
            fbm(c.seed.wrapping_add(1), p, c.noise_scale, c.octaves),
            fbm(c.seed.wrapping_add(2), p, c.noise_scale, c.octaves),
        ) * c.noise_amplitude
    }
}

impl Pass for ClusterDilationPass {
    fn name(&self) -> &str {
        "clusterDilation"
    }

    fn apply(&self, leaves: &[Leaf], _ctx: &PassContext<'_>) -> PassResult<Vec<Leaf>> {
        let centroids = Self::centroids(leaves);
        let factor = self.params.factor;

        Ok(map_leaves(leaves, |leaf| {
            let Some(&center) = centroids.get(leaf.anchor_ref.as_str()) else {
                return leaf.clone();
            };
            let dilated = center + (leaf.position - center) * factor;
            Leaf {
                position: dilated + self.offset(dilated),
                ..leaf.clone()
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor_index::AnchorIndex;

    fn cluster(anchor: &str, center: Vec3) -> Vec<Leaf> {
        [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(0.0, 2.0, 0.0),
            Vec3::new(0.0, -2.0, 0.0),
        ]
        .iter()
        .enumerate()
        .map(|(i, &offset)| Leaf::new(format!("{anchor}{i}"), anchor).with_position(center + offset))
        .collect()
    }

    fn run(params: ClusterDilationParams, input: &[Leaf]) -> Vec<Leaf> {
        let index = AnchorIndex::build(&[]);
        ClusterDilationPass::new(params)
            .apply(input, &PassContext::new(&index))
            .unwrap()
    }

    #[test]
    fn centroids_per_anchor() {
        let mut leaves = cluster("a", Vec3::new(10.0, 0.0, 0.0));
        leaves.extend(cluster("b", Vec3::new(0.0, 0.0, -5.0)));

        let centroids = ClusterDilationPass::centroids(&leaves);

        assert_eq!(centroids["a"], Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(centroids["b"], Vec3::new(0.0, 0.0, -5.0));
    }

    #[test]
    fn dilates_around_centroid_without_noise() {
        let params = ClusterDilationParams {
            factor: 3.0,
            noise_amplitude: 0.0,
            ..ClusterDilationParams::default()
        };
        let center = Vec3::new(10.0, 0.0, 0.0);
        let output = run(params, &cluster("a", center));

        assert_eq!(output[0].position, Vec3::new(13.0, 0.0, 0.0));
        assert_eq!(output[2].position, Vec3::new(10.0, 6.0, 0.0));
    }

    #[test]
    fn unit_factor_without_noise_is_identity() {
        let params = ClusterDilationParams {
            noise_amplitude: 0.0,
            ..ClusterDilationParams::default()
        };
        let input = cluster("a", Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(run(params, &input), input);
    }

    #[test]
    fn noise_offset_is_bounded() {
        let params = ClusterDilationParams {
            noise_amplitude: 4.0,
            ..ClusterDilationParams::default()
        };
        let input = cluster("a", Vec3::new(1.0, 2.0, 3.0));
        let output = run(params, &input);

        for (before, after) in input.iter().zip(&output) {
            let d = after.position - before.position;
            assert!(d.x.abs() <= 4.0 + 1e-4 && d.y.abs() <= 4.0 + 1e-4 && d.z.abs() <= 4.0 + 1e-4);
        }
    }

    #[test]
    fn non_finite_leaves_do_not_poison_centroid() {
        let mut input = cluster("a", Vec3::ZERO);
        input.push(Leaf::new("bad", "a").with_position(Vec3::new(f32::NAN, 0.0, 0.0)));

        let centroids = ClusterDilationPass::centroids(&input);
        assert!(centroids["a"].is_finite());
    }

    #[test]
    fn accepts_dilatation_factor_alias() {
        let mut map = ParamMap::new();
        map.insert("dilatationFactor".into(), super::super::ParamValue::Number(2.5));

        let params = ClusterDilationParams::from_params(&map).unwrap();
        assert_eq!(params.factor, 2.5);
    }
}
