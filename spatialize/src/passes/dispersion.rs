//! Dispersion ("voronoi") pass
//!
//! Scatters every leaf in a spherical shell around its anchor. Optionally the
//! shell is dilated per anchor by a noise-driven factor so clusters of nearby
//! characters do not merge into one blob.

use super::{Params, Pass, PassContext, PassResult, map_leaves};
use crate::model::{Anchor, Leaf, Vec3};
use crate::noise::noise;
use crate::random::{hash_key, keyed_rng, point_in_shell, unit_direction};

/// Unresolved leaves land on a shell of `radius × PERIPHERAL_FACTOR`
pub const PERIPHERAL_FACTOR: f32 = 1.2;

/// Separates the peripheral stream from the in-cluster stream of the same leaf
const PERIPHERAL_SALT: u64 = 0x7065_7269_7068_6572;

#[derive(Debug, Clone, PartialEq)]
pub struct DispersionParams {
    /// Outer radius of the shell
    pub radius: f32,
    /// Inner radius of the shell
    pub min_distance: f32,
    /// Scale applied to z
    pub vertical_spread: f32,
    /// Scale applied to x and y
    pub horizontal_spread: f32,
    /// Base dilation multiplier when `use_dispersion` is set
    pub dilatation_factor: f32,
    /// Frequency of the dilation noise
    pub noise_scale: f32,
    /// Weight of the dilation noise (0-1)
    pub noise_amplitude: f32,
    pub use_dispersion: bool,
    /// Only move leaves of primary anchors
    pub primary_only: bool,
    /// In `primary_only` mode, leave other leaves where they are (else: periphery)
    pub preserve_other_positions: bool,
    pub seed: u64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            radius: 10.0,
            min_distance: 2.0,
            vertical_spread: 1.0,
            horizontal_spread: 1.0,
            dilatation_factor: 1.0,
            noise_scale: 0.05,
            noise_amplitude: 0.2,
            use_dispersion: false,
            primary_only: false,
            preserve_other_positions: true,
            seed: super::DEFAULT_SEED,
        }
    }
}

impl DispersionParams {
    pub fn from_params(map: &super::ParamMap) -> PassResult<Self> {
        let p = Params::new("dispersion", map);
        let d = Self::default();
        Ok(Self {
            radius: p.number("radius", d.radius)?,
            min_distance: p.number("minDistance", d.min_distance)?,
            vertical_spread: p.number("verticalSpread", d.vertical_spread)?,
            horizontal_spread: p.number("horizontalSpread", d.horizontal_spread)?,
            dilatation_factor: p.number("dilatationFactor", d.dilatation_factor)?,
            noise_scale: p.number("noiseScale", d.noise_scale)?,
            noise_amplitude: p.number("noiseAmplitude", d.noise_amplitude)?,
            use_dispersion: p.flag("useDispersion", d.use_dispersion)?,
            primary_only: p.flag("primaryOnly", d.primary_only)?,
            preserve_other_positions: p.flag("preserveOtherPositions", d.preserve_other_positions)?,
            seed: p.seed()?,
        }
        .sanitized())
    }

    /// Clamp every parameter into its documented range
    pub fn sanitized(mut self) -> Self {
        self.radius = self.radius.max(0.0);
        self.min_distance = self.min_distance.clamp(0.0, self.radius);
        self.vertical_spread = self.vertical_spread.clamp(0.0, 100.0);
        self.horizontal_spread = self.horizontal_spread.clamp(0.0, 100.0);
        self.dilatation_factor = self.dilatation_factor.clamp(1.0, 100.0);
        self.noise_scale = crate::noise::sanitize_frequency(self.noise_scale);
        self.noise_amplitude = self.noise_amplitude.clamp(0.0, 1.0);
        self
    }

    /// Radius of the shell used for unresolved leaves
    pub fn peripheral_radius(&self) -> f32 {
        self.radius * PERIPHERAL_FACTOR
    }
}

pub struct DispersionPass {
    params: DispersionParams,
}

impl DispersionPass {
    pub fn new(params: DispersionParams) -> Self {
        Self {
            params: params.sanitized(),
        }
    }

    pub fn params(&self) -> &DispersionParams {
        &self.params
    }

    /// Per-anchor dilation multiplier, in `[factor, factor × (1 + amplitude)]`
    pub fn dilation(&self, anchor: &Anchor) -> f32 {
        let p = &self.params;
        let d = anchor.position.length();
        let n = noise(p.seed ^ hash_key(&anchor.id), d, d * 0.5, d * 0.25, p.noise_scale);
        p.dilatation_factor * (1.0 + p.noise_amplitude * (n + 1.0) / 2.0)
    }

    fn peripheral(&self, leaf: &Leaf) -> Vec3 {
        let mut rng = keyed_rng(self.params.seed ^ PERIPHERAL_SALT, &leaf.id);
        unit_direction(&mut rng) * self.params.peripheral_radius()
    }

    fn around(&self, leaf: &Leaf, anchor: &Anchor) -> Vec3 {
        let p = &self.params;
        let mut rng = keyed_rng(p.seed, &leaf.id);
        let point = point_in_shell(&mut rng, p.min_distance, p.radius);

        let mut offset = point * Vec3::new(p.horizontal_spread, p.horizontal_spread, p.vertical_spread);
        if p.use_dispersion {
            offset = offset * self.dilation(anchor);
        }
        anchor.position + offset
    }

    fn place(&self, leaf: &Leaf, ctx: &PassContext<'_>) -> Vec3 {
        let anchor = ctx.index.resolve(&leaf.anchor_ref);

        if self.params.primary_only && !anchor.is_some_and(|a| a.is_primary) {
            return if self.params.preserve_other_positions {
                leaf.position
            } else {
                self.peripheral(leaf)
            };
        }

        match anchor {
            None => self.peripheral(leaf),
            Some(a) if !a.located || !a.position.is_finite() => Vec3::ZERO,
            Some(a) => self.around(leaf, a),
        }
    }
}

impl Pass for DispersionPass {
    fn name(&self) -> &str {
        "dispersion"
    }

    fn apply(&self, leaves: &[Leaf], ctx: &PassContext<'_>) -> PassResult<Vec<Leaf>> {
        Ok(map_leaves(leaves, |leaf| Leaf {
            position: self.place(leaf, ctx),
            ..leaf.clone()
        }))
    }
}
