//! Palette pass: one distinct color per anchor, applied to its leaves
//!
//! Hues are spread evenly over the color wheel and then shuffled (keyed by the
//! seed), so anchors with neighbouring ids do not get neighbouring hues.

use std::collections::{BTreeSet, HashMap};

use rand::seq::SliceRandom;

use super::{ParamMap, Params, Pass, PassContext, PassResult, map_leaves};
use crate::anchor_index::AnchorIndex;
use crate::model::{DEFAULT_LEAF_COLOR, Leaf};
use crate::random::keyed_rng;

#[derive(Debug, Clone, PartialEq)]
pub struct PaletteParams {
    pub saturation: f32,
    pub value: f32,
    pub seed: u64,
}

impl Default for PaletteParams {
    fn default() -> Self {
        Self {
            saturation: 0.7,
            value: 0.9,
            seed: super::DEFAULT_SEED,
        }
    }
}

impl PaletteParams {
    pub fn from_params(map: &ParamMap) -> PassResult<Self> {
        let p = Params::new("palette", map);
        let d = Self::default();
        Ok(Self {
            saturation: p.number("saturation", d.saturation)?,
            value: p.number("value", d.value)?,
            seed: p.seed()?,
        }
        .sanitized())
    }

    pub fn sanitized(mut self) -> Self {
        self.saturation = self.saturation.clamp(0.0, 1.0);
        self.value = self.value.clamp(0.0, 1.0);
        self
    }
}

/// HSV (all in [0, 1]) to RGB
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    if s <= 0.0 {
        return [v, v, v];
    }
    let h = h.rem_euclid(1.0) * 6.0;
    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector as u32 % 6 {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

pub struct PalettePass {
    params: PaletteParams,
}

impl PalettePass {
    pub fn new(params: PaletteParams) -> Self {
        Self {
            params: params.sanitized(),
        }
    }

    /// Color of every anchor id in the index
    pub fn colors(&self, index: &AnchorIndex) -> HashMap<String, [f32; 3]> {
        let ids: BTreeSet<&str> = index.anchors().map(|a| a.id.as_str()).collect();
        let n = ids.len();

        let mut palette: Vec<[f32; 3]> = (0..n)
            .map(|i| hsv_to_rgb(i as f32 / n as f32, self.params.saturation, self.params.value))
            .collect();
        palette.shuffle(&mut keyed_rng(self.params.seed, "palette"));

        ids.into_iter().map(String::from).zip(palette).collect()
    }
}

impl Pass for PalettePass {
    fn name(&self) -> &str {
        "palette"
    }

    fn apply(&self, leaves: &[Leaf], ctx: &PassContext<'_>) -> PassResult<Vec<Leaf>> {
        let colors = self.colors(ctx.index);
        Ok(map_leaves(leaves, |leaf| {
            let color = ctx
                .index
                .resolve(&leaf.anchor_ref)
                .and_then(|a| colors.get(&a.id))
                .copied()
                .unwrap_or(DEFAULT_LEAF_COLOR);
            Leaf { color, ..leaf.clone() }
        }))
    }
}
