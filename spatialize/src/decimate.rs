//! Deterministic leaf decimation
//!
//! Large inputs are thinned before layout: at most `maxLeavesPerAnchor` leaves
//! survive per anchor reference, then a global `keepFraction` may thin the rest.
//! Which leaves survive depends only on the seed and each leaf id, never on the
//! input order. Survivors keep their input order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::Leaf;
use crate::noise::mix64;
use crate::random::hash_key;

pub const DEFAULT_DECIMATION_SEED: u64 = 42;

/// Decimation settings; the default keeps every leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DecimationConfig {
    /// Cap on leaves sharing one anchor reference
    pub max_leaves_per_anchor: Option<usize>,
    /// Fraction (0-1) of the remaining leaves to keep
    pub keep_fraction: Option<f32>,
    pub seed: u64,
}

impl Default for DecimationConfig {
    fn default() -> Self {
        Self {
            max_leaves_per_anchor: None,
            keep_fraction: None,
            seed: DEFAULT_DECIMATION_SEED,
        }
    }
}

impl DecimationConfig {
    pub fn with_max_leaves_per_anchor(mut self, max: usize) -> Self {
        self.max_leaves_per_anchor = Some(max);
        self
    }

    pub fn with_keep_fraction(mut self, fraction: f32) -> Self {
        self.keep_fraction = Some(fraction);
        self
    }

    /// `keep_fraction` clamped to [0, 1]; non-finite values keep everything
    fn fraction(&self) -> Option<f32> {
        self.keep_fraction
            .filter(|f| f.is_finite() && *f < 1.0)
            .map(|f| f.max(0.0))
    }

    /// True when decimation can drop anything
    pub fn is_active(&self) -> bool {
        self.max_leaves_per_anchor.is_some() || self.fraction().is_some()
    }
}

/// What decimation removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecimationReport {
    pub input: usize,
    pub kept: usize,
    /// Anchor references that had more leaves than the cap
    pub capped_anchors: usize,
}

/// Order-independent rank of a leaf; lower ranks survive
fn rank(seed: u64, leaf: &Leaf) -> (u64, String) {
    (mix64(seed ^ hash_key(&leaf.id)), leaf.id.clone())
}

/// Keep the `keep` lowest-ranked of `members`, clearing the rest in `survives`
fn keep_lowest(leaves: &[Leaf], members: &mut [usize], keep: usize, seed: u64, survives: &mut [bool]) {
    if members.len() <= keep {
        return;
    }
    members.sort_by_cached_key(|&i| rank(seed, &leaves[i]));
    for &i in &members[keep..] {
        survives[i] = false;
    }
}

pub fn decimate(leaves: Vec<Leaf>, config: &DecimationConfig) -> (Vec<Leaf>, DecimationReport) {
    let input = leaves.len();
    let mut survives = vec![true; input];
    let mut capped_anchors = 0;

    if let Some(max) = config.max_leaves_per_anchor {
        let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, leaf) in leaves.iter().enumerate() {
            groups.entry(leaf.anchor_ref.as_str()).or_default().push(i);
        }
        for members in groups.values_mut() {
            if members.len() > max {
                capped_anchors += 1;
            }
            keep_lowest(&leaves, members, max, config.seed, &mut survives);
        }
    }

    if let Some(fraction) = config.fraction() {
        let mut remaining: Vec<usize> = (0..input).filter(|&i| survives[i]).collect();
        let keep = (remaining.len() as f64 * fraction as f64).floor() as usize;
        keep_lowest(&leaves, &mut remaining, keep, config.seed, &mut survives);
    }

    let kept: Vec<Leaf> = leaves
        .into_iter()
        .zip(survives)
        .filter_map(|(leaf, keep)| keep.then_some(leaf))
        .collect();

    let report = DecimationReport {
        input,
        kept: kept.len(),
        capped_anchors,
    };
    if report.kept < input {
        tracing::info!(input, kept = report.kept, capped_anchors, "decimated leaves");
    }
    (kept, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves() -> Vec<Leaf> {
        let mut leaves = Vec::new();
        for i in 0..10 {
            leaves.push(Leaf::new(format!("a-{i}"), "A"));
        }
        for i in 0..3 {
            leaves.push(Leaf::new(format!("b-{i}"), "B"));
        }
        leaves.push(Leaf::new("lost", ""));
        leaves
    }

    fn count(leaves: &[Leaf], anchor: &str) -> usize {
        leaves.iter().filter(|l| l.anchor_ref == anchor).count()
    }

    #[test]
    fn default_keeps_everything() {
        let config = DecimationConfig::default();
        let (kept, report) = decimate(leaves(), &config);

        assert!(!config.is_active());
        assert_eq!(kept, leaves());
        assert_eq!(report.kept, report.input);
    }

    #[test]
    fn caps_leaves_per_anchor() {
        let config = DecimationConfig::default().with_max_leaves_per_anchor(4);
        let (kept, report) = decimate(leaves(), &config);

        assert_eq!(count(&kept, "A"), 4);
        assert_eq!(count(&kept, "B"), 3);
        assert_eq!(count(&kept, ""), 1);
        assert_eq!(report.capped_anchors, 1);
        assert_eq!(report.kept, 8);
    }

    #[test]
    fn selection_ignores_input_order() {
        let config = DecimationConfig::default().with_max_leaves_per_anchor(3);
        let mut reversed = leaves();
        reversed.reverse();

        let (forward, _) = decimate(leaves(), &config);
        let (backward, _) = decimate(reversed, &config);

        let mut a: Vec<&str> = forward.iter().map(|l| l.id.as_str()).collect();
        let mut b: Vec<&str> = backward.iter().map(|l| l.id.as_str()).collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
    }

    #[test]
    fn survivors_keep_input_order() {
        let config = DecimationConfig::default().with_max_leaves_per_anchor(5);
        let (kept, _) = decimate(leaves(), &config);

        let positions: Vec<usize> = kept
            .iter()
            .map(|l| leaves().iter().position(|o| o.id == l.id).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn seed_changes_selection() {
        let many: Vec<Leaf> = (0..200).map(|i| Leaf::new(format!("post-{i}"), "A")).collect();
        let capped = |seed| {
            let config = DecimationConfig {
                seed,
                ..DecimationConfig::default().with_max_leaves_per_anchor(20)
            };
            decimate(many.clone(), &config).0
        };

        assert_eq!(capped(1), capped(1));
        assert_ne!(capped(1), capped(2));
    }

    #[test]
    fn keep_fraction_applies_after_cap() {
        let config = DecimationConfig::default()
            .with_max_leaves_per_anchor(4)
            .with_keep_fraction(0.5);
        let (kept, report) = decimate(leaves(), &config);

        // 8 leaves survive the cap, half of them the fraction
        assert_eq!(kept.len(), 4);
        assert_eq!(report.kept, 4);
        assert!(count(&kept, "A") <= 4);
    }

    #[test]
    fn invalid_fraction_keeps_everything() {
        for fraction in [f32::NAN, 1.0, 3.0] {
            let config = DecimationConfig::default().with_keep_fraction(fraction);
            assert!(!config.is_active());
            assert_eq!(decimate(leaves(), &config).0.len(), 14);
        }
        let (kept, _) = decimate(leaves(), &DecimationConfig::default().with_keep_fraction(-1.0));
        assert!(kept.is_empty());
    }

    #[test]
    fn zero_cap_drops_everything() {
        let (kept, report) = decimate(leaves(), &DecimationConfig::default().with_max_leaves_per_anchor(0));
        assert!(kept.is_empty());
        assert_eq!(report.capped_anchors, 3);
    }
}
