//! Spatialization passes and pass dispatch
//!
//! A pass turns one leaf vector into a new one of the same length. Passes are
//! pure: they read the leaves and an [`AnchorIndex`] snapshot and never mutate
//! their input. Every random draw is keyed by the pass seed and an entity id.
//!
//! Passes are configured by name with a flat map of numeric/boolean
//! parameters (see [`PassConfig`]) and created through a [`PassRegistry`].

mod cluster_dilation;
mod dispersion;
mod flow_field;
mod palette;
mod radial;
mod spherize;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::anchor_index::AnchorIndex;
use crate::model::{Leaf, Vec3};

pub use cluster_dilation::{ClusterDilationParams, ClusterDilationPass};
pub use dispersion::{DispersionParams, DispersionPass, PERIPHERAL_FACTOR};
pub use flow_field::{FlowFieldParams, FlowFieldPass};
pub use palette::{PaletteParams, PalettePass, hsv_to_rgb};
pub use radial::{RADIAL_EPSILON, RadialDisplacementParams, RadialDisplacementPass};
pub use spherize::{SpherizeParams, SpherizePass};

/// Default seed for passes that are not given one
pub const DEFAULT_SEED: u64 = 42;

/// A single parameter value: number or boolean
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

/// Named pass parameters
pub type ParamMap = BTreeMap<String, ParamValue>;

/// One entry of the ordered pass list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassConfig {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub parameters: ParamMap,
}

fn enabled_by_default() -> bool {
    true
}

impl PassConfig {
    /// An enabled pass with no parameters (all defaults)
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            parameters: ParamMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Errors raised by a pass
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PassError {
    /// A parameter has the wrong type
    #[error("pass {pass}: parameter `{key}` must be a {expected}")]
    InvalidParameter {
        pass: String,
        key: String,
        expected: &'static str,
    },

    /// The pass could not produce a result
    #[error("pass {pass} failed: {reason}")]
    Failed { pass: String, reason: String },
}

/// Result type for pass operations
pub type PassResult<T> = Result<T, PassError>;

/// Read-only data available to every pass
pub struct PassContext<'a> {
    pub index: &'a AnchorIndex,
}

impl<'a> PassContext<'a> {
    pub fn new(index: &'a AnchorIndex) -> Self {
        Self { index }
    }
}

/// A geometric transformation of the leaf set
pub trait Pass: Send + Sync {
    /// Canonical name (e.g. "dispersion")
    fn name(&self) -> &str;

    /// Produce new leaves; the output has the same length and order as the input
    fn apply(&self, leaves: &[Leaf], ctx: &PassContext<'_>) -> PassResult<Vec<Leaf>>;
}

// =============================================================================
// Parameter access
// =============================================================================

/// `radiusMax` → `radius_max`
fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Typed view over a [`ParamMap`] for one pass.
///
/// Keys are looked up in camelCase first, then snake_case. Missing or
/// non-finite numbers fall back to the default; a value of the wrong type is
/// an error.
pub struct Params<'a> {
    pass: &'static str,
    map: &'a ParamMap,
}

impl<'a> Params<'a> {
    pub fn new(pass: &'static str, map: &'a ParamMap) -> Self {
        Self { pass, map }
    }

    fn get(&self, key: &str) -> Option<&ParamValue> {
        self.map.get(key).or_else(|| self.map.get(&snake_case(key)))
    }

    fn invalid(&self, key: &str, expected: &'static str) -> PassError {
        PassError::InvalidParameter {
            pass: self.pass.to_string(),
            key: key.to_string(),
            expected,
        }
    }

    pub fn number(&self, key: &str, default: f32) -> PassResult<f32> {
        match self.get(key) {
            None => Ok(default),
            Some(ParamValue::Number(v)) => {
                let v = *v as f32;
                Ok(if v.is_finite() { v } else { default })
            }
            Some(ParamValue::Bool(_)) => Err(self.invalid(key, "number")),
        }
    }

    pub fn flag(&self, key: &str, default: bool) -> PassResult<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(ParamValue::Bool(b)) => Ok(*b),
            Some(ParamValue::Number(_)) => Err(self.invalid(key, "boolean")),
        }
    }

    /// Non-negative integer (rounded), clamped to `max`
    pub fn count(&self, key: &str, default: u32, max: u32) -> PassResult<u32> {
        let v = self.number(key, default as f32)?;
        Ok(v.round().clamp(0.0, max as f32) as u32)
    }

    /// The `seed` parameter (integers up to 2^53 are exact)
    pub fn seed(&self) -> PassResult<u64> {
        match self.get("seed") {
            None => Ok(DEFAULT_SEED),
            Some(ParamValue::Number(v)) if v.is_finite() => Ok(v.abs().trunc() as u64),
            Some(ParamValue::Number(_)) => Ok(DEFAULT_SEED),
            Some(ParamValue::Bool(_)) => Err(self.invalid("seed", "number")),
        }
    }

    /// `centerX/centerY/centerZ`, defaulting to the origin
    pub fn center(&self) -> PassResult<Vec3> {
        Ok(Vec3::new(
            self.number("centerX", 0.0)?,
            self.number("centerY", 0.0)?,
            self.number("centerZ", 0.0)?,
        ))
    }
}

/// Map every leaf independently, in parallel when the `parallel` feature is on
pub(crate) fn map_leaves<T, F>(leaves: &[Leaf], f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&Leaf) -> T + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        leaves.par_iter().map(f).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        leaves.iter().map(f).collect()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Constructor of a configured pass
pub type PassBuilder = fn(&ParamMap) -> PassResult<Box<dyn Pass>>;

struct PassEntry {
    names: &'static [&'static str],
    build: PassBuilder,
}

/// `flowField`, `flow_field` and `flow-field` all normalize to `flowfield`
fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Registry of available passes, looked up by name
pub struct PassRegistry {
    entries: Vec<PassEntry>,
}

impl Default for PassRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PassRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Create a registry with every built-in pass:
    /// `dispersion` (alias `voronoi`), `flowField`, `spherize`,
    /// `radialDisplacement`, `clusterDilation` (alias `dilatation`), `palette`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(&["dispersion", "voronoi"], |p| {
            Ok(Box::new(DispersionPass::new(DispersionParams::from_params(p)?)))
        });
        registry.register(&["flowField"], |p| {
            Ok(Box::new(FlowFieldPass::new(FlowFieldParams::from_params(p)?)))
        });
        registry.register(&["spherize"], |p| {
            Ok(Box::new(SpherizePass::new(SpherizeParams::from_params(p)?)))
        });
        registry.register(&["radialDisplacement", "radial"], |p| {
            Ok(Box::new(RadialDisplacementPass::new(
                RadialDisplacementParams::from_params(p)?,
            )))
        });
        registry.register(&["clusterDilation", "dilatation"], |p| {
            Ok(Box::new(ClusterDilationPass::new(ClusterDilationParams::from_params(p)?)))
        });
        registry.register(&["palette", "colors"], |p| {
            Ok(Box::new(PalettePass::new(PaletteParams::from_params(p)?)))
        });
        registry
    }

    /// Register a pass under one or more names (later registrations win)
    pub fn register(&mut self, names: &'static [&'static str], build: PassBuilder) {
        self.entries.insert(0, PassEntry { names, build });
    }

    /// Whether a pass with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    fn find(&self, name: &str) -> Option<&PassEntry> {
        let wanted = normalize_name(name);
        self.entries
            .iter()
            .find(|e| e.names.iter().any(|n| normalize_name(n) == wanted))
    }

    /// Build a configured pass; `None` when the name is unknown
    pub fn create(&self, name: &str, parameters: &ParamMap) -> Option<PassResult<Box<dyn Pass>>> {
        self.find(name).map(|entry| (entry.build)(parameters))
    }

    /// Canonical names of all registered passes
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.names[0]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, ParamValue)]) -> ParamMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn param_value_deserializes_numbers_and_bools() {
        let map: ParamMap = serde_json::from_str(r#"{"radius": 12, "useDispersion": true}"#).unwrap();
        assert_eq!(map["radius"], ParamValue::Number(12.0));
        assert_eq!(map["useDispersion"], ParamValue::Bool(true));
    }

    #[test]
    fn pass_config_defaults_to_enabled() {
        let config: PassConfig = serde_json::from_str(r#"{"name": "spherize"}"#).unwrap();
        assert!(config.enabled);
        assert!(config.parameters.is_empty());
    }

    #[test]
    fn params_accept_camel_and_snake_case() {
        let map = params(&[("min_distance", ParamValue::Number(3.0))]);
        let p = Params::new("test", &map);

        assert_eq!(p.number("minDistance", 2.0).unwrap(), 3.0);
        assert_eq!(p.number("radius", 10.0).unwrap(), 10.0);
    }

    #[test]
    fn params_reject_wrong_types() {
        let map = params(&[("radius", ParamValue::Bool(true)), ("useDispersion", ParamValue::Number(1.0))]);
        let p = Params::new("dispersion", &map);

        let err = p.number("radius", 10.0).unwrap_err();
        assert_eq!(err.to_string(), "pass dispersion: parameter `radius` must be a number");
        assert!(p.flag("useDispersion", false).is_err());
    }

    #[test]
    fn params_replace_non_finite_numbers_with_default() {
        let map = params(&[("radius", ParamValue::Number(f64::NAN))]);
        assert_eq!(Params::new("t", &map).number("radius", 10.0).unwrap(), 10.0);
    }

    #[test]
    fn params_read_seed_and_count() {
        let map = params(&[("seed", ParamValue::Number(7.9)), ("frames", ParamValue::Number(-3.0))]);
        let p = Params::new("t", &map);

        assert_eq!(p.seed().unwrap(), 7);
        assert_eq!(p.count("frames", 8, 100).unwrap(), 0);
        assert_eq!(Params::new("t", &ParamMap::new()).seed().unwrap(), DEFAULT_SEED);
    }

    #[test]
    fn snake_case_conversion() {
        assert_eq!(snake_case("preserveOtherPositions"), "preserve_other_positions");
        assert_eq!(snake_case("radius"), "radius");
    }

    #[test]
    fn registry_finds_passes_by_any_spelling() {
        let registry = PassRegistry::with_defaults();

        assert!(registry.contains("flowField"));
        assert!(registry.contains("flow_field"));
        assert!(registry.contains("FLOW-FIELD"));
        assert!(registry.contains("voronoi"));
        assert!(!registry.contains("teleport"));
    }

    #[test]
    fn registry_creates_configured_pass() {
        let registry = PassRegistry::with_defaults();

        let pass = registry.create("voronoi", &ParamMap::new()).unwrap().unwrap();
        assert_eq!(pass.name(), "dispersion");
        assert!(registry.create("unknown", &ParamMap::new()).is_none());
    }

    #[test]
    fn registry_reports_bad_parameters() {
        let registry = PassRegistry::with_defaults();
        let map = params(&[("sphereRadius", ParamValue::Bool(false))]);

        let result = registry.create("spherize", &map).unwrap();
        assert!(matches!(result, Err(PassError::InvalidParameter { .. })));
    }

    #[test]
    fn registry_lists_builtin_passes() {
        let names = PassRegistry::with_defaults().names();
        for expected in [
            "dispersion",
            "flowField",
            "spherize",
            "radialDisplacement",
            "clusterDilation",
            "palette",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn later_registration_overrides() {
        struct Identity;
        impl Pass for Identity {
            fn name(&self) -> &str {
                "identity"
            }
            fn apply(&self, leaves: &[Leaf], _ctx: &PassContext<'_>) -> PassResult<Vec<Leaf>> {
                Ok(leaves.to_vec())
            }
        }

        let mut registry = PassRegistry::with_defaults();
        registry.register(&["spherize"], |_| Ok(Box::new(Identity)));

        let pass = registry.create("spherize", &ParamMap::new()).unwrap().unwrap();
        assert_eq!(pass.name(), "identity");
    }
}
