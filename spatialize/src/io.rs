//! Input records, export format and config documents
//!
//! Inputs are JSON arrays of loosely shaped records: ids may be strings or
//! integers, coordinates may be flat (`x`, `y`, `z`) or nested
//! (`coordinates`), and several fields have legacy names (`postUID`,
//! `character`, `isJoshua`). Fields the core does not interpret are kept in
//! [`Leaf::extra`] and written back on export.
//!
//! Documents are dispatched on their file extension: `.json`, `.yaml`, `.yml`.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decimate::{DecimationConfig, DecimationReport};
use crate::model::{Anchor, DEFAULT_LEAF_COLOR, Edge, Leaf, Vec3};
use crate::passes::PassConfig;
use crate::pipeline::PipelineReport;
use crate::simulation::{BuildReport, SimulationConfig};

/// Version written to `formatVersion` of every export
pub const FORMAT_VERSION: u32 = 1;

/// Errors that can occur during reading or writing
#[derive(Error, Debug)]
pub enum IoError {
    /// The file format is not supported
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The file extension could not be determined
    #[error("could not determine file format from path: {0}")]
    UnknownExtension(String),

    /// An I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A document could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// A document could not be serialized
    #[error("write error: {0}")]
    Write(String),
}

/// Result type for reader/writer operations
pub type IoResult<T> = Result<T, IoError>;

/// Document formats, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    pub fn from_extension(ext: &str) -> IoResult<Self> {
        if ext.eq_ignore_ascii_case("json") {
            Ok(Format::Json)
        } else if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") {
            Ok(Format::Yaml)
        } else {
            Err(IoError::UnsupportedFormat(ext.to_string()))
        }
    }

    pub fn from_path(path: &Path) -> IoResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| IoError::UnknownExtension(path.display().to_string()))?;
        Self::from_extension(ext)
    }
}

/// Parse a document from text
pub fn parse_document<T: DeserializeOwned>(text: &str, format: Format) -> IoResult<T> {
    match format {
        Format::Json => serde_json::from_str(text).map_err(|e| IoError::Parse(e.to_string())),
        Format::Yaml => serde_yaml::from_str(text).map_err(|e| IoError::Parse(e.to_string())),
    }
}

/// Read a document, picking the format from the extension
pub fn read_document<T: DeserializeOwned>(path: &Path) -> IoResult<T> {
    let format = Format::from_path(path)?;
    let text = fs::read_to_string(path)?;
    parse_document(&text, format).map_err(|e| match e {
        IoError::Parse(message) => IoError::Parse(format!("{}: {message}", path.display())),
        other => other,
    })
}

/// Write a document, picking the format from the extension
pub fn write_document<T: Serialize>(value: &T, path: &Path) -> IoResult<()> {
    let text = match Format::from_path(path)? {
        Format::Json => serde_json::to_string_pretty(value).map_err(|e| IoError::Write(e.to_string()))?,
        Format::Yaml => serde_yaml::to_string(value).map_err(|e| IoError::Write(e.to_string()))?,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    Ok(())
}

// =============================================================================
// Input records
// =============================================================================

/// A record identifier: string or integer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Integer(i64),
    Text(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Integer(i) => write!(f, "{i}"),
            Identifier::Text(s) => f.write_str(s),
        }
    }
}

/// Nested `{x, y, z}`; missing components are 0
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Coordinates {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<Coordinates> for Vec3 {
    fn from(c: Coordinates) -> Self {
        Vec3::new(c.x, c.y, c.z)
    }
}

impl From<Vec3> for Coordinates {
    fn from(v: Vec3) -> Self {
        Self { x: v.x, y: v.y, z: v.z }
    }
}

/// Flat `x/y/z` win over nested `coordinates`; `None` when neither is given
fn position_of(x: Option<f32>, y: Option<f32>, z: Option<f32>, nested: Option<Coordinates>) -> Option<Vec3> {
    if x.is_some() || y.is_some() || z.is_some() {
        Some(Vec3::new(x.unwrap_or(0.0), y.unwrap_or(0.0), z.unwrap_or(0.0)))
    } else {
        nested.map(Vec3::from)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRecord {
    #[serde(default)]
    pub id: Option<Identifier>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
    #[serde(default)]
    pub z: Option<f32>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub is_primary: Option<bool>,
    /// Legacy name of `isPrimary`
    #[serde(default, rename = "isJoshua")]
    pub is_joshua: Option<bool>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub weight: Option<f32>,
    #[serde(default)]
    pub charge: Option<f32>,
    #[serde(default)]
    pub fixed: Option<bool>,
}

impl AnchorRecord {
    /// `None` when the record has neither an id nor a slug
    pub fn into_anchor(self) -> Option<Anchor> {
        let id = match (&self.id, &self.slug) {
            (Some(id), _) => id.to_string(),
            (None, Some(slug)) => slug.clone(),
            (None, None) => return None,
        };
        let mut anchor = match position_of(self.x, self.y, self.z, self.coordinates) {
            Some(position) => Anchor::new(id, position),
            None => Anchor::unlocated(id),
        };
        anchor.slug = self.slug;
        anchor.is_primary = self.is_primary.or(self.is_joshua).unwrap_or(false);
        anchor.kind = self.kind;
        if let Some(weight) = self.weight {
            anchor.weight = weight;
        }
        if let Some(charge) = self.charge {
            anchor.charge = charge;
        }
        anchor.fixed = self.fixed.unwrap_or(false);
        Some(anchor)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafRecord {
    #[serde(default)]
    pub id: Option<Identifier>,
    /// Legacy name of `id`
    #[serde(default, rename = "postUID")]
    pub post_uid: Option<Identifier>,
    #[serde(default)]
    pub anchor_ref: Option<Identifier>,
    /// Legacy name of `anchorRef`
    #[serde(default)]
    pub character: Option<Identifier>,
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
    #[serde(default)]
    pub z: Option<f32>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub original_coordinates: Option<Coordinates>,
    #[serde(default)]
    pub color: Option<[f32; 3]>,
    #[serde(default)]
    pub impact: Option<f32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LeafRecord {
    /// `id`, else the legacy `postUID`
    pub fn explicit_id(&self) -> Option<String> {
        self.id.as_ref().or(self.post_uid.as_ref()).map(ToString::to_string)
    }

    /// Leaves without an id get `leaf-<index>`; without a reference they are unresolved
    pub fn into_leaf(self, index: usize) -> Leaf {
        let id = self.explicit_id().unwrap_or_else(|| format!("leaf-{index}"));
        self.into_leaf_with_id(id)
    }

    fn into_leaf_with_id(self, id: String) -> Leaf {
        let anchor_ref = self
            .anchor_ref
            .or(self.character)
            .map(|r| r.to_string())
            .unwrap_or_default();
        let position = position_of(self.x, self.y, self.z, self.coordinates);

        let mut leaf = Leaf::new(id, anchor_ref);
        leaf.position = position.filter(|p| p.is_finite()).unwrap_or(Vec3::ZERO);
        leaf.original_position = self.original_coordinates.map(Vec3::from).or(position);
        leaf.color = self.color.unwrap_or(DEFAULT_LEAF_COLOR);
        leaf.impact = self.impact.unwrap_or(1.0);
        leaf.extra = self.extra;
        leaf
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: Identifier,
    pub target: Identifier,
    /// Spring strength
    #[serde(default)]
    pub value: Option<f32>,
    /// Rest length
    #[serde(default)]
    pub distance: Option<f32>,
}

impl EdgeRecord {
    /// Missing values take the simulation's link defaults
    pub fn into_edge(self, config: &SimulationConfig) -> Edge {
        Edge::new(self.source.to_string(), self.target.to_string())
            .with_rest_distance(self.distance.unwrap_or(config.link_distance))
            .with_strength(self.value.unwrap_or(config.link_strength))
    }
}

/// Convert anchor records, skipping those without an id or slug
pub fn anchors_from_records(records: Vec<AnchorRecord>) -> Vec<Anchor> {
    let total = records.len();
    let anchors: Vec<Anchor> = records.into_iter().filter_map(AnchorRecord::into_anchor).collect();
    if anchors.len() < total {
        tracing::warn!(skipped = total - anchors.len(), "skipped anchor records without id or slug");
    }
    anchors
}

/// `leaf-<index>`, suffixed until it differs from every explicit id
fn fallback_leaf_id(index: usize, taken: &HashSet<String>) -> String {
    let base = format!("leaf-{index}");
    let mut id = base.clone();
    let mut suffix = 1;
    while taken.contains(&id) {
        id = format!("{base}-{suffix}");
        suffix += 1;
    }
    id
}

/// Convert leaf records; generated ids never collide with explicit ones.
///
/// Random draws are keyed on the leaf id, so records that repeat an explicit
/// id share one placement. They are kept and reported with a warning.
pub fn leaves_from_records(records: Vec<LeafRecord>) -> Vec<Leaf> {
    let explicit: HashSet<String> = records.iter().filter_map(LeafRecord::explicit_id).collect();
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    let mut duplicates = 0usize;

    let leaves: Vec<Leaf> = records
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            let id = record.explicit_id().unwrap_or_else(|| fallback_leaf_id(i, &explicit));
            if !seen.insert(id.clone()) {
                duplicates += 1;
            }
            record.into_leaf_with_id(id)
        })
        .collect();

    if duplicates > 0 {
        tracing::warn!(duplicates, "leaf records repeat an id and will share a placement");
    }
    leaves
}

pub fn edges_from_records(records: Vec<EdgeRecord>, config: &SimulationConfig) -> Vec<Edge> {
    records.into_iter().map(|r| r.into_edge(config)).collect()
}

pub fn load_anchors(path: &Path) -> IoResult<Vec<Anchor>> {
    Ok(anchors_from_records(read_document(path)?))
}

pub fn load_leaves(path: &Path) -> IoResult<Vec<Leaf>> {
    Ok(leaves_from_records(read_document(path)?))
}

pub fn load_edges(path: &Path, config: &SimulationConfig) -> IoResult<Vec<Edge>> {
    Ok(edges_from_records(read_document(path)?, config))
}

// =============================================================================
// Configuration document
// =============================================================================

/// `{ passes: [...], simulation: {...} }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    pub passes: Vec<PassConfig>,
    pub simulation: SimulationConfig,
    pub decimation: DecimationConfig,
}

impl ConfigDocument {
    pub fn load(path: &Path) -> IoResult<Self> {
        read_document(path)
    }
}

// =============================================================================
// Export
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorExport {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub located: bool,
    pub is_primary: bool,
    pub weight: f32,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl From<&Anchor> for AnchorExport {
    fn from(a: &Anchor) -> Self {
        Self {
            id: a.id.clone(),
            slug: a.slug.clone(),
            x: a.position.x,
            y: a.position.y,
            z: a.position.z,
            located: a.located,
            is_primary: a.is_primary,
            weight: a.weight,
            kind: a.kind.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafExport {
    pub id: String,
    pub anchor_ref: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub coordinates: Coordinates,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_coordinates: Option<Coordinates>,
    pub color: [f32; 3],
    pub impact: f32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl From<&Leaf> for LeafExport {
    fn from(l: &Leaf) -> Self {
        Self {
            id: l.id.clone(),
            anchor_ref: l.anchor_ref.clone(),
            x: l.position.x,
            y: l.position.y,
            z: l.position.z,
            coordinates: l.position.into(),
            original_coordinates: l.original_position.map(Coordinates::from),
            color: l.color,
            impact: l.impact,
            extra: l.extra.clone(),
        }
    }
}

/// Simulation counters included in the export
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub engine: String,
    pub ticks: u64,
    pub sanitized: usize,
    #[serde(flatten)]
    pub build: BuildReport,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub pipeline: PipelineReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimation: Option<DecimationReport>,
}

/// The document handed to the renderer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatializationExport {
    pub format_version: u32,
    pub anchors: Vec<AnchorExport>,
    pub leaves: Vec<LeafExport>,
    pub report: ExportReport,
}

impl SpatializationExport {
    pub fn new(anchors: &[Anchor], leaves: &[Leaf], report: ExportReport) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            anchors: anchors.iter().map(AnchorExport::from).collect(),
            leaves: leaves.iter().map(LeafExport::from).collect(),
            report,
        }
    }

    pub fn write(&self, path: &Path) -> IoResult<()> {
        write_document(self, path)
    }

    pub fn to_json(&self) -> IoResult<String> {
        serde_json::to_string(self).map_err(|e| IoError::Write(e.to_string()))
    }
}
