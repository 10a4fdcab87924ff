//! Core data model shared by the simulation and the spatialization passes
//!
//! Anchors are the characters laid out by the force simulation, leaves are
//! the posts placed around them, and edges are the springs between anchors.
//! All coordinates are f32 so they can be uploaded to GPU buffers as-is.

pub use glam::Vec3;

/// Direction helpers missing from [`Vec3`]
pub trait VecExt {
    /// Unit vector in the same direction, or `None` for (near) zero or non-finite vectors
    fn normalized(self, epsilon: f32) -> Option<Vec3>;
}

impl VecExt for Vec3 {
    fn normalized(self, epsilon: f32) -> Option<Vec3> {
        let len = self.length();
        if len.is_finite() && len > epsilon {
            Some(self / len)
        } else {
            None
        }
    }
}

// =============================================================================
// Default Constants
// =============================================================================

/// Default repulsion charge of an anchor
pub const DEFAULT_CHARGE: f32 = 30.0;

/// Default rest length of an edge
pub const DEFAULT_REST_DISTANCE: f32 = 60.0;

/// Default spring strength of an edge
pub const DEFAULT_EDGE_STRENGTH: f32 = 0.1;

/// Neutral gray used for leaves before a palette is applied
pub const DEFAULT_LEAF_COLOR: [f32; 3] = [0.8, 0.8, 0.8];

/// A primary graph node (character) whose position drives the leaf layout
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    /// Unique identifier
    pub id: String,
    /// Optional secondary key leaves may reference instead of the id
    pub slug: Option<String>,
    /// Current position
    pub position: Vec3,
    /// False when the source record carried no coordinates
    pub located: bool,
    /// High-priority anchors form the "primary" subset
    pub is_primary: bool,
    /// Relative importance (used for rendering size and export)
    pub weight: f32,
    /// Repulsion charge in the force simulation (magnitude, >= 0)
    pub charge: f32,
    /// Fixed anchors are never moved by the simulation
    pub fixed: bool,
    /// Free-form type tag from the source data (e.g. "character", "source")
    pub kind: Option<String>,
}

impl Anchor {
    /// Create a located anchor at the given position
    pub fn new(id: impl Into<String>, position: Vec3) -> Self {
        Self {
            id: id.into(),
            slug: None,
            position,
            located: true,
            is_primary: false,
            weight: 1.0,
            charge: DEFAULT_CHARGE,
            fixed: false,
            kind: None,
        }
    }

    /// Create an anchor without known coordinates
    pub fn unlocated(id: impl Into<String>) -> Self {
        Self {
            located: false,
            ..Self::new(id, Vec3::ZERO)
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        self
    }

    pub fn with_charge(mut self, charge: f32) -> Self {
        self.charge = charge;
        self
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }
}

/// A content item (post) placed around the anchor it references
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// Unique identifier
    pub id: String,
    /// Id or slug of the anchor this leaf belongs to
    pub anchor_ref: String,
    /// Current position
    pub position: Vec3,
    /// RGB color, floats in [0, 1]
    pub color: [f32; 3],
    /// Relative impact of the post (rendering size)
    pub impact: f32,
    /// Position read from the source data, kept for the export
    pub original_position: Option<Vec3>,
    /// Source fields the core does not interpret, preserved on export
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Leaf {
    /// Create a leaf at the origin
    pub fn new(id: impl Into<String>, anchor_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            anchor_ref: anchor_ref.into(),
            position: Vec3::ZERO,
            color: DEFAULT_LEAF_COLOR,
            impact: 1.0,
            original_position: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_impact(mut self, impact: f32) -> Self {
        self.impact = impact;
        self
    }
}

/// A spring constraint between two anchors
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// Id of the source anchor
    pub source: String,
    /// Id of the target anchor
    pub target: String,
    /// Rest length of the spring
    pub rest_distance: f32,
    /// Spring constant
    pub strength: f32,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            rest_distance: DEFAULT_REST_DISTANCE,
            strength: DEFAULT_EDGE_STRENGTH,
        }
    }

    pub fn with_rest_distance(mut self, rest_distance: f32) -> Self {
        self.rest_distance = rest_distance;
        self
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }
}
