//! Anchor lookup index
//!
//! Built once per pipeline invocation from a snapshot of the anchors, so later
//! simulation steps never leak into a running pipeline.

use std::collections::HashMap;

use crate::model::Anchor;

/// O(1) lookup of anchors by id or slug, plus the primary subset
#[derive(Debug, Clone, Default)]
pub struct AnchorIndex {
    anchors: Vec<Anchor>,
    by_id: HashMap<String, usize>,
    by_slug: HashMap<String, usize>,
    primary: Vec<usize>,
    duplicates: usize,
}

impl AnchorIndex {
    /// Build the index. Duplicate ids or slugs resolve last-write-wins.
    pub fn build(anchors: &[Anchor]) -> Self {
        let anchors = anchors.to_vec();
        let mut by_id = HashMap::with_capacity(anchors.len());
        let mut by_slug = HashMap::new();
        let mut duplicates = 0;

        for (i, anchor) in anchors.iter().enumerate() {
            if by_id.insert(anchor.id.clone(), i).is_some() {
                duplicates += 1;
            }
            if let Some(slug) = &anchor.slug {
                if by_slug.insert(slug.clone(), i).is_some() {
                    duplicates += 1;
                }
            }
        }

        // Only the winning record for each id counts toward the primary subset
        let primary = anchors
            .iter()
            .enumerate()
            .filter(|(i, a)| a.is_primary && by_id.get(&a.id) == Some(i))
            .map(|(i, _)| i)
            .collect();

        if duplicates > 0 {
            tracing::warn!(duplicates, "resolved duplicate anchor identifiers (last write wins)");
        }

        Self {
            anchors,
            by_id,
            by_slug,
            primary,
            duplicates,
        }
    }

    /// Look up by id first, then by slug
    pub fn resolve(&self, key: &str) -> Option<&Anchor> {
        self.by_id
            .get(key)
            .or_else(|| self.by_slug.get(key))
            .map(|&i| &self.anchors[i])
    }

    pub fn by_id(&self, id: &str) -> Option<&Anchor> {
        self.by_id.get(id).map(|&i| &self.anchors[i])
    }

    pub fn by_slug(&self, slug: &str) -> Option<&Anchor> {
        self.by_slug.get(slug).map(|&i| &self.anchors[i])
    }

    /// Anchors flagged as primary
    pub fn primary(&self) -> impl Iterator<Item = &Anchor> {
        self.primary.iter().map(|&i| &self.anchors[i])
    }

    pub fn is_primary(&self, key: &str) -> bool {
        self.resolve(key).is_some_and(|a| a.is_primary)
    }

    /// Number of duplicate identifiers overwritten during the build
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Distinct anchors reachable by id
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Distinct anchors in first-seen order (winners only)
    pub fn anchors(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors
            .iter()
            .enumerate()
            .filter(|(i, a)| self.by_id.get(&a.id) == Some(i))
            .map(|(_, a)| a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Vec3;

    fn anchors() -> Vec<Anchor> {
        vec![
            Anchor::new("1", Vec3::new(0.0, 0.0, 0.0))
                .with_slug("alice")
                .with_primary(true),
            Anchor::new("2", Vec3::new(10.0, 0.0, 0.0)).with_slug("bob"),
            Anchor::new("3", Vec3::new(0.0, 10.0, 0.0)).with_primary(true),
        ]
    }

    #[test]
    fn resolves_by_id_and_slug() {
        let index = AnchorIndex::build(&anchors());

        assert_eq!(index.resolve("1").unwrap().id, "1");
        assert_eq!(index.resolve("bob").unwrap().id, "2");
        assert_eq!(index.by_slug("alice").unwrap().id, "1");
        assert!(index.by_id("alice").is_none());
        assert!(index.resolve("nobody").is_none());
    }

    #[test]
    fn collects_primary_subset() {
        let index = AnchorIndex::build(&anchors());
        let primary: Vec<&str> = index.primary().map(|a| a.id.as_str()).collect();

        assert_eq!(primary, vec!["1", "3"]);
        assert!(index.is_primary("alice"));
        assert!(!index.is_primary("bob"));
    }

    #[test]
    fn duplicates_resolve_last_write_wins() {
        let mut list = anchors();
        list.push(Anchor::new("2", Vec3::new(99.0, 0.0, 0.0)).with_primary(true));

        let index = AnchorIndex::build(&list);

        assert_eq!(index.duplicates(), 1);
        assert_eq!(index.len(), 3);
        assert_eq!(index.by_id("2").unwrap().position.x, 99.0);
        // Slug still points at the record that declared it
        assert_eq!(index.by_slug("bob").unwrap().position.x, 10.0);
        assert_eq!(index.primary().count(), 3);
    }

    #[test]
    fn overwritten_primary_is_dropped() {
        let list = vec![
            Anchor::new("x", Vec3::ZERO).with_primary(true),
            Anchor::new("x", Vec3::ZERO).with_primary(false),
        ];
        let index = AnchorIndex::build(&list);

        assert_eq!(index.primary().count(), 0);
        assert_eq!(index.anchors().count(), 1);
    }

    #[test]
    fn empty_index() {
        let index = AnchorIndex::build(&[]);
        assert!(index.is_empty());
        assert!(index.resolve("any").is_none());
    }
}
