//! Immutable, reference-counted view of the index used by queries.
//!
//! A collection pairs an ordered list of segments with the selector
//! snapshot that was valid when the list was built. The maintainer builds
//! a fresh collection and swaps it in at every commit, flush, and fusion;
//! queries hold one collection for their whole execution, so routing never
//! shifts under a running query.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::segment::{FieldMap, Lid, Segment, SegmentIdentity, SourceId};
use crate::selector::SelectorSnapshot;

/// Shared handle to a collection.
pub type CollectionRef = Arc<IndexCollection>;

/// One source: a segment and its identity for diagnostics.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// Identity of the segment (memory generation or durable name).
    pub identity: SegmentIdentity,
    /// The segment itself.
    pub segment: Arc<dyn Segment>,
}

/// Ordered segments plus the matching selector snapshot.
#[derive(Debug, Default)]
pub struct IndexCollection {
    entries: Vec<SourceEntry>,
    selector: SelectorSnapshot,
}

impl IndexCollection {
    /// Build a collection from sources and their selector snapshot.
    pub fn new(entries: Vec<SourceEntry>, selector: SelectorSnapshot) -> Self {
        IndexCollection { entries, selector }
    }

    /// Source id currently holding `lid`, if mapped.
    pub fn resolve(&self, lid: Lid) -> Option<SourceId> {
        self.selector.resolve(lid)
    }

    /// Number of sources.
    pub fn source_count(&self) -> usize {
        self.entries.len()
    }

    /// Identity of the source at `ordinal`.
    pub fn source_identity(&self, ordinal: SourceId) -> Option<SegmentIdentity> {
        self.entries.get(ordinal as usize).map(|e| e.identity)
    }

    /// Segment at `ordinal`.
    pub fn segment(&self, ordinal: SourceId) -> Option<&Arc<dyn Segment>> {
        self.entries.get(ordinal as usize).map(|e| &e.segment)
    }

    /// All sources in order.
    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    /// Selector snapshot of this collection.
    pub fn selector(&self) -> &SelectorSnapshot {
        &self.selector
    }

    /// Matching lids for a single token across all sources, ascending.
    ///
    /// A segment's hit counts only if the selector still routes that lid
    /// to it, so stale copies in older segments never surface.
    pub fn search(&self, term: &str) -> Vec<Lid> {
        let mut hits = BTreeSet::new();
        for (ordinal, entry) in self.entries.iter().enumerate() {
            for lid in entry.segment.search(term) {
                if self.selector.resolve(lid) == Some(ordinal as SourceId) {
                    hits.insert(lid);
                }
            }
        }
        hits.into_iter().collect()
    }

    /// Stored fields of `lid`, routed through the selector.
    pub fn fields(&self, lid: Lid) -> Option<FieldMap> {
        let source = self.selector.resolve(lid)?;
        self.entries
            .get(source as usize)
            .and_then(|e| e.segment.fields(lid))
    }

    /// Total live documents across sources, counted through routing.
    pub fn doc_count(&self) -> usize {
        (0..self.selector.domain_size() as Lid)
            .filter(|&lid| self.fields(lid).is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::MemorySegment;
    use crate::selector::SourceSelector;

    fn doc(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn collection_with_two_sources() -> IndexCollection {
        // Old segment holds a stale copy of lid 1; new segment holds the
        // current one plus lid 2.
        let old = MemorySegment::new();
        old.put(1, doc(&[("title", "stale rust")]), 1);
        old.commit(1);

        let new = MemorySegment::new();
        new.put(1, doc(&[("title", "fresh rust")]), 2);
        new.put(2, doc(&[("title", "other rust")]), 3);
        new.commit(3);

        let mut selector = SourceSelector::new();
        selector.set_source(1, 1);
        selector.set_source(2, 1);

        IndexCollection::new(
            vec![
                SourceEntry {
                    identity: SegmentIdentity::Memory(0),
                    segment: Arc::new(old),
                },
                SourceEntry {
                    identity: SegmentIdentity::Memory(1),
                    segment: Arc::new(new),
                },
            ],
            selector.snapshot(),
        )
    }

    #[test]
    fn test_search_respects_routing() {
        let collection = collection_with_two_sources();

        // Both segments match "rust" for lid 1, but only the routed copy
        // counts, so lid 1 appears once.
        assert_eq!(collection.search("rust"), vec![1, 2]);
        assert_eq!(collection.search("stale"), Vec::<Lid>::new());
        assert_eq!(collection.search("fresh"), vec![1]);
    }

    #[test]
    fn test_fields_routed_to_current_source() {
        let collection = collection_with_two_sources();

        assert_eq!(collection.fields(1).unwrap()["title"], "fresh rust");
        assert!(collection.fields(7).is_none());
        assert_eq!(collection.doc_count(), 2);
    }

    #[test]
    fn test_source_accessors() {
        let collection = collection_with_two_sources();

        assert_eq!(collection.source_count(), 2);
        assert_eq!(
            collection.source_identity(0),
            Some(SegmentIdentity::Memory(0))
        );
        assert_eq!(collection.resolve(2), Some(1));
        assert!(collection.segment(5).is_none());
    }
}
