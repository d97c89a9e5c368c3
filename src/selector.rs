//! Per-document routing: the lid → source-id table and its snapshots.
//!
//! The selector maps every dense document id (lid) to the ordinal of the
//! segment inside the current collection that holds its latest mutation.
//! Mappings only move forward as documents are rewritten; the domain only
//! shrinks through explicit lid-space compaction.
//!
//! Persisted snapshots (`selector.dat`) do not store ordinals — ordinals
//! are positions in a collection that no longer exists after restart.
//! They store segment identity codes instead, which recovery remaps onto
//! the rebuilt collection (including redirecting lids whose flush segment
//! was fused away to the fusion output).

use std::sync::Arc;

use crate::error::{Result, StratumError};
use crate::segment::{Lid, SegmentName, SourceId, INVALID_SOURCE, SELECTOR_FILE};
use crate::storage::{Storage, StructReader, StructWriter};

const SELECTOR_MAGIC: u32 = 0x5354_534C; // "STSL"
const SELECTOR_VERSION: u32 = 1;

/// Append-only lid → source-id table owned by the writer.
#[derive(Debug, Clone, Default)]
pub struct SourceSelector {
    table: Vec<SourceId>,
}

impl SourceSelector {
    /// Create an empty selector.
    pub fn new() -> Self {
        SourceSelector::default()
    }

    /// Route `lid` to `source`, growing the domain if needed.
    pub fn set_source(&mut self, lid: Lid, source: SourceId) {
        let index = lid as usize;
        if index >= self.table.len() {
            self.table.resize(index + 1, INVALID_SOURCE);
        }
        self.table[index] = source;
    }

    /// Current source of `lid`, if mapped.
    pub fn resolve(&self, lid: Lid) -> Option<SourceId> {
        self.table
            .get(lid as usize)
            .copied()
            .filter(|&source| source != INVALID_SOURCE)
    }

    /// Size of the lid domain (highest mapped lid + 1).
    pub fn domain_size(&self) -> usize {
        self.table.len()
    }

    /// Shrink the lid domain to `limit`. Every lid at or above the limit
    /// must already be unmapped.
    pub fn compact_lid_space(&mut self, limit: u32) -> Result<()> {
        let limit = limit as usize;
        if limit >= self.table.len() {
            return Ok(());
        }
        if let Some(lid) = self.table[limit..]
            .iter()
            .position(|&source| source != INVALID_SOURCE)
        {
            return Err(StratumError::invalid_operation(format!(
                "cannot compact lid space to {limit}: lid {} is still mapped",
                limit + lid
            )));
        }
        self.table.truncate(limit);
        Ok(())
    }

    /// Remap every entry through `map(old_source) -> new_source`, used
    /// when the collection is rebuilt after a fusion.
    pub fn remap<F: Fn(SourceId) -> SourceId>(&mut self, map: F) {
        for source in &mut self.table {
            if *source != INVALID_SOURCE {
                *source = map(*source);
            }
        }
    }

    /// Freeze the current table into an immutable snapshot.
    pub fn snapshot(&self) -> SelectorSnapshot {
        SelectorSnapshot {
            table: Arc::new(self.table.clone()),
        }
    }

    /// Persist the table under `dir` as `selector.dat`, translating each
    /// source ordinal into a durable segment identity code via
    /// `code_of(source)`. Unmapped lids persist as code zero. Returns the
    /// number of bytes written.
    pub fn save<F>(&self, storage: &dyn Storage, dir: &str, code_of: F) -> Result<u64>
    where
        F: Fn(SourceId) -> u64,
    {
        let output = storage.create_output(&format!("{dir}/{SELECTOR_FILE}"))?;
        let mut writer = StructWriter::new(output);

        writer.write_u32(SELECTOR_MAGIC)?;
        writer.write_u32(SELECTOR_VERSION)?;
        writer.write_varint(self.table.len() as u64)?;
        for &source in &self.table {
            let code = if source == INVALID_SOURCE {
                0
            } else {
                code_of(source)
            };
            writer.write_varint(code)?;
        }

        writer.finish()
    }

    /// Load a persisted snapshot: one segment identity per lid, `None`
    /// for unmapped lids.
    pub fn load(storage: &dyn Storage, dir: &str) -> Result<Vec<Option<SegmentName>>> {
        let input = storage.open_input(&format!("{dir}/{SELECTOR_FILE}"))?;
        let mut reader = StructReader::new(input)?;

        let magic = reader.read_u32()?;
        if magic != SELECTOR_MAGIC {
            return Err(StratumError::corrupt(format!(
                "{dir}: bad selector magic {magic:08x}"
            )));
        }
        let version = reader.read_u32()?;
        if version != SELECTOR_VERSION {
            return Err(StratumError::corrupt(format!(
                "{dir}: unsupported selector version {version}"
            )));
        }

        let len = reader.read_varint()? as usize;
        let mut identities = Vec::with_capacity(len);
        for _ in 0..len {
            let code = reader.read_varint()?;
            identities.push(SegmentName::from_code(code));
        }

        reader.verify()?;
        Ok(identities)
    }
}

/// Immutable point-in-time view of the selector, held by one
/// [`crate::collection::IndexCollection`]. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SelectorSnapshot {
    table: Arc<Vec<SourceId>>,
}

impl SelectorSnapshot {
    /// Source of `lid` as of this snapshot, if mapped.
    pub fn resolve(&self, lid: Lid) -> Option<SourceId> {
        self.table
            .get(lid as usize)
            .copied()
            .filter(|&source| source != INVALID_SOURCE)
    }

    /// Size of the lid domain.
    pub fn domain_size(&self) -> usize {
        self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentKind;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_set_and_resolve() {
        let mut selector = SourceSelector::new();
        selector.set_source(3, 1);

        assert_eq!(selector.resolve(3), Some(1));
        assert_eq!(selector.resolve(0), None);
        assert_eq!(selector.resolve(100), None);
        assert_eq!(selector.domain_size(), 4);

        // Mappings move forward.
        selector.set_source(3, 2);
        assert_eq!(selector.resolve(3), Some(2));
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let mut selector = SourceSelector::new();
        selector.set_source(1, 0);
        let snapshot = selector.snapshot();

        selector.set_source(1, 5);
        selector.set_source(9, 5);

        assert_eq!(snapshot.resolve(1), Some(0));
        assert_eq!(snapshot.resolve(9), None);
        assert_eq!(selector.resolve(1), Some(5));
    }

    #[test]
    fn test_compact_lid_space() {
        let mut selector = SourceSelector::new();
        selector.set_source(0, 1);
        selector.set_source(5, 1);

        // Lid 5 is still mapped.
        assert!(selector.compact_lid_space(3).is_err());

        selector.table[5] = INVALID_SOURCE;
        selector.compact_lid_space(3).unwrap();
        assert_eq!(selector.domain_size(), 3);
        assert_eq!(selector.resolve(0), Some(1));
    }

    #[test]
    fn test_save_load_identity_codes() {
        let storage = MemoryStorage::new();
        let mut selector = SourceSelector::new();
        selector.set_source(0, 0);
        selector.set_source(2, 1);

        let sources = [SegmentName::fusion(4), SegmentName::flush(7)];
        selector
            .save(&storage, "index.flush.7", |source| {
                sources[source as usize].code()
            })
            .unwrap();

        let identities = SourceSelector::load(&storage, "index.flush.7").unwrap();
        assert_eq!(identities.len(), 3);
        assert_eq!(identities[0], Some(SegmentName::fusion(4)));
        assert_eq!(identities[1], None);
        assert_eq!(identities[2], Some(SegmentName::flush(7)));
        assert_eq!(identities[0].unwrap().kind, SegmentKind::Fusion);
    }
}
