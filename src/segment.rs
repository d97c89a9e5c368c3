//! Segment abstraction: the live memory segment and immutable stored
//! segments behind one capability set.
//!
//! The maintainer treats both kinds uniformly through the [`Segment`]
//! trait (search, commit, memory usage, serialize). The payload kept here
//! is deliberately small — stored fields plus token postings — because the
//! lifecycle contracts, not the postings format, are the point of this
//! crate.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::error::{Result, StratumError};
use crate::storage::{read_text, write_all, Storage, StorageRef, StructReader, StructWriter};

/// Dense local document id.
pub type Lid = u32;

/// Ordinal of a segment inside an [`crate::collection::IndexCollection`].
pub type SourceId = u32;

/// Marker for an unmapped lid in the source selector.
pub const INVALID_SOURCE: SourceId = SourceId::MAX;

/// Stored document fields.
pub type FieldMap = BTreeMap<String, String>;

/// Segment payload file.
pub const DATA_FILE: &str = "segment.dat";
/// Source selector snapshot file.
pub const SELECTOR_FILE: &str = "selector.dat";
/// Schema snapshot file.
pub const SCHEMA_FILE: &str = "schema.txt";
/// Durability marker: the serial number the segment is complete through.
pub const SERIAL_FILE: &str = "serial.dat";

const DATA_MAGIC: u32 = 0x5354_5347; // "STSG"
const DATA_VERSION: u32 = 1;

/// Kind of a durable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SegmentKind {
    /// Produced by flushing the memory segment.
    Flush,
    /// Produced by fusing several stored segments.
    Fusion,
}

/// Durable segment name: kind plus a never-reused id, encoded in the
/// directory name (`index.flush.<id>` / `index.fusion.<id>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentName {
    /// Segment kind.
    pub kind: SegmentKind,
    /// Monotonic id within the kind.
    pub id: u64,
}

impl SegmentName {
    /// Name a flush segment.
    pub fn flush(id: u64) -> Self {
        SegmentName {
            kind: SegmentKind::Flush,
            id,
        }
    }

    /// Name a fusion segment.
    pub fn fusion(id: u64) -> Self {
        SegmentName {
            kind: SegmentKind::Fusion,
            id,
        }
    }

    /// Directory name under the index root.
    pub fn dir_name(&self) -> String {
        match self.kind {
            SegmentKind::Flush => format!("index.flush.{}", self.id),
            SegmentKind::Fusion => format!("index.fusion.{}", self.id),
        }
    }

    /// Storage name of a file inside this segment's directory.
    pub fn file(&self, file_name: &str) -> String {
        format!("{}/{}", self.dir_name(), file_name)
    }

    /// Parse a directory name back into a segment name.
    pub fn parse(dir_name: &str) -> Option<SegmentName> {
        let (kind, id) = if let Some(id) = dir_name.strip_prefix("index.flush.") {
            (SegmentKind::Flush, id)
        } else if let Some(id) = dir_name.strip_prefix("index.fusion.") {
            (SegmentKind::Fusion, id)
        } else {
            return None;
        };
        id.parse().ok().map(|id| SegmentName { kind, id })
    }

    /// Dense code used in persisted selector snapshots. Zero is reserved
    /// for "unmapped"; ids start at 1 so codes never collide with it.
    pub fn code(&self) -> u64 {
        let kind_bit = match self.kind {
            SegmentKind::Flush => 0,
            SegmentKind::Fusion => 1,
        };
        (self.id << 1) | kind_bit
    }

    /// Decode a selector snapshot code. Zero decodes to `None`.
    pub fn from_code(code: u64) -> Option<SegmentName> {
        if code == 0 {
            return None;
        }
        let kind = if code & 1 == 0 {
            SegmentKind::Flush
        } else {
            SegmentKind::Fusion
        };
        Some(SegmentName {
            kind,
            id: code >> 1,
        })
    }
}

impl std::fmt::Display for SegmentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// Identity of a source inside an index collection: either the live
/// memory segment (tagged with its generation) or a durable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentIdentity {
    /// The live memory segment.
    Memory(u64),
    /// A durable (or durable-to-be) segment.
    Stored(SegmentName),
}

impl std::fmt::Display for SegmentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentIdentity::Memory(generation) => write!(f, "memory.{generation}"),
            SegmentIdentity::Stored(name) => write!(f, "{name}"),
        }
    }
}

/// One document entry: its latest fields, or a tombstone after removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocEntry {
    /// Serial number of the mutation that produced this entry.
    pub serial: u64,
    /// Stored fields; `None` marks a tombstone.
    pub fields: Option<FieldMap>,
}

impl DocEntry {
    fn estimated_bytes(&self) -> usize {
        let field_bytes: usize = self
            .fields
            .iter()
            .flatten()
            .map(|(k, v)| k.len() + v.len() + 16)
            .sum();
        field_bytes + 32
    }
}

/// Immutable segment payload: per-lid entries complete through `serial`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentData {
    /// Serial number this payload is complete through.
    pub serial: u64,
    /// Document entries, tombstones included.
    pub docs: BTreeMap<Lid, DocEntry>,
}

impl SegmentData {
    /// Number of live documents (tombstones excluded).
    pub fn doc_count(&self) -> usize {
        self.docs.values().filter(|e| e.fields.is_some()).count()
    }

    /// Estimated heap footprint in bytes.
    pub fn estimated_bytes(&self) -> usize {
        self.docs.values().map(DocEntry::estimated_bytes).sum()
    }

    /// Write the payload as `segment.dat` under `dir`, returning the
    /// number of bytes written.
    pub fn save(&self, storage: &dyn Storage, dir: &str) -> Result<u64> {
        let output = storage.create_output(&format!("{dir}/{DATA_FILE}"))?;
        let mut writer = StructWriter::new(output);

        writer.write_u32(DATA_MAGIC)?;
        writer.write_u32(DATA_VERSION)?;
        writer.write_u64(self.serial)?;
        writer.write_varint(self.docs.len() as u64)?;

        for (lid, entry) in &self.docs {
            writer.write_varint(u64::from(*lid))?;
            writer.write_u64(entry.serial)?;
            match &entry.fields {
                Some(fields) => {
                    writer.write_u8(1)?;
                    writer.write_varint(fields.len() as u64)?;
                    for (name, value) in fields {
                        writer.write_string(name)?;
                        writer.write_string(value)?;
                    }
                }
                None => writer.write_u8(0)?,
            }
        }

        writer.finish()
    }

    /// Load a payload written by [`SegmentData::save`].
    pub fn load(storage: &dyn Storage, dir: &str) -> Result<SegmentData> {
        let input = storage.open_input(&format!("{dir}/{DATA_FILE}"))?;
        let mut reader = StructReader::new(input)?;

        let magic = reader.read_u32()?;
        if magic != DATA_MAGIC {
            return Err(StratumError::corrupt(format!(
                "{dir}: bad segment magic {magic:08x}"
            )));
        }
        let version = reader.read_u32()?;
        if version != DATA_VERSION {
            return Err(StratumError::corrupt(format!(
                "{dir}: unsupported segment version {version}"
            )));
        }

        let serial = reader.read_u64()?;
        let doc_count = reader.read_varint()? as usize;
        let mut docs = BTreeMap::new();

        for _ in 0..doc_count {
            let lid = reader.read_varint()? as Lid;
            let entry_serial = reader.read_u64()?;
            let fields = match reader.read_u8()? {
                0 => None,
                1 => {
                    let field_count = reader.read_varint()? as usize;
                    let mut fields = FieldMap::new();
                    for _ in 0..field_count {
                        let name = reader.read_string()?;
                        let value = reader.read_string()?;
                        fields.insert(name, value);
                    }
                    Some(fields)
                }
                other => {
                    return Err(StratumError::corrupt(format!(
                        "{dir}: bad entry tag {other}"
                    )));
                }
            };
            docs.insert(
                lid,
                DocEntry {
                    serial: entry_serial,
                    fields,
                },
            );
        }

        reader.verify()?;
        Ok(SegmentData { serial, docs })
    }
}

/// Write the durability marker (`serial.dat`) for a segment directory.
/// This must be the last file written: its presence marks the segment
/// valid.
pub fn write_serial_marker(storage: &dyn Storage, dir: &str, serial: u64) -> Result<()> {
    write_all(storage, &format!("{dir}/{SERIAL_FILE}"), format!("{serial}\n").as_bytes())
}

/// Read a segment's durability marker. Missing or unparsable markers mean
/// the directory is garbage from a crashed write.
pub fn read_serial_marker(storage: &dyn Storage, dir: &str) -> Result<u64> {
    let text = read_text(storage, &format!("{dir}/{SERIAL_FILE}"))?;
    text.trim()
        .parse()
        .map_err(|_| StratumError::corrupt(format!("{dir}: invalid serial marker")))
}

/// Split a field value into lowercase index tokens.
pub(crate) fn tokenize(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split_whitespace()
        .map(|token| token.to_lowercase())
}

fn build_postings(data: &SegmentData) -> BTreeMap<String, Vec<Lid>> {
    let mut postings: BTreeMap<String, BTreeSet<Lid>> = BTreeMap::new();
    for (lid, entry) in &data.docs {
        if let Some(fields) = &entry.fields {
            for value in fields.values() {
                for token in tokenize(value) {
                    postings.entry(token).or_default().insert(*lid);
                }
            }
        }
    }
    postings
        .into_iter()
        .map(|(term, lids)| (term, lids.into_iter().collect()))
        .collect()
}

/// Common capability set of memory and stored segments.
pub trait Segment: Send + Sync + std::fmt::Debug {
    /// Matching lids for a single token, ascending.
    fn search(&self, term: &str) -> Vec<Lid>;

    /// Stored fields of a document; `None` if absent or removed.
    fn fields(&self, lid: Lid) -> Option<FieldMap>;

    /// True when the segment records an entry (document or tombstone)
    /// for this lid.
    fn has_entry(&self, lid: Lid) -> bool;

    /// Serial number the segment is complete through.
    fn serial(&self) -> u64;

    /// Number of live documents.
    fn doc_count(&self) -> usize;

    /// Estimated heap footprint in bytes.
    fn memory_usage(&self) -> usize;

    /// Advance the committed watermark. No-op for immutable segments.
    fn commit(&self, serial: u64);

    /// Serialize the payload under `dir`, returning bytes written.
    fn serialize_to(&self, storage: &dyn Storage, dir: &str) -> Result<u64>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    docs: AHashMap<Lid, DocEntry>,
    postings: AHashMap<String, BTreeSet<Lid>>,
    committed_serial: u64,
    last_serial: u64,
    bytes: usize,
}

impl MemoryInner {
    fn retract(&mut self, lid: Lid) {
        if let Some(old) = self.docs.remove(&lid) {
            self.bytes = self.bytes.saturating_sub(old.estimated_bytes());
            if let Some(fields) = &old.fields {
                for value in fields.values() {
                    for token in tokenize(value) {
                        if let Some(lids) = self.postings.get_mut(&token) {
                            lids.remove(&lid);
                            if lids.is_empty() {
                                self.postings.remove(&token);
                            }
                        }
                    }
                }
            }
        }
    }

    fn insert(&mut self, lid: Lid, entry: DocEntry) {
        self.bytes += entry.estimated_bytes();
        if let Some(fields) = &entry.fields {
            for value in fields.values() {
                for token in tokenize(value) {
                    self.postings.entry(token).or_default().insert(lid);
                }
            }
        }
        self.last_serial = self.last_serial.max(entry.serial);
        self.docs.insert(lid, entry);
    }
}

/// The live mutable segment receiving document mutations.
///
/// Mutations are applied by the single writer; queries observe them only
/// once `commit` advances the committed watermark past their serial.
#[derive(Debug, Default)]
pub struct MemorySegment {
    inner: RwLock<MemoryInner>,
}

impl MemorySegment {
    /// Create an empty memory segment.
    pub fn new() -> Self {
        MemorySegment::default()
    }

    /// Apply a put mutation.
    pub fn put(&self, lid: Lid, fields: FieldMap, serial: u64) {
        let mut inner = self.inner.write();
        inner.retract(lid);
        inner.insert(
            lid,
            DocEntry {
                serial,
                fields: Some(fields),
            },
        );
    }

    /// Apply a remove mutation (records a tombstone).
    pub fn remove(&self, lid: Lid, serial: u64) {
        let mut inner = self.inner.write();
        inner.retract(lid);
        inner.insert(
            lid,
            DocEntry {
                serial,
                fields: None,
            },
        );
    }

    /// Number of entries, tombstones included. Zero means a flush of this
    /// segment would write nothing.
    pub fn entry_count(&self) -> usize {
        self.inner.read().docs.len()
    }

    /// Snapshot all applied entries as an immutable payload, complete
    /// through the last applied serial.
    pub fn freeze(&self) -> SegmentData {
        let inner = self.inner.read();
        SegmentData {
            serial: inner.last_serial,
            docs: inner.docs.iter().map(|(lid, e)| (*lid, e.clone())).collect(),
        }
    }

    /// Last applied serial number.
    pub fn last_serial(&self) -> u64 {
        self.inner.read().last_serial
    }
}

impl Segment for MemorySegment {
    fn search(&self, term: &str) -> Vec<Lid> {
        let inner = self.inner.read();
        match inner.postings.get(term) {
            Some(lids) => lids
                .iter()
                .copied()
                .filter(|lid| {
                    inner
                        .docs
                        .get(lid)
                        .map(|e| e.serial <= inner.committed_serial)
                        .unwrap_or(false)
                })
                .collect(),
            None => Vec::new(),
        }
    }

    fn fields(&self, lid: Lid) -> Option<FieldMap> {
        let inner = self.inner.read();
        inner
            .docs
            .get(&lid)
            .filter(|e| e.serial <= inner.committed_serial)
            .and_then(|e| e.fields.clone())
    }

    fn has_entry(&self, lid: Lid) -> bool {
        let inner = self.inner.read();
        inner
            .docs
            .get(&lid)
            .map(|e| e.serial <= inner.committed_serial)
            .unwrap_or(false)
    }

    fn serial(&self) -> u64 {
        self.inner.read().last_serial
    }

    fn doc_count(&self) -> usize {
        self.inner
            .read()
            .docs
            .values()
            .filter(|e| e.fields.is_some())
            .count()
    }

    fn memory_usage(&self) -> usize {
        self.inner.read().bytes
    }

    fn commit(&self, serial: u64) {
        let mut inner = self.inner.write();
        inner.committed_serial = inner.committed_serial.max(serial);
    }

    fn serialize_to(&self, storage: &dyn Storage, dir: &str) -> Result<u64> {
        self.freeze().save(storage, dir)
    }
}

/// An immutable segment: either a frozen memory segment awaiting flush
/// completion, or a segment loaded from disk.
///
/// Holds a deferred-deletion guard: once `retire` is called, the segment's
/// directory is removed when the last reference (typically the last
/// in-flight query collection) drops.
#[derive(Debug)]
pub struct StoredSegment {
    name: SegmentName,
    data: SegmentData,
    postings: BTreeMap<String, Vec<Lid>>,
    disk_bytes: AtomicU64,
    storage: StorageRef,
    retired: AtomicBool,
}

impl StoredSegment {
    /// Wrap a frozen payload under its assigned segment name. The payload
    /// is not durable yet; the flush job serializes it.
    pub fn from_frozen(name: SegmentName, data: SegmentData, storage: StorageRef) -> Self {
        let postings = build_postings(&data);
        StoredSegment {
            name,
            data,
            postings,
            disk_bytes: AtomicU64::new(0),
            storage,
            retired: AtomicBool::new(false),
        }
    }

    /// Load a durable segment from its directory, verifying the payload
    /// checksum and the serial marker.
    pub fn load(storage: StorageRef, name: SegmentName) -> Result<Self> {
        let dir = name.dir_name();
        let marker_serial = read_serial_marker(storage.as_ref(), &dir)?;
        let data = SegmentData::load(storage.as_ref(), &dir)?;
        if data.serial != marker_serial {
            return Err(StratumError::corrupt(format!(
                "{dir}: serial marker {marker_serial} does not match payload serial {}",
                data.serial
            )));
        }

        let mut disk_bytes = 0;
        for file_name in [DATA_FILE, SELECTOR_FILE, SCHEMA_FILE, SERIAL_FILE] {
            if let Ok(size) = storage.file_size(&name.file(file_name)) {
                disk_bytes += size;
            }
        }

        let postings = build_postings(&data);
        Ok(StoredSegment {
            name,
            data,
            postings,
            disk_bytes: AtomicU64::new(disk_bytes),
            storage,
            retired: AtomicBool::new(false),
        })
    }

    /// Segment name.
    pub fn name(&self) -> SegmentName {
        self.name
    }

    /// Immutable payload.
    pub fn data(&self) -> &SegmentData {
        &self.data
    }

    /// Bytes this segment occupies on disk (0 until written).
    pub fn disk_bytes(&self) -> u64 {
        self.disk_bytes.load(Ordering::Relaxed)
    }

    /// Record the on-disk footprint after a successful write.
    pub fn set_disk_bytes(&self, bytes: u64) {
        self.disk_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Mark the segment superseded: its directory is deleted once the
    /// last reference drops.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }
}

impl Segment for StoredSegment {
    fn search(&self, term: &str) -> Vec<Lid> {
        self.postings.get(term).cloned().unwrap_or_default()
    }

    fn fields(&self, lid: Lid) -> Option<FieldMap> {
        self.data.docs.get(&lid).and_then(|e| e.fields.clone())
    }

    fn has_entry(&self, lid: Lid) -> bool {
        self.data.docs.contains_key(&lid)
    }

    fn serial(&self) -> u64 {
        self.data.serial
    }

    fn doc_count(&self) -> usize {
        self.data.doc_count()
    }

    fn memory_usage(&self) -> usize {
        self.data.estimated_bytes()
    }

    fn commit(&self, _serial: u64) {}

    fn serialize_to(&self, storage: &dyn Storage, dir: &str) -> Result<u64> {
        self.data.save(storage, dir)
    }
}

impl Drop for StoredSegment {
    fn drop(&mut self) {
        if !self.retired.load(Ordering::Acquire) {
            return;
        }
        let dir = self.name.dir_name();
        // Invalidate the durability marker first so a crash mid-cleanup
        // leaves recognizable garbage instead of a half-valid segment.
        for file_name in [SERIAL_FILE, DATA_FILE, SELECTOR_FILE, SCHEMA_FILE] {
            let path = self.name.file(file_name);
            if self.storage.file_exists(&path) {
                if let Err(e) = self.storage.delete_file(&path) {
                    tracing::warn!(segment = %dir, file = file_name, error = %e,
                        "failed to delete retired segment file");
                }
            }
        }
        tracing::debug!(segment = %dir, "removed retired segment directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_segment_name_roundtrip() {
        let name = SegmentName::flush(17);
        assert_eq!(name.dir_name(), "index.flush.17");
        assert_eq!(SegmentName::parse("index.flush.17"), Some(name));
        assert_eq!(SegmentName::from_code(name.code()), Some(name));

        let fusion = SegmentName::fusion(4);
        assert_eq!(fusion.dir_name(), "index.fusion.4");
        assert_eq!(SegmentName::parse("index.fusion.4"), Some(fusion));
        assert_eq!(SegmentName::from_code(fusion.code()), Some(fusion));

        assert_eq!(SegmentName::parse("index.flush."), None);
        assert_eq!(SegmentName::parse("fusion.spec"), None);
        assert_eq!(SegmentName::from_code(0), None);
    }

    #[test]
    fn test_memory_segment_commit_gates_visibility() {
        let segment = MemorySegment::new();
        segment.put(1, fields(&[("title", "Hello World")]), 10);

        // Uncommitted mutations are invisible.
        assert!(segment.search("hello").is_empty());
        assert!(segment.fields(1).is_none());

        segment.commit(10);
        assert_eq!(segment.search("hello"), vec![1]);
        assert_eq!(segment.fields(1).unwrap()["title"], "Hello World");
        assert_eq!(segment.doc_count(), 1);
    }

    #[test]
    fn test_memory_segment_remove_leaves_tombstone() {
        let segment = MemorySegment::new();
        segment.put(5, fields(&[("title", "doomed")]), 3);
        segment.remove(5, 4);
        segment.commit(4);

        assert!(segment.search("doomed").is_empty());
        assert!(segment.fields(5).is_none());
        assert!(segment.has_entry(5));
        assert_eq!(segment.entry_count(), 1);
        assert_eq!(segment.doc_count(), 0);
    }

    #[test]
    fn test_memory_usage_tracks_mutations() {
        let segment = MemorySegment::new();
        assert_eq!(segment.memory_usage(), 0);

        segment.put(1, fields(&[("body", "some text here")]), 1);
        let after_put = segment.memory_usage();
        assert!(after_put > 0);

        segment.remove(1, 2);
        assert!(segment.memory_usage() < after_put);
    }

    #[test]
    fn test_payload_save_load() {
        let storage = MemoryStorage::new();
        let segment = MemorySegment::new();
        segment.put(1, fields(&[("title", "alpha beta")]), 7);
        segment.remove(2, 8);

        let data = segment.freeze();
        assert_eq!(data.serial, 8);
        data.save(&storage, "index.flush.1").unwrap();

        let loaded = SegmentData::load(&storage, "index.flush.1").unwrap();
        assert_eq!(loaded, data);
        assert_eq!(loaded.doc_count(), 1);
    }

    #[test]
    fn test_stored_segment_load_and_search() {
        let storage: StorageRef = Arc::new(MemoryStorage::new());
        let name = SegmentName::flush(1);

        let segment = MemorySegment::new();
        segment.put(3, fields(&[("title", "Quick Fox")]), 12);
        let data = segment.freeze();
        data.save(storage.as_ref(), &name.dir_name()).unwrap();
        write_serial_marker(storage.as_ref(), &name.dir_name(), 12).unwrap();

        let stored = StoredSegment::load(Arc::clone(&storage), name).unwrap();
        assert_eq!(stored.serial(), 12);
        assert_eq!(stored.search("quick"), vec![3]);
        assert_eq!(stored.search("missing"), Vec::<Lid>::new());
        assert!(stored.disk_bytes() > 0);
    }

    #[test]
    fn test_stored_segment_serial_mismatch_rejected() {
        let storage: StorageRef = Arc::new(MemoryStorage::new());
        let name = SegmentName::flush(2);

        let data = SegmentData {
            serial: 5,
            docs: BTreeMap::new(),
        };
        data.save(storage.as_ref(), &name.dir_name()).unwrap();
        write_serial_marker(storage.as_ref(), &name.dir_name(), 6).unwrap();

        assert!(StoredSegment::load(storage, name).is_err());
    }

    #[test]
    fn test_retired_segment_deletes_directory_on_drop() {
        let storage: StorageRef = Arc::new(MemoryStorage::new());
        let name = SegmentName::flush(3);

        let data = SegmentData::default();
        data.save(storage.as_ref(), &name.dir_name()).unwrap();
        write_serial_marker(storage.as_ref(), &name.dir_name(), 0).unwrap();

        let stored = Arc::new(StoredSegment::load(Arc::clone(&storage), name).unwrap());
        let extra_ref = Arc::clone(&stored);
        stored.retire();
        drop(stored);

        // Still referenced, so the files survive.
        assert!(storage.file_exists(&name.file(SERIAL_FILE)));

        drop(extra_ref);
        assert!(!storage.file_exists(&name.file(SERIAL_FILE)));
        assert!(!storage.file_exists(&name.file(DATA_FILE)));
    }
}
