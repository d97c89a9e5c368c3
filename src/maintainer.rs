//! The index maintainer: mutation application, flush and fusion state
//! machines, on-disk metadata, and startup recovery.
//!
//! The maintainer owns the live memory segment, the ordered list of disk
//! segments, and the source selector. Callers follow a single-writer
//! discipline — mutations and flush/fusion initiation are serialized onto
//! one logical writer — while queries take reference-counted
//! [`IndexCollection`] snapshots and never block on maintenance.
//!
//! Visibility is driven entirely by collection swaps: `commit`,
//! `init_flush`, and fusion completion each build a fresh collection and
//! install it atomically. Durability is driven by the per-segment
//! three-file protocol (`segment.dat`, `selector.dat`, `schema.txt`, then
//! `serial.dat` as the marker) plus the [`FusionSpec`] record.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::collection::{CollectionRef, IndexCollection, SourceEntry};
use crate::error::{Result, StratumError};
use crate::schema::Schema;
use crate::segment::{
    read_serial_marker, FieldMap, Lid, MemorySegment, Segment, SegmentData, SegmentIdentity,
    SegmentKind, SegmentName, SourceId, StoredSegment, SCHEMA_FILE, SERIAL_FILE,
};
use crate::selector::SourceSelector;
use crate::storage::{read_text, Storage, StorageRef};

pub mod config;
pub mod executor;
pub mod flush;
pub mod fusion;
pub mod stats;
pub mod target;

pub use config::MaintainerConfig;
pub use executor::MaintenanceExecutor;
pub use flush::FlushJob;
pub use fusion::{FusionJob, FusionSpec, FUSION_SPEC_FILE};
pub use stats::{FlushStats, FusionStats, MaintainerStats};
pub use target::{
    CancelToken, FlushTarget, FusionTarget, MaintenanceJob, MaintenanceNeed, MaintenanceTarget,
};

/// A frozen memory segment waiting to become durable. Retained across
/// failed attempts so the flush can simply be retried.
struct PendingFlush {
    name: SegmentName,
    segment: Arc<StoredSegment>,
    serial: u64,
    selector: SourceSelector,
    source_codes: Vec<u64>,
    schema_text: String,
    memory_bytes_before: usize,
}

/// State guarded by the writer lock.
struct WriterState {
    memory: Arc<MemorySegment>,
    memory_generation: u64,
    disks: Vec<Arc<StoredSegment>>,
    selector: SourceSelector,
    selector_dirty: bool,
    schema: Schema,
    schema_dirty: bool,
    current_serial: u64,
    flushed_serial: u64,
    next_flush_id: u64,
    fusion_spec: FusionSpec,
    pending_flush: Option<PendingFlush>,
    flush_in_progress: bool,
    fusion_in_progress: bool,
    last_flush: Option<FlushStats>,
    last_fusion: Option<FusionStats>,
}

impl WriterState {
    fn memory_ordinal(&self) -> SourceId {
        self.disks.len() as SourceId
    }
}

/// Orchestrates the segment lifecycle for one index.
pub struct IndexMaintainer {
    pub(crate) storage: StorageRef,
    config: MaintainerConfig,
    state: Mutex<WriterState>,
    current: RwLock<CollectionRef>,
    flush_requested: AtomicBool,
}

impl std::fmt::Debug for IndexMaintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexMaintainer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IndexMaintainer {
    /// Open an index, recovering any durable state found in `storage`.
    ///
    /// Recovery discards segment directories without a valid `serial.dat`
    /// (crashed writes), reconciles the fusion spec against the surviving
    /// directories, rebuilds the selector from the newest segment's
    /// snapshot, and verifies the recorded schema is compatible with
    /// `schema`. A schema mismatch is a fatal error.
    pub fn open(
        storage: StorageRef,
        schema: Schema,
        config: MaintainerConfig,
    ) -> Result<Arc<IndexMaintainer>> {
        let (disks, selector, fusion_spec, next_flush_id, schema_dirty) =
            recover(&storage, &schema)?;

        let flushed_serial = disks.iter().map(|d| d.serial()).max().unwrap_or(0);
        tracing::info!(
            disk_segments = disks.len(),
            flushed_serial,
            next_flush_id,
            "index opened"
        );

        let state = WriterState {
            memory: Arc::new(MemorySegment::new()),
            memory_generation: 0,
            disks,
            selector,
            selector_dirty: false,
            schema,
            schema_dirty,
            current_serial: flushed_serial,
            flushed_serial,
            next_flush_id,
            fusion_spec,
            pending_flush: None,
            flush_in_progress: false,
            fusion_in_progress: false,
            last_flush: None,
            last_fusion: None,
        };
        let collection = Self::build_collection(&state);

        Ok(Arc::new(IndexMaintainer {
            storage,
            config,
            state: Mutex::new(state),
            current: RwLock::new(collection),
            flush_requested: AtomicBool::new(false),
        }))
    }

    /// The collection currently serving queries.
    pub fn collection(&self) -> CollectionRef {
        Arc::clone(&self.current.read())
    }

    /// Last applied serial number.
    pub fn current_serial(&self) -> u64 {
        self.state.lock().current_serial
    }

    /// Serial number durable on disk.
    pub fn flushed_serial(&self) -> u64 {
        self.state.lock().flushed_serial
    }

    /// Tuning configuration.
    pub fn config(&self) -> &MaintainerConfig {
        &self.config
    }

    /// Apply a put mutation. Serials at or below the current serial are
    /// already reflected and replaying them is a no-op.
    pub fn put_document(&self, lid: Lid, fields: FieldMap, serial: u64) -> Result<()> {
        let mut state = self.state.lock();
        if serial <= state.current_serial {
            tracing::debug!(lid, serial, "put already reflected, skipping");
            return Ok(());
        }
        let ordinal = state.memory_ordinal();
        state.memory.put(lid, fields, serial);
        state.selector.set_source(lid, ordinal);
        state.selector_dirty = true;
        state.current_serial = serial;
        Ok(())
    }

    /// Apply a remove mutation, recording a tombstone. Idempotent under
    /// replay like [`IndexMaintainer::put_document`].
    pub fn remove_document(&self, lid: Lid, serial: u64) -> Result<()> {
        let mut state = self.state.lock();
        if serial <= state.current_serial {
            tracing::debug!(lid, serial, "remove already reflected, skipping");
            return Ok(());
        }
        let ordinal = state.memory_ordinal();
        state.memory.remove(lid, serial);
        state.selector.set_source(lid, ordinal);
        state.selector_dirty = true;
        state.current_serial = serial;
        Ok(())
    }

    /// Make mutations up to `serial` visible to queries and acknowledge
    /// via `done` (fire-and-forget, not a durability barrier).
    pub fn commit<F: FnOnce() + Send>(&self, serial: u64, done: F) {
        {
            let mut state = self.state.lock();
            state.memory.commit(serial);
            state.current_serial = state.current_serial.max(serial);
            let collection = Self::build_collection(&state);
            *self.current.write() = collection;
        }
        done();
    }

    /// Replace the active schema. Journaled like a mutation: the change
    /// becomes durable with the next flush. The new schema must be able to
    /// serve every existing segment (fields may be added, never removed or
    /// retyped).
    pub fn set_schema(&self, schema: Schema, serial: u64) -> Result<()> {
        let mut state = self.state.lock();
        if serial <= state.current_serial {
            return Ok(());
        }
        if !schema.is_compatible_with(&state.schema) {
            return Err(StratumError::schema(
                "new schema is incompatible with the active schema",
            ));
        }
        if schema != state.schema {
            state.schema = schema;
            state.schema_dirty = true;
        }
        state.current_serial = serial;
        Ok(())
    }

    /// Shrink the selector's lid domain to `limit`. Journaled like a
    /// mutation and durable only once flushed. Fails if a lid at or above
    /// the limit is still mapped.
    pub fn compact_lid_space(&self, limit: u32, serial: u64) -> Result<()> {
        let mut state = self.state.lock();
        if serial <= state.current_serial {
            return Ok(());
        }
        state.selector.compact_lid_space(limit)?;
        state.selector_dirty = true;
        state.current_serial = serial;
        Ok(())
    }

    /// Ask for a flush on the next scheduler poll (checkpoint/shutdown).
    pub fn request_flush(&self) {
        self.flush_requested.store(true, Ordering::Release);
    }

    /// Whether a flush should run, and how urgently.
    pub fn needs_flush(&self) -> MaintenanceNeed {
        let state = self.state.lock();
        if state.flush_in_progress {
            return MaintenanceNeed::none();
        }
        let memory_bytes = state.memory.memory_usage();
        let urgent = memory_bytes >= self.config.urgent_flush_bytes;
        let needed = urgent
            || memory_bytes >= self.config.flush_threshold_bytes
            || state.pending_flush.is_some()
            || self.flush_requested.load(Ordering::Acquire);
        if needed {
            MaintenanceNeed::needed(urgent)
        } else {
            MaintenanceNeed::none()
        }
    }

    /// Freeze the memory segment and return a cancellable flush job, or
    /// `None` when there is nothing to flush (or a flush is running).
    ///
    /// Runs on the writer: the frozen segment takes over the memory
    /// segment's ordinal, a fresh empty memory segment is installed, and
    /// the new collection is swapped in before this returns — so the job
    /// itself needs no coordination with subsequent mutations. An empty
    /// memory segment is not flushed unless a selector or schema change
    /// still needs to be made durable.
    ///
    /// `target_serial` is the serial the caller wants durable; the frozen
    /// segment always covers at least that (it contains every applied
    /// mutation).
    ///
    /// Freezing includes mutations whose serial has not been committed
    /// yet, and the frozen segment serves queries without a commit gate —
    /// its contents would become visible on reload anyway. Callers that
    /// need commit-gated visibility must commit before initiating a
    /// flush; the replay source reconciles anything uncommitted after a
    /// crash.
    pub fn init_flush(self: &Arc<Self>, target_serial: u64) -> Result<Option<FlushJob>> {
        let mut state = self.state.lock();
        if state.flush_in_progress {
            return Ok(None);
        }

        if state.pending_flush.is_none() {
            if state.memory.entry_count() == 0 && !state.selector_dirty && !state.schema_dirty {
                self.flush_requested.store(false, Ordering::Release);
                tracing::debug!(target_serial, "flush skipped: nothing to persist");
                return Ok(None);
            }

            let memory_bytes_before = state.memory.memory_usage();
            let mut data = state.memory.freeze();
            // The segment is complete through the current serial: commits
            // and lid-space compactions may have advanced it past the last
            // document mutation.
            data.serial = state.current_serial;
            let serial = data.serial;

            let name = SegmentName::flush(state.next_flush_id);
            state.next_flush_id += 1;

            let frozen = Arc::new(StoredSegment::from_frozen(
                name,
                data,
                Arc::clone(&self.storage),
            ));
            // The frozen segment keeps the ordinal the memory segment had,
            // so no selector entry needs rewriting.
            state.disks.push(Arc::clone(&frozen));
            state.memory = Arc::new(MemorySegment::new());
            state.memory_generation += 1;

            let mut source_codes: Vec<u64> =
                state.disks.iter().map(|d| d.name().code()).collect();
            source_codes.push(0); // the new, still-empty memory segment

            state.pending_flush = Some(PendingFlush {
                name,
                segment: frozen,
                serial,
                selector: state.selector.clone(),
                source_codes,
                schema_text: state.schema.to_text(),
                memory_bytes_before,
            });
            state.selector_dirty = false;
            state.schema_dirty = false;

            let collection = Self::build_collection(&state);
            *self.current.write() = collection;
            tracing::info!(segment = %name, serial, "flush initiated");
        } else {
            tracing::info!(target_serial, "retrying pending flush");
        }

        state.flush_in_progress = true;
        let job = state.pending_flush.as_ref().map(|pending| FlushJob {
            maintainer: Arc::clone(self),
            name: pending.name,
            segment: Arc::clone(&pending.segment),
            serial: pending.serial,
            selector: pending.selector.clone(),
            source_codes: pending.source_codes.clone(),
            schema_text: pending.schema_text.clone(),
            memory_bytes_before: pending.memory_bytes_before,
        });
        Ok(job)
    }

    /// Whether a fusion should run, and how urgently.
    pub fn needs_fusion(&self) -> MaintenanceNeed {
        let state = self.state.lock();
        if state.fusion_in_progress {
            return MaintenanceNeed::none();
        }
        let fusable = usize::from(state.fusion_spec.last_fusion_id > 0)
            + state.fusion_spec.flush_ids.len();
        if fusable < 2 {
            return MaintenanceNeed::none();
        }
        let disk_count = state.disks.len();
        let disk_bytes: u64 = state.disks.iter().map(|d| d.disk_bytes()).sum();
        let urgent = disk_count > self.config.urgent_disk_segments
            || disk_bytes >= self.config.urgent_disk_bytes;
        let needed = urgent || disk_count > self.config.max_disk_segments;
        if needed {
            MaintenanceNeed::needed(urgent)
        } else {
            MaintenanceNeed::none()
        }
    }

    /// Select the oldest contiguous run of durable disk segments and
    /// return a cancellable fusion job, or `None` when fewer than two
    /// durable segments are available (or a fusion is running).
    ///
    /// Inputs are the previous fusion output (if any) followed by the
    /// lowest pending flush ids, capped by the configured batch size. The
    /// output id is the highest flush id among the inputs, which keeps
    /// fusion ids monotonic.
    pub fn init_fusion(self: &Arc<Self>) -> Result<Option<FusionJob>> {
        let mut state = self.state.lock();
        if state.fusion_in_progress {
            return Ok(None);
        }

        let batch = self.config.fusion_batch_size.max(2);
        let mut expected: Vec<SegmentName> = Vec::new();
        if state.fusion_spec.last_fusion_id > 0 {
            expected.push(SegmentName::fusion(state.fusion_spec.last_fusion_id));
        }
        for &id in &state.fusion_spec.flush_ids {
            if expected.len() >= batch {
                break;
            }
            expected.push(SegmentName::flush(id));
        }
        if expected.len() < 2 {
            return Ok(None);
        }

        // The durable segments form the oldest prefix of the collection;
        // a pending (not yet durable) flush sits after them.
        let mut inputs = Vec::with_capacity(expected.len());
        for (ordinal, name) in expected.iter().enumerate() {
            match state.disks.get(ordinal) {
                Some(disk) if disk.name() == *name => inputs.push(Arc::clone(disk)),
                _ => {
                    return Err(StratumError::invalid_operation(format!(
                        "fusion input {name} is not at collection ordinal {ordinal}"
                    )));
                }
            }
        }

        let output_id = expected
            .iter()
            .filter(|n| n.kind == SegmentKind::Flush)
            .map(|n| n.id)
            .max()
            .unwrap_or(state.fusion_spec.last_fusion_id);
        let name = SegmentName::fusion(output_id);
        let serial = inputs.iter().map(|s| s.serial()).max().unwrap_or(0);

        let fused_count = inputs.len();
        let mut source_codes: Vec<u64> = state
            .disks
            .iter()
            .enumerate()
            .map(|(ordinal, disk)| {
                if ordinal < fused_count {
                    name.code()
                } else {
                    disk.name().code()
                }
            })
            .collect();
        source_codes.push(0); // memory segment

        state.fusion_in_progress = true;
        tracing::info!(segment = %name, inputs = fused_count, serial, "fusion initiated");

        Ok(Some(FusionJob {
            maintainer: Arc::clone(self),
            name,
            inputs,
            selector: state.selector.clone(),
            source_codes,
            schema_text: state.schema.to_text(),
            serial,
        }))
    }

    /// Point-in-time statistics for status endpoints.
    pub fn stats(&self) -> MaintainerStats {
        let state = self.state.lock();
        MaintainerStats {
            current_serial: state.current_serial,
            flushed_serial: state.flushed_serial,
            memory_segment_bytes: state.memory.memory_usage(),
            memory_doc_count: state.memory.doc_count(),
            disk_segment_count: state.disks.len(),
            disk_bytes: state.disks.iter().map(|d| d.disk_bytes()).sum(),
            flush_in_progress: state.flush_in_progress,
            fusion_in_progress: state.fusion_in_progress,
            last_flush: state.last_flush.clone(),
            last_fusion: state.last_fusion.clone(),
        }
    }

    fn build_collection(state: &WriterState) -> CollectionRef {
        let mut entries = Vec::with_capacity(state.disks.len() + 1);
        for disk in &state.disks {
            entries.push(SourceEntry {
                identity: SegmentIdentity::Stored(disk.name()),
                segment: Arc::clone(disk) as Arc<dyn Segment>,
            });
        }
        entries.push(SourceEntry {
            identity: SegmentIdentity::Memory(state.memory_generation),
            segment: Arc::clone(&state.memory) as Arc<dyn Segment>,
        });
        Arc::new(IndexCollection::new(entries, state.selector.snapshot()))
    }

    /// Record a durable flush: append its id to the fusion spec, clear
    /// the pending state, and advance the flushed serial.
    pub(crate) fn complete_flush(
        &self,
        name: SegmentName,
        serial: u64,
        disk_bytes: u64,
        memory_bytes_before: usize,
        cpu_cost_estimate: u64,
    ) -> FlushStats {
        let mut state = self.state.lock();
        state.fusion_spec.flush_ids.push(name.id);
        if let Err(e) = state.fusion_spec.save(self.storage.as_ref()) {
            // The segment is already durable; recovery adopts it from the
            // directory scan if this spec update is lost.
            tracing::warn!(segment = %name, error = %e, "failed to persist fusion spec");
        }
        state.pending_flush = None;
        state.flush_in_progress = false;
        state.flushed_serial = state.flushed_serial.max(serial);
        self.flush_requested.store(false, Ordering::Release);

        let stats = FlushStats {
            flush_id: name.id,
            serial,
            memory_bytes_before,
            memory_bytes_after: state.memory.memory_usage(),
            disk_bytes_written: disk_bytes,
            cpu_cost_estimate,
        };
        state.last_flush = Some(stats.clone());
        tracing::info!(segment = %name, serial, disk_bytes, "flush completed");
        stats
    }

    /// Record a failed or cancelled flush. The frozen segment stays
    /// pending and the same flush is retried on the next poll.
    pub(crate) fn fail_flush(&self, name: SegmentName, error: &StratumError) {
        let mut state = self.state.lock();
        state.flush_in_progress = false;
        if error.is_cancelled() {
            tracing::debug!(segment = %name, "flush cancelled, will retry");
        } else {
            tracing::warn!(segment = %name, error = %error, "flush failed, will retry");
        }
    }

    /// Install a durable fused segment: persist the updated fusion spec,
    /// substitute the inputs in the collection, remap the selector, and
    /// retire the input directories (deleted when the last reference
    /// drops).
    pub(crate) fn complete_fusion(
        &self,
        job: &FusionJob,
        data: SegmentData,
        disk_bytes: u64,
    ) -> Result<FusionStats> {
        let mut state = self.state.lock();
        let fused_count = job.inputs.len();

        // The inputs must still form the oldest prefix; flushes completed
        // during the fusion only appended behind them.
        for (ordinal, input) in job.inputs.iter().enumerate() {
            if state.disks.get(ordinal).map(|d| d.name()) != Some(input.name()) {
                return Err(StratumError::invalid_operation(format!(
                    "fusion input {} moved during fusion",
                    input.name()
                )));
            }
        }

        // Persist the spec before touching in-memory state; if this fails
        // the fused directory is cleaned up and the fusion retried.
        let mut spec = state.fusion_spec.clone();
        let input_flush_ids = job.input_flush_ids();
        spec.flush_ids.retain(|id| !input_flush_ids.contains(id));
        spec.last_fusion_id = job.name.id;
        spec.save(self.storage.as_ref())?;
        state.fusion_spec = spec;

        let cpu_cost_estimate = data.docs.len() as u64;
        let doc_serial = data.serial;
        let fused = Arc::new(StoredSegment::from_frozen(
            job.name,
            data,
            Arc::clone(&self.storage),
        ));
        fused.set_disk_bytes(disk_bytes);

        let retired: Vec<Arc<StoredSegment>> = state.disks.drain(..fused_count).collect();
        state.disks.insert(0, fused);
        let fused_count = fused_count as SourceId;
        state
            .selector
            .remap(|ordinal| if ordinal < fused_count { 0 } else { ordinal - fused_count + 1 });

        let collection = Self::build_collection(&state);
        *self.current.write() = collection;
        state.fusion_in_progress = false;

        let input_disk_bytes = retired.iter().map(|s| s.disk_bytes()).sum();
        for segment in retired {
            segment.retire();
        }

        let stats = FusionStats {
            fusion_id: job.name.id,
            serial: doc_serial,
            input_count: fused_count as usize,
            input_disk_bytes,
            output_disk_bytes: disk_bytes,
            cpu_cost_estimate,
        };
        state.last_fusion = Some(stats.clone());
        tracing::info!(segment = %job.name, inputs = stats.input_count, disk_bytes,
            "fusion completed");
        Ok(stats)
    }

    /// Record a failed or cancelled fusion. Inputs and the fusion spec
    /// are untouched; the fusion is retried on the next poll.
    pub(crate) fn fail_fusion(&self, name: SegmentName, error: &StratumError) {
        let mut state = self.state.lock();
        state.fusion_in_progress = false;
        if error.is_cancelled() {
            tracing::debug!(segment = %name, "fusion cancelled");
        } else {
            tracing::warn!(segment = %name, error = %error, "fusion failed, will retry");
        }
    }
}

type Recovered = (
    Vec<Arc<StoredSegment>>,
    SourceSelector,
    FusionSpec,
    u64,
    bool,
);

/// Scan storage, discard crash garbage, reconcile the fusion spec, and
/// rebuild the selector and schema state.
fn recover(storage_ref: &StorageRef, schema: &Schema) -> Result<Recovered> {
    let storage: &dyn Storage = storage_ref.as_ref();
    let files = storage.list_files()?;

    // Stray temp files from interrupted atomic replaces.
    for file in &files {
        if file.ends_with(".tmp") && !file.contains('/') {
            tracing::warn!(file = %file, "removing stray temp file");
            let _ = storage.delete_file(file);
        }
    }

    // Group files into segment directories.
    let mut dirs: BTreeMap<SegmentName, Vec<String>> = BTreeMap::new();
    for file in &files {
        if let Some((dir, _)) = file.split_once('/') {
            if let Some(name) = SegmentName::parse(dir) {
                dirs.entry(name).or_default().push(file.clone());
            }
        }
    }

    // Ids are never reused, so the counter is seeded from everything seen,
    // garbage included.
    let mut max_seen_id = 0u64;
    let mut valid: Vec<SegmentName> = Vec::new();
    for (name, dir_files) in &dirs {
        max_seen_id = max_seen_id.max(name.id);
        let durable = read_serial_marker(storage, &name.dir_name()).is_ok();
        if durable {
            valid.push(*name);
        } else {
            tracing::warn!(segment = %name, "discarding incomplete segment from crashed write");
            for file in dir_files {
                let _ = storage.delete_file(file);
            }
        }
    }

    let mut spec = FusionSpec::load(storage)?;
    let original_spec = spec.clone();

    // A recorded fusion whose directory is gone cannot be served; fall
    // back to the newest surviving fusion output.
    let newest_fusion = valid
        .iter()
        .filter(|n| n.kind == SegmentKind::Fusion)
        .map(|n| n.id)
        .max();
    if spec.last_fusion_id > 0 && !valid.contains(&SegmentName::fusion(spec.last_fusion_id)) {
        let fallback = newest_fusion.unwrap_or(0);
        tracing::warn!(
            recorded = spec.last_fusion_id,
            fallback,
            "recorded fusion output is missing"
        );
        spec.last_fusion_id = fallback;
    } else if spec == FusionSpec::default() {
        // An empty spec alongside a durable fusion means the spec file
        // was lost, not that the fusion was mid-flight: a running fusion
        // always has its inputs on record. Adopt the output rather than
        // discard durable data; surviving flushes are adopted below.
        if let Some(id) = newest_fusion {
            tracing::warn!(fusion = id, "adopting durable fusion output after lost fusion spec");
            spec.last_fusion_id = id;
        }
    }

    // Fusion outputs not recorded in the spec were mid-flight when the
    // process died; the spec still lists their inputs, so discard the
    // output and let the fusion rerun.
    for name in valid.clone() {
        if name.kind == SegmentKind::Fusion && name.id != spec.last_fusion_id {
            tracing::warn!(segment = %name, "discarding fusion output not recorded in spec");
            delete_segment_dir(storage, &dirs, name);
            valid.retain(|n| *n != name);
        }
    }

    // Flushes at or below the last fusion id were consumed by it; their
    // deferred deletion may not have run before the crash.
    let last_fusion_id = spec.last_fusion_id;
    for name in valid.clone() {
        if name.kind == SegmentKind::Flush && name.id <= last_fusion_id {
            tracing::info!(segment = %name, "removing segment superseded by fusion");
            delete_segment_dir(storage, &dirs, name);
            valid.retain(|n| *n != name);
        }
    }

    // Drop spec entries whose directory did not survive (Scenario: a
    // flush directory lost its marker), then adopt durable flushes the
    // spec missed (crash between the marker write and the spec update).
    spec.flush_ids
        .retain(|&id| valid.contains(&SegmentName::flush(id)));
    for name in &valid {
        if name.kind == SegmentKind::Flush && !spec.flush_ids.contains(&name.id) {
            tracing::info!(segment = %name, "adopting durable segment missing from fusion spec");
            spec.flush_ids.push(name.id);
        }
    }
    spec.flush_ids.sort_unstable();
    spec.flush_ids.dedup();

    if spec != original_spec {
        spec.save(storage)?;
    }

    // Load surviving segments in collection order: fusion output first,
    // then flushes ascending.
    let mut disks: Vec<Arc<StoredSegment>> = Vec::new();
    if spec.last_fusion_id > 0 {
        disks.push(Arc::new(StoredSegment::load(
            Arc::clone(storage_ref),
            SegmentName::fusion(spec.last_fusion_id),
        )?));
    }
    for &id in &spec.flush_ids {
        disks.push(Arc::new(StoredSegment::load(
            Arc::clone(storage_ref),
            SegmentName::flush(id),
        )?));
    }

    // Schema compatibility against the newest segment's recorded schema.
    let mut schema_dirty = false;
    if let Some(newest) = disks.last() {
        let text = read_text(storage, &newest.name().file(SCHEMA_FILE))?;
        let recorded = Schema::parse_text(&text)?;
        if !schema.is_compatible_with(&recorded) {
            return Err(StratumError::schema(format!(
                "configured schema is incompatible with the schema recorded in {}",
                newest.name()
            )));
        }
        schema_dirty = recorded != *schema;
    }

    // Selector rebuild from the newest segment's snapshot: exact identity
    // matches map to their ordinal, identities consumed by the fusion map
    // to the fusion output.
    let mut selector = SourceSelector::new();
    if let Some(newest) = disks.last() {
        let identities = SourceSelector::load(storage, &newest.name().dir_name())?;
        let ordinals: BTreeMap<SegmentName, SourceId> = disks
            .iter()
            .enumerate()
            .map(|(ordinal, d)| (d.name(), ordinal as SourceId))
            .collect();
        for (lid, identity) in identities.iter().enumerate() {
            let Some(identity) = identity else { continue };
            let source = if let Some(&ordinal) = ordinals.get(identity) {
                Some(ordinal)
            } else if spec.last_fusion_id > 0 && identity.id <= spec.last_fusion_id {
                Some(0)
            } else {
                tracing::warn!(lid, segment = %identity,
                    "dropping selector entry for missing segment");
                None
            };
            if let Some(source) = source {
                selector.set_source(lid as Lid, source);
            }
        }
    }

    let next_flush_id = max_seen_id
        .max(spec.flush_ids.iter().copied().max().unwrap_or(0))
        .max(spec.last_fusion_id)
        + 1;

    Ok((disks, selector, spec, next_flush_id, schema_dirty))
}

fn delete_segment_dir(
    storage: &dyn crate::storage::Storage,
    dirs: &BTreeMap<SegmentName, Vec<String>>,
    name: SegmentName,
) {
    // Marker first, so a crash mid-deletion leaves recognizable garbage.
    let marker = name.file(SERIAL_FILE);
    if storage.file_exists(&marker) {
        let _ = storage.delete_file(&marker);
    }
    if let Some(dir_files) = dirs.get(&name) {
        for file in dir_files {
            if storage.file_exists(file) {
                let _ = storage.delete_file(file);
            }
        }
    }
}
