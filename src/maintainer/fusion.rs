//! Fusion bookkeeping and the asynchronous fusion unit of work.
//!
//! [`FusionSpec`] is the durable record of which flush segments await
//! fusion and which fusion completed last. It is the recovery anchor: a
//! fusion directory not named by the spec is discarded at startup and the
//! fusion simply reruns, which makes fusion idempotent — it only ever
//! reads already-durable segments and the spec is not rewritten until the
//! fused output is fully durable.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StratumError};
use crate::maintainer::target::{CancelToken, MaintenanceJob};
use crate::maintainer::{FusionStats, IndexMaintainer};
use crate::segment::{
    write_serial_marker, SegmentData, SegmentKind, SegmentName, SourceId, StoredSegment,
    DATA_FILE, SCHEMA_FILE, SELECTOR_FILE, SERIAL_FILE,
};
use crate::selector::SourceSelector;
use crate::storage::{read_text, replace_atomic, write_all, Storage};

/// Storage name of the persisted fusion spec.
pub const FUSION_SPEC_FILE: &str = "fusion.spec";

/// Durable record of segments pending fusion and the last completed one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionSpec {
    /// Flush ids not yet consumed by a fusion, ascending.
    pub flush_ids: Vec<u64>,
    /// Id of the last completed fusion; zero when none has run.
    pub last_fusion_id: u64,
}

impl FusionSpec {
    /// Load the persisted spec; a missing file is an empty spec.
    pub fn load(storage: &dyn Storage) -> Result<FusionSpec> {
        if !storage.file_exists(FUSION_SPEC_FILE) {
            return Ok(FusionSpec::default());
        }
        let text = read_text(storage, FUSION_SPEC_FILE)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Persist the spec with an atomic replace (temp file + rename).
    pub fn save(&self, storage: &dyn Storage) -> Result<()> {
        let json = serde_json::to_string(self)?;
        replace_atomic(storage, FUSION_SPEC_FILE, json.as_bytes())
    }
}

/// One cancellable fusion: merges the oldest run of disk segments.
pub struct FusionJob {
    pub(crate) maintainer: Arc<IndexMaintainer>,
    pub(crate) name: SegmentName,
    pub(crate) inputs: Vec<Arc<StoredSegment>>,
    pub(crate) selector: SourceSelector,
    pub(crate) source_codes: Vec<u64>,
    pub(crate) schema_text: String,
    pub(crate) serial: u64,
}

impl FusionJob {
    /// Segment name this job will write.
    pub fn name(&self) -> SegmentName {
        self.name
    }

    /// Run the fusion, reporting the outcome to the maintainer.
    ///
    /// Any failure — merge, write, or completion (e.g. persisting the
    /// updated spec) — removes the output files and leaves the fusion
    /// pending, so the next scheduler poll retries it.
    pub fn execute(&self, cancel: &CancelToken) -> Result<FusionStats> {
        self.merge(cancel)
            .and_then(|data| self.write_segment(&data, cancel).map(|bytes| (data, bytes)))
            .and_then(|(data, disk_bytes)| self.maintainer.complete_fusion(self, data, disk_bytes))
            .map_err(|e| {
                self.cleanup_partial();
                self.maintainer.fail_fusion(self.name, &e);
                e
            })
    }

    /// Merge the input payloads, keeping for each lid only the entry from
    /// the input the selector routes it to. Entries routed elsewhere are
    /// stale copies superseded by a newer segment; tombstones routed here
    /// are preserved.
    fn merge(&self, cancel: &CancelToken) -> Result<SegmentData> {
        let mut docs = BTreeMap::new();
        for (ordinal, input) in self.inputs.iter().enumerate() {
            self.check_cancel(cancel)?;
            for (lid, entry) in &input.data().docs {
                if self.selector.resolve(*lid) == Some(ordinal as SourceId) {
                    docs.insert(*lid, entry.clone());
                }
            }
        }
        Ok(SegmentData {
            serial: self.serial,
            docs,
        })
    }

    fn write_segment(&self, data: &SegmentData, cancel: &CancelToken) -> Result<u64> {
        let storage = self.maintainer.storage.as_ref();
        let dir = self.name.dir_name();
        let mut bytes = 0;

        self.check_cancel(cancel)?;
        bytes += data.save(storage, &dir)?;

        self.check_cancel(cancel)?;
        bytes += self.selector.save(storage, &dir, |source| {
            self.source_codes.get(source as usize).copied().unwrap_or(0)
        })?;

        self.check_cancel(cancel)?;
        write_all(
            storage,
            &self.name.file(SCHEMA_FILE),
            self.schema_text.as_bytes(),
        )?;
        bytes += self.schema_text.len() as u64;

        self.check_cancel(cancel)?;
        write_serial_marker(storage, &dir, self.serial)?;
        bytes += self.serial.to_string().len() as u64 + 1;

        Ok(bytes)
    }

    /// Flush ids among the inputs (the previous fusion output, if it is
    /// an input, is tracked through `last_fusion_id` instead).
    pub(crate) fn input_flush_ids(&self) -> Vec<u64> {
        self.inputs
            .iter()
            .map(|s| s.name())
            .filter(|n| n.kind == SegmentKind::Flush)
            .map(|n| n.id)
            .collect()
    }

    fn check_cancel(&self, cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            Err(StratumError::cancelled(format!("fusion {}", self.name)))
        } else {
            Ok(())
        }
    }

    /// Remove the output files, marker first. Inputs and the fusion spec
    /// are untouched by a failed or cancelled fusion, so after cleanup the
    /// on-disk state is exactly as it was before the job started.
    fn cleanup_partial(&self) {
        let storage = self.maintainer.storage.as_ref();
        for file_name in [SERIAL_FILE, DATA_FILE, SELECTOR_FILE, SCHEMA_FILE] {
            let path = self.name.file(file_name);
            if storage.file_exists(&path) {
                if let Err(e) = storage.delete_file(&path) {
                    tracing::warn!(segment = %self.name, file = file_name, error = %e,
                        "failed to clean up partial fusion file");
                }
            }
        }
    }
}

impl MaintenanceJob for FusionJob {
    fn run(self: Box<Self>, cancel: &CancelToken) -> Result<()> {
        self.execute(cancel).map(|_| ())
    }

    fn describe(&self) -> String {
        format!("fusion {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_spec_missing_file_is_empty() {
        let storage = MemoryStorage::new();
        let spec = FusionSpec::load(&storage).unwrap();
        assert_eq!(spec, FusionSpec::default());
    }

    #[test]
    fn test_spec_save_load_roundtrip() {
        let storage = MemoryStorage::new();
        let spec = FusionSpec {
            flush_ids: vec![5, 6, 7],
            last_fusion_id: 4,
        };
        spec.save(&storage).unwrap();

        assert_eq!(FusionSpec::load(&storage).unwrap(), spec);
        assert!(!storage.file_exists("fusion.spec.tmp"));
    }

    #[test]
    fn test_spec_rejects_malformed_json() {
        let storage = MemoryStorage::new();
        crate::storage::write_all(&storage, FUSION_SPEC_FILE, b"not json").unwrap();
        assert!(FusionSpec::load(&storage).is_err());
    }
}
