//! The asynchronous flush unit of work.
//!
//! A [`FlushJob`] is created by [`IndexMaintainer::init_flush`] after the
//! memory segment has been frozen and swapped out. The job owns everything
//! it needs to serialize the frozen segment — payload, selector snapshot,
//! schema text — so it runs entirely without the writer lock and touches
//! the maintainer again only to report completion or failure.
//!
//! Durability protocol: `segment.dat`, `selector.dat`, `schema.txt`, then
//! `serial.dat` last. A directory without `serial.dat` is garbage; a
//! failed or cancelled job therefore removes its partial files and leaves
//! the frozen segment pending, to be retried on the next scheduler poll.

use std::sync::Arc;

use crate::error::Result;
use crate::maintainer::target::{CancelToken, MaintenanceJob};
use crate::maintainer::{FlushStats, IndexMaintainer};
use crate::segment::{
    write_serial_marker, Segment, SegmentName, StoredSegment, DATA_FILE, SCHEMA_FILE,
    SELECTOR_FILE, SERIAL_FILE,
};
use crate::selector::SourceSelector;
use crate::storage::{write_all, Storage};

/// One cancellable flush: serializes a frozen memory segment to disk.
pub struct FlushJob {
    pub(crate) maintainer: Arc<IndexMaintainer>,
    pub(crate) name: SegmentName,
    pub(crate) segment: Arc<StoredSegment>,
    pub(crate) serial: u64,
    pub(crate) selector: SourceSelector,
    pub(crate) source_codes: Vec<u64>,
    pub(crate) schema_text: String,
    pub(crate) memory_bytes_before: usize,
}

impl FlushJob {
    /// Segment name this job will write.
    pub fn name(&self) -> SegmentName {
        self.name
    }

    /// Run the flush, reporting the outcome to the maintainer.
    pub fn execute(&self, cancel: &CancelToken) -> Result<FlushStats> {
        match self.write_segment(cancel) {
            Ok(disk_bytes) => {
                self.segment.set_disk_bytes(disk_bytes);
                Ok(self.maintainer.complete_flush(
                    self.name,
                    self.serial,
                    disk_bytes,
                    self.memory_bytes_before,
                    self.segment.data().docs.len() as u64,
                ))
            }
            Err(e) => {
                self.cleanup_partial();
                self.maintainer.fail_flush(self.name, &e);
                Err(e)
            }
        }
    }

    fn write_segment(&self, cancel: &CancelToken) -> Result<u64> {
        let storage = self.maintainer.storage.as_ref();
        let dir = self.name.dir_name();
        let mut bytes = 0;

        self.check_cancel(cancel)?;
        bytes += self.segment.serialize_to(storage, &dir)?;

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

    fn check_cancel(&self, cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            Err(crate::error::StratumError::cancelled(format!(
                "flush {}",
                self.name
            )))
        } else {
            Ok(())
        }
    }

    /// Remove partial files after a failed or cancelled write. The
    /// durability marker goes first so a crash mid-cleanup still leaves
    /// recognizable garbage.
    fn cleanup_partial(&self) {
        let storage = self.maintainer.storage.as_ref();
        for file_name in [SERIAL_FILE, DATA_FILE, SELECTOR_FILE, SCHEMA_FILE] {
            let path = self.name.file(file_name);
            if storage.file_exists(&path) {
                if let Err(e) = storage.delete_file(&path) {
                    tracing::warn!(segment = %self.name, file = file_name, error = %e,
                        "failed to clean up partial flush file");
                }
            }
        }
    }
}

impl MaintenanceJob for FlushJob {
    fn run(self: Box<Self>, cancel: &CancelToken) -> Result<()> {
        self.execute(cancel).map(|_| ())
    }

    fn describe(&self) -> String {
        format!("flush {}", self.name)
    }
}
