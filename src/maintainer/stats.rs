//! Flush, fusion, and maintainer statistics for status endpoints.

use serde::Serialize;

/// Outcome of one completed flush.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushStats {
    /// Flush id of the segment written.
    pub flush_id: u64,
    /// Serial number the segment is complete through.
    pub serial: u64,
    /// Memory segment footprint when the flush was initiated.
    pub memory_bytes_before: usize,
    /// Footprint of the replacement memory segment at completion.
    pub memory_bytes_after: usize,
    /// Bytes written to disk, all segment files included.
    pub disk_bytes_written: u64,
    /// Rough CPU cost estimate (documents serialized).
    pub cpu_cost_estimate: u64,
}

/// Outcome of one completed fusion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FusionStats {
    /// Fusion id of the segment written.
    pub fusion_id: u64,
    /// Serial number the fused segment is complete through.
    pub serial: u64,
    /// Number of input segments consumed.
    pub input_count: usize,
    /// Combined on-disk size of the inputs.
    pub input_disk_bytes: u64,
    /// On-disk size of the fused output.
    pub output_disk_bytes: u64,
    /// Rough CPU cost estimate (entries merged).
    pub cpu_cost_estimate: u64,
}

/// Point-in-time maintainer status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintainerStats {
    /// Last applied serial number.
    pub current_serial: u64,
    /// Serial number durable on disk.
    pub flushed_serial: u64,
    /// Memory segment footprint in bytes.
    pub memory_segment_bytes: usize,
    /// Live documents in the memory segment.
    pub memory_doc_count: usize,
    /// Number of disk segments in the collection.
    pub disk_segment_count: usize,
    /// Total disk usage of all segments.
    pub disk_bytes: u64,
    /// True while a flush job is running.
    pub flush_in_progress: bool,
    /// True while a fusion job is running.
    pub fusion_in_progress: bool,
    /// Stats of the last completed flush, if any.
    pub last_flush: Option<FlushStats>,
    /// Stats of the last completed fusion, if any.
    pub last_fusion: Option<FusionStats>,
}
