//! # Stratum
//!
//! Segment lifecycle engine for a search index.
//!
//! Stratum owns the part of an index that decides *where documents live*:
//! it applies mutations to a live memory segment, flushes that segment to
//! immutable on-disk segments, fuses (compacts) groups of disk segments
//! into one, and recovers the whole arrangement after a crash — all while
//! every query-time lookup resolves each document to exactly one segment.
//!
//! ## Features
//!
//! - Single-writer mutation path with idempotent serial-number replay
//! - Copy-and-swap query collections: readers never block on maintenance
//! - Crash-consistent flush and fusion with a `serial.dat` durability marker
//! - Deferred deletion of superseded segments via reference counting
//! - Pluggable storage backends (file system and in-memory)
//! - Pollable maintenance targets plus a bundled background executor

pub mod collection;
pub mod error;
pub mod maintainer;
pub mod schema;
pub mod segment;
pub mod selector;
pub mod storage;

pub use collection::{CollectionRef, IndexCollection};
pub use error::{Result, StratumError};
pub use maintainer::{IndexMaintainer, MaintainerConfig};
pub use schema::{FieldKind, Schema};
pub use segment::{FieldMap, Lid, Segment, SegmentName, SourceId};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
