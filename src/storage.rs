//! Storage abstraction shared by the segment lifecycle engine.
//!
//! Segment directories, selector snapshots, and the fusion spec all go
//! through the [`Storage`] trait so the file backend can be swapped for the
//! in-memory backend in tests. File names are storage-relative and may
//! contain `/`; the file backend maps those to subdirectories, which is how
//! each segment gets its own `index.flush.<id>` directory.

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use crate::error::{Result, StratumError};

pub mod file;
pub mod memory;
pub mod structured;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use structured::{StructReader, StructWriter};

/// A trait for storage backends that can store and retrieve named files.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open an existing file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create a file for writing, truncating any existing content.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Empty parent directories are removed as well, so
    /// deleting the last file of a segment removes its directory.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files, recursively, as storage-relative names.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Atomically rename a file. Used for replace-on-write updates.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;
}

/// A trait for reading data from storage.
pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    /// Get the size of the input stream.
    fn size(&self) -> Result<u64>;
}

/// A trait for writing data to storage.
pub trait StorageOutput: Write + Seek + Send + std::fmt::Debug {
    /// Flush buffered data and sync it to the underlying medium.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Close the output stream, making the content visible.
    fn close(&mut self) -> Result<()>;
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

impl StorageInput for Box<dyn StorageInput> {
    fn size(&self) -> Result<u64> {
        self.as_ref().size()
    }
}

/// Read a whole file into a byte buffer.
pub fn read_all(storage: &dyn Storage, name: &str) -> Result<Vec<u8>> {
    let mut input = storage.open_input(name)?;
    let mut buffer = Vec::new();
    input.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Read a whole file as UTF-8 text.
pub fn read_text(storage: &dyn Storage, name: &str) -> Result<String> {
    let bytes = read_all(storage, name)?;
    String::from_utf8(bytes)
        .map_err(|_| StratumError::corrupt(format!("{name} is not valid UTF-8")))
}

/// Write a file with durable content in one call.
pub fn write_all(storage: &dyn Storage, name: &str, bytes: &[u8]) -> Result<()> {
    let mut output = storage.create_output(name)?;
    output.write_all(bytes)?;
    output.flush_and_sync()?;
    output.close()?;
    Ok(())
}

/// Replace a file atomically: write to a temporary sibling, then rename.
/// Readers either see the old content or the new, never a partial write.
pub fn replace_atomic(storage: &dyn Storage, name: &str, bytes: &[u8]) -> Result<()> {
    let tmp_name = format!("{name}.tmp");
    write_all(storage, &tmp_name, bytes)?;
    storage.rename_file(&tmp_name, name)?;
    Ok(())
}

/// Shared handle to a storage backend.
pub type StorageRef = Arc<dyn Storage>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_read_write_roundtrip() {
        let storage = MemoryStorage::new();

        write_all(&storage, "dir/file.dat", b"payload").unwrap();
        assert!(storage.file_exists("dir/file.dat"));
        assert_eq!(read_all(&storage, "dir/file.dat").unwrap(), b"payload");
        assert_eq!(storage.file_size("dir/file.dat").unwrap(), 7);
    }

    #[test]
    fn test_replace_atomic_leaves_no_temp() {
        let storage = MemoryStorage::new();

        replace_atomic(&storage, "spec.json", b"v1").unwrap();
        replace_atomic(&storage, "spec.json", b"v2").unwrap();

        assert_eq!(read_all(&storage, "spec.json").unwrap(), b"v2");
        assert!(!storage.file_exists("spec.json.tmp"));
    }

    #[test]
    fn test_read_text_rejects_invalid_utf8() {
        let storage = MemoryStorage::new();
        write_all(&storage, "bin.dat", &[0xff, 0xfe]).unwrap();

        let err = read_text(&storage, "bin.dat").unwrap_err();
        assert!(matches!(err, StratumError::Corrupt(_)));
    }
}
