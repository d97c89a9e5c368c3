//! In-memory storage backend for tests and temporary indexes.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, StratumError};
use crate::storage::{Storage, StorageInput, StorageOutput};

type FileMap = Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>;

/// Non-persistent storage keeping every file in a shared map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: FileMap,
}

impl MemoryStorage {
    /// Create an empty memory storage.
    pub fn new() -> Self {
        MemoryStorage::default()
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let files = self.files.read();
        let content = files
            .get(name)
            .cloned()
            .ok_or_else(|| StratumError::storage(format!("file not found: {name}")))?;
        Ok(Box::new(MemoryInput {
            cursor: Cursor::new(content.to_vec()),
            size: content.len() as u64,
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            cursor: Cursor::new(Vec::new()),
            files: Arc::clone(&self.files),
            closed: false,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StratumError::storage(format!("file not found: {name}")))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.files
            .read()
            .get(name)
            .map(|content| content.len() as u64)
            .ok_or_else(|| StratumError::storage(format!("file not found: {name}")))
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.write();
        let content = files
            .remove(old_name)
            .ok_or_else(|| StratumError::storage(format!("file not found: {old_name}")))?;
        files.insert(new_name.to_string(), content);
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryInput {
    cursor: Cursor<Vec<u8>>,
    size: u64,
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }
}

#[derive(Debug)]
struct MemoryOutput {
    name: String,
    cursor: Cursor<Vec<u8>>,
    files: FileMap,
    closed: bool,
}

impl MemoryOutput {
    fn publish(&mut self) {
        let content = Arc::new(self.cursor.get_ref().clone());
        self.files.write().insert(self.name.clone(), content);
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other(format!(
                "write to closed output: {}",
                self.name
            )));
        }
        self.cursor.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryOutput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.publish();
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{read_all, write_all};

    #[test]
    fn test_create_read_delete() {
        let storage = MemoryStorage::new();

        write_all(&storage, "a.dat", b"abc").unwrap();
        assert_eq!(read_all(&storage, "a.dat").unwrap(), b"abc");

        storage.delete_file("a.dat").unwrap();
        assert!(!storage.file_exists("a.dat"));
        assert!(storage.open_input("a.dat").is_err());
    }

    #[test]
    fn test_write_after_close_is_rejected() {
        let storage = MemoryStorage::new();

        let mut output = storage.create_output("late.dat").unwrap();
        output.write_all(b"on time").unwrap();
        output.close().unwrap();

        assert!(output.write_all(b"too late").is_err());
        assert_eq!(read_all(&storage, "late.dat").unwrap(), b"on time");
    }

    #[test]
    fn test_rename_replaces_target() {
        let storage = MemoryStorage::new();

        write_all(&storage, "new", b"fresh").unwrap();
        write_all(&storage, "old", b"stale").unwrap();
        storage.rename_file("new", "old").unwrap();

        assert_eq!(read_all(&storage, "old").unwrap(), b"fresh");
        assert!(!storage.file_exists("new"));
    }
}
