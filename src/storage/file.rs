//! File system storage backend.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, StratumError};
use crate::storage::{Storage, StorageInput, StorageOutput};

/// Disk-backed storage rooted at a directory.
///
/// Relative names with `/` separators map to subdirectories under the
/// root. Writes go through a buffered writer and are fsynced on
/// `flush_and_sync`.
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Create a file storage rooted at `root`, creating the directory if
    /// it does not exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(FileStorage { root })
    }

    /// Root directory of this storage.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        // Reject traversal outside the root.
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(StratumError::storage(format!(
                        "invalid storage name: {name}"
                    )));
                }
            }
        }
        Ok(self.root.join(relative))
    }

    fn collect_files(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            let relative = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            };
            if entry.file_type()?.is_dir() {
                self.collect_files(&entry.path(), &relative, out)?;
            } else {
                out.push(relative);
            }
        }
        Ok(())
    }

    /// Remove empty parent directories up to (excluding) the root.
    fn prune_empty_dirs(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root {
                break;
            }
            // remove_dir fails on non-empty directories, which stops the walk.
            if fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let path = self.resolve(name)?;
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(Box::new(FileInput { file, size }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Box::new(FileOutput {
            writer: Some(BufWriter::new(file)),
            path,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.resolve(name).map(|p| p.is_file()).unwrap_or(false)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        fs::remove_file(&path)?;
        self.prune_empty_dirs(&path);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        self.collect_files(&self.root, "", &mut files)?;
        files.sort();
        Ok(files)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let path = self.resolve(name)?;
        Ok(fs::metadata(&path)?.len())
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let old_path = self.resolve(old_name)?;
        let new_path = self.resolve(new_name)?;
        if let Some(parent) = new_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(old_path, new_path)?;
        Ok(())
    }
}

#[derive(Debug)]
struct FileInput {
    file: File,
    size: u64,
}

impl Read for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

impl StorageInput for FileInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }
}

#[derive(Debug)]
struct FileOutput {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
}

impl FileOutput {
    fn writer(&mut self) -> std::io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("output already closed"))
    }
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer()?.flush()
    }
}

impl Seek for FileOutput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.writer()?.seek(pos)
    }
}

impl StorageOutput for FileOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        let writer = self.writer()?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for FileOutput {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
            tracing::warn!(path = %self.path.display(), "file output dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{read_all, write_all};
    use tempfile::TempDir;

    #[test]
    fn test_nested_names_create_directories() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        write_all(&storage, "index.flush.1/serial.dat", b"42\n").unwrap();

        assert!(dir.path().join("index.flush.1/serial.dat").is_file());
        assert_eq!(
            read_all(&storage, "index.flush.1/serial.dat").unwrap(),
            b"42\n"
        );
    }

    #[test]
    fn test_delete_prunes_empty_segment_directory() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        write_all(&storage, "index.flush.2/segment.dat", b"data").unwrap();
        write_all(&storage, "index.flush.2/serial.dat", b"7\n").unwrap();

        storage.delete_file("index.flush.2/serial.dat").unwrap();
        assert!(dir.path().join("index.flush.2").is_dir());

        storage.delete_file("index.flush.2/segment.dat").unwrap();
        assert!(!dir.path().join("index.flush.2").exists());
    }

    #[test]
    fn test_list_files_is_recursive() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        write_all(&storage, "fusion.spec", b"{}").unwrap();
        write_all(&storage, "index.flush.1/serial.dat", b"1\n").unwrap();

        let files = storage.list_files().unwrap();
        assert_eq!(files, vec!["fusion.spec", "index.flush.1/serial.dat"]);
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        assert!(storage.open_input("../escape").is_err());
        assert!(storage.create_output("/absolute").is_err());
    }
}
