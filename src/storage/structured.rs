//! Checksummed binary I/O for index metadata files.
//!
//! Segment payloads and selector snapshots are written through
//! [`StructWriter`], which maintains a running CRC32 over everything
//! written and appends it on `finish`. [`StructReader`] recomputes the
//! checksum while reading and [`StructReader::verify`] compares it against
//! the trailing value, so truncated or bit-rotted files are rejected at
//! load time instead of corrupting recovery.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{Result, StratumError};
use crate::storage::{StorageInput, StorageOutput};

/// Writer for checksummed little-endian binary files.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.track(&[value]);
        Ok(())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write a variable-length integer (LEB128).
    pub fn write_varint(&mut self, mut value: u64) -> Result<()> {
        let mut encoded = [0u8; 10];
        let mut len = 0;
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            encoded[len] = byte;
            len += 1;
            if value == 0 {
                break;
            }
        }
        self.writer.write_all(&encoded[..len])?;
        self.track(&encoded[..len]);
        Ok(())
    }

    /// Write a string with a varint length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with a varint length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.writer.write_all(value)?;
        self.track(value);
        Ok(())
    }

    /// Bytes written so far, excluding the trailing checksum.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn track(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    /// Write the trailing checksum, sync, and close. Returns the total
    /// number of bytes written including the checksum.
    pub fn finish(mut self) -> Result<u64> {
        let checksum = self.hasher.finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(self.position + 4)
    }
}

/// Reader for files produced by [`StructWriter`].
pub struct StructReader<R: StorageInput> {
    reader: R,
    hasher: Hasher,
    position: u64,
    file_size: u64,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a new structured reader.
    pub fn new(reader: R) -> Result<Self> {
        let file_size = reader.size()?;
        if file_size < 4 {
            return Err(StratumError::corrupt("file too short for checksum"));
        }
        Ok(StructReader {
            reader,
            hasher: Hasher::new(),
            position: 0,
            file_size,
        })
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.reader.read_u8()?;
        self.track(&[value]);
        Ok(value)
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.reader.read_u32::<LittleEndian>()?;
        self.track(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let value = self.reader.read_u64::<LittleEndian>()?;
        self.track(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(StratumError::corrupt("varint too long"));
            }
        }
    }

    /// Read a length-prefixed string.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| StratumError::corrupt("invalid UTF-8 string"))
    }

    /// Read length-prefixed raw bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varint()? as usize;
        if self.position + len as u64 > self.file_size.saturating_sub(4) {
            return Err(StratumError::corrupt("length prefix exceeds file size"));
        }
        let mut buffer = vec![0u8; len];
        self.reader.read_exact(&mut buffer)?;
        self.track(&buffer);
        Ok(buffer)
    }

    fn track(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    /// Read the trailing checksum and compare it with the running one.
    pub fn verify(mut self) -> Result<()> {
        if self.position + 4 != self.file_size {
            return Err(StratumError::corrupt("trailing bytes before checksum"));
        }
        let expected = self.reader.read_u32::<LittleEndian>()?;
        let actual = self.hasher.finalize();
        if expected != actual {
            return Err(StratumError::corrupt(format!(
                "checksum mismatch: expected {expected:08x}, got {actual:08x}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;

    #[test]
    fn test_write_read_verify() {
        let storage = MemoryStorage::new();

        let output = storage.create_output("meta.dat").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_u32(0x5354_5253).unwrap();
        writer.write_varint(300).unwrap();
        writer.write_string("index.flush.3").unwrap();
        writer.write_u64(u64::MAX).unwrap();
        writer.finish().unwrap();

        let input = storage.open_input("meta.dat").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        assert_eq!(reader.read_u32().unwrap(), 0x5354_5253);
        assert_eq!(reader.read_varint().unwrap(), 300);
        assert_eq!(reader.read_string().unwrap(), "index.flush.3");
        assert_eq!(reader.read_u64().unwrap(), u64::MAX);
        reader.verify().unwrap();
    }

    #[test]
    fn test_corruption_detected() {
        let storage = MemoryStorage::new();

        let output = storage.create_output("meta.dat").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_u64(12345).unwrap();
        writer.finish().unwrap();

        // Flip one byte of the payload.
        let mut bytes = crate::storage::read_all(&storage, "meta.dat").unwrap();
        bytes[0] ^= 0xff;
        crate::storage::write_all(&storage, "meta.dat", &bytes).unwrap();

        let input = storage.open_input("meta.dat").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        reader.read_u64().unwrap();
        assert!(reader.verify().is_err());
    }

    #[test]
    fn test_varint_boundaries() {
        let storage = MemoryStorage::new();

        let output = storage.create_output("varint.dat").unwrap();
        let mut writer = StructWriter::new(output);
        for value in [0u64, 127, 128, 16383, 16384, u64::MAX] {
            writer.write_varint(value).unwrap();
        }
        writer.finish().unwrap();

        let input = storage.open_input("varint.dat").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        for value in [0u64, 127, 128, 16383, 16384, u64::MAX] {
            assert_eq!(reader.read_varint().unwrap(), value);
        }
        reader.verify().unwrap();
    }
}
