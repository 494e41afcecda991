//! Backing stores of heaps. A [Region] owns, or borrows, a contiguous range of addressable bytes.
//! Every heap talks to its backing store only through this trait, whatever the store is.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::FileExt;

use crate::error::{Error, ErrorKind, Result};

pub fn capacity_exceeded(required: usize, capacity: usize) -> Error {
    Error::owned(
        ErrorKind::NoMemory,
        format!("heap capacity exceeded: {required} bytes required, {capacity} available"),
    )
}

pub trait Region {
    /// Short name of the store, used in log messages.
    fn name(&self) -> &'static str;

    /// Maximum amount of addressable bytes, or `None` if the region grows on demand.
    fn capacity(&self) -> Option<usize>;

    /// Currently addressable bytes.
    fn bytes(&self) -> &[u8];

    /// Makes sure that the first `length` bytes are addressable. Fails with
    /// [ErrorKind::NoMemory], without touching any byte, if the region cannot grow that far.
    fn reserve(&mut self, length: usize) -> Result<()>;

    /// Writes `data` at `offset`. The range must have been reserved.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()>;

    /// Blocks until every prior write is durable.
    fn sync(&mut self) -> Result<()>;

    /// Syncs and releases whatever the region owns.
    fn close(self: Box<Self>) -> Result<()>;
}

/// A caller-owned memory buffer. The buffer is never grown nor released.
pub struct BufferRegion<'a> {
    buffer: &'a mut [u8],
}

impl<'a> BufferRegion<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer }
    }
}

impl Region for BufferRegion<'_> {
    fn name(&self) -> &'static str {
        "buffer"
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.buffer.len())
    }

    fn bytes(&self) -> &[u8] {
        self.buffer
    }

    fn reserve(&mut self, length: usize) -> Result<()> {
        if length > self.buffer.len() {
            return Err(capacity_exceeded(length, self.buffer.len()));
        }
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.buffer[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// A caller-owned open file. Its contents are cached in memory when the region is created and
/// every write goes through to the file. The file is never closed by the region.
pub struct FileRegion<'a> {
    file: &'a File,
    cache: Vec<u8>,
}

impl<'a> FileRegion<'a> {
    pub fn new(file: &'a File) -> Result<Self> {
        let mut cache = Vec::new();
        let mut reader = file;
        reader.seek(SeekFrom::Start(0))?;
        reader.read_to_end(&mut cache)?;
        Ok(Self { file, cache })
    }
}

impl Region for FileRegion<'_> {
    fn name(&self) -> &'static str {
        "file"
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn bytes(&self) -> &[u8] {
        &self.cache
    }

    fn reserve(&mut self, length: usize) -> Result<()> {
        if length > self.cache.len() {
            self.cache.resize(length, 0);
        }
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.file.write_all_at(data, offset as u64)?;
        self.cache[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.sync()
    }
}
