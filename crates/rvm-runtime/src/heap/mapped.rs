//! Memory mapped regions. The whole capacity is reserved as address space up front, but only the
//! pages actually touched are ever backed by memory or written to disk, which lets the capacity of
//! a heap exceed both the size of its file and the physical memory of the machine.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;

use crate::error::{Error, ErrorKind, Result};

use super::region::{capacity_exceeded, Region};

/// Size of the pages the system hands out mappings in.
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// Rounds `capacity` up to the nearest non-zero multiple of the page size.
pub fn granular(capacity: usize) -> Result<usize> {
    let page = page_size();
    capacity
        .max(1)
        .checked_add(page - 1)
        .map(|capacity| capacity / page * page)
        .ok_or_else(|| capacity_exceeded(capacity, usize::MAX))
}

pub struct MappedRegion {
    pointer: NonNull<u8>,
    capacity: usize,

    /// Mapped file, or `None` if the mapping is anonymous.
    file: Option<File>,
}

impl MappedRegion {
    /// Maps the file at `path`, creating it if needed. The file is extended to the rounded up
    /// capacity, without allocating storage for the extension, and closed when the region is.
    pub fn open(path: &Path, capacity: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|error| {
                Error::owned(
                    ErrorKind::User,
                    format!("cannot open heap file {}: {error}", path.display()),
                )
            })?;

        let length = usize::try_from(file.metadata()?.len())
            .map_err(|_| capacity_exceeded(usize::MAX, usize::MAX))?;
        let capacity = granular(capacity.max(length))?;
        if length < capacity {
            file.set_len(capacity as u64)?;
        }

        let pointer = map(capacity, Some(&file))?;
        Ok(Self {
            pointer,
            capacity,
            file: Some(file),
        })
    }

    /// Maps anonymous memory, which is lost when the region is closed.
    pub fn anonymous(capacity: usize) -> Result<Self> {
        let capacity = granular(capacity)?;
        let pointer = map(capacity, None)?;
        Ok(Self {
            pointer,
            capacity,
            file: None,
        })
    }
}

fn map(capacity: usize, file: Option<&File>) -> Result<NonNull<u8>> {
    let (flags, descriptor) = match file {
        Some(file) => (libc::MAP_SHARED | libc::MAP_NORESERVE, file.as_raw_fd()),
        None => (
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
            -1,
        ),
    };

    let pointer = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            descriptor,
            0,
        )
    };

    if pointer == libc::MAP_FAILED {
        let error = std::io::Error::last_os_error();
        return Err(Error::owned(
            ErrorKind::NoMemory,
            format!("cannot map {capacity} bytes: {error}"),
        ));
    }

    NonNull::new(pointer as *mut u8)
        .ok_or_else(|| Error::borrowed(ErrorKind::NoMemory, "mapping returned null"))
}

impl Region for MappedRegion {
    fn name(&self) -> &'static str {
        match self.file {
            Some(_) => "mapped file",
            None => "anonymous mapping",
        }
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }

    fn bytes(&self) -> &[u8] {
        // The mapping stays valid, readable and writable until dropped.
        unsafe { std::slice::from_raw_parts(self.pointer.as_ptr(), self.capacity) }
    }

    fn reserve(&mut self, length: usize) -> Result<()> {
        if length > self.capacity {
            return Err(capacity_exceeded(length, self.capacity));
        }
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let bytes = unsafe { std::slice::from_raw_parts_mut(self.pointer.as_ptr(), self.capacity) };
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }

        let status = unsafe {
            libc::msync(
                self.pointer.as_ptr() as *mut libc::c_void,
                self.capacity,
                libc::MS_SYNC,
            )
        };
        if status != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.sync()
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        let status =
            unsafe { libc::munmap(self.pointer.as_ptr() as *mut libc::c_void, self.capacity) };
        if status != 0 {
            log::warn!(
                "cannot unmap {} bytes: {}",
                self.capacity,
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_rounded_to_pages() {
        let page = page_size();
        assert_eq!(granular(0).unwrap(), page);
        assert_eq!(granular(1).unwrap(), page);
        assert_eq!(granular(page).unwrap(), page);
        assert_eq!(granular(page + 1).unwrap(), 2 * page);
    }

    #[test]
    fn anonymous_mapping_is_zeroed_and_writable() {
        let mut region = MappedRegion::anonymous(100).unwrap();
        assert_eq!(region.capacity(), Some(page_size()));
        assert!(region.bytes().iter().all(|byte| *byte == 0));

        region.write(10, b"abc").unwrap();
        assert_eq!(&region.bytes()[10..13], b"abc");
        assert!(region.reserve(page_size() + 1).is_err());
    }

    #[test]
    fn file_mapping_persists_writes() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("region");

        let mut region = MappedRegion::open(&path, 10).unwrap();
        region.write(0, b"persisted").unwrap();
        Box::new(region).close().unwrap();

        let region = MappedRegion::open(&path, 10).unwrap();
        assert_eq!(&region.bytes()[..9], b"persisted");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), page_size() as u64);
    }

    #[test]
    fn reserves_far_more_than_it_touches() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("sparse");

        let capacity = 1 << 30;
        let mut region = MappedRegion::open(&path, capacity).unwrap();
        region.write(capacity - 8, &[1; 8]).unwrap();
        assert_eq!(region.bytes()[capacity - 1], 1);
    }
}
