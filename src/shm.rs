//! Backing regions: anonymous mappings, heap fallback and POSIX shared memory

use crate::config::Backing;
use crate::error::{Result, RingError};
use rustix::fd::OwnedFd;
use rustix::fs::ftruncate;
use rustix::mm::{mmap, mmap_anonymous, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::alloc::Layout;
use std::ffi::CString;
use std::fmt;
use std::ptr::NonNull;

const RING_SHM_PREFIX: &str = "/capture_ring_";
const MAX_NAME_LEN: usize = 255 - RING_SHM_PREFIX.len();

/// Alignment of heap-backed regions
const HEAP_ALIGN: usize = 64;

/// How a region was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Anonymous,
    Heap,
    Shared,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegionKind::Anonymous => "anonymous-mmap",
            RegionKind::Heap => "heap",
            RegionKind::Shared => "shared-mmap",
        })
    }
}

enum Owner {
    Anonymous,
    Heap(Layout),
    Shared {
        #[allow(dead_code)]
        fd: OwnedFd,
        name: String,
        is_owner: bool,
    },
}

/// A zero-initialized, writable byte region that lives until dropped
pub struct Region {
    addr: NonNull<u8>,
    size: usize,
    owner: Owner,
}

// SAFETY: the region is plain memory; all concurrent access to its contents
// goes through atomics in the ring header
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Allocate a private region of `size` bytes
    ///
    /// With [`Backing::Auto`] an anonymous mapping is tried first and the heap
    /// is used only if the mapping fails.
    pub fn allocate(size: usize, backing: Backing) -> Result<Self> {
        if backing == Backing::Auto {
            match Self::anonymous(size) {
                Ok(region) => return Ok(region),
                Err(err) => {
                    tracing::debug!(size, error = %err, "anonymous mapping failed, falling back to heap");
                }
            }
        }
        Self::heap(size)
    }

    fn anonymous(size: usize) -> Result<Self> {
        let addr = unsafe {
            mmap_anonymous(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE,
            )
            .map_err(|e| RingError::Mmap(e.into()))?
        };
        let addr = NonNull::new(addr.cast::<u8>()).ok_or(RingError::Alloc { size })?;

        Ok(Self {
            addr,
            size,
            owner: Owner::Anonymous,
        })
    }

    fn heap(size: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size, HEAP_ALIGN)
            .map_err(|_| RingError::InvalidParam("region size overflows a layout"))?;
        // SAFETY: layout has non-zero size, callers never ask for an empty region
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let addr = NonNull::new(ptr).ok_or(RingError::Alloc { size })?;

        Ok(Self {
            addr,
            size,
            owner: Owner::Heap(layout),
        })
    }

    /// Create a named shared memory region
    ///
    /// # Arguments
    /// * `name` - Unique name for the shared memory (will be prefixed with "/capture_ring_")
    /// * `size` - Size in bytes
    pub fn create_shared(name: &str, size: usize) -> Result<Self> {
        let c_name = shm_name(name)?;

        // Try to create exclusively first, fall back to open if a stale one exists
        let fd = match shm_open(
            c_name.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP,
        ) {
            Ok(fd) => fd,
            Err(_) => shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
                RingError::ShmCreate {
                    name: name.to_string(),
                    source: e.into(),
                }
            })?,
        };

        ftruncate(&fd, size as u64).map_err(|e| RingError::Truncate(e.into()))?;
        let addr = map_shared(&fd, size)?;

        // A reused object may hold a previous session's frames
        unsafe {
            std::ptr::write_bytes(addr.as_ptr(), 0, size);
        }

        Ok(Self {
            addr,
            size,
            owner: Owner::Shared {
                fd,
                name: name.to_string(),
                is_owner: true,
            },
        })
    }

    /// Open an existing shared memory region
    pub fn open_shared(name: &str) -> Result<Self> {
        let c_name = shm_name(name)?;

        let fd = shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            RingError::ShmOpen {
                name: name.to_string(),
                source: e.into(),
            }
        })?;

        let stat = rustix::fs::fstat(&fd).map_err(|e| RingError::ShmOpen {
            name: name.to_string(),
            source: e.into(),
        })?;
        let size = usize::try_from(stat.st_size)
            .map_err(|_| RingError::InvalidParam("shared memory reports a negative size"))?;
        if size == 0 {
            return Err(RingError::InvalidParam("shared memory object is empty"));
        }

        let addr = map_shared(&fd, size)?;

        Ok(Self {
            addr,
            size,
            owner: Owner::Shared {
                fd,
                name: name.to_string(),
                is_owner: false,
            },
        })
    }

    /// Get raw pointer to the region
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Get size of the region
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn kind(&self) -> RegionKind {
        match self.owner {
            Owner::Anonymous => RegionKind::Anonymous,
            Owner::Heap(_) => RegionKind::Heap,
            Owner::Shared { .. } => RegionKind::Shared,
        }
    }

    /// Name of a shared region
    pub fn name(&self) -> Option<&str> {
        match &self.owner {
            Owner::Shared { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Whether dropping this handle unlinks the shared memory name
    pub fn is_owner(&self) -> bool {
        match self.owner {
            Owner::Shared { is_owner, .. } => is_owner,
            _ => true,
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        match &self.owner {
            Owner::Heap(layout) => unsafe {
                std::alloc::dealloc(self.addr.as_ptr(), *layout);
            },
            Owner::Anonymous => unsafe {
                let _ = munmap(self.addr.as_ptr().cast(), self.size);
            },
            Owner::Shared { name, is_owner, .. } => {
                unsafe {
                    let _ = munmap(self.addr.as_ptr().cast(), self.size);
                }
                if *is_owner {
                    if let Ok(c_name) = CString::new(format!("{}{}", RING_SHM_PREFIX, name)) {
                        let _ = shm_unlink(c_name.as_c_str());
                    }
                }
            }
        }
    }
}

fn shm_name(name: &str) -> Result<CString> {
    if name.is_empty() {
        return Err(RingError::InvalidParam("shared memory name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(RingError::NamespaceTooLong {
            max: MAX_NAME_LEN,
            got: name.len(),
        });
    }
    if name.contains('/') {
        return Err(RingError::InvalidParam("shared memory name contains '/'"));
    }
    CString::new(format!("{}{}", RING_SHM_PREFIX, name))
        .map_err(|_| RingError::InvalidParam("shared memory name contains a NUL byte"))
}

fn map_shared(fd: &OwnedFd, size: usize) -> Result<NonNull<u8>> {
    let addr = unsafe {
        mmap(
            std::ptr::null_mut(),
            size,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
        .map_err(|e| RingError::Mmap(e.into()))?
    };
    NonNull::new(addr.cast::<u8>()).ok_or(RingError::Alloc { size })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_regions_are_zeroed() {
        for backing in [Backing::Auto, Backing::Heap] {
            let region = Region::allocate(8192, backing).unwrap();
            assert_eq!(region.size(), 8192);
            assert!(region.is_owner());
            let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.size()) };
            assert!(bytes.iter().all(|&b| b == 0));
            assert_eq!(region.as_ptr() as usize % HEAP_ALIGN, 0);
        }
        assert_eq!(Region::allocate(64, Backing::Heap).unwrap().kind(), RegionKind::Heap);
    }

    #[test]
    fn test_create_and_open() {
        let name = "test_shm_create";
        let size = 4096;

        let shm1 = Region::create_shared(name, size).unwrap();
        assert!(shm1.is_owner());
        assert_eq!(shm1.size(), size);
        assert_eq!(shm1.kind(), RegionKind::Shared);
        assert_eq!(shm1.name(), Some(name));

        unsafe {
            std::ptr::write(shm1.as_ptr(), 42u8);
        }

        // Open from another "process"
        let shm2 = Region::open_shared(name).unwrap();
        assert!(!shm2.is_owner());
        assert_eq!(shm2.size(), size);

        let val = unsafe { std::ptr::read(shm2.as_ptr()) };
        assert_eq!(val, 42u8);

        drop(shm2);
        drop(shm1);
        assert!(Region::open_shared(name).is_err());
    }

    #[test]
    fn test_bad_names() {
        assert!(matches!(shm_name(""), Err(RingError::InvalidParam(_))));
        assert!(matches!(shm_name("a/b"), Err(RingError::InvalidParam(_))));
        assert!(matches!(
            shm_name(&"x".repeat(300)),
            Err(RingError::NamespaceTooLong { .. })
        ));
    }
}
