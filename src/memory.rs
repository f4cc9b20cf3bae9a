use core::ptr::NonNull;
use eyre::{Result, WrapErr};
use nix::sys::memfd::{memfd_create, MFdFlags};
use nix::sys::mman::{mmap, mmap_anonymous, munmap, MapFlags, ProtFlags};
use nix::unistd::ftruncate;
use std::num::NonZero;

/// A byte region whose tail aliases its head: the `overlap_bytes` of
/// virtual addresses past `region_bytes` map the same backing pages again,
/// so a transfer that crosses the region end runs as one contiguous copy.
pub struct Memory {
    ptr: NonNull<u8>,
    region_bytes: usize,
    overlap_bytes: usize,
    _fd: std::os::fd::OwnedFd,
}

impl Memory {
    // overlap_bytes must not exceed region_bytes; Layout guarantees this.
    pub fn new(region_bytes: usize, overlap_bytes: usize) -> Result<Self> {
        let fd = memfd_create(c"wrapbuf", MFdFlags::MFD_CLOEXEC)
            .wrap_err("failed to create memory file descriptor")?;

        ftruncate(&fd, region_bytes as i64).wrap_err("failed to set memory file size")?;

        let total_size = region_bytes + overlap_bytes;
        let ptr = unsafe {
            mmap_anonymous(
                None,
                NonZero::new(total_size).unwrap(),
                ProtFlags::PROT_NONE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
            )
            .wrap_err("failed to reserve virtual address range")?
        };

        unsafe {
            mmap(
                Some(NonZero::new(ptr.as_ptr() as usize).unwrap()),
                NonZero::new(region_bytes).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED | MapFlags::MAP_FIXED,
                &fd,
                0,
            )
            .wrap_err("failed to map buffer region")?;
        }

        unsafe {
            mmap(
                Some(NonZero::new(ptr.as_ptr() as usize + region_bytes).unwrap()),
                NonZero::new(overlap_bytes).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED | MapFlags::MAP_FIXED,
                &fd,
                0,
            )
            .wrap_err("failed to map overlap region")?;
        }

        let ptr = NonNull::new(ptr.as_ptr() as *mut u8).expect("mmap returned null pointer");

        Ok(Memory {
            ptr,
            region_bytes,
            overlap_bytes,
            _fd: fd,
        })
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn region_bytes(&self) -> usize {
        self.region_bytes
    }

    pub fn overlap_bytes(&self) -> usize {
        self.overlap_bytes
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(
                NonNull::new(self.ptr.as_ptr() as *mut _).unwrap(),
                self.region_bytes + self.overlap_bytes,
            );
        }
    }
}

unsafe impl Send for Memory {}
unsafe impl Sync for Memory {}
