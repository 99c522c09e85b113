use crate::{
    Result,
    error::protection_error,
    mmap::{MapFlags, Mmap, ProtFlags},
};
use core::{ffi::c_void, ptr::NonNull};
use libc::{MAP_FAILED, MREMAP_FIXED, MREMAP_MAYMOVE, mmap, mprotect, mremap, munmap};
use std::io;

/// An implementation of Mmap trait backed by libc
pub struct DefaultMmap;

impl Mmap for DefaultMmap {
    unsafe fn mmap_anonymous(
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
    ) -> Result<NonNull<c_void>> {
        let ptr = unsafe {
            mmap(
                core::ptr::null_mut(),
                len,
                prot.bits(),
                flags.union(MapFlags::MAP_ANONYMOUS).bits(),
                -1,
                0,
            )
        };
        if core::ptr::eq(ptr, MAP_FAILED) {
            return Err(map_error("mmap anonymous failed"));
        }
        NonNull::new(ptr).ok_or_else(|| protection_error("mmap anonymous returned null"))
    }

    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()> {
        let res = unsafe { munmap(addr.as_ptr(), len) };
        if res != 0 {
            return Err(map_error("munmap failed"));
        }
        Ok(())
    }

    unsafe fn mprotect(addr: NonNull<c_void>, len: usize, prot: ProtFlags) -> Result<()> {
        let res = unsafe { mprotect(addr.as_ptr(), len, prot.bits()) };
        if res != 0 {
            return Err(map_error("mprotect failed"));
        }
        Ok(())
    }

    unsafe fn mremap_fixed(old: NonNull<c_void>, len: usize, new: NonNull<c_void>) -> Result<()> {
        let ptr = unsafe {
            mremap(
                old.as_ptr(),
                len,
                len,
                MREMAP_MAYMOVE | MREMAP_FIXED,
                new.as_ptr(),
            )
        };
        if core::ptr::eq(ptr, MAP_FAILED) {
            return Err(map_error("mremap failed"));
        }
        if ptr != new.as_ptr() {
            return Err(protection_error("mremap moved the shadow to an unexpected address"));
        }
        Ok(())
    }

    #[inline]
    fn page_size() -> usize {
        super::system_page_size()
    }
}

#[cold]
#[inline(never)]
fn map_error(msg: &str) -> crate::Error {
    protection_error(format!("{msg}: {}", io::Error::last_os_error()))
}
