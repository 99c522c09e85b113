use crate::{
    Result,
    error::protection_error,
    mmap::{MapFlags, Mmap, ProtFlags},
};
use core::{ffi::c_void, ptr::NonNull};
use syscalls::Sysno;

/// An implementation of Mmap trait issuing raw linux syscalls
pub struct DefaultMmap;

const MREMAP_MAYMOVE: usize = 1;
const MREMAP_FIXED: usize = 2;

impl Mmap for DefaultMmap {
    unsafe fn mmap_anonymous(
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
    ) -> Result<NonNull<c_void>> {
        let ptr = unsafe {
            #[cfg(target_pointer_width = "32")]
            let syscall = Sysno::mmap2;
            #[cfg(not(target_pointer_width = "32"))]
            let syscall = Sysno::mmap;
            from_ret(
                syscalls::raw_syscall!(
                    syscall,
                    0usize,
                    len,
                    prot.bits(),
                    flags.union(MapFlags::MAP_ANONYMOUS).bits(),
                    usize::MAX,
                    0
                ),
                "mmap anonymous failed",
            )?
        };
        NonNull::new(ptr as *mut c_void)
            .ok_or_else(|| protection_error("mmap anonymous returned null"))
    }

    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()> {
        unsafe {
            from_ret(
                syscalls::raw_syscall!(Sysno::munmap, addr.as_ptr(), len),
                "munmap failed",
            )?;
        }
        Ok(())
    }

    unsafe fn mprotect(addr: NonNull<c_void>, len: usize, prot: ProtFlags) -> Result<()> {
        unsafe {
            from_ret(
                syscalls::raw_syscall!(Sysno::mprotect, addr.as_ptr(), len, prot.bits()),
                "mprotect failed",
            )?;
        }
        Ok(())
    }

    unsafe fn mremap_fixed(old: NonNull<c_void>, len: usize, new: NonNull<c_void>) -> Result<()> {
        let ptr = unsafe {
            from_ret(
                syscalls::raw_syscall!(
                    Sysno::mremap,
                    old.as_ptr(),
                    len,
                    len,
                    MREMAP_MAYMOVE | MREMAP_FIXED,
                    new.as_ptr()
                ),
                "mremap failed",
            )?
        };
        if ptr != new.as_ptr() as usize {
            return Err(protection_error("mremap moved the shadow to an unexpected address"));
        }
        Ok(())
    }

    #[inline]
    fn page_size() -> usize {
        super::system_page_size()
    }
}

/// Converts a raw syscall return value to a result.
#[inline(always)]
fn from_ret(value: usize, msg: &'static str) -> Result<usize> {
    if value > -4096isize as usize {
        // Same errno window musl checks in syscall_ret.c
        return Err(protection_error(format!("{msg}: errno {}", value.wrapping_neg())));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmap::MapFlags;

    #[test]
    fn from_ret_splits_errno_window() {
        assert_eq!(from_ret(0, "ok").unwrap(), 0);
        assert_eq!(from_ret(0x7f00_0000, "ok").unwrap(), 0x7f00_0000);
        // -4095 is the largest errno the kernel returns.
        assert_eq!(from_ret(-4096isize as usize, "ok").unwrap(), -4096isize as usize);

        let err = from_ret(-(libc::ENOMEM as isize) as usize, "mmap anonymous failed").unwrap_err();
        assert!(matches!(err, crate::Error::ProtectionChange { .. }));
        assert!(err.to_string().contains(&format!("errno {}", libc::ENOMEM)));
        assert!(from_ret(-4095isize as usize, "mprotect failed").is_err());
    }

    #[test]
    fn raw_syscalls_map_and_protect() {
        let len = DefaultMmap::page_size();
        let page = unsafe {
            DefaultMmap::mmap_anonymous(
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .unwrap();
        unsafe {
            page.as_ptr().cast::<usize>().write(0x5a5a);
            DefaultMmap::mprotect(page, len, ProtFlags::PROT_READ).unwrap();
            assert_eq!(page.as_ptr().cast::<usize>().read(), 0x5a5a);
            DefaultMmap::munmap(page, len).unwrap();
        }
    }
}
