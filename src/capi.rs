//! C interface over one process-wide [`HookRegistry`]
//!
//! Every function catches panics and reports failure as `false` or as an
//! empty array; the reason is logged when the `log` feature is enabled.
//! The declarations live in `include/plt_hook.h`.

use crate::{
    hook::{HookRegistry, LibraryIdentity, RawBackup, Selector},
    maps::{self, Mapping, ProcessId},
};
use core::{
    ffi::{CStr, c_char, c_void},
    ptr,
};
use std::{
    ffi::CString,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Mutex, MutexGuard},
};

/// One mapping, as handed out by [`plt_hook_scan`].
#[repr(C)]
#[allow(non_camel_case_types)]
pub struct plt_hook_map_info {
    pub start: usize,
    pub end: usize,
    /// `PROT_*` bits.
    pub perms: u8,
    pub is_private: bool,
    pub offset: usize,
    pub dev: libc::dev_t,
    pub inode: libc::ino_t,
    /// NUL-terminated path, null for anonymous mappings.
    pub path: *mut c_char,
}

/// An owned array of mappings; release it with [`plt_hook_free_map_array`].
#[repr(C)]
#[allow(non_camel_case_types)]
pub struct plt_hook_map_array {
    pub data: *mut plt_hook_map_info,
    pub size: usize,
}

impl plt_hook_map_array {
    const EMPTY: plt_hook_map_array = plt_hook_map_array {
        data: ptr::null_mut(),
        size: 0,
    };
}

impl From<&Mapping> for plt_hook_map_info {
    fn from(map: &Mapping) -> Self {
        // Paths read from the kernel never hold NUL; such a path is dropped.
        let path = map
            .path
            .as_deref()
            .and_then(|path| CString::new(path).ok())
            .map_or(ptr::null_mut(), CString::into_raw);
        plt_hook_map_info {
            start: map.start,
            end: map.end,
            perms: map.perms.bits() as u8,
            is_private: map.is_private,
            offset: map.offset,
            dev: map.dev as _,
            inode: map.inode as _,
            path,
        }
    }
}

static REGISTRY: Mutex<Option<HookRegistry>> = Mutex::new(None);

fn registry() -> MutexGuard<'static, Option<HookRegistry>> {
    // A panic while the lock was held leaves the registry consistent: every
    // operation only pushes requests or drains them.
    REGISTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs `f` and turns both errors and panics into `false`.
#[cfg_attr(not(feature = "log"), allow(unused_variables))]
fn guard(what: &str, f: impl FnOnce() -> crate::Result<()>) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            #[cfg(feature = "log")]
            log::warn!("[CApi] {}: {}", what, err);
            false
        }
        Err(_) => {
            #[cfg(feature = "log")]
            log::error!("[CApi] {}: panicked", what);
            false
        }
    }
}

/// Scans the mappings of `pid` (`"self"` or a decimal pid, null meaning
/// `"self"`). Any failure yields an empty array.
///
/// # Safety
/// A non-null `pid` must point to a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn plt_hook_scan(pid: *const c_char) -> plt_hook_map_array {
    let pid = if pid.is_null() {
        Some(ProcessId::Current)
    } else {
        unsafe { CStr::from_ptr(pid) }
            .to_str()
            .ok()
            .and_then(|pid| pid.parse::<ProcessId>().ok())
    };
    let Some(pid) = pid else {
        return plt_hook_map_array::EMPTY;
    };
    catch_unwind(|| {
        let infos: Box<[plt_hook_map_info]> = maps::scan(pid)
            .iter()
            .map(plt_hook_map_info::from)
            .collect();
        if infos.is_empty() {
            return plt_hook_map_array::EMPTY;
        }
        let size = infos.len();
        plt_hook_map_array {
            data: Box::into_raw(infos).cast(),
            size,
        }
    })
    .unwrap_or(plt_hook_map_array::EMPTY)
}

/// Releases an array returned by [`plt_hook_scan`] and empties it.
///
/// A null pointer or an empty array is ignored, so freeing twice is harmless.
///
/// # Safety
/// `array` must be null or point to an array obtained from [`plt_hook_scan`]
/// that no other code frees.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn plt_hook_free_map_array(array: *mut plt_hook_map_array) {
    let Some(array) = (unsafe { array.as_mut() }) else {
        return;
    };
    if array.data.is_null() {
        array.size = 0;
        return;
    }
    let infos = unsafe {
        Box::from_raw(ptr::slice_from_raw_parts_mut(array.data, array.size))
    };
    for info in infos.iter() {
        if !info.path.is_null() {
            drop(unsafe { CString::from_raw(info.path) });
        }
    }
    drop(infos);
    *array = plt_hook_map_array::EMPTY;
}

unsafe fn register(
    identity: LibraryIdentity,
    symbol: *const c_char,
    callback: *mut c_void,
    backup: *mut *mut c_void,
) -> bool {
    if symbol.is_null() {
        return false;
    }
    let Ok(name) = unsafe { CStr::from_ptr(symbol) }.to_str() else {
        return false;
    };
    let backup = unsafe { RawBackup::new(backup) }.map(Into::into);
    guard("register", || {
        registry().get_or_insert_with(HookRegistry::new).register(
            identity,
            Selector::from(name),
            callback as usize,
            backup,
        )
    })
}

/// Registers a hook of `symbol` in the library backed by `dev`/`inode`.
///
/// # Safety
/// `symbol` must be null or a NUL-terminated string. `backup` must be null
/// or valid for writes until the next [`plt_hook_commit`] returns.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn plt_hook_register(
    dev: libc::dev_t,
    inode: libc::ino_t,
    symbol: *const c_char,
    callback: *mut c_void,
    backup: *mut *mut c_void,
) -> bool {
    let identity = LibraryIdentity::new(dev as u64, inode as u64);
    unsafe { register(identity, symbol, callback, backup) }
}

/// Like [`plt_hook_register`], for a library stored at `offset` inside its
/// backing file and spanning at most `size` bytes.
///
/// # Safety
/// Same as [`plt_hook_register`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn plt_hook_register_with_offset(
    dev: libc::dev_t,
    inode: libc::ino_t,
    offset: usize,
    size: usize,
    symbol: *const c_char,
    callback: *mut c_void,
    backup: *mut *mut c_void,
) -> bool {
    let identity = LibraryIdentity::with_range(dev as u64, inode as u64, offset, size);
    unsafe { register(identity, symbol, callback, backup) }
}

/// Applies every registered hook. `true` only if all of them applied.
#[unsafe(no_mangle)]
pub extern "C" fn plt_hook_commit() -> bool {
    guard("commit", || {
        registry().get_or_insert_with(HookRegistry::new).commit()
    })
}

/// Drops write permission from the shadow pages of earlier commits.
#[unsafe(no_mangle)]
pub extern "C" fn plt_hook_invalidate_backups() -> bool {
    guard("invalidate backups", || match registry().as_mut() {
        Some(registry) => registry.invalidate_backups(),
        None => Ok(()),
    })
}
