//! Shadow pages standing in for read-only indirection-table pages
//!
//! A read-only page is never made writable in place. The committer asks the
//! [`BackupManager`] for a writable anonymous copy of it instead, patches
//! the copy and moves it over the original page in a single remap. The
//! manager remembers every such shadow until [`BackupManager::invalidate`]
//! gives it back its original protection.
//!
//! Once moved, a shadow shows up as an anonymous mapping in later scans. The
//! file origin of every replaced page is kept for the whole process so that
//! [`restore_origins`] can attribute such pages to their library again,
//! whichever registry replaced them.

use crate::{
    Result,
    error::protection_error,
    maps::Mapping,
    mmap::{DefaultMmap, MapFlags, Mmap, ProtFlags},
};
use core::{
    ffi::c_void,
    marker::PhantomData,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};
use hashbrown::HashMap;
use std::sync::{Mutex, MutexGuard};

/// File-backed description of every page ever replaced by a shadow.
static ORIGINS: Mutex<Vec<Mapping>> = Mutex::new(Vec::new());

fn origins() -> MutexGuard<'static, Vec<Mapping>> {
    ORIGINS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn record_origin(origin: Mapping) {
    let mut origins = origins();
    match origins.iter_mut().find(|known| known.start == origin.start) {
        Some(known) => *known = origin,
        None => origins.push(origin),
    }
}

/// Adds back the file-backed description of every replaced page that
/// `maps`, a fresh scan of the calling process, lists as anonymous memory.
///
/// The added entries carry the current protection of the page and are kept
/// sorted by start address next to the anonymous entry covering them. A page
/// is only claimed while the closest file-backed mapping below it belongs to
/// the same file, which holds for the pages of a loaded image since its
/// header comes first. Records of files no longer mapped at all are dropped:
/// their addresses may be reused by unrelated memory.
pub fn restore_origins(maps: &mut Vec<Mapping>) {
    let is_file_of = |map: &Mapping, origin: &Mapping| {
        !map.is_anonymous() && map.dev == origin.dev && map.inode == origin.inode
    };
    let mut origins = origins();
    origins.retain(|origin| maps.iter().any(|map| is_file_of(map, origin)));
    let restored: Vec<Mapping> = origins
        .iter()
        .filter_map(|origin| {
            let current = maps.iter().find(|map| map.contains(origin.start))?;
            if !current.is_anonymous() || current.path.is_some() || current.end < origin.end {
                return None;
            }
            let below = maps
                .iter()
                .filter(|map| !map.is_anonymous() && map.end <= origin.start)
                .max_by_key(|map| map.end)?;
            is_file_of(below, origin).then(|| Mapping {
                perms: current.perms,
                ..origin.clone()
            })
        })
        .collect();
    drop(origins);
    if restored.is_empty() {
        return;
    }
    #[cfg(feature = "log")]
    log::trace!("[Shadow] restored the origin of {} page(s)", restored.len());
    maps.extend(restored);
    maps.sort_by_key(|map| map.start);
}

/// An anonymous page that replaced one page of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowMapping {
    addr: usize,
    len: usize,
    prot: ProtFlags,
}

impl ShadowMapping {
    /// Address of the replaced page.
    #[inline]
    pub fn addr(&self) -> usize {
        self.addr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`: a shadow spans at least one page.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Protection of the page before it was shadowed.
    #[inline]
    pub fn prot(&self) -> ProtFlags {
        self.prot
    }
}

/// Owner of every live shadow page of a registry.
///
/// Dropping the manager does not unmap the shadows: they back live
/// function pointers.
pub struct BackupManager<M: Mmap = DefaultMmap> {
    shadows: HashMap<usize, ShadowMapping>,
    _marker: PhantomData<M>,
}

impl<M: Mmap> Default for BackupManager<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Mmap> core::fmt::Debug for BackupManager<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BackupManager")
            .field("shadows", &self.shadows.len())
            .finish()
    }
}

impl<M: Mmap> BackupManager<M> {
    pub fn new() -> Self {
        BackupManager {
            shadows: HashMap::new(),
            _marker: PhantomData,
        }
    }

    /// Number of shadows that still carry write permission.
    #[inline]
    pub fn shadow_count(&self) -> usize {
        self.shadows.len()
    }

    #[inline]
    pub fn is_shadowed(&self, page: usize) -> bool {
        self.shadows.contains_key(&page)
    }

    pub fn shadows(&self) -> impl Iterator<Item = &ShadowMapping> {
        self.shadows.values()
    }

    /// Replaces the page at `page`, part of `map`, by a copy whose slot at
    /// `slot` holds `value`, and returns the value the slot held before.
    ///
    /// The copy gets the protection of `map` plus write permission. Nothing
    /// changes for concurrent readers until the copy is moved over the page,
    /// which happens in one step.
    ///
    /// # Safety
    /// `page` must be a mapped, readable page of `M::page_size()` bytes
    /// described by `map`, and `slot` a pointer-aligned address inside it.
    pub(crate) unsafe fn shadow(
        &mut self,
        page: usize,
        map: &Mapping,
        slot: usize,
        value: usize,
    ) -> Result<usize> {
        let len = M::page_size();
        let prot = map.perms;
        debug_assert!(page % len == 0 && slot >= page && slot + size_of::<usize>() <= page + len);
        let target = NonNull::new(page as *mut c_void)
            .ok_or_else(|| protection_error("cannot shadow the null page"))?;

        let shadow = unsafe {
            M::mmap_anonymous(
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }?;
        let prev = unsafe {
            core::ptr::copy_nonoverlapping(page as *const u8, shadow.as_ptr().cast::<u8>(), len);
            let cell = &*((shadow.as_ptr() as usize + (slot - page)) as *const AtomicUsize);
            cell.swap(value, Ordering::AcqRel)
        };
        let installed = unsafe {
            M::mprotect(shadow, len, prot | ProtFlags::PROT_WRITE)
                .and_then(|_| M::mremap_fixed(shadow, len, target))
        };
        if let Err(err) = installed {
            if let Err(_unmap_err) = unsafe { M::munmap(shadow, len) } {
                #[cfg(feature = "log")]
                log::warn!("[Shadow] leaked staging page 0x{:x}: {}", shadow.as_ptr() as usize, _unmap_err);
            }
            return Err(err);
        }

        #[cfg(feature = "log")]
        log::trace!(
            "[Shadow] page: 0x{:x}, length: {}, prot: {:?}, slot: 0x{:x}, 0x{:x} -> 0x{:x}",
            page,
            len,
            prot,
            slot,
            prev,
            value
        );
        self.shadows.insert(
            page,
            ShadowMapping {
                addr: page,
                len,
                prot,
            },
        );
        if !map.is_anonymous() {
            record_origin(Mapping {
                start: page,
                end: page + len,
                offset: map.offset + (page - map.start),
                ..map.clone()
            });
        }
        Ok(prev)
    }

    /// Drops write permission from every shadow by restoring the original
    /// protection of its page. Patched values stay in place.
    ///
    /// Every shadow is retired, also when restoring another one fails; the
    /// failures are reported together afterwards.
    pub fn invalidate(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        for (_, shadow) in self.shadows.drain() {
            let res = NonNull::new(shadow.addr as *mut c_void)
                .ok_or_else(|| protection_error("null shadow page"))
                .and_then(|addr| unsafe { M::mprotect(addr, shadow.len, shadow.prot) });
            match res {
                Ok(()) => {
                    #[cfg(feature = "log")]
                    log::trace!(
                        "[Invalidate] page: 0x{:x}, prot: {:?}",
                        shadow.addr,
                        shadow.prot
                    );
                }
                Err(err) => failures.push(format!("0x{:x}: {}", shadow.addr, err)),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(protection_error(format!(
                "failed to restore {} shadow page(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}
