//! Applying pending hook requests
use crate::{
    Error, Result,
    error::{HookFailure, protection_error, scan_error},
    hook::{CommitPolicy, CommitState, HookRegistry, HookRequest, LibraryIdentity, backup},
    image::{MappedImage, RelocationSlot},
    maps::{self, Mapping, ProcessId},
    mmap::{Mmap, rounddown},
};
use core::sync::atomic::{AtomicUsize, Ordering};
use hashbrown::HashMap;

impl<M: Mmap> HookRegistry<M> {
    /// Applies every pending request to the calling process.
    ///
    /// All pending requests are consumed, whatever their outcome. Each one is
    /// resolved against a fresh scan of the process, then its slots are
    /// rewritten:
    /// - slots on a page this registry already shadows, or on a writable
    ///   page, are swapped in place with one atomic store;
    /// - any other page is replaced by a patched shadow copy in one remap.
    ///
    /// The value displaced from the first slot of a request goes to its
    /// backup. Returns [`Error::PartialCommit`] listing every request that
    /// failed; under [`CommitPolicy::BestEffort`] the others stay applied.
    pub fn commit(&mut self) -> Result<()> {
        self.state = CommitState::Committing;
        let requests = core::mem::take(&mut self.pending);
        if requests.is_empty() {
            self.state = CommitState::Committed;
            return Ok(());
        }

        let maps = match maps::try_scan(ProcessId::Current) {
            Ok(mut maps) => {
                backup::restore_origins(&mut maps);
                maps
            }
            Err(err) => {
                let failures = requests
                    .into_iter()
                    .enumerate()
                    .map(|(index, request)| HookFailure {
                        index,
                        selector: request.selector,
                        error: scan_error(err.to_string()),
                    })
                    .collect();
                return self.finish(failures, 0);
            }
        };

        let resolved = resolve_all(&maps, &requests);
        let mut failures = Vec::new();
        let mut ready = Vec::new();
        for ((index, request), slots) in requests.into_iter().enumerate().zip(resolved) {
            match slots {
                Ok(slots) => ready.push((index, request, slots)),
                Err(error) => failures.push(HookFailure {
                    index,
                    selector: request.selector,
                    error,
                }),
            }
        }
        if self.policy == CommitPolicy::AllOrNothing && !failures.is_empty() {
            #[cfg(feature = "log")]
            log::warn!(
                "[Commit] {} request(s) failed to resolve, nothing applied",
                failures.len()
            );
            return self.finish(failures, 0);
        }

        let mut applied = 0;
        for (index, request, slots) in ready {
            match self.apply(&maps, &request, &slots) {
                Ok(()) => applied += 1,
                Err(error) => failures.push(HookFailure {
                    index,
                    selector: request.selector,
                    error,
                }),
            }
        }
        failures.sort_by_key(|failure| failure.index);
        self.finish(failures, applied)
    }

    fn finish(&mut self, failures: Vec<HookFailure>, applied: usize) -> Result<()> {
        if failures.is_empty() {
            #[cfg(feature = "log")]
            log::debug!("[Commit] {} request(s) applied", applied);
            self.state = CommitState::Committed;
            return Ok(());
        }
        #[cfg(feature = "log")]
        for failure in &failures {
            log::warn!(
                "[Commit] request #{} {}: {}",
                failure.index,
                failure.selector,
                failure.error
            );
        }
        self.state = CommitState::PartiallyCommitted;
        Err(Error::PartialCommit { failures, applied })
    }

    /// Writes the replacement of `request` into every slot.
    ///
    /// Either every slot ends up patched or none does: when one slot fails,
    /// the slots patched before it get their previous value back and the
    /// backup is left untouched.
    fn apply(
        &mut self,
        maps: &[Mapping],
        request: &HookRequest,
        slots: &[RelocationSlot],
    ) -> Result<()> {
        let mut patched: Vec<(&RelocationSlot, usize)> = Vec::with_capacity(slots.len());
        for slot in slots {
            match self.patch_slot(maps, slot.address, request.replacement) {
                Ok(prev) => patched.push((slot, prev)),
                Err(err) => {
                    // Patched slots sit on shadowed or writable pages now.
                    for &(slot, prev) in patched.iter().rev() {
                        unsafe { swap_slot(slot.address, prev) };
                    }
                    #[cfg(feature = "log")]
                    log::warn!(
                        "[Commit] {} in {}: slot 0x{:x} failed, {} slot(s) rolled back",
                        request.selector,
                        request.target,
                        slot.address,
                        patched.len()
                    );
                    return Err(err);
                }
            }
        }
        if let (Some(backup), Some(&(_, prev))) = (&request.backup, patched.first()) {
            backup.store(prev);
        }
        #[cfg(feature = "log")]
        for &(slot, prev) in &patched {
            log::debug!(
                "[Commit] {} in {}: slot 0x{:x} ({}) 0x{:x} -> 0x{:x}",
                request.selector,
                request.target,
                slot.address,
                slot.r_type_str(),
                prev,
                request.replacement
            );
        }
        Ok(())
    }

    /// Stores `value` into the slot at `addr` and returns the previous value.
    fn patch_slot(&mut self, maps: &[Mapping], addr: usize, value: usize) -> Result<usize> {
        let page = rounddown(addr, M::page_size());
        if self.backups.is_shadowed(page) {
            return Ok(unsafe { swap_slot(addr, value) });
        }
        let map = maps
            .iter()
            .find(|map| map.contains(addr))
            .ok_or_else(|| protection_error(format!("slot 0x{addr:x} is not mapped")))?;
        if map.is_writable() {
            return Ok(unsafe { swap_slot(addr, value) });
        }
        if !map.is_readable() {
            return Err(protection_error(format!("slot 0x{addr:x} is not readable")));
        }
        unsafe { self.backups.shadow(page, map, addr, value) }
    }
}

/// Resolves every request, locating each library once.
fn resolve_all(maps: &[Mapping], requests: &[HookRequest]) -> Vec<Result<Vec<RelocationSlot>>> {
    let mut images: HashMap<LibraryIdentity, Result<MappedImage>> = HashMap::new();
    requests
        .iter()
        .map(|request| {
            let image = images
                .entry(request.target)
                .or_insert_with(|| MappedImage::locate(maps, &request.target));
            match image {
                Ok(image) => image.resolve(&request.selector),
                Err(err) => Err(err.clone()),
            }
        })
        .collect()
}

#[inline]
unsafe fn swap_slot(addr: usize, value: usize) -> usize {
    unsafe { (*(addr as *const AtomicUsize)).swap(value, Ordering::AcqRel) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::REL_JUMP_SLOT,
        hook::{Backup, Original, Selector},
        mmap::{DefaultMmap, MapFlags, ProtFlags},
    };
    use core::{ffi::c_void, ptr::NonNull};

    /// Memory backend whose kernel refuses every remap.
    struct RemapRefused;

    impl Mmap for RemapRefused {
        unsafe fn mmap_anonymous(
            len: usize,
            prot: ProtFlags,
            flags: MapFlags,
        ) -> Result<NonNull<c_void>> {
            unsafe { DefaultMmap::mmap_anonymous(len, prot, flags) }
        }

        unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()> {
            unsafe { DefaultMmap::munmap(addr, len) }
        }

        unsafe fn mprotect(addr: NonNull<c_void>, len: usize, prot: ProtFlags) -> Result<()> {
            unsafe { DefaultMmap::mprotect(addr, len, prot) }
        }

        unsafe fn mremap_fixed(
            _old: NonNull<c_void>,
            _len: usize,
            _new: NonNull<c_void>,
        ) -> Result<()> {
            Err(protection_error("mremap refused"))
        }

        fn page_size() -> usize {
            DefaultMmap::page_size()
        }
    }

    /// Maps a page whose first slot holds `value` and describes it as the
    /// scanner would.
    fn page(value: usize, perms: ProtFlags) -> Mapping {
        let len = DefaultMmap::page_size();
        let addr = unsafe {
            DefaultMmap::mmap_anonymous(
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .unwrap();
        unsafe {
            addr.as_ptr().cast::<usize>().write(value);
            DefaultMmap::mprotect(addr, len, perms).unwrap();
        }
        let start = addr.as_ptr() as usize;
        Mapping {
            start,
            end: start + len,
            perms,
            is_private: true,
            offset: 0,
            dev: 0,
            inode: 0,
            path: None,
        }
    }

    fn read(addr: usize) -> usize {
        unsafe { (addr as *const usize).read_volatile() }
    }

    /// A writable page followed by a read-only one, each holding one slot.
    fn fixture() -> (Vec<Mapping>, Vec<RelocationSlot>) {
        let maps = vec![
            page(0x1111, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE),
            page(0x2222, ProtFlags::PROT_READ),
        ];
        let slots = maps
            .iter()
            .map(|map| RelocationSlot {
                address: map.start,
                value: read(map.start),
                r_type: REL_JUMP_SLOT,
            })
            .collect();
        (maps, slots)
    }

    fn request(original: &Original) -> HookRequest {
        HookRequest {
            target: LibraryIdentity::new(0, 0),
            selector: Selector::from("getpid"),
            replacement: 0x3333,
            backup: Some(Backup::Handle(original.clone())),
        }
    }

    #[test]
    fn failed_slot_rolls_back_the_request() {
        let (maps, slots) = fixture();
        let original = Original::new();
        let mut registry = HookRegistry::<RemapRefused>::with_policy(CommitPolicy::BestEffort);

        let err = registry
            .apply(&maps, &request(&original), &slots)
            .unwrap_err();
        assert!(matches!(err, Error::ProtectionChange { .. }));
        assert_eq!(read(slots[0].address), 0x1111);
        assert_eq!(read(slots[1].address), 0x2222);
        assert!(!original.is_set());
        assert_eq!(registry.shadow_count(), 0);
    }

    #[test]
    fn every_slot_is_patched_and_the_first_is_backed_up() {
        let (maps, slots) = fixture();
        let original = Original::new();
        let mut registry = HookRegistry::<DefaultMmap>::with_policy(CommitPolicy::BestEffort);

        registry
            .apply(&maps, &request(&original), &slots)
            .unwrap();
        assert_eq!(read(slots[0].address), 0x3333);
        assert_eq!(read(slots[1].address), 0x3333);
        assert_eq!(original.addr(), 0x1111);
        // Only the read-only page needed a shadow.
        assert_eq!(registry.shadow_count(), 1);
        assert!(registry.backups().is_shadowed(slots[1].address));

        registry.invalidate_backups().unwrap();
        assert_eq!(read(slots[1].address), 0x3333);
    }
}
