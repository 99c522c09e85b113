//! Handles carrying replacement functions and captured originals.
use core::{
    ffi::c_void,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};
use delegate::delegate;
use std::sync::Arc;

/// Shared cell receiving the value a commit displaced from a slot.
///
/// Clones share the cell, so a replacement function can keep one to call
/// through to the original function.
#[derive(Clone, Debug, Default)]
pub struct Original(Arc<AtomicUsize>);

impl Original {
    /// Creates an empty cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Address captured by the last commit, 0 before any.
    #[inline]
    pub fn addr(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Whether a commit already captured an address.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.addr() != 0
    }

    /// The captured address as a function pointer of type `F`.
    ///
    /// # Safety
    /// `F` must be a pointer-sized function pointer type matching the
    /// signature of the hooked function.
    #[inline]
    pub unsafe fn get<F: Copy>(&self) -> Option<F> {
        const { assert!(size_of::<F>() == size_of::<usize>()) };
        let addr = self.addr();
        (addr != 0).then(|| unsafe { core::mem::transmute_copy::<usize, F>(&addr) })
    }

    #[inline]
    pub(crate) fn store(&self, addr: usize) {
        self.0.store(addr, Ordering::Release);
    }
}

/// A typed replacement function together with the cell for its original.
///
/// ```rust,ignore
/// static GETPID: LazyLock<Hook<extern "C" fn() -> i32>> =
///     LazyLock::new(|| Hook::new(fake_getpid));
/// ```
pub struct Hook<F> {
    replacement: F,
    original: Original,
}

impl<F: Copy> Hook<F> {
    /// Wraps `replacement`, which must be a pointer-sized function pointer.
    pub fn new(replacement: F) -> Self {
        const { assert!(size_of::<F>() == size_of::<usize>()) };
        Hook {
            replacement,
            original: Original::new(),
        }
    }

    #[inline]
    pub fn replacement(&self) -> F {
        self.replacement
    }

    /// Address of the replacement function.
    #[inline]
    pub fn replacement_addr(&self) -> usize {
        unsafe { core::mem::transmute_copy::<F, usize>(&self.replacement) }
    }

    /// The cell that receives the original function.
    #[inline]
    pub fn original(&self) -> &Original {
        &self.original
    }

    /// The original function captured by the last commit.
    ///
    /// # Safety
    /// `F` must match the signature of the hooked function.
    #[inline]
    pub unsafe fn original_fn(&self) -> Option<F> {
        unsafe { self.original.get::<F>() }
    }

    delegate! {
        to self.original {
            /// Whether a commit already captured the original function.
            pub fn is_set(&self) -> bool;
            /// Address of the original function, 0 before any commit.
            #[call(addr)]
            pub fn original_addr(&self) -> usize;
        }
    }
}

/// A caller-owned location receiving the original function, as passed
/// through the C interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBackup(NonNull<*mut c_void>);

// The location is only written during commit, which callers serialize.
unsafe impl Send for RawBackup {}

impl RawBackup {
    /// Wraps `ptr`, `None` if it is null.
    ///
    /// # Safety
    /// A non-null `ptr` must stay valid for writes until every commit that
    /// may fill it has returned.
    #[inline]
    pub unsafe fn new(ptr: *mut *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(RawBackup)
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut *mut c_void {
        self.0.as_ptr()
    }
}

/// Where a commit stores the value it displaced.
#[derive(Debug, Clone)]
pub enum Backup {
    /// A shared cell, usually owned by a [`Hook`].
    Handle(Original),
    /// A raw location owned by the caller.
    Raw(RawBackup),
}

impl Backup {
    pub(crate) fn store(&self, addr: usize) {
        match self {
            Backup::Handle(original) => original.store(addr),
            Backup::Raw(raw) => unsafe { raw.as_ptr().write(addr as *mut c_void) },
        }
    }
}

impl From<Original> for Backup {
    fn from(original: Original) -> Self {
        Backup::Handle(original)
    }
}

impl From<RawBackup> for Backup {
    fn from(raw: RawBackup) -> Self {
        Backup::Raw(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type AnswerFn = extern "C" fn() -> i32;

    extern "C" fn answer() -> i32 {
        42
    }

    #[test]
    fn hook_exposes_replacement_address() {
        let hook = Hook::new(answer as AnswerFn);
        assert_eq!(hook.replacement_addr(), answer as AnswerFn as usize);
        assert!(!hook.is_set());
        assert_eq!(hook.original_addr(), 0);
        assert!(unsafe { hook.original_fn() }.is_none());
    }

    #[test]
    fn original_is_shared_between_clones() {
        let hook = Hook::new(answer as AnswerFn);
        let backup = Backup::from(hook.original().clone());
        backup.store(answer as AnswerFn as usize);
        assert!(hook.is_set());
        let original = unsafe { hook.original_fn() }.unwrap();
        assert_eq!(original(), 42);
    }

    #[test]
    fn raw_backup_writes_through() {
        let mut slot: *mut c_void = core::ptr::null_mut();
        let raw = unsafe { RawBackup::new(&mut slot) }.unwrap();
        Backup::Raw(raw).store(0x1234);
        assert_eq!(slot as usize, 0x1234);
        assert!(unsafe { RawBackup::new(core::ptr::null_mut()) }.is_none());
    }
}
