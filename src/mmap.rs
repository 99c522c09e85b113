//! Memory mapping operations used to patch indirection tables
//!
//! This module provides the trait and flag types for the few address-space
//! operations the hook committer needs. It abstracts the platform backend so
//! the committer can be driven by libc or by raw syscalls.
//!
//! Key concepts:
//! - **Shadow page**: an anonymous page staged with patched content.
//! - **Fixed remap**: moving the shadow over the original page in one step,
//!   so concurrent readers see either the old or the new page.
//! - **Protection Flags**: Control read, write, and execute permissions.
//!
//! # Safety
//! These operations change the process's address space underneath running
//! code. Incorrect usage can crash the process.

pub use crate::os::DefaultMmap;

use crate::Result;
use bitflags::bitflags;
use core::{
    ffi::{c_int, c_void},
    ptr::NonNull,
};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    /// Memory protection flags for controlling access permissions.
    ///
    /// These flags determine what operations can be performed on a mapped memory region.
    /// They can be combined using bitwise OR operations. The bit values match
    /// the kernel's `PROT_*` constants.
    pub struct ProtFlags: c_int {
        /// No access allowed.
        const PROT_NONE = 0;

        /// Allow reading from the memory region.
        const PROT_READ = 1;

        /// Allow writing to the memory region.
        const PROT_WRITE = 2;

        /// Allow executing code in the memory region.
        const PROT_EXEC = 4;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug)]
    /// Memory mapping configuration flags.
    pub struct MapFlags: c_int {
        /// Create a private copy-on-write mapping. Changes are not visible to other processes.
        const MAP_PRIVATE = 2;

        /// Create an anonymous mapping not backed by any file.
        const MAP_ANONYMOUS = 32;
    }
}

/// A trait for the low-level memory operations behind hook commits.
///
/// # Safety
/// All methods except [`Mmap::page_size`] are unsafe because they manipulate
/// the process's virtual address space. Implementors must report every
/// refusal of the kernel as an error instead of silently continuing.
///
/// # Example
/// ```rust,ignore
/// struct MyMmap;
///
/// impl Mmap for MyMmap {
///     unsafe fn mmap_anonymous(
///         len: usize,
///         prot: ProtFlags,
///         flags: MapFlags,
///     ) -> Result<NonNull<c_void>> {
///         // Platform-specific implementation
///         todo!()
///     }
///
///     // Implement other required methods...
/// }
/// ```
pub trait Mmap {
    /// Creates an anonymous memory mapping at an address chosen by the system.
    ///
    /// # Arguments
    /// * `len` - Size of the mapping in bytes.
    /// * `prot` - Initial memory protection flags.
    /// * `flags` - Mapping configuration flags; `MAP_ANONYMOUS` is implied.
    ///
    /// # Returns
    /// A pointer to the allocated memory region on success.
    ///
    /// # Safety
    /// Manipulates address space.
    unsafe fn mmap_anonymous(len: usize, prot: ProtFlags, flags: MapFlags)
    -> Result<NonNull<c_void>>;

    /// Unmaps a memory region, releasing the associated resources.
    ///
    /// # Safety
    /// Ensure `addr` and `len` match the original mapping. Do not access the region after unmapping.
    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()>;

    /// Changes the protection of a memory region.
    ///
    /// # Arguments
    /// * `addr` - Pointer to the start of the region (must be page-aligned).
    /// * `len` - Size of the region in bytes (rounded up to page boundary).
    /// * `prot` - New protection flags to apply.
    ///
    /// # Safety
    /// Changing permissions can affect running code. `addr` must be page-aligned.
    unsafe fn mprotect(addr: NonNull<c_void>, len: usize, prot: ProtFlags) -> Result<()>;

    /// Moves the pages at `old` over the pages at `new`, replacing whatever
    /// was mapped there in a single step.
    ///
    /// After success, `old` is no longer mapped and `new` serves the moved
    /// content with the moved pages' protection.
    ///
    /// # Safety
    /// Both addresses must be page-aligned and `len` bytes long. The pages
    /// previously mapped at `new` are discarded.
    unsafe fn mremap_fixed(old: NonNull<c_void>, len: usize, new: NonNull<c_void>) -> Result<()>;

    /// Size in bytes of a memory page.
    fn page_size() -> usize;
}

#[inline]
pub(crate) fn rounddown(value: usize, align: usize) -> usize {
    value & !(align - 1)
}
