//! # plt_hook
//! Hooks calls that the shared libraries of the current process make through
//! their PLT/GOT, without a dynamic loader API and without knowing where the
//! libraries were loaded.
//! ## Usage
//! Libraries are identified by the device and inode of their backing file,
//! as read from `/proc/self/maps`, optionally narrowed to a byte window of a
//! container file (a library stored uncompressed inside an APK, say). A hook
//! names either a symbol or the raw offset of a slot.
//! ```no_run
//! use plt_hook::{HookRegistry, LibraryIdentity, hook::Hook, maps};
//!
//! extern "C" fn fake_getpid() -> i32 {
//!     2333
//! }
//!
//! let maps = maps::scan_self();
//! let exe = maps.iter().find(|map| map.inode != 0).unwrap();
//! let hook = Hook::new(fake_getpid as extern "C" fn() -> i32);
//!
//! let mut registry = HookRegistry::new();
//! registry.register_hook(LibraryIdentity::of(exe), "getpid".into(), &hook)?;
//! registry.commit()?;
//! registry.invalidate_backups()?;
//! # Ok::<(), plt_hook::Error>(())
//! ```
//! ## Features
//! - `log`: trace and debug logging through the `log` crate.
//! - `capi`: the C interface declared in `include/plt_hook.h`.
//! - `use-syscall`: issue raw syscalls instead of going through libc.

pub mod arch;
#[cfg(feature = "capi")]
pub mod capi;
pub mod elf;
mod error;
pub mod hook;
pub mod image;
pub mod maps;
pub mod mmap;
mod os;

pub use ::elf::abi;
pub use error::{Error, HookFailure, protection_error};
pub use hook::{
    CommitPolicy, CommitState, FileRange, HookRegistry, HookRequest, LibraryIdentity, Selector,
};
pub use image::{MappedImage, RelocationSlot};
pub use maps::{Mapping, ProcessId};

/// A type alias for `Result`s returned by `plt_hook` functions.
///
/// This is a convenience alias that eliminates the need to repeatedly specify
/// the `Error` type in function signatures.
pub type Result<T> = core::result::Result<T, Error>;
