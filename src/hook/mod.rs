//! Hook registration, commit and backup invalidation
//!
//! A [`HookRegistry`] collects [`HookRequest`]s without touching memory.
//! [`HookRegistry::commit`] resolves and applies them, and
//! [`HookRegistry::invalidate_backups`] seals the shadow pages the commit
//! created.
//!
//! # Examples
//! ```no_run
//! use plt_hook::{HookRegistry, LibraryIdentity, Selector, hook::Hook, maps};
//!
//! extern "C" fn fake_getpid() -> i32 {
//!     42
//! }
//!
//! let maps = maps::scan_self();
//! let libc = maps
//!     .iter()
//!     .find(|map| map.path.as_deref().is_some_and(|p| p.contains("libc.so")))
//!     .unwrap();
//! let hook = Hook::new(fake_getpid as extern "C" fn() -> i32);
//! let mut registry = HookRegistry::new();
//! registry.register_hook(LibraryIdentity::of(libc), Selector::from("getpid"), &hook)?;
//! registry.commit()?;
//! # Ok::<(), plt_hook::Error>(())
//! ```

pub mod backup;
mod commit;
pub mod handle;

pub use backup::{BackupManager, ShadowMapping, restore_origins};
pub use handle::{Backup, Hook, Original, RawBackup};

use crate::{
    Result,
    error::invalid_hook_error,
    maps::Mapping,
    mmap::{DefaultMmap, Mmap},
};
use core::fmt;

/// A byte window of a container file that holds the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileRange {
    pub offset: usize,
    pub size: usize,
}

impl FileRange {
    #[inline]
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.offset && offset - self.offset < self.size
    }
}

/// Which loaded library a hook applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibraryIdentity {
    pub dev: u64,
    pub inode: u64,
    /// Restricts matching to mappings of this window of the file.
    pub range: Option<FileRange>,
}

impl LibraryIdentity {
    pub fn new(dev: u64, inode: u64) -> Self {
        LibraryIdentity {
            dev,
            inode,
            range: None,
        }
    }

    /// Identity of a library stored at `offset` inside its backing file,
    /// spanning at most `size` bytes.
    pub fn with_range(dev: u64, inode: u64, offset: usize, size: usize) -> Self {
        LibraryIdentity {
            dev,
            inode,
            range: Some(FileRange { offset, size }),
        }
    }

    /// Identity of the file backing `map`.
    pub fn of(map: &Mapping) -> Self {
        Self::new(map.dev, map.inode)
    }

    /// Whether `map` belongs to this library.
    pub fn matches(&self, map: &Mapping) -> bool {
        map.dev == self.dev
            && map.inode == self.inode
            && self.range.is_none_or(|range| range.contains(map.offset))
    }

    /// File offset of the mapping that carries the ELF header.
    #[inline]
    pub(crate) fn header_offset(&self) -> usize {
        self.range.map_or(0, |range| range.offset)
    }
}

impl fmt::Display for LibraryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}:{:x} {}",
            libc::major(self.dev as _),
            libc::minor(self.dev as _),
            self.inode
        )?;
        if let Some(range) = &self.range {
            write!(f, " [0x{:x}+0x{:x}]", range.offset, range.size)?;
        }
        Ok(())
    }
}

/// What to hook inside a library.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Every indirection slot bound to the named symbol.
    Symbol(String),
    /// The pointer-sized slot at this offset from the load bias.
    Offset(usize),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Symbol(name) => write!(f, "symbol [{name}]"),
            Selector::Offset(offset) => write!(f, "offset 0x{offset:x}"),
        }
    }
}

impl From<&str> for Selector {
    fn from(name: &str) -> Self {
        Selector::Symbol(name.to_owned())
    }
}

impl From<String> for Selector {
    fn from(name: String) -> Self {
        Selector::Symbol(name)
    }
}

/// One registered hook, applied by the next commit.
#[derive(Debug, Clone)]
pub struct HookRequest {
    pub target: LibraryIdentity,
    pub selector: Selector,
    /// Address written into the designated slots.
    pub replacement: usize,
    /// Receives the value displaced from the first slot.
    pub backup: Option<Backup>,
}

/// How a commit treats requests that fail to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPolicy {
    /// Apply every request that resolves, report the others.
    #[default]
    BestEffort,
    /// Resolve every request first and apply none unless all resolve.
    AllOrNothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitState {
    /// Nothing was committed yet.
    #[default]
    Idle,
    Committing,
    /// The last commit applied every request.
    Committed,
    /// The last commit failed for at least one request.
    PartiallyCommitted,
}

/// Collects hook requests and applies them to the calling process.
///
/// Methods take `&mut self`; callers sharing a registry between threads
/// serialize access themselves.
pub struct HookRegistry<M: Mmap = DefaultMmap> {
    pending: Vec<HookRequest>,
    policy: CommitPolicy,
    state: CommitState,
    backups: BackupManager<M>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Mmap> fmt::Debug for HookRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("pending", &self.pending.len())
            .field("policy", &self.policy)
            .field("state", &self.state)
            .field("backups", &self.backups)
            .finish()
    }
}

impl HookRegistry {
    /// A best-effort registry using the default memory backend.
    pub fn new() -> Self {
        Self::with_policy(CommitPolicy::default())
    }
}

impl<M: Mmap> HookRegistry<M> {
    pub fn with_policy(policy: CommitPolicy) -> Self {
        HookRegistry {
            pending: Vec::new(),
            policy,
            state: CommitState::Idle,
            backups: BackupManager::new(),
        }
    }

    #[inline]
    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    #[inline]
    pub fn set_policy(&mut self, policy: CommitPolicy) {
        self.policy = policy;
    }

    #[inline]
    pub fn state(&self) -> CommitState {
        self.state
    }

    /// Number of requests waiting for the next commit.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of shadow pages that still carry write permission.
    #[inline]
    pub fn shadow_count(&self) -> usize {
        self.backups.shadow_count()
    }

    #[inline]
    pub fn backups(&self) -> &BackupManager<M> {
        &self.backups
    }

    /// Records a request; nothing is resolved or written until [`commit`].
    ///
    /// Duplicate requests are kept and applied in registration order.
    ///
    /// [`commit`]: HookRegistry::commit
    pub fn register(
        &mut self,
        target: LibraryIdentity,
        selector: Selector,
        replacement: usize,
        backup: Option<Backup>,
    ) -> Result<()> {
        match &selector {
            Selector::Symbol(name) if name.is_empty() => {
                return Err(invalid_hook_error("empty symbol name"));
            }
            Selector::Symbol(name) if name.contains('\0') => {
                return Err(invalid_hook_error(format!("symbol name {name:?} contains NUL")));
            }
            Selector::Offset(offset) if offset % align_of::<usize>() != 0 => {
                return Err(invalid_hook_error(format!(
                    "offset 0x{offset:x} is not pointer aligned"
                )));
            }
            _ => {}
        }
        if replacement == 0 {
            return Err(invalid_hook_error("null replacement"));
        }
        if let Some(range) = &target.range {
            if range.size == 0 {
                return Err(invalid_hook_error("empty file range"));
            }
        }
        #[cfg(feature = "log")]
        log::debug!(
            "[Register] {} in {}: replacement: 0x{:x}",
            selector,
            target,
            replacement
        );
        self.pending.push(HookRequest {
            target,
            selector,
            replacement,
            backup,
        });
        Ok(())
    }

    /// Records a request whose replacement and original live in `hook`.
    pub fn register_hook<F: Copy>(
        &mut self,
        target: LibraryIdentity,
        selector: Selector,
        hook: &Hook<F>,
    ) -> Result<()> {
        self.register(
            target,
            selector,
            hook.replacement_addr(),
            Some(Backup::Handle(hook.original().clone())),
        )
    }

    /// Drops write permission from every shadow page created by earlier
    /// commits. Applied hooks stay in place.
    pub fn invalidate_backups(&mut self) -> Result<()> {
        self.backups.invalidate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn map(offset: usize) -> Mapping {
        Mapping::parse_line(&format!(
            "7f0000000000-7f0000001000 r--p {offset:08x} fd:01 42 /data/app/base.apk"
        ))
        .unwrap()
    }

    #[test]
    fn identity_matches_dev_and_inode() {
        let m = map(0);
        let identity = LibraryIdentity::of(&m);
        assert!(identity.matches(&m));
        assert!(!LibraryIdentity::new(m.dev, 43).matches(&m));
        assert!(!LibraryIdentity::new(m.dev + 1, 42).matches(&m));
    }

    #[rstest]
    #[case(0x0fff, false)]
    #[case(0x1000, true)]
    #[case(0x5fff, true)]
    #[case(0x6000, false)]
    fn identity_range_bounds(#[case] offset: usize, #[case] expected: bool) {
        let m = map(offset);
        let identity = LibraryIdentity::with_range(m.dev, 42, 0x1000, 0x5000);
        assert_eq!(identity.matches(&m), expected);
    }

    #[rstest]
    #[case(Selector::from(""))]
    #[case(Selector::from("get\0pid"))]
    #[case(Selector::Offset(3))]
    fn register_rejects_invalid_selectors(#[case] selector: Selector) {
        let mut registry = HookRegistry::new();
        let err = registry
            .register(LibraryIdentity::new(1, 2), selector, 0x1000, None)
            .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidHook { .. }));
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn register_rejects_null_replacement() {
        let mut registry = HookRegistry::new();
        assert!(
            registry
                .register(LibraryIdentity::new(1, 2), "getpid".into(), 0, None)
                .is_err()
        );
    }

    #[test]
    fn register_keeps_duplicates_in_order() {
        let mut registry = HookRegistry::new();
        for replacement in [0x1000, 0x2000] {
            registry
                .register(LibraryIdentity::new(1, 2), "getpid".into(), replacement, None)
                .unwrap();
        }
        assert_eq!(registry.pending(), 2);
        assert_eq!(registry.pending[0].replacement, 0x1000);
        assert_eq!(registry.pending[1].replacement, 0x2000);
        assert_eq!(registry.state(), CommitState::Idle);
    }

    #[test]
    fn selector_display() {
        assert_eq!(Selector::from("getpid").to_string(), "symbol [getpid]");
        assert_eq!(Selector::Offset(0x3fe0).to_string(), "offset 0x3fe0");
    }
}
