use crate::hook::Selector;
use std::borrow::Cow;
use core::fmt::Display;

/// Error types used throughout the `plt_hook` library.
///
/// Resolution and protection failures are local to a single hook request;
/// [`Error::PartialCommit`] aggregates them for a whole commit.
#[derive(Debug, Clone)]
pub enum Error {
    /// The mapping description of a process could not be read or parsed.
    ///
    /// This error typically indicates:
    /// * The process does not exist (or has exited)
    /// * `/proc` is not mounted or not accessible
    /// * A line of the description is malformed
    ScanUnavailable {
        /// A descriptive message about the scan failure.
        msg: Cow<'static, str>,
    },

    /// No usable mapping matches the requested library identity.
    LibraryNotMapped {
        /// A descriptive message naming the identity.
        msg: Cow<'static, str>,
    },

    /// The library does not carry the requested symbol in its dynamic symbol table.
    SymbolNotFound {
        /// A descriptive message naming the symbol.
        msg: Cow<'static, str>,
    },

    /// The symbol exists but no indirection-table entry refers to it,
    /// or a raw offset does not designate a slot of the library.
    RelocationNotFound {
        /// A descriptive message about the missing relocation.
        msg: Cow<'static, str>,
    },

    /// An error occurred while mapping, remapping or protecting memory.
    ///
    /// This error typically indicates:
    /// * The shadow page could not be allocated
    /// * The atomic remap over the original page was refused
    /// * The original protection could not be restored
    ProtectionChange {
        /// A descriptive message about the refused operation.
        msg: Cow<'static, str>,
    },

    /// A hook request was rejected at registration.
    InvalidHook {
        /// A descriptive message about the rejected request.
        msg: Cow<'static, str>,
    },

    /// An error occurred while parsing the ELF header.
    ParseEhdr {
        /// A descriptive message about the ELF header parsing error.
        msg: Cow<'static, str>,
    },

    /// An error occurred while parsing the dynamic section or one of the
    /// tables it points to.
    ParseDynamic {
        /// A descriptive message about the dynamic section parsing error.
        msg: Cow<'static, str>,
    },

    /// At least one request of a commit failed.
    ///
    /// Requests that succeeded stay applied unless the registry runs with
    /// [`CommitPolicy::AllOrNothing`](crate::hook::CommitPolicy::AllOrNothing),
    /// in which case `applied` is zero.
    PartialCommit {
        /// Every failed request, in registration order.
        failures: Vec<HookFailure>,
        /// Number of requests that were applied.
        applied: usize,
    },
}

/// A single failed request of a commit.
#[derive(Debug, Clone)]
pub struct HookFailure {
    /// Position of the request in registration order.
    pub index: usize,
    /// What the request asked to hook.
    pub selector: Selector,
    /// Why it failed.
    pub error: Error,
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::ScanUnavailable { msg } => write!(f, "Scan error: {msg}"),
            Error::LibraryNotMapped { msg } => write!(f, "Library not mapped: {msg}"),
            Error::SymbolNotFound { msg } => write!(f, "Symbol not found: {msg}"),
            Error::RelocationNotFound { msg } => write!(f, "Relocation not found: {msg}"),
            Error::ProtectionChange { msg } => write!(f, "Memory protection error: {msg}"),
            Error::InvalidHook { msg } => write!(f, "Invalid hook: {msg}"),
            Error::ParseEhdr { msg } => write!(f, "ELF header parsing error: {msg}"),
            Error::ParseDynamic { msg } => write!(f, "Dynamic section parsing error: {msg}"),
            Error::PartialCommit { failures, applied } => {
                write!(
                    f,
                    "Partial commit: {} request(s) failed, {applied} applied",
                    failures.len()
                )?;
                for failure in failures {
                    write!(
                        f,
                        "; #{} {}: {}",
                        failure.index, failure.selector, failure.error
                    )?;
                }
                Ok(())
            }
        }
    }
}

impl core::error::Error for Error {}

#[cold]
#[inline(never)]
pub(crate) fn scan_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ScanUnavailable { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn not_mapped_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::LibraryNotMapped { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn symbol_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::SymbolNotFound { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn relocation_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::RelocationNotFound { msg: msg.into() }
}

/// Creates a memory protection error with the specified message.
///
/// Used by [`Mmap`](crate::mmap::Mmap) implementations outside this crate.
#[cold]
#[inline(never)]
pub fn protection_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ProtectionChange { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn invalid_hook_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::InvalidHook { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn parse_ehdr_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParseEhdr { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn parse_dynamic_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParseDynamic { msg: msg.into() }
}
