//! Parsing `/proc/<pid>/maps`
//!
//! Every line of the mapping description has the fixed shape
//! `start-end perms offset major:minor inode [path]`. Addresses, offset and
//! device numbers are hexadecimal, the inode is decimal and the path, when
//! present, is everything after the fixed fields (it may contain spaces).
use crate::{Result, error::scan_error, mmap::ProtFlags};
use core::{fmt, str::FromStr};
use std::fs;

/// The process whose mappings are scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessId {
    /// The calling process (`/proc/self/maps`).
    #[default]
    Current,
    /// Another process by pid.
    Pid(i32),
}

impl ProcessId {
    /// Path of the mapping description of this process.
    pub fn maps_path(&self) -> String {
        match self {
            ProcessId::Current => String::from("/proc/self/maps"),
            ProcessId::Pid(pid) => format!("/proc/{pid}/maps"),
        }
    }
}

impl From<i32> for ProcessId {
    fn from(pid: i32) -> Self {
        ProcessId::Pid(pid)
    }
}

impl FromStr for ProcessId {
    type Err = crate::Error;

    /// Accepts `"self"` or a decimal pid.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "self" => Ok(ProcessId::Current),
            pid => pid
                .parse::<i32>()
                .map(ProcessId::Pid)
                .map_err(|_| scan_error(format!("invalid process identifier: {pid:?}"))),
        }
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Current => f.write_str("self"),
            ProcessId::Pid(pid) => write!(f, "{pid}"),
        }
    }
}

/// One line of the mapping description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// First address of the mapping.
    pub start: usize,
    /// One past the last address of the mapping.
    pub end: usize,
    /// Access permissions.
    pub perms: ProtFlags,
    /// `p` (copy-on-write) rather than `s` (shared).
    pub is_private: bool,
    /// Offset of the mapping within the backing file.
    pub offset: usize,
    /// Device of the backing file, as a kernel `dev_t`.
    pub dev: u64,
    /// Inode of the backing file, 0 for anonymous mappings.
    pub inode: u64,
    /// Path of the backing file or pseudo-name such as `[stack]`.
    pub path: Option<String>,
}

impl Mapping {
    /// Parses one line of the mapping description.
    pub fn parse_line(line: &str) -> Result<Mapping> {
        let mut rest = line.trim_end_matches(['\n', '\r']);
        let range = next_field(&mut rest).ok_or_else(|| malformed(line, "address range"))?;
        let perms = next_field(&mut rest).ok_or_else(|| malformed(line, "permissions"))?;
        let offset = next_field(&mut rest).ok_or_else(|| malformed(line, "offset"))?;
        let dev = next_field(&mut rest).ok_or_else(|| malformed(line, "device"))?;
        let inode = next_field(&mut rest).ok_or_else(|| malformed(line, "inode"))?;

        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| malformed(line, "address range"))?;
        let start = parse_hex(start).ok_or_else(|| malformed(line, "start address"))?;
        let end = parse_hex(end).ok_or_else(|| malformed(line, "end address"))?;
        if start >= end {
            return Err(malformed(line, "address range"));
        }
        let (perms, is_private) = parse_perms(perms).ok_or_else(|| malformed(line, "permissions"))?;
        let offset = parse_hex(offset).ok_or_else(|| malformed(line, "offset"))?;
        let dev = parse_dev(dev).ok_or_else(|| malformed(line, "device"))?;
        let inode = inode
            .parse::<u64>()
            .map_err(|_| malformed(line, "inode"))?;
        let path = rest.trim_start_matches(' ');

        Ok(Mapping {
            start,
            end,
            perms,
            is_private,
            offset,
            dev,
            inode,
            path: (!path.is_empty()).then(|| path.to_owned()),
        })
    }

    /// Size of the mapping in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Always `false`: a parsed mapping has `start < end`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.perms.contains(ProtFlags::PROT_READ)
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.perms.contains(ProtFlags::PROT_WRITE)
    }

    #[inline]
    pub fn is_executable(&self) -> bool {
        self.perms.contains(ProtFlags::PROT_EXEC)
    }

    /// Whether no file backs this mapping.
    #[inline]
    pub fn is_anonymous(&self) -> bool {
        self.inode == 0
    }

    /// Major and minor number of [`Mapping::dev`].
    #[inline]
    pub fn dev_parts(&self) -> (u32, u32) {
        (libc::major(self.dev as _), libc::minor(self.dev as _))
    }
}

impl fmt::Display for Mapping {
    /// Formats the mapping the way the kernel prints it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        let (major, minor) = self.dev_parts();
        write!(
            f,
            "{:x}-{:x} {}{}{}{} {:08x} {:02x}:{:02x} {}",
            self.start,
            self.end,
            flag(self.is_readable(), 'r'),
            flag(self.is_writable(), 'w'),
            flag(self.is_executable(), 'x'),
            if self.is_private { 'p' } else { 's' },
            self.offset,
            major,
            minor,
            self.inode,
        )?;
        if let Some(path) = &self.path {
            write!(f, " {path}")?;
        }
        Ok(())
    }
}

/// Parses a whole mapping description. Any malformed line fails the whole parse.
pub fn parse_maps(text: &str) -> Result<Vec<Mapping>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(Mapping::parse_line)
        .collect()
}

/// Reads and parses the mapping description of `pid`.
pub fn try_scan(pid: ProcessId) -> Result<Vec<Mapping>> {
    let path = pid.maps_path();
    let text = fs::read_to_string(&path).map_err(|err| scan_error(format!("{path}: {err}")))?;
    let maps = parse_maps(&text)?;
    #[cfg(feature = "log")]
    log::trace!("[Scan] {}: {} mappings", path, maps.len());
    Ok(maps)
}

/// Reads and parses the mapping description of `pid`.
///
/// Unreadable or malformed input yields an empty sequence, never a partial
/// one. Use [`try_scan`] to learn why a scan failed.
pub fn scan(pid: ProcessId) -> Vec<Mapping> {
    match try_scan(pid) {
        Ok(maps) => maps,
        #[allow(unused_variables)]
        Err(err) => {
            #[cfg(feature = "log")]
            log::warn!("[Scan] {}", err);
            Vec::new()
        }
    }
}

/// Shorthand for `scan(ProcessId::Current)`.
#[inline]
pub fn scan_self() -> Vec<Mapping> {
    scan(ProcessId::Current)
}

/// Splits the next space-separated field off `rest`.
fn next_field<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let trimmed = rest.trim_start_matches(' ');
    let (value, tail) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
    *rest = tail;
    (!value.is_empty()).then_some(value)
}

#[inline]
fn parse_hex(s: &str) -> Option<usize> {
    usize::from_str_radix(s, 16).ok()
}

fn parse_perms(s: &str) -> Option<(ProtFlags, bool)> {
    let &[r, w, x, p] = s.as_bytes() else {
        return None;
    };
    let mut perms = ProtFlags::PROT_NONE;
    for (byte, expected, flag) in [
        (r, b'r', ProtFlags::PROT_READ),
        (w, b'w', ProtFlags::PROT_WRITE),
        (x, b'x', ProtFlags::PROT_EXEC),
    ] {
        match byte {
            b'-' => {}
            b if b == expected => perms |= flag,
            _ => return None,
        }
    }
    let is_private = match p {
        b'p' => true,
        b's' => false,
        _ => return None,
    };
    Some((perms, is_private))
}

fn parse_dev(s: &str) -> Option<u64> {
    let (major, minor) = s.split_once(':')?;
    let major = u32::from_str_radix(major, 16).ok()?;
    let minor = u32::from_str_radix(minor, 16).ok()?;
    Some(libc::makedev(major, minor) as u64)
}

#[cold]
fn malformed(line: &str, field: &str) -> crate::Error {
    scan_error(format!("malformed {field} in mapping line {line:?}"))
}
