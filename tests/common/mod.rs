#![allow(dead_code)]

use plt_hook::{HookRegistry, LibraryIdentity, Mapping, maps};
use std::sync::{Mutex, MutexGuard};

pub const FAKE_PID: i32 = 2333;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Calls `getpid` through the indirection table of the test executable.
#[inline(never)]
pub fn current_pid() -> i32 {
    std::hint::black_box(unsafe { libc::getpid() })
}

pub extern "C" fn fake_getpid() -> i32 {
    FAKE_PID
}

pub extern "C" fn other_fake_getpid() -> i32 {
    FAKE_PID + 1
}

/// Address of the libc definition of `getpid`, unaffected by any hook.
pub fn real_getpid() -> usize {
    let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, c"getpid".as_ptr()) };
    assert!(!addr.is_null());
    addr as usize
}

/// Pid of the process, asked from libc directly.
pub fn real_pid() -> i32 {
    let getpid: extern "C" fn() -> i32 = unsafe { std::mem::transmute(real_getpid()) };
    getpid()
}

/// The mapping holding the code of the test executable.
pub fn exe_mapping(maps: &[Mapping]) -> Mapping {
    let addr = current_pid as fn() -> i32 as usize;
    maps.iter()
        .find(|map| map.contains(addr))
        .cloned()
        .expect("test executable is mapped")
}

pub fn exe_identity() -> LibraryIdentity {
    LibraryIdentity::of(&exe_mapping(&maps::scan_self()))
}

static SERIAL: Mutex<()> = Mutex::new(());

/// Holds the test lock and routes `getpid` back to libc on drop.
pub struct Restore {
    _lock: MutexGuard<'static, ()>,
}

impl Restore {
    pub fn new() -> Self {
        init_logger();
        let lock = SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Restore { _lock: lock }
    }
}

impl Drop for Restore {
    fn drop(&mut self) {
        let mut registry = HookRegistry::new();
        let restored = registry
            .register(exe_identity(), "getpid".into(), real_getpid(), None)
            .and_then(|_| registry.commit())
            .and_then(|_| registry.invalidate_backups());
        if !std::thread::panicking() {
            restored.unwrap();
            assert_eq!(current_pid(), real_pid());
        }
    }
}
