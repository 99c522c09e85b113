//! The C interface driven the way a C caller would, against the `getpid`
//! slots of the test executable.
#![cfg(feature = "capi")]
mod common;

use common::{FAKE_PID, Restore, current_pid, exe_mapping, fake_getpid, real_getpid};
use core::{ffi::c_void, ptr};
use plt_hook::{
    capi::{
        plt_hook_commit, plt_hook_invalidate_backups, plt_hook_register,
        plt_hook_register_with_offset,
    },
    maps,
};
use rstest::rstest;

fn exe_dev_inode() -> (libc::dev_t, libc::ino_t) {
    let exe = exe_mapping(&maps::scan_self());
    (exe.dev as libc::dev_t, exe.inode as libc::ino_t)
}

#[rstest]
fn register_commit_and_invalidate() {
    let _restore = Restore::new();
    let (dev, inode) = exe_dev_inode();
    let mut backup: *mut c_void = ptr::null_mut();

    assert!(unsafe {
        plt_hook_register(
            dev,
            inode,
            c"getpid".as_ptr(),
            fake_getpid as extern "C" fn() -> i32 as *mut c_void,
            &mut backup,
        )
    });
    // Nothing happens before the commit.
    assert!(backup.is_null());

    assert!(plt_hook_commit());
    assert_eq!(backup as usize, real_getpid());
    assert_eq!(current_pid(), FAKE_PID);

    assert!(plt_hook_invalidate_backups());
    assert_eq!(current_pid(), FAKE_PID);
}

#[rstest]
fn unmapped_library_fails_the_commit_only() {
    let _restore = Restore::new();
    let (dev, inode) = exe_dev_inode();
    let callback = fake_getpid as extern "C" fn() -> i32 as *mut c_void;
    let mut backup: *mut c_void = ptr::null_mut();
    let mut missing_backup: *mut c_void = ptr::null_mut();

    assert!(unsafe {
        plt_hook_register(dev, inode, c"getpid".as_ptr(), callback, &mut backup)
    });
    assert!(unsafe {
        plt_hook_register_with_offset(
            dev,
            libc::ino_t::MAX,
            0,
            0x1000,
            c"getpid".as_ptr(),
            callback,
            &mut missing_backup,
        )
    });

    assert!(!plt_hook_commit());
    assert_eq!(current_pid(), FAKE_PID);
    assert_eq!(backup as usize, real_getpid());
    assert!(missing_backup.is_null());

    // The failed request was consumed with the rest.
    assert!(plt_hook_commit());
    assert!(plt_hook_invalidate_backups());
}
