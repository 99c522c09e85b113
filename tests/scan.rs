mod common;

use common::{exe_mapping, init_logger};
use plt_hook::{
    ProcessId,
    maps::{self, try_scan},
    mmap::ProtFlags,
};
use rstest::rstest;

#[rstest]
fn scan_self_is_ordered_and_well_formed() {
    init_logger();
    let maps = maps::scan_self();
    assert!(!maps.is_empty());
    assert!(maps.iter().all(|map| map.start < map.end));
    assert!(maps.windows(2).all(|pair| pair[0].end <= pair[1].start));
}

#[rstest]
fn scan_self_finds_the_executable() {
    let maps = maps::scan_self();
    let exe = exe_mapping(&maps);
    assert!(exe.is_executable());
    assert!(exe.is_readable());
    assert!(!exe.is_anonymous());
    assert!(exe.path.is_some());
    // The header page of the executable is mapped too.
    assert!(
        maps.iter()
            .any(|map| map.dev == exe.dev && map.inode == exe.inode && map.offset == 0)
    );
}

#[rstest]
fn scan_by_pid_matches_self() {
    let pid = ProcessId::Pid(std::process::id() as i32);
    let by_pid = maps::scan(pid);
    let exe = exe_mapping(&maps::scan_self());
    assert!(by_pid.contains(&exe));
}

#[rstest]
fn stack_is_writable_and_private() {
    let maps = maps::scan_self();
    let stack = maps
        .iter()
        .find(|map| map.path.as_deref() == Some("[stack]"))
        .unwrap();
    assert!(stack.perms.contains(ProtFlags::PROT_READ | ProtFlags::PROT_WRITE));
    assert!(stack.is_private);
}

#[rstest]
#[case(ProcessId::Pid(-1))]
#[case(ProcessId::Pid(i32::MAX))]
fn missing_process_yields_empty(#[case] pid: ProcessId) {
    assert!(maps::scan(pid).is_empty());
    assert!(matches!(
        try_scan(pid),
        Err(plt_hook::Error::ScanUnavailable { .. })
    ));
}
