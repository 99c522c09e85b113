use plt_hook::{HookRegistry, LibraryIdentity, hook::Hook, maps};
use std::process::ExitCode;

type GetPid = extern "C" fn() -> i32;

extern "C" fn fake_getpid() -> i32 {
    2333
}

#[inline(never)]
fn getpid() -> i32 {
    std::hint::black_box(unsafe { libc::getpid() })
}

fn run() -> plt_hook::Result<()> {
    let maps = maps::try_scan(maps::ProcessId::Current)?;
    let code = run as fn() -> plt_hook::Result<()> as usize;
    let Some(exe) = maps.iter().find(|map| map.contains(code)) else {
        log::error!("cannot find the mapping of the executable");
        return Ok(());
    };
    log::info!(
        "executable: {} ({:x}:{:x} {})",
        exe.path.as_deref().unwrap_or("?"),
        exe.dev_parts().0,
        exe.dev_parts().1,
        exe.inode
    );

    println!("getpid() before hooking: {}", getpid());
    let hook = Hook::new(fake_getpid as GetPid);
    let mut registry = HookRegistry::new();
    registry.register_hook(LibraryIdentity::of(exe), "getpid".into(), &hook)?;
    registry.commit()?;
    println!("getpid() after hooking: {}", getpid());
    println!("shadow pages: {}", registry.shadow_count());

    if let Some(original) = unsafe { hook.original_fn() } {
        println!("original getpid(): {}", original());
    }
    registry.invalidate_backups()?;
    println!("getpid() after invalidating backups: {}", getpid());

    registry.register(
        LibraryIdentity::of(exe),
        "getpid".into(),
        hook.original_addr(),
        None,
    )?;
    registry.commit()?;
    println!("getpid() after restoring: {}", getpid());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
