cfg_if::cfg_if! {
    if #[cfg(feature = "use-syscall")]{
        pub(crate) mod linux_syscall;
        pub use linux_syscall::*;
    }else if #[cfg(target_os = "linux")]{
        pub(crate) mod unix;
        pub use unix::*;
    }else {
        compile_error!("plt_hook needs /proc/<pid>/maps and mremap, which only linux provides");
    }
}

/// Page size reported by the system, cached after the first query.
#[inline]
pub(crate) fn system_page_size() -> usize {
    use core::sync::atomic::{AtomicUsize, Ordering};
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    };
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}
