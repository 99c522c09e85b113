//! Relocation types that address indirection-table slots on each supported
//! architecture.
//!
//! Only three kinds of relocation ever land in a slot a hook can patch:
//! the lazy-binding `JUMP_SLOT`, the eager `GLOB_DAT` and the plain
//! absolute pointer.
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")]{
        mod x86_64;
        pub use x86_64::*;
    }else if #[cfg(target_arch = "riscv64")]{
        mod riscv64;
        pub use riscv64::*;
    }else if #[cfg(target_arch = "riscv32")]{
        mod riscv32;
        pub use riscv32::*;
    }else if #[cfg(target_arch="aarch64")]{
        mod aarch64;
        pub use aarch64::*;
    }else if #[cfg(target_arch="loongarch64")]{
        mod loongarch64;
        pub use loongarch64::*;
    }else if #[cfg(target_arch = "x86")]{
        mod x86;
        pub use x86::*;
    }else if #[cfg(target_arch = "arm")]{
        mod arm;
        pub use arm::*;
    }else{
        compile_error!("unsupported target architecture");
    }
}

pub const REL_NONE: u32 = 0;

/// Whether a relocation of type `r_type` writes a patchable slot.
#[inline]
pub(crate) fn is_slot_type(r_type: u32) -> bool {
    r_type == REL_JUMP_SLOT || r_type == REL_GOT || r_type == REL_SYMBOLIC
}

/// Return a human readable relocation type name for the current arch
pub fn rel_type_to_str(r_type: u32) -> &'static str {
    match r_type {
        REL_NONE => "NONE",
        REL_JUMP_SLOT => "JUMP_SLOT",
        REL_GOT => "GLOB_DAT",
        REL_SYMBOLIC => "ABS",
        _ => "UNKNOWN",
    }
}
