use elf::abi::*;

pub const EM_ARCH: u16 = EM_RISCV;

// RISCV does not have this
pub const REL_GOT: u32 = u32::MAX;
pub const REL_SYMBOLIC: u32 = R_RISCV_64;
pub const REL_JUMP_SLOT: u32 = R_RISCV_JUMP_SLOT;
