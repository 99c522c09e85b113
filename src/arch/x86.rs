use elf::abi::*;

pub const EM_ARCH: u16 = EM_386;

pub const REL_GOT: u32 = R_386_GLOB_DAT;
pub const REL_SYMBOLIC: u32 = R_386_32;
pub const REL_JUMP_SLOT: u32 = R_386_JMP_SLOT;
