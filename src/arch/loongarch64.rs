// https://loongson.github.io/LoongArch-Documentation/LoongArch-ELF-ABI-CN.html

const EM_LARCH: u16 = 258;
const R_LARCH_64: u32 = 2;
const R_LARCH_JUMP_SLOT: u32 = 5;

pub const EM_ARCH: u16 = EM_LARCH;

pub const REL_SYMBOLIC: u32 = R_LARCH_64;
pub const REL_JUMP_SLOT: u32 = R_LARCH_JUMP_SLOT;

pub const REL_GOT: u32 = u32::MAX;
