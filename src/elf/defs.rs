//! Wrappers over the raw structures of the `elf` crate, sized for the
//! running process (32-bit or 64-bit), with accessors returning native
//! integers.

use core::ops::Deref;

cfg_if::cfg_if! {
    if #[cfg(target_pointer_width = "64")]{
        pub(crate) const E_CLASS: u8 = elf::abi::ELFCLASS64;
        pub(crate) type Phdr = elf::segment::Elf64_Phdr;
        pub type Dyn = elf::dynamic::Elf64_Dyn;
        pub(crate) type Ehdr = elf::file::Elf64_Ehdr;
        pub(crate) type Rela = elf::relocation::Elf64_Rela;
        pub(crate) type Rel = elf::relocation::Elf64_Rel;
        pub(crate) type Sym = elf::symbol::Elf64_Sym;
        pub(crate) const REL_MASK: usize = 0xFFFFFFFF;
        pub(crate) const REL_BIT: usize = 32;
        pub(crate) const EHDR_SIZE: usize = core::mem::size_of::<elf::file::Elf64_Ehdr>();
    }else{
        pub(crate) const E_CLASS: u8 = elf::abi::ELFCLASS32;
        pub(crate) type Phdr = elf::segment::Elf32_Phdr;
        pub type Dyn = elf::dynamic::Elf32_Dyn;
        pub(crate) type Ehdr = elf::file::Elf32_Ehdr;
        pub(crate) type Rela = elf::relocation::Elf32_Rela;
        pub(crate) type Rel = elf::relocation::Elf32_Rel;
        pub(crate) type Sym = Elf32Sym;
        pub(crate) const REL_MASK: usize = 0xFF;
        pub(crate) const REL_BIT: usize = 8;
        pub(crate) const EHDR_SIZE: usize = core::mem::size_of::<elf::file::Elf32_Ehdr>();
    }
}

/// `Elf32_Sym` in its in-memory field order, which differs from the
/// 64-bit one.
#[allow(unused)]
#[repr(C)]
pub(crate) struct Elf32Sym {
    pub st_name: u32,
    pub st_value: u32,
    pub st_size: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
}

// Android packed relocation tables (bionic linker.h)
pub const DT_ANDROID_REL: i64 = 0x6000000f;
pub const DT_ANDROID_RELSZ: i64 = 0x60000010;
pub const DT_ANDROID_RELA: i64 = 0x60000011;
pub const DT_ANDROID_RELASZ: i64 = 0x60000012;

/// Decoded `r_offset`/`r_info` pair of a relocation, whatever table it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocInfo {
    pub r_offset: usize,
    pub r_info: usize,
}

impl RelocInfo {
    /// Returns the relocation type.
    #[inline]
    pub fn r_type(&self) -> u32 {
        (self.r_info & REL_MASK) as u32
    }

    /// Returns the symbol index.
    #[inline]
    pub fn r_symbol(&self) -> usize {
        self.r_info >> REL_BIT
    }
}

/// Leading part of a REL or RELA entry.
///
/// `r_offset` and `r_info` open both layouts, so a table of either kind is
/// read through this type with the stride of its entries.
#[repr(transparent)]
pub struct ElfRel {
    rel: Rel,
}

impl ElfRel {
    #[inline]
    pub fn info(&self) -> RelocInfo {
        RelocInfo {
            r_offset: self.rel.r_offset as usize,
            r_info: self.rel.r_info as usize,
        }
    }
}

/// Entry of the dynamic symbol table, 32-bit or 64-bit as the process.
#[repr(transparent)]
pub struct ElfSymbol {
    sym: Sym,
}

impl ElfSymbol {
    /// Returns the symbol name index.
    #[inline]
    pub fn st_name(&self) -> usize {
        self.sym.st_name as usize
    }
}

/// ELF program header.
#[derive(Debug)]
#[repr(transparent)]
pub struct ElfPhdr {
    phdr: Phdr,
}

impl Deref for ElfPhdr {
    type Target = Phdr;

    fn deref(&self) -> &Self::Target {
        &self.phdr
    }
}

/// Entry layout of the PLT relocations when `DT_PLTREL` is absent.
#[cfg(not(any(target_arch = "x86", target_arch = "arm")))]
pub(crate) type PltRel = Rela;
#[cfg(any(target_arch = "x86", target_arch = "arm"))]
pub(crate) type PltRel = Rel;
