//! ELF symbol table handling
//!
//! The dynamic symbol table of a mapped image, together with its string
//! table and whichever hash tables the image carries.

use crate::elf::{
    ElfSymbol,
    dynamic::ElfDynamic,
    hash::{ElfGnuHash, ElfHash, ElfHashTable, PreCompute},
};
use core::ffi::CStr;

/// ELF string table wrapper
pub(crate) struct ElfStringTable {
    /// Pointer to the raw string table data in memory
    data: *const u8,
}

impl ElfStringTable {
    const fn new(data: *const u8) -> Self {
        ElfStringTable { data }
    }

    /// Get a C-style string from the string table at the specified offset
    #[inline]
    pub(crate) fn get_cstr(&self, offset: usize) -> &CStr {
        unsafe {
            let start = self.data.add(offset).cast();
            CStr::from_ptr(start)
        }
    }
}

/// Dynamic symbol table of a mapped image.
pub(crate) struct SymbolTable {
    gnu: Option<ElfGnuHash>,
    sysv: Option<ElfHash>,
    symtab: *const ElfSymbol,
    strtab: ElfStringTable,
}

impl SymbolTable {
    /// # Safety
    /// The addresses in `dynamic` must designate the tables of a live image.
    pub(crate) unsafe fn from_dynamic(dynamic: &ElfDynamic) -> Self {
        SymbolTable {
            gnu: dynamic
                .gnu_hash
                .map(|addr| unsafe { ElfGnuHash::parse(addr as *const u8) }),
            sysv: dynamic
                .hash
                .map(|addr| unsafe { ElfHash::parse(addr as *const u8) }),
            symtab: dynamic.symtab as *const ElfSymbol,
            strtab: ElfStringTable::new(dynamic.strtab as *const u8),
        }
    }

    /// Number of entries of the symbol table, as far as the hash tables tell.
    pub(crate) fn count_syms(&self) -> usize {
        match (&self.sysv, &self.gnu) {
            (Some(sysv), _) => sysv.count_syms(),
            (None, Some(gnu)) => gnu.count_syms(),
            (None, None) => 0,
        }
    }

    #[inline]
    pub(crate) fn symbol(&self, idx: usize) -> &ElfSymbol {
        unsafe { &*self.symtab.add(idx) }
    }

    /// Name of the symbol at `idx`, without the terminating NUL.
    #[inline]
    pub(crate) fn name_of(&self, idx: usize) -> &[u8] {
        self.strtab.get_cstr(self.symbol(idx).st_name()).to_bytes()
    }

    /// Finds the index of the symbol named `name`.
    ///
    /// The GNU hash table only covers defined symbols, so an imported name
    /// falls through to the SYSV table and finally to a linear scan.
    pub(crate) fn lookup(&self, name: &str) -> Option<usize> {
        let name = name.as_bytes();
        let mut precompute = PreCompute::new(name);
        if let Some(idx) = self
            .gnu
            .as_ref()
            .and_then(|gnu| gnu.lookup(self, name, &mut precompute))
        {
            return Some(idx);
        }
        if let Some(idx) = self
            .sysv
            .as_ref()
            .and_then(|sysv| sysv.lookup(self, name, &mut precompute))
        {
            return Some(idx);
        }
        // Index 0 is the reserved null symbol.
        (1..self.count_syms()).find(|&idx| self.name_of(idx) == name)
    }
}
