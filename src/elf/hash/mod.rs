use crate::elf::symbol::SymbolTable;

pub(crate) mod gnu;
pub(crate) mod sysv;

pub(crate) use gnu::ElfGnuHash;
pub(crate) use sysv::ElfHash;

pub(crate) trait ElfHashTable {
    fn hash(name: &[u8]) -> u64;
    fn count_syms(&self) -> usize;
    /// Index of the symbol named `name` in `table`, if this table indexes it.
    fn lookup(&self, table: &SymbolTable, name: &[u8], precompute: &mut PreCompute)
    -> Option<usize>;
}

/// Hash values of one name, computed once and shared by both hash tables.
pub(crate) struct PreCompute {
    gnuhash: u32,
    fofs: usize,
    fmask: usize,
    hash: Option<u32>,
}

impl PreCompute {
    #[inline]
    pub(crate) fn new(name: &[u8]) -> PreCompute {
        let gnuhash = ElfGnuHash::hash(name) as u32;
        PreCompute {
            gnuhash,
            fofs: gnuhash as usize / usize::BITS as usize,
            fmask: 1 << (gnuhash % (8 * size_of::<usize>() as u32)),
            hash: None,
        }
    }
}
