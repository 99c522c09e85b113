//! Traditional SYSV ELF hash table (`DT_HASH`)
//!
//! Every symbol of the dynamic symbol table is chained, imported ones
//! included, and `nchain` equals the number of symbols.

use crate::elf::{
    hash::{ElfHashTable, PreCompute},
    symbol::SymbolTable,
};

#[repr(C)]
struct ElfHashHeader {
    /// Number of bucket entries in the hash table
    nbucket: u32,

    /// Number of chain entries in the hash table
    nchain: u32,
}

pub(crate) struct ElfHash {
    header: ElfHashHeader,
    buckets: *const u32,
    chains: *const u32,
}

impl ElfHash {
    /// # Safety
    /// `ptr` must point to a complete SYSV hash table that stays mapped.
    #[inline]
    pub(crate) unsafe fn parse(ptr: *const u8) -> ElfHash {
        const HEADER_SIZE: usize = size_of::<ElfHashHeader>();
        let header: ElfHashHeader = unsafe { ptr.cast::<ElfHashHeader>().read_unaligned() };
        let bucket_size = header.nbucket as usize * size_of::<u32>();

        let buckets = unsafe { ptr.add(HEADER_SIZE) };
        let chains = unsafe { buckets.add(bucket_size) };
        ElfHash {
            header,
            buckets: buckets.cast(),
            chains: chains.cast(),
        }
    }
}

impl ElfHashTable for ElfHash {
    #[inline]
    fn hash(name: &[u8]) -> u64 {
        let mut hash = 0u32;
        for byte in name {
            hash = (hash << 4).wrapping_add(u32::from(*byte));
            let g = hash & 0xf0000000;
            if g != 0 {
                hash ^= g >> 24;
            }
            hash &= !g;
        }
        hash as u64
    }

    #[inline]
    fn count_syms(&self) -> usize {
        self.header.nchain as usize
    }

    fn lookup(
        &self,
        table: &SymbolTable,
        name: &[u8],
        precompute: &mut PreCompute,
    ) -> Option<usize> {
        if self.header.nbucket == 0 {
            return None;
        }
        let hash = *precompute
            .hash
            .get_or_insert_with(|| ElfHash::hash(name) as u32);

        let bucket_idx = (hash as usize) % self.header.nbucket as usize;
        let mut chain_idx = unsafe { self.buckets.add(bucket_idx).read() as usize };
        // A corrupt chain could loop; nchain bounds the walk.
        for _ in 0..self.header.nchain {
            if chain_idx == 0 || chain_idx >= self.header.nchain as usize {
                return None;
            }
            if table.name_of(chain_idx) == name {
                return Some(chain_idx);
            }
            chain_idx = unsafe { self.chains.add(chain_idx).read() as usize };
        }
        None
    }
}
