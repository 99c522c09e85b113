//! GNU hash table (`DT_GNU_HASH`)
//!
//! Only symbols at or above `symbias` are indexed, which leaves out the
//! undefined (imported) symbols a hook usually targets.

use crate::elf::{
    hash::{ElfHashTable, PreCompute},
    symbol::SymbolTable,
};

#[repr(C)]
struct ElfGnuHeader {
    nbucket: u32,
    symbias: u32,
    nbloom: u32,
    nshift: u32,
}

pub(crate) struct ElfGnuHash {
    header: ElfGnuHeader,
    blooms: *const usize,
    buckets: *const u32,
    chains: *const u32,
}

impl ElfGnuHash {
    /// # Safety
    /// `ptr` must point to a complete GNU hash table that stays mapped.
    #[inline]
    pub(crate) unsafe fn parse(ptr: *const u8) -> ElfGnuHash {
        const HEADER_SIZE: usize = size_of::<ElfGnuHeader>();
        let header: ElfGnuHeader = unsafe { ptr.cast::<ElfGnuHeader>().read_unaligned() };
        let bloom_size = header.nbloom as usize * size_of::<usize>();
        let bucket_size = header.nbucket as usize * size_of::<u32>();

        let blooms = unsafe { ptr.add(HEADER_SIZE) };
        let buckets = unsafe { blooms.add(bloom_size) };
        let chains = unsafe { buckets.add(bucket_size) };
        ElfGnuHash {
            header,
            blooms: blooms.cast(),
            buckets: buckets.cast(),
            chains: chains.cast(),
        }
    }

    /// Index of the first symbol covered by the table.
    #[inline]
    pub(crate) fn symbias(&self) -> usize {
        self.header.symbias as usize
    }
}

impl ElfHashTable for ElfGnuHash {
    #[inline]
    fn hash(name: &[u8]) -> u64 {
        let mut hash = 5381u32;
        for byte in name {
            hash = hash.wrapping_mul(33).wrapping_add(u32::from(*byte));
        }
        hash as u64
    }

    fn count_syms(&self) -> usize {
        let mut nsym = 0;
        for i in 0..self.header.nbucket as usize {
            nsym = nsym.max(unsafe { self.buckets.add(i).read() as usize });
        }
        if nsym == 0 {
            // No defined symbol is hashed; everything lies below symbias.
            return self.symbias();
        }
        unsafe {
            let mut val = self.chains.add(nsym - self.symbias());
            while val.read() & 1 == 0 {
                nsym += 1;
                val = val.add(1);
            }
        }
        nsym + 1
    }

    fn lookup(
        &self,
        table: &SymbolTable,
        name: &[u8],
        precompute: &mut PreCompute,
    ) -> Option<usize> {
        if self.header.nbucket == 0 || self.header.nbloom == 0 {
            return None;
        }
        let hash = precompute.gnuhash;
        let bloom_idx = precompute.fofs & (self.header.nbloom - 1) as usize;
        let filter = unsafe { self.blooms.add(bloom_idx).read() };
        if filter & precompute.fmask == 0 {
            return None;
        }
        let filter2 = filter >> ((hash >> self.header.nshift) as usize % usize::BITS as usize);
        if filter2 & 1 == 0 {
            return None;
        }
        let chain_start_idx = unsafe {
            self.buckets
                .add((hash as usize) % self.header.nbucket as usize)
                .read()
        } as usize;
        if chain_start_idx < self.symbias() {
            return None;
        }
        let mut dynsym_idx = chain_start_idx;
        let mut cur_chain = unsafe { self.chains.add(dynsym_idx - self.symbias()) };
        loop {
            let chain_hash = unsafe { cur_chain.read() };
            if hash | 1 == chain_hash | 1 && table.name_of(dynsym_idx) == name {
                return Some(dynsym_idx);
            }
            if chain_hash & 1 != 0 {
                break;
            }
            cur_chain = unsafe { cur_chain.add(1) };
            dynsym_idx += 1;
        }
        None
    }
}
