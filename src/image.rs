//! Locating a loaded image and resolving hook targets to slots
//!
//! A [`MappedImage`] is built purely from the mapping description: the
//! mappings matching a [`LibraryIdentity`] tell where the ELF header lies,
//! and everything else (program headers, dynamic section, symbol and
//! relocation tables) is read in place from the process's memory.

use crate::{
    Result,
    arch::{REL_JUMP_SLOT, REL_NONE, is_slot_type, rel_type_to_str},
    elf::{Dyn, ElfDynamic, ElfHeader, PackedRelocs, RelocInfo, SymbolTable},
    error::{not_mapped_error, parse_dynamic_error, parse_ehdr_error, relocation_error, symbol_error},
    hook::{LibraryIdentity, Selector},
    maps::Mapping,
    mmap::{DefaultMmap, Mmap, rounddown},
};
use core::sync::atomic::{AtomicUsize, Ordering};
use elf::abi::{PT_DYNAMIC, PT_LOAD};
use hashbrown::HashSet;

/// One indirection-table slot a hook can rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelocationSlot {
    /// Absolute address of the pointer-sized slot.
    pub address: usize,
    /// Value of the slot when it was resolved.
    pub value: usize,
    /// Relocation type that designated the slot, `REL_NONE` for raw offsets.
    pub r_type: u32,
}

impl RelocationSlot {
    /// Human readable name of [`RelocationSlot::r_type`].
    #[inline]
    pub fn r_type_str(&self) -> &'static str {
        rel_type_to_str(self.r_type)
    }
}

/// An address range `[start, end)` of one mapping of the image.
#[derive(Debug, Clone, Copy)]
struct Region {
    start: usize,
    end: usize,
    readable: bool,
}

/// An ELF image mapped into the current process.
pub struct MappedImage {
    identity: LibraryIdentity,
    path: Option<String>,
    base: usize,
    bias: usize,
    regions: Vec<Region>,
    dynamic: ElfDynamic,
    symbols: SymbolTable,
}

impl core::fmt::Debug for MappedImage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MappedImage")
            .field("identity", &self.identity)
            .field("path", &self.path)
            .field("base", &format_args!("0x{:x}", self.base))
            .field("bias", &format_args!("0x{:x}", self.bias))
            .finish()
    }
}

impl MappedImage {
    /// Finds the image identified by `identity` among `maps`.
    ///
    /// The mappings must describe the calling process: the image is read in
    /// place.
    pub fn locate(maps: &[Mapping], identity: &LibraryIdentity) -> Result<MappedImage> {
        let regions: Vec<Region> = maps
            .iter()
            .filter(|map| identity.matches(map))
            .map(|map| Region {
                start: map.start,
                end: map.end,
                readable: map.is_readable(),
            })
            .collect();
        if regions.is_empty() {
            return Err(not_mapped_error(format!("no mapping matches {identity}")));
        }

        let header_offset = identity.header_offset();
        let header = maps
            .iter()
            .filter(|map| {
                identity.matches(map) && map.is_readable() && map.offset == header_offset
            })
            .min_by_key(|map| map.start)
            .ok_or_else(|| {
                not_mapped_error(format!(
                    "no readable mapping of {identity} at file offset 0x{header_offset:x}"
                ))
            })?;
        let base = header.start;
        if header.len() < size_of::<crate::elf::Ehdr>() {
            return Err(parse_ehdr_error("header mapping is smaller than an ELF header"));
        }

        let ehdr = unsafe { ElfHeader::from_addr(base) }?;
        let phdr_end = ehdr.e_phoff as usize + ehdr.e_phnum as usize * ehdr.e_phentsize as usize;
        if phdr_end > header.len() {
            return Err(parse_ehdr_error("program headers lie outside the header mapping"));
        }
        let phdrs = unsafe { ehdr.phdrs() }?;

        let page_size = DefaultMmap::page_size();
        let first_load = phdrs
            .iter()
            .find(|phdr| {
                phdr.p_type == PT_LOAD && rounddown(phdr.p_offset as usize, page_size) == 0
            })
            .ok_or_else(|| parse_ehdr_error("no PT_LOAD segment maps the file start"))?;
        let bias = base.wrapping_sub(rounddown(first_load.p_vaddr as usize, page_size));

        let dyn_phdr = phdrs
            .iter()
            .find(|phdr| phdr.p_type == PT_DYNAMIC)
            .ok_or_else(|| parse_dynamic_error("image has no PT_DYNAMIC segment"))?;
        let dyn_addr = bias.wrapping_add(dyn_phdr.p_vaddr as usize);
        let dyn_len = dyn_phdr.p_memsz as usize / size_of::<Dyn>();
        if !covered(&regions, dyn_addr, dyn_len * size_of::<Dyn>()) {
            return Err(parse_dynamic_error("dynamic section lies outside the image"));
        }
        let dynamic = unsafe {
            ElfDynamic::new(dyn_addr as *const Dyn, dyn_len, bias, |addr| {
                covered(&regions, addr, 1)
            })
        }?;
        check_tables(&regions, &dynamic)?;
        let symbols = unsafe { SymbolTable::from_dynamic(&dynamic) };

        #[cfg(feature = "log")]
        log::trace!(
            "[Locate] {}: base: 0x{:x}, bias: 0x{:x}, regions: {}, path: {:?}",
            identity,
            base,
            bias,
            regions.len(),
            header.path
        );

        Ok(MappedImage {
            identity: *identity,
            path: header.path.clone(),
            base,
            bias,
            regions,
            dynamic,
            symbols,
        })
    }

    /// Identity the image was located with.
    #[inline]
    pub fn identity(&self) -> &LibraryIdentity {
        &self.identity
    }

    /// Path of the mapping that carries the ELF header.
    #[inline]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Address of the ELF header.
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Difference between run-time and link-time addresses.
    #[inline]
    pub fn bias(&self) -> usize {
        self.bias
    }

    /// Whether `[addr, addr + len)` lies inside the mappings of this image.
    #[inline]
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        self.regions
            .iter()
            .any(|region| addr >= region.start && addr.saturating_add(len) <= region.end)
    }

    /// Resolves `selector` to every slot it designates.
    pub fn resolve(&self, selector: &Selector) -> Result<Vec<RelocationSlot>> {
        match selector {
            Selector::Symbol(name) => self.resolve_symbol(name),
            Selector::Offset(offset) => self.resolve_offset(*offset).map(|slot| vec![slot]),
        }
    }

    fn resolve_symbol(&self, name: &str) -> Result<Vec<RelocationSlot>> {
        let sym_idx = self
            .symbols
            .lookup(name)
            .ok_or_else(|| symbol_error(format!("{name} in {}", self.identity)))?;

        let mut relocs: Vec<RelocInfo> = Vec::new();
        if let Some(pltrel) = &self.dynamic.pltrel {
            relocs.extend(
                unsafe { pltrel.iter() }
                    .filter(|reloc| reloc.r_symbol() == sym_idx && reloc.r_type() == REL_JUMP_SLOT),
            );
        }
        // Some linkers let DT_RELA overlap DT_JMPREL; duplicates are dropped below.
        let is_data_slot =
            |reloc: &RelocInfo| reloc.r_symbol() == sym_idx && is_slot_type(reloc.r_type());
        for table in [&self.dynamic.rela, &self.dynamic.rel].into_iter().flatten() {
            relocs.extend(unsafe { table.iter() }.filter(is_data_slot));
        }
        if let Some(packed) = &self.dynamic.packed {
            let data = unsafe { core::slice::from_raw_parts(packed.addr as *const u8, packed.size) };
            for reloc in PackedRelocs::new(data, packed.is_rela)? {
                let reloc = reloc?;
                if is_data_slot(&reloc) {
                    relocs.push(reloc);
                }
            }
        }

        let mut seen = HashSet::new();
        let slots: Vec<RelocationSlot> = relocs
            .into_iter()
            .filter_map(|reloc| {
                let address = self.bias.wrapping_add(reloc.r_offset);
                if !self.is_slot(address) {
                    #[cfg(feature = "log")]
                    log::warn!(
                        "[Resolve] {}: relocation of {} at 0x{:x} lies outside the image",
                        self.identity,
                        name,
                        address
                    );
                    return None;
                }
                seen.insert(address).then(|| RelocationSlot {
                    address,
                    value: unsafe { read_slot(address) },
                    r_type: reloc.r_type(),
                })
            })
            .collect();

        if slots.is_empty() {
            return Err(relocation_error(format!(
                "{name} has no indirection slot in {}",
                self.identity
            )));
        }
        #[cfg(feature = "log")]
        for slot in &slots {
            log::trace!(
                "[Resolve] {}: symbol [{}] slot: 0x{:x}, type: {}, value: 0x{:x}",
                self.identity,
                name,
                slot.address,
                slot.r_type_str(),
                slot.value
            );
        }
        Ok(slots)
    }

    fn resolve_offset(&self, offset: usize) -> Result<RelocationSlot> {
        let address = self.bias.wrapping_add(offset);
        if !self.is_slot(address) {
            return Err(relocation_error(format!(
                "offset 0x{offset:x} is not a slot of {}",
                self.identity
            )));
        }
        Ok(RelocationSlot {
            address,
            value: unsafe { read_slot(address) },
            r_type: REL_NONE,
        })
    }

    /// A slot is pointer aligned and lies inside a readable mapping of the image.
    fn is_slot(&self, address: usize) -> bool {
        address % align_of::<usize>() == 0
            && self.regions.iter().any(|region| {
                region.readable
                    && address >= region.start
                    && address.saturating_add(size_of::<usize>()) <= region.end
            })
    }
}

/// Locates the image of `identity` and resolves `selector` in one go.
pub fn resolve(
    maps: &[Mapping],
    identity: &LibraryIdentity,
    selector: &Selector,
) -> Result<Vec<RelocationSlot>> {
    MappedImage::locate(maps, identity)?.resolve(selector)
}

#[inline]
unsafe fn read_slot(address: usize) -> usize {
    unsafe { (*(address as *const AtomicUsize)).load(Ordering::Acquire) }
}

fn covered(regions: &[Region], addr: usize, len: usize) -> bool {
    regions.iter().any(|region| {
        region.readable && addr >= region.start && addr.saturating_add(len) <= region.end
    })
}

/// Rejects tables that point outside the image before anything reads them.
fn check_tables(regions: &[Region], dynamic: &ElfDynamic) -> Result<()> {
    let starts = [Some(dynamic.symtab), Some(dynamic.strtab), dynamic.hash, dynamic.gnu_hash];
    if starts
        .into_iter()
        .flatten()
        .any(|addr| !covered(regions, addr, 1))
    {
        return Err(parse_dynamic_error("symbol tables lie outside the image"));
    }
    let tables = [dynamic.pltrel, dynamic.rela, dynamic.rel]
        .into_iter()
        .flatten()
        .map(|table| (table.addr, table.size))
        .chain(dynamic.packed.map(|packed| (packed.addr, packed.size)));
    for (addr, size) in tables {
        if !covered(regions, addr, size) {
            return Err(parse_dynamic_error("relocation table lies outside the image"));
        }
    }
    Ok(())
}
