//! Parsing the in-memory `.dynamic` section
use crate::{
    Result,
    elf::{
        DT_ANDROID_REL, DT_ANDROID_RELA, DT_ANDROID_RELASZ, DT_ANDROID_RELSZ, Dyn, ElfRel,
        PltRel, Rel, Rela, RelocInfo,
    },
    error::parse_dynamic_error,
};
use elf::abi::*;

/// A table of REL or RELA entries.
///
/// Both layouts start with `r_offset` and `r_info`, so the table is read
/// through [`ElfRel`] with the stride of the real entry size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RelTable {
    pub addr: usize,
    pub size: usize,
    pub entsize: usize,
}

impl RelTable {
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.size / self.entsize
    }

    /// # Safety
    /// The table must be mapped for as long as the iterator is used.
    pub(crate) unsafe fn iter(&self) -> impl Iterator<Item = RelocInfo> + '_ {
        (0..self.len()).map(move |idx| {
            let entry = unsafe { &*((self.addr + idx * self.entsize) as *const ElfRel) };
            entry.info()
        })
    }
}

/// An Android packed relocation table (`APS2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PackedTable {
    pub addr: usize,
    pub size: usize,
    pub is_rela: bool,
}

/// The parts of the dynamic section needed to find relocation slots.
///
/// All addresses are absolute.
#[derive(Debug)]
pub(crate) struct ElfDynamic {
    /// DT_SYMTAB
    pub symtab: usize,
    /// DT_STRTAB
    pub strtab: usize,
    /// DT_HASH
    pub hash: Option<usize>,
    /// DT_GNU_HASH
    pub gnu_hash: Option<usize>,
    /// DT_JMPREL / DT_PLTRELSZ / DT_PLTREL
    pub pltrel: Option<RelTable>,
    /// DT_RELA / DT_RELASZ
    pub rela: Option<RelTable>,
    /// DT_REL / DT_RELSZ
    pub rel: Option<RelTable>,
    /// DT_ANDROID_REL(A) / DT_ANDROID_REL(A)SZ
    pub packed: Option<PackedTable>,
}

/// Rebases an address-valued dynamic entry.
///
/// glibc rewrites these entries to absolute addresses while loading, other
/// linkers (bionic, glibc on RISC-V and MIPS) leave them relative to the
/// load bias. A value is taken as absolute only when it points into the
/// image and its rebased form does not.
#[inline]
fn rebase(value: usize, bias: usize, is_mapped: &impl Fn(usize) -> bool) -> usize {
    let rebased = value.wrapping_add(bias);
    if bias != 0 && is_mapped(value) && !is_mapped(rebased) {
        value
    } else {
        rebased
    }
}

impl ElfDynamic {
    /// Walks the dynamic section at `dynamic_ptr` up to `DT_NULL` or `len` entries.
    ///
    /// `is_mapped` tells whether an address lies in a readable part of the
    /// image.
    ///
    /// # Safety
    /// `dynamic_ptr` must point to the mapped dynamic section of an image
    /// loaded at `bias`.
    pub(crate) unsafe fn new(
        dynamic_ptr: *const Dyn,
        len: usize,
        bias: usize,
        is_mapped: impl Fn(usize) -> bool,
    ) -> Result<ElfDynamic> {
        let rebase = |value: usize| rebase(value, bias, &is_mapped);
        let mut symtab = None;
        let mut strtab = None;
        let mut hash = None;
        let mut gnu_hash = None;
        let mut jmprel = None;
        let mut pltrelsz = 0;
        let mut pltrel_kind = None;
        let mut rela = None;
        let mut relasz = 0;
        let mut relaent = None;
        let mut rel = None;
        let mut relsz = 0;
        let mut relent = None;
        let mut android_rel = None;
        let mut android_relsz = 0;
        let mut android_rela = None;
        let mut android_relasz = 0;

        let entries = unsafe { core::slice::from_raw_parts(dynamic_ptr, len) };
        for dynamic in entries {
            let val = dynamic.d_un as usize;
            match dynamic.d_tag as i64 {
                DT_NULL => break,
                DT_SYMTAB => symtab = Some(rebase(val)),
                DT_STRTAB => strtab = Some(rebase(val)),
                DT_HASH => hash = Some(rebase(val)),
                DT_GNU_HASH => gnu_hash = Some(rebase(val)),
                DT_JMPREL => jmprel = Some(rebase(val)),
                DT_PLTRELSZ => pltrelsz = val,
                DT_PLTREL => pltrel_kind = Some(val as i64),
                DT_RELA => rela = Some(rebase(val)),
                DT_RELASZ => relasz = val,
                DT_RELAENT => relaent = Some(val),
                DT_REL => rel = Some(rebase(val)),
                DT_RELSZ => relsz = val,
                DT_RELENT => relent = Some(val),
                DT_ANDROID_REL => android_rel = Some(rebase(val)),
                DT_ANDROID_RELSZ => android_relsz = val,
                DT_ANDROID_RELA => android_rela = Some(rebase(val)),
                DT_ANDROID_RELASZ => android_relasz = val,
                _ => {}
            }
        }

        let symtab = symtab.ok_or_else(|| parse_dynamic_error("missing DT_SYMTAB"))?;
        let strtab = strtab.ok_or_else(|| parse_dynamic_error("missing DT_STRTAB"))?;
        if hash.is_none() && gnu_hash.is_none() {
            return Err(parse_dynamic_error("missing DT_HASH and DT_GNU_HASH"));
        }

        let rela_ent = relaent.unwrap_or(size_of::<Rela>());
        let rel_ent = relent.unwrap_or(size_of::<Rel>());
        let plt_ent = match pltrel_kind {
            Some(DT_RELA) => rela_ent,
            Some(DT_REL) => rel_ent,
            Some(_) => return Err(parse_dynamic_error("invalid DT_PLTREL")),
            None => size_of::<PltRel>(),
        };
        let table = |addr: Option<usize>, size: usize, entsize: usize| -> Result<Option<RelTable>> {
            match addr {
                Some(addr) if size != 0 => {
                    if entsize < size_of::<Rel>() {
                        return Err(parse_dynamic_error("relocation entry size too small"));
                    }
                    Ok(Some(RelTable {
                        addr,
                        size,
                        entsize,
                    }))
                }
                _ => Ok(None),
            }
        };
        let packed = match (android_rela, android_rel) {
            (Some(addr), _) if android_relasz != 0 => Some(PackedTable {
                addr,
                size: android_relasz,
                is_rela: true,
            }),
            (_, Some(addr)) if android_relsz != 0 => Some(PackedTable {
                addr,
                size: android_relsz,
                is_rela: false,
            }),
            _ => None,
        };

        Ok(ElfDynamic {
            symtab,
            strtab,
            hash,
            gnu_hash,
            pltrel: table(jmprel, pltrelsz, plt_ent)?,
            rela: table(rela, relasz, rela_ent)?,
            rel: table(rel, relsz, rel_ent)?,
            packed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: i64, val: usize) -> Dyn {
        Dyn {
            d_tag: tag as _,
            d_un: val as _,
        }
    }

    /// An image spanning `[bias, bias + 0x10000)`.
    fn image_at(bias: usize) -> impl Fn(usize) -> bool {
        move |addr| addr >= bias && addr - bias < 0x10000
    }

    #[test]
    fn rebase_keeps_absolute_values() {
        let bias = 0x7f00_0000;
        assert_eq!(rebase(0x1000, 0, &image_at(0)), 0x1000);
        assert_eq!(rebase(0x1000, bias, &image_at(bias)), 0x7f00_1000);
        assert_eq!(rebase(0x7f00_1000, bias, &image_at(bias)), 0x7f00_1000);
    }

    #[test]
    fn rebase_with_small_bias() {
        // Loaded low, entries left relative: 0x3000 lies inside the image
        // itself, yet only its rebased form is the table.
        let bias = 0x1000;
        assert_eq!(rebase(0x3000, bias, &image_at(bias)), 0x4000);
        // Relative values outside the image are rebased as well.
        assert_eq!(rebase(0x20000, bias, &image_at(bias)), 0x21000);
        // An absolute value whose rebased form leaves the image is kept.
        assert_eq!(rebase(0x10800, bias, &image_at(bias)), 0x10800);
    }

    #[test]
    fn collects_tables() {
        let bias = 0x10_0000;
        let entries = [
            entry(DT_SYMTAB, 0x300),
            entry(DT_STRTAB, bias + 0x500),
            entry(DT_GNU_HASH, 0x200),
            entry(DT_JMPREL, 0x800),
            entry(DT_PLTRELSZ, 3 * size_of::<PltRel>()),
            entry(DT_ANDROID_RELA, 0x900),
            entry(DT_ANDROID_RELASZ, 0x40),
            entry(DT_NULL, 0),
            entry(DT_HASH, 0x100),
        ];
        let dynamic =
            unsafe { ElfDynamic::new(entries.as_ptr(), entries.len(), bias, image_at(bias)) }
                .unwrap();
        assert_eq!(dynamic.symtab, bias + 0x300);
        assert_eq!(dynamic.strtab, bias + 0x500);
        assert_eq!(dynamic.gnu_hash, Some(bias + 0x200));
        // Entries after DT_NULL are ignored.
        assert_eq!(dynamic.hash, None);
        let pltrel = dynamic.pltrel.unwrap();
        assert_eq!(pltrel.addr, bias + 0x800);
        assert_eq!(pltrel.len(), 3);
        assert!(dynamic.rela.is_none());
        assert_eq!(
            dynamic.packed,
            Some(PackedTable {
                addr: bias + 0x900,
                size: 0x40,
                is_rela: true
            })
        );
    }

    #[test]
    fn missing_symtab_is_an_error() {
        let entries = [entry(DT_STRTAB, 0x500), entry(DT_HASH, 0x100), entry(DT_NULL, 0)];
        let err = unsafe { ElfDynamic::new(entries.as_ptr(), entries.len(), 0, image_at(0)) }
            .unwrap_err();
        assert!(matches!(err, crate::Error::ParseDynamic { .. }));
    }

    #[test]
    fn reads_rel_and_rela_with_stride() {
        let rela: [Rela; 2] = [
            Rela {
                r_offset: 0x10,
                r_info: 7,
                r_addend: 5,
            },
            Rela {
                r_offset: 0x18,
                r_info: 9,
                r_addend: -1,
            },
        ];
        let table = RelTable {
            addr: rela.as_ptr() as usize,
            size: size_of_val(&rela),
            entsize: size_of::<Rela>(),
        };
        let infos: Vec<_> = unsafe { table.iter() }.collect();
        assert_eq!(
            infos,
            [
                RelocInfo {
                    r_offset: 0x10,
                    r_info: 7
                },
                RelocInfo {
                    r_offset: 0x18,
                    r_info: 9
                }
            ]
        );
    }
}
