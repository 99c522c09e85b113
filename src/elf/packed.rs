//! Android packed relocations (`APS2`)
//!
//! The table is the magic `APS2` followed by a stream of SLEB128 numbers:
//! the relocation count, the initial `r_offset`, then groups of relocations
//! sharing some of their fields. Each group starts with its size and flags;
//! fields shared by the group follow once, the remaining fields follow per
//! relocation.

use crate::{Result, elf::RelocInfo, error::parse_dynamic_error};

const MAGIC: &[u8; 4] = b"APS2";

const GROUPED_BY_INFO: usize = 1;
const GROUPED_BY_OFFSET_DELTA: usize = 2;
const GROUPED_BY_ADDEND: usize = 4;
const GROUP_HAS_ADDEND: usize = 8;

/// Decoder for one SLEB128 stream.
struct Sleb128<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Sleb128<'_> {
    fn next(&mut self) -> Result<usize> {
        let mut value = 0usize;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| parse_dynamic_error("truncated packed relocation table"))?;
            self.pos += 1;
            if shift < usize::BITS {
                value |= ((byte & 0x7f) as usize) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < usize::BITS && byte & 0x40 != 0 {
                    value |= usize::MAX << shift;
                }
                return Ok(value);
            }
        }
    }
}

/// Iterator over the relocations of a packed table.
///
/// Yields an error once and then stops if the stream is malformed.
pub(crate) struct PackedRelocs<'a> {
    stream: Sleb128<'a>,
    is_rela: bool,
    remaining: usize,
    group_remaining: usize,
    group_flags: usize,
    group_offset_delta: usize,
    r_offset: usize,
    r_info: usize,
    r_addend: usize,
    failed: bool,
}

impl<'a> PackedRelocs<'a> {
    /// Reads the table header. `is_rela` tells whether addends may appear.
    pub(crate) fn new(data: &'a [u8], is_rela: bool) -> Result<Self> {
        let body = data
            .strip_prefix(MAGIC)
            .ok_or_else(|| parse_dynamic_error("packed relocation table lacks APS2 magic"))?;
        let mut stream = Sleb128 { data: body, pos: 0 };
        let remaining = stream.next()?;
        let r_offset = stream.next()?;
        Ok(PackedRelocs {
            stream,
            is_rela,
            remaining,
            group_remaining: 0,
            group_flags: 0,
            group_offset_delta: 0,
            r_offset,
            r_info: 0,
            r_addend: 0,
            failed: false,
        })
    }

    fn start_group(&mut self) -> Result<()> {
        let size = self.stream.next()?;
        if size == 0 || size > self.remaining {
            return Err(parse_dynamic_error("invalid packed relocation group size"));
        }
        let flags = self.stream.next()?;
        if flags & GROUPED_BY_OFFSET_DELTA != 0 {
            self.group_offset_delta = self.stream.next()?;
        }
        if flags & GROUPED_BY_INFO != 0 {
            self.r_info = self.stream.next()?;
        }
        if flags & GROUP_HAS_ADDEND != 0 {
            if !self.is_rela {
                return Err(parse_dynamic_error("addend in packed REL table"));
            }
            if flags & GROUPED_BY_ADDEND != 0 {
                self.r_addend = self.r_addend.wrapping_add(self.stream.next()?);
            }
        } else {
            self.r_addend = 0;
        }
        self.group_remaining = size;
        self.group_flags = flags;
        Ok(())
    }

    fn next_reloc(&mut self) -> Result<RelocInfo> {
        if self.group_remaining == 0 {
            self.start_group()?;
        }
        let flags = self.group_flags;
        let delta = if flags & GROUPED_BY_OFFSET_DELTA != 0 {
            self.group_offset_delta
        } else {
            self.stream.next()?
        };
        self.r_offset = self.r_offset.wrapping_add(delta);
        if flags & GROUPED_BY_INFO == 0 {
            self.r_info = self.stream.next()?;
        }
        if flags & GROUP_HAS_ADDEND != 0 && flags & GROUPED_BY_ADDEND == 0 {
            self.r_addend = self.r_addend.wrapping_add(self.stream.next()?);
        }
        self.group_remaining -= 1;
        self.remaining -= 1;
        Ok(RelocInfo {
            r_offset: self.r_offset,
            r_info: self.r_info,
        })
    }
}

impl Iterator for PackedRelocs<'_> {
    type Item = Result<RelocInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        let reloc = self.next_reloc();
        self.failed = reloc.is_err();
        Some(reloc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleb(mut value: i64, out: &mut Vec<u8>) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
            out.push(if done { byte } else { byte | 0x80 });
            if done {
                break;
            }
        }
    }

    fn table(values: &[i64]) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        for &value in values {
            sleb(value, &mut out);
        }
        out
    }

    fn info(r_offset: usize, r_info: usize) -> RelocInfo {
        RelocInfo { r_offset, r_info }
    }

    #[test]
    fn decodes_sleb128() {
        let data = [0x02, 0x7e, 0xe5, 0x8e, 0x26, 0x80, 0x7f];
        let mut stream = Sleb128 {
            data: &data,
            pos: 0,
        };
        assert_eq!(stream.next().unwrap(), 2);
        assert_eq!(stream.next().unwrap() as isize, -2);
        assert_eq!(stream.next().unwrap(), 624485);
        assert_eq!(stream.next().unwrap() as isize, -128);
        assert!(stream.next().is_err());
    }

    #[test]
    fn grouped_by_offset_and_info() {
        // 3 relocations from 0x1000; one group sharing delta 8 and info 0x507.
        let data = table(&[
            3,
            0x1000,
            3,
            (GROUPED_BY_OFFSET_DELTA | GROUPED_BY_INFO) as i64,
            8,
            0x507,
        ]);
        let relocs: Vec<_> = PackedRelocs::new(&data, true)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            relocs,
            [info(0x1008, 0x507), info(0x1010, 0x507), info(0x1018, 0x507)]
        );
    }

    #[test]
    fn ungrouped_entries_with_addends() {
        // Two groups: per-entry fields with addends, then one shared-info entry.
        let data = table(&[
            3,
            0,
            2,
            GROUP_HAS_ADDEND as i64,
            0x20,
            0x101,
            16,
            0x8,
            0x202,
            -4,
            1,
            GROUPED_BY_INFO as i64,
            0x303,
            0x100,
        ]);
        let relocs: Vec<_> = PackedRelocs::new(&data, true)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            relocs,
            [info(0x20, 0x101), info(0x28, 0x202), info(0x128, 0x303)]
        );
    }

    #[test]
    fn negative_offset_delta() {
        let data = table(&[2, 0x100, 2, 0, -8, 1, -8, 2]);
        let relocs: Vec<_> = PackedRelocs::new(&data, false)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(relocs, [info(0xf8, 1), info(0xf0, 2)]);
    }

    #[test]
    fn rejects_missing_magic() {
        assert!(PackedRelocs::new(b"APS1\x00\x00", true).is_err());
    }

    #[test]
    fn truncated_stream_stops_after_error() {
        let data = table(&[2, 0, 2, 0, 8]);
        let mut relocs = PackedRelocs::new(&data, true).unwrap();
        assert!(relocs.next().unwrap().is_err());
        assert!(relocs.next().is_none());
    }

    #[test]
    fn addend_in_rel_table_is_rejected() {
        let data = table(&[1, 0, 1, GROUP_HAS_ADDEND as i64, 8, 1, 0]);
        let mut relocs = PackedRelocs::new(&data, false).unwrap();
        assert!(relocs.next().unwrap().is_err());
    }
}
