//! ELF header parsing and validation
//!
//! The header of a mapped image is read in place, at the first byte of the
//! mapping that carries file offset 0 of the library.

use crate::{
    Result,
    arch::EM_ARCH,
    elf::{E_CLASS, EHDR_SIZE, ElfPhdr, Ehdr},
    error::parse_ehdr_error,
};
use core::ops::Deref;
use elf::abi::{EI_CLASS, EI_VERSION, ELFMAGIC, ET_DYN, ET_EXEC, EV_CURRENT};

/// A wrapper around the ELF header structure
///
/// This structure provides safe access to ELF header data with validation
/// to ensure the image is compatible with the running process.
#[repr(transparent)]
pub struct ElfHeader {
    /// The underlying ELF header structure
    ehdr: Ehdr,
}

impl Deref for ElfHeader {
    type Target = Ehdr;

    fn deref(&self) -> &Self::Target {
        &self.ehdr
    }
}

impl ElfHeader {
    /// Reads and validates the header mapped at `addr`.
    ///
    /// # Safety
    /// `addr` must point to at least [`EHDR_SIZE`] readable bytes that stay
    /// mapped for `'a`.
    pub(crate) unsafe fn from_addr<'a>(addr: usize) -> Result<&'a Self> {
        let data = unsafe { core::slice::from_raw_parts(addr as *const u8, EHDR_SIZE) };
        Self::new(data)
    }

    /// Parses and validates an ELF header from a byte slice.
    ///
    /// # Returns
    /// * `Ok(&ElfHeader)` - A reference to the parsed and validated ELF header
    /// * `Err(Error)` - If the data does not represent a valid ELF header
    pub(crate) fn new(data: &[u8]) -> Result<&Self> {
        if data.len() < EHDR_SIZE {
            return Err(parse_ehdr_error("truncated ELF header"));
        }
        if data.as_ptr().align_offset(align_of::<Ehdr>()) != 0 {
            return Err(parse_ehdr_error("misaligned ELF header"));
        }
        let ehdr: &ElfHeader = unsafe { &*(data.as_ptr().cast()) };
        ehdr.validate()?;
        Ok(ehdr)
    }

    /// Program headers of an image whose header is mapped in memory.
    ///
    /// # Safety
    /// The header must live inside a mapped image whose program header table
    /// is mapped as well.
    pub(crate) unsafe fn phdrs(&self) -> Result<&[ElfPhdr]> {
        if self.e_phentsize as usize != size_of::<ElfPhdr>() {
            return Err(parse_ehdr_error("unexpected program header size"));
        }
        let start = self as *const Self as usize + self.e_phoff as usize;
        Ok(unsafe {
            core::slice::from_raw_parts(start as *const ElfPhdr, self.e_phnum as usize)
        })
    }

    /// Validates the ELF header
    ///
    /// 1. Checks the ELF magic bytes
    /// 2. Verifies the file class matches the target architecture
    /// 3. Ensures the ELF version is current
    /// 4. Confirms the machine architecture matches
    /// 5. Accepts only executables and shared objects, the images a
    ///    dynamic linker maps
    pub(crate) fn validate(&self) -> Result<()> {
        if self.e_ident[0..4] != ELFMAGIC {
            return Err(parse_ehdr_error("invalid ELF magic"));
        }

        if self.e_ident[EI_CLASS] != E_CLASS {
            return Err(parse_ehdr_error("file class mismatch"));
        }

        if self.e_ident[EI_VERSION] != EV_CURRENT {
            return Err(parse_ehdr_error("invalid ELF version"));
        }

        if self.e_machine != EM_ARCH {
            return Err(parse_ehdr_error("file arch mismatch"));
        }

        if self.e_type != ET_DYN && self.e_type != ET_EXEC {
            return Err(parse_ehdr_error("not an executable or shared object"));
        }

        Ok(())
    }
}
