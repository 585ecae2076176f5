//! Read-only, random-access view over a 32-bit little-endian ELF image.
//!
//! Everything here is driven through an [`ImageSource`]; nothing assumes the
//! whole file is resident in memory except the program header table, the
//! section header table, and the section-name string table, which are small
//! and bounded by the image's own header counts, so they're cached eagerly
//! at [`ElfView::open`] time rather than re-read on every lookup.

use alloc::string::String;
use alloc::vec::Vec;

use goblin::elf32::header::{self, Header};
use goblin::elf32::program_header::ProgramHeader;
use goblin::elf32::section_header::{SectionHeader, SHT_NOBITS, SHT_RELA};
use goblin::elf32::sym::Sym;
use scroll::{Pread, LE};

use crate::error::{LoaderError, Result};
use crate::read::{read_exact, ImageSource};

pub use goblin::elf::program_header::{PF_X, PT_LOAD};
pub use goblin::elf::sym::{st_bind, st_type, st_visibility, STT_FUNC};

const EI_NIDENT: usize = 16;
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;

/// Size of an ELF32 file header in bytes, per the ELF32 ABI.
const ELF32_EHDR_SIZE: usize = 52;
/// Size of an ELF32 symbol table entry in bytes, per the ELF32 ABI.
const ELF32_SYM_SIZE: usize = 16;
/// Size of an ELF32 `Rela` entry in bytes, per the ELF32 ABI.
const ELF32_RELA_SIZE: usize = 12;

/// A section, as reported by [`ElfView::sections`].
#[derive(Debug, Clone)]
pub struct Section {
    pub index: usize,
    pub vma: u32,
    pub file_offset: u32,
    pub size: u32,
    pub sh_type: u32,
    pub entry_size: u32,
    pub align: u32,
    pub name: String,
}

/// A `PT_LOAD`-or-otherwise segment, as reported by [`ElfView::segments`].
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub p_type: u32,
    pub flags: u32,
    pub file_offset: u32,
    pub vma: u32,
    pub memsz: u32,
    pub filesz: u32,
    pub align: u32,
}

impl Segment {
    pub fn is_text(&self) -> bool {
        self.flags & PF_X != 0
    }
}

/// A symbol-table entry, as reported by [`ElfView::symbols`].
#[derive(Debug, Clone)]
pub struct Symbol {
    pub value: u32,
    pub size: u32,
    pub binding: u8,
    pub sym_type: u8,
    pub visibility: u8,
    pub name: String,
    /// Name of the section this symbol is defined in, if any.
    pub section_name: Option<String>,
}

/// A `RELA` entry, as reported by [`ElfView::relocations`].
#[derive(Debug, Clone)]
pub struct Relocation {
    pub offset: u32,
    pub info: u32,
    pub reloc_type: u32,
    /// The symbol's value. For an external (undefined) symbol this already
    /// holds the host-resolved absolute address, pinned by the build-time
    /// linker script -- the loader never resolves symbols itself.
    pub sym_value: u32,
    pub addend: i32,
    pub target_section_name: String,
    pub symbol_name: String,
}

/// A parsed `RELA` entry's raw wire encoding (before symbol/name lookups).
#[derive(Debug, Clone, Copy, Pread)]
struct RawRela {
    r_offset: u32,
    r_info: u32,
    r_addend: i32,
}

fn r_sym(info: u32) -> u32 {
    info >> 8
}

fn r_type(info: u32) -> u32 {
    info & 0xff
}

/// Read-only view over an ELF image's structure.
pub struct ElfView<'a, S: ImageSource> {
    source: &'a S,
    header: Header,
    program_headers: Vec<ProgramHeader>,
    section_headers: Vec<SectionHeader>,
    shstrtab: Vec<u8>,
}

impl<'a, S: ImageSource> ElfView<'a, S> {
    /// Validates the header and caches the program/section header tables.
    pub fn open(source: &'a S) -> Result<Self> {
        if source.len() < EI_NIDENT + 1 {
            return Err(LoaderError::InvalidArg);
        }
        let mut ident = [0u8; EI_NIDENT];
        read_exact(source, 0, &mut ident)?;
        if &ident[0..4] != b"\x7fELF" {
            return Err(LoaderError::InvalidFormat);
        }
        if ident[header::EI_CLASS] != ELFCLASS32 {
            return Err(LoaderError::InvalidFormat);
        }
        if ident[header::EI_DATA] != ELFDATA2LSB {
            return Err(LoaderError::InvalidFormat);
        }
        if ident[header::EI_VERSION] != EV_CURRENT {
            return Err(LoaderError::InvalidFormat);
        }

        if source.len() < ELF32_EHDR_SIZE {
            return Err(LoaderError::InvalidArg);
        }
        let mut hdr_buf = [0u8; ELF32_EHDR_SIZE];
        read_exact(source, 0, &mut hdr_buf)?;
        let header: Header = hdr_buf.pread_with(0, LE).map_err(|_| LoaderError::InvalidFormat)?;

        if header.e_type != goblin::elf::header::ET_EXEC
            && header.e_type != goblin::elf::header::ET_DYN
        {
            return Err(LoaderError::InvalidFormat);
        }

        let program_headers = Self::read_table::<ProgramHeader>(
            source, header.e_phoff as usize, header.e_phnum as usize, header.e_phentsize as usize,
        )?;
        let section_headers = Self::read_table::<SectionHeader>(
            source, header.e_shoff as usize, header.e_shnum as usize, header.e_shentsize as usize,
        )?;

        let shstrtab = if (header.e_shstrndx as usize) < section_headers.len() {
            let shstr_hdr = &section_headers[header.e_shstrndx as usize];
            let mut buf = alloc::vec![0u8; shstr_hdr.sh_size as usize];
            read_exact(source, shstr_hdr.sh_offset as usize, &mut buf)?;
            buf
        } else {
            Vec::new()
        };

        Ok(Self { source, header, program_headers, section_headers, shstrtab })
    }

    fn read_table<T>(source: &S, offset: usize, count: usize, entsize: usize) -> Result<Vec<T>>
    where
        T: for<'b> scroll::ctx::TryFromCtx<'b, scroll::Endian, Error = scroll::Error>,
    {
        let mut out = Vec::with_capacity(count);
        let mut buf = alloc::vec![0u8; entsize];
        for i in 0..count {
            read_exact(source, offset + i * entsize, &mut buf)?;
            let entry = buf.pread_with::<T>(0, LE).map_err(|_| LoaderError::InvalidFormat)?;
            out.push(entry);
        }
        Ok(out)
    }

    fn name_at(&self, table: &[u8], offset: u32) -> String {
        let offset = offset as usize;
        if offset >= table.len() {
            return String::new();
        }
        let end = table[offset..].iter().position(|&b| b == 0).map_or(table.len(), |p| offset + p);
        String::from_utf8_lossy(&table[offset..end]).into_owned()
    }

    fn section_name(&self, index: usize) -> String {
        self.section_headers
            .get(index)
            .map(|s| self.name_at(&self.shstrtab, s.sh_name as u32))
            .unwrap_or_default()
    }

    /// Iterates over sections, preserving ELF file order.
    pub fn sections(&self) -> impl Iterator<Item = Section> + '_ {
        self.section_headers.iter().enumerate().map(move |(index, s)| Section {
            index,
            vma: s.sh_addr,
            file_offset: s.sh_offset,
            size: s.sh_size,
            sh_type: s.sh_type,
            entry_size: s.sh_entsize,
            align: s.sh_addralign,
            name: self.name_at(&self.shstrtab, s.sh_name as u32),
        })
    }

    /// Finds a section by name.
    pub fn section_by_name(&self, name: &str) -> Option<Section> {
        self.sections().find(|s| s.name == name)
    }

    /// Iterates over program headers (segments), preserving ELF file order.
    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        self.program_headers.iter().map(|p| Segment {
            p_type: p.p_type,
            flags: p.p_flags,
            file_offset: p.p_offset,
            vma: p.p_vaddr,
            memsz: p.p_memsz,
            filesz: p.p_filesz,
            align: p.p_align,
        })
    }

    fn symtab_section(&self) -> Option<&SectionHeader> {
        const SHT_SYMTAB: u32 = 2;
        self.section_headers.iter().find(|s| s.sh_type == SHT_SYMTAB)
    }

    /// Iterates over symbol-table entries.
    ///
    /// External (undefined) symbols already carry the host-resolved
    /// absolute address in `st_value`, pinned there by the build-time
    /// linker script.
    pub fn symbols(&self) -> Result<Vec<Symbol>> {
        let Some(symtab) = self.symtab_section() else {
            return Ok(Vec::new());
        };
        let strtab = &self.section_headers[symtab.sh_link as usize];
        let mut strtab_buf = alloc::vec![0u8; strtab.sh_size as usize];
        read_exact(self.source, strtab.sh_offset as usize, &mut strtab_buf)?;

        let entsize = if symtab.sh_entsize != 0 { symtab.sh_entsize as usize } else { ELF32_SYM_SIZE };
        let count = symtab.sh_size as usize / entsize.max(1);
        let mut out = Vec::with_capacity(count);
        let mut buf = alloc::vec![0u8; entsize];
        for i in 0..count {
            read_exact(self.source, symtab.sh_offset as usize + i * entsize, &mut buf)?;
            let sym: Sym = buf.pread_with(0, LE).map_err(|_| LoaderError::InvalidFormat)?;
            let section_name = if sym.st_shndx != 0 && (sym.st_shndx as usize) < self.section_headers.len() {
                Some(self.section_name(sym.st_shndx as usize))
            } else {
                None
            };
            out.push(Symbol {
                value: sym.st_value,
                size: sym.st_size,
                binding: st_bind(sym.st_info),
                sym_type: st_type(sym.st_info),
                visibility: st_visibility(sym.st_other),
                name: self.name_at(&strtab_buf, sym.st_name as u32),
                section_name,
            });
        }
        Ok(out)
    }

    /// Iterates over every `RELA` relocation section's entries.
    pub fn relocations(&self) -> Result<Vec<Relocation>> {
        let mut out = Vec::new();
        let symtab = self.symtab_section();
        let (symtab_buf, strtab_buf) = if let Some(symtab) = symtab {
            let strtab = &self.section_headers[symtab.sh_link as usize];
            let mut strtab_buf = alloc::vec![0u8; strtab.sh_size as usize];
            read_exact(self.source, strtab.sh_offset as usize, &mut strtab_buf)?;
            (Some(*symtab), strtab_buf)
        } else {
            (None, Vec::new())
        };

        for sec in &self.section_headers {
            if sec.sh_type != SHT_RELA {
                continue;
            }
            let entsize = if sec.sh_entsize != 0 { sec.sh_entsize as usize } else { ELF32_RELA_SIZE };
            let count = sec.sh_size as usize / entsize.max(1);
            let mut buf = [0u8; ELF32_RELA_SIZE];
            for i in 0..count {
                read_exact(self.source, sec.sh_offset as usize + i * entsize, &mut buf)?;
                let raw: RawRela = buf.pread_with(0, LE).map_err(|_| LoaderError::InvalidFormat)?;
                let sym_index = r_sym(raw.r_info) as usize;
                let (sym_value, symbol_name) = match &symtab_buf {
                    Some(symtab) if sym_index != 0 => {
                        let entsize = if symtab.sh_entsize != 0 { symtab.sh_entsize as usize } else { ELF32_SYM_SIZE };
                        let mut sym_buf = alloc::vec![0u8; entsize];
                        read_exact(self.source, symtab.sh_offset as usize + sym_index * entsize, &mut sym_buf)?;
                        let sym: Sym = sym_buf.pread_with(0, LE).map_err(|_| LoaderError::InvalidFormat)?;
                        (sym.st_value, self.name_at(&strtab_buf, sym.st_name as u32))
                    }
                    _ => (0, String::new()),
                };
                out.push(Relocation {
                    offset: raw.r_offset,
                    info: raw.r_info,
                    reloc_type: r_type(raw.r_info),
                    sym_value,
                    addend: raw.r_addend,
                    target_section_name: self.section_name(sec.sh_info as usize),
                    symbol_name,
                });
            }
        }
        Ok(out)
    }

    pub fn entry_point(&self) -> u32 {
        self.header.e_entry
    }
}

/// Whether a section occupies no file space (e.g. `.bss`).
pub fn is_nobits(sh_type: u32) -> bool {
    sh_type == SHT_NOBITS
}
