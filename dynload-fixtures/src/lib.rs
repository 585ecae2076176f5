//! Synthetic ELF32 images and software [`ChipPort`] stand-ins for
//! exercising `dynload` without real silicon.
//!
//! There's no QEMU/Xtensa silicon available in a test run, so this crate
//! substitutes an in-process equivalent: [`ElfBuilder`] hand-packs ELF32
//! byte buffers directly, and the four port implementations here stand
//! in for four representative port shapes (unified, fixed-offset,
//! page-mapped, word-only-exec-split), each backed by a plain heap arena
//! instead of real memory-mapped I/O.
//!
//! Addresses round-trip through `u32` the way they do on the target
//! microcontrollers `dynload` is written for; running these fixtures
//! meaningfully therefore requires a host/target where pointers fit in
//! 32 bits (e.g. `cargo test --target i686-unknown-linux-gnu`), the same
//! way cross-testing a 32-bit embedded crate usually works.

use dynload::port::{AllocCaps, Allocation, ChipPort, MemCtx, SplitAllocation};

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;
const SHDR_SIZE: usize = 40;
const SYM_SIZE: usize = 16;
const RELA_SIZE: usize = 12;

pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;

const PT_LOAD: u32 = 1;
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

const SHT_NULL: u32 = 0;
const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_RELA: u32 = 4;
const SHT_NOBITS: u32 = 8;

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

struct SegmentSpec {
    vma: u32,
    flags: u32,
    bytes: Vec<u8>,
    memsz: u32,
    file_offset: u32,
}

struct SectionSpec {
    name: String,
    vma: u32,
    size: u32,
    file_offset: u32,
    sh_type: u32,
    entsize: u32,
}

pub struct SymbolSpec {
    pub name: String,
    pub value: u32,
    pub size: u32,
    pub bind: u8,
    pub sym_type: u8,
    pub shndx: u16,
}

pub struct RelaSpec {
    /// Index (1-based) into the symbols added via [`ElfBuilder::add_symbol`];
    /// `0` means no associated symbol (`STN_UNDEF`).
    pub symbol_index: u32,
    pub target_section: usize,
    pub offset: u32,
    pub reloc_type: u32,
    pub addend: i32,
}

/// Hand-packs a minimal, well-formed ELF32 LE image byte-by-byte.
///
/// Every structural offset (`e_phoff`, `e_shoff`, section `sh_offset`s)
/// is computed from what was actually appended, so a built image is
/// internally consistent by construction rather than by careful manual
/// bookkeeping at each call site.
pub struct ElfBuilder {
    e_type: u16,
    entry: u32,
    segments: Vec<SegmentSpec>,
    sections: Vec<SectionSpec>,
    symbols: Vec<SymbolSpec>,
    relas: Vec<RelaSpec>,
}

impl ElfBuilder {
    pub fn new(e_type: u16, entry: u32) -> Self {
        // Section 0 is always the reserved SHT_NULL entry.
        Self {
            e_type,
            entry,
            segments: Vec::new(),
            sections: vec![SectionSpec {
                name: String::new(),
                vma: 0,
                size: 0,
                file_offset: 0,
                sh_type: SHT_NULL,
                entsize: 0,
            }],
            symbols: Vec::new(),
            relas: Vec::new(),
        }
    }

    /// Adds a `PT_LOAD` segment and a same-named `PROGBITS`/`NOBITS`
    /// section covering its file range. Returns the section's index, for
    /// use as a relocation's `target_section` or a symbol's `shndx`.
    pub fn add_loadable(&mut self, name: &str, vma: u32, flags: u32, bytes: Vec<u8>, memsz: u32) -> usize {
        let sh_type = if bytes.is_empty() && memsz > 0 { SHT_NOBITS } else { SHT_PROGBITS };
        self.segments.push(SegmentSpec { vma, flags, bytes, memsz, file_offset: 0 });
        self.sections.push(SectionSpec {
            name: name.to_string(),
            vma,
            size: memsz,
            file_offset: 0,
            sh_type,
            entsize: 0,
        });
        self.sections.len() - 1
    }

    /// Adds a section that aliases part of an already-added segment's
    /// byte range (e.g. `.plt` as a sub-range of `.text`), without
    /// introducing a new `PT_LOAD` segment.
    pub fn add_section_alias(&mut self, name: &str, vma: u32, size: u32) -> usize {
        self.sections.push(SectionSpec {
            name: name.to_string(),
            vma,
            size,
            file_offset: 0,
            sh_type: SHT_PROGBITS,
            entsize: 0,
        });
        self.sections.len() - 1
    }

    pub fn add_symbol(&mut self, symbol: SymbolSpec) -> u32 {
        self.symbols.push(symbol);
        self.symbols.len() as u32
    }

    pub fn add_relocation(&mut self, rela: RelaSpec) {
        self.relas.push(rela);
    }

    /// Serializes the image: header, segment bytes, string tables,
    /// symbol table, relocation entries, then the program and section
    /// header tables.
    pub fn build(mut self) -> Vec<u8> {
        let mut out = vec![0u8; EHDR_SIZE];

        for seg in &mut self.segments {
            out.resize(align4(out.len()), 0);
            seg.file_offset = out.len() as u32;
            out.extend_from_slice(&seg.bytes);
        }
        // Section file offsets mirror their owning segment's, for
        // sections created by add_loadable; aliases and the string/
        // symbol/rela tables get their own ranges below.
        let mut seg_iter = self.segments.iter();
        for sec in self.sections.iter_mut().skip(1) {
            if sec.sh_type == SHT_PROGBITS || sec.sh_type == SHT_NOBITS {
                if let Some(seg) = seg_iter.clone().find(|s| s.vma <= sec.vma && sec.vma < s.vma + s.memsz.max(1)) {
                    sec.file_offset = seg.file_offset + (sec.vma - seg.vma);
                }
            }
        }
        let _ = seg_iter;

        // .strtab: symbol names, NUL-separated, starting with an empty name.
        let strtab_offset = out.len() as u32;
        let mut strtab = vec![0u8];
        let mut name_offsets = Vec::with_capacity(self.symbols.len());
        for sym in &self.symbols {
            name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(sym.name.as_bytes());
            strtab.push(0);
        }
        out.extend_from_slice(&strtab);
        let strtab_size = strtab.len() as u32;

        // .symtab: a leading null entry, then one per added symbol.
        let symtab_offset = out.len() as u32;
        out.extend_from_slice(&[0u8; SYM_SIZE]);
        for (sym, name_off) in self.symbols.iter().zip(&name_offsets) {
            out.extend_from_slice(&name_off.to_le_bytes());
            out.extend_from_slice(&sym.value.to_le_bytes());
            out.extend_from_slice(&sym.size.to_le_bytes());
            out.push((sym.bind << 4) | (sym.sym_type & 0xf));
            out.push(0);
            out.extend_from_slice(&sym.shndx.to_le_bytes());
        }
        let symtab_size = (1 + self.symbols.len()) * SYM_SIZE;

        // .rela.dyn
        let rela_offset = out.len() as u32;
        for rela in &self.relas {
            let r_info = (rela.symbol_index << 8) | (rela.reloc_type & 0xff);
            out.extend_from_slice(&rela.offset.to_le_bytes());
            out.extend_from_slice(&r_info.to_le_bytes());
            out.extend_from_slice(&rela.addend.to_le_bytes());
        }
        let rela_size = self.relas.len() * RELA_SIZE;

        // .shstrtab
        let reserved_names = [".symtab", ".strtab", ".rela.dyn", ".shstrtab"];
        let shstrtab_offset = out.len() as u32;
        let mut shstrtab = vec![0u8];
        let mut section_name_offsets = vec![0u32];
        for sec in self.sections.iter().skip(1) {
            section_name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(sec.name.as_bytes());
            shstrtab.push(0);
        }
        let mut reserved_offsets = [0u32; 4];
        for (i, name) in reserved_names.iter().enumerate() {
            reserved_offsets[i] = shstrtab.len() as u32;
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
        }
        out.extend_from_slice(&shstrtab);
        let shstrtab_size = shstrtab.len() as u32;

        // Program headers.
        out.resize(align4(out.len()), 0);
        let phoff = out.len() as u32;
        for seg in &self.segments {
            out.extend_from_slice(&PT_LOAD.to_le_bytes());
            out.extend_from_slice(&seg.file_offset.to_le_bytes());
            out.extend_from_slice(&seg.vma.to_le_bytes());
            out.extend_from_slice(&seg.vma.to_le_bytes());
            out.extend_from_slice(&(seg.bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&seg.memsz.to_le_bytes());
            out.extend_from_slice(&seg.flags.to_le_bytes());
            out.extend_from_slice(&4u32.to_le_bytes());
        }

        // Section headers: NULL, one per added section, then the four
        // bookkeeping sections.
        let shoff = out.len() as u32;
        let write_shdr = |out: &mut Vec<u8>, name: u32, sh_type: u32, flags: u32, addr: u32, offset: u32,
                          size: u32, link: u32, info: u32, addralign: u32, entsize: u32| {
            out.extend_from_slice(&name.to_le_bytes());
            out.extend_from_slice(&sh_type.to_le_bytes());
            out.extend_from_slice(&flags.to_le_bytes());
            out.extend_from_slice(&addr.to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(&link.to_le_bytes());
            out.extend_from_slice(&info.to_le_bytes());
            out.extend_from_slice(&addralign.to_le_bytes());
            out.extend_from_slice(&entsize.to_le_bytes());
        };

        write_shdr(&mut out, 0, SHT_NULL, 0, 0, 0, 0, 0, 0, 0, 0);
        for (sec, name_off) in self.sections.iter().skip(1).zip(section_name_offsets.iter().skip(1)) {
            write_shdr(&mut out, *name_off, sec.sh_type, 0, sec.vma, sec.file_offset, sec.size, 0, 0, 1, sec.entsize);
        }
        let symtab_idx = self.sections.len() as u32;
        let strtab_idx = symtab_idx + 1;
        write_shdr(&mut out, reserved_offsets[0], SHT_SYMTAB, 0, 0, symtab_offset, symtab_size as u32, strtab_idx, 0, 4, SYM_SIZE as u32);
        write_shdr(&mut out, reserved_offsets[1], SHT_STRTAB, 0, 0, strtab_offset, strtab_size, 0, 0, 1, 0);
        write_shdr(&mut out, reserved_offsets[2], SHT_RELA, 0, 0, rela_offset, rela_size as u32, symtab_idx, 0, 4, RELA_SIZE as u32);
        let shstrtab_idx = strtab_idx + 2;
        write_shdr(&mut out, reserved_offsets[3], SHT_STRTAB, 0, 0, shstrtab_offset, shstrtab_size, 0, 0, 1, 0);

        let shnum = shstrtab_idx + 1;

        // Back-fill the header now that every offset/count is known.
        out[0..4].copy_from_slice(b"\x7fELF");
        out[4] = 1; // ELFCLASS32
        out[5] = 1; // ELFDATA2LSB
        out[6] = 1; // EV_CURRENT
        out[16..18].copy_from_slice(&self.e_type.to_le_bytes());
        out[18..20].copy_from_slice(&0xf3u16.to_le_bytes()); // arbitrary e_machine, unchecked by ElfView
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[24..28].copy_from_slice(&self.entry.to_le_bytes());
        out[28..32].copy_from_slice(&phoff.to_le_bytes());
        out[32..36].copy_from_slice(&shoff.to_le_bytes());
        out[40..42].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        out[42..44].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        out[44..46].copy_from_slice(&(self.segments.len() as u16).to_le_bytes());
        out[46..48].copy_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
        out[48..50].copy_from_slice(&(shnum as u16).to_le_bytes());
        out[50..52].copy_from_slice(&(shstrtab_idx as u16).to_le_bytes());

        out
    }
}

/// A bump-allocating heap arena standing in for a chip's memory. Never
/// reclaims individual frees; `free`/`free_split` only log, matching
/// what a host-side fixture needs (no real fragmentation to model)
/// while still exercising the full `load`/`unload` call sequence.
struct Arena {
    storage: &'static mut [u8],
    next: usize,
}

impl Arena {
    fn new(size: usize) -> Self {
        let storage = vec![0u8; size].into_boxed_slice();
        Self { storage: Box::leak(storage), next: 0 }
    }

    fn bump(&mut self, size: u32) -> Option<u32> {
        let size = size as usize;
        let start = align4(self.next);
        if start + size > self.storage.len() {
            log::warn!("arena exhausted: need {size} bytes at {start:#x}, capacity {}", self.storage.len());
            return None;
        }
        self.next = start + size;
        let base = self.storage[start..].as_ptr() as usize as u32;
        log::trace!("bump-allocated {size} bytes at {base:#x}");
        Some(base)
    }
}

/// Port variant 1: a unified bus with no MMU and no split allocation.
pub struct UnifiedPort {
    arena: Arena,
}

impl UnifiedPort {
    pub fn new(arena_size: usize) -> Self {
        Self { arena: Arena::new(arena_size) }
    }
}

impl ChipPort for UnifiedPort {
    fn requires_split_alloc(&self) -> bool {
        false
    }
    fn prefer_external_ram(&self) -> bool {
        false
    }
    fn allow_internal_ram_fallback(&self) -> bool {
        false
    }
    fn alloc(&mut self, size: u32, _caps: AllocCaps) -> Option<Allocation> {
        Some(Allocation { base: self.arena.bump(size)?, mem_ctx: MemCtx::UNIFIED })
    }
    fn alloc_split(&mut self, _text_size: u32, _data_size: u32, _caps: AllocCaps) -> Option<SplitAllocation> {
        None
    }
    fn free(&mut self, _base: u32, _mem_ctx: MemCtx) {}
    fn sync_cache(&mut self, _base: u32, _size: u32) {}
}

/// Port variant 2: a fixed data/instruction-bus offset, modeling a chip
/// where code and data live at a constant address delta (e.g. RISC-V
/// split I/D bus).
pub struct FixedOffsetPort {
    text_arena: Arena,
    data_arena: Arena,
    text_offset: u32,
}

impl FixedOffsetPort {
    pub fn new(text_size: usize, data_size: usize, text_offset: u32) -> Self {
        Self { text_arena: Arena::new(text_size), data_arena: Arena::new(data_size), text_offset }
    }
}

impl ChipPort for FixedOffsetPort {
    fn requires_split_alloc(&self) -> bool {
        true
    }
    fn prefer_external_ram(&self) -> bool {
        false
    }
    fn allow_internal_ram_fallback(&self) -> bool {
        false
    }
    fn alloc(&mut self, _size: u32, _caps: AllocCaps) -> Option<Allocation> {
        None
    }
    fn alloc_split(&mut self, text_size: u32, data_size: u32, _caps: AllocCaps) -> Option<SplitAllocation> {
        let text_base = self.text_arena.bump(text_size)?;
        let data_base = self.data_arena.bump(data_size)?;
        Some(SplitAllocation {
            text_base,
            text_ctx: MemCtx { mmu_off: 0, mmu_count: 0, text_offset: self.text_offset },
            data_base,
            data_ctx: MemCtx::UNIFIED,
        })
    }
    fn free(&mut self, _base: u32, _mem_ctx: MemCtx) {}
    fn sync_cache(&mut self, _base: u32, _size: u32) {}
}

/// Port variant 3: external RAM page-mapped into the instruction bus
/// through an MMU, tracking claimed table entries in `MemCtx`.
pub struct PageMappedPort {
    text_arena: Arena,
    data_arena: Arena,
    page_size: u32,
    next_mmu_slot: u32,
}

impl PageMappedPort {
    pub fn new(text_size: usize, data_size: usize, page_size: u32) -> Self {
        Self { text_arena: Arena::new(text_size), data_arena: Arena::new(data_size), page_size, next_mmu_slot: 0 }
    }
}

impl ChipPort for PageMappedPort {
    fn requires_split_alloc(&self) -> bool {
        true
    }
    fn prefer_external_ram(&self) -> bool {
        true
    }
    fn allow_internal_ram_fallback(&self) -> bool {
        true
    }
    fn alloc(&mut self, _size: u32, _caps: AllocCaps) -> Option<Allocation> {
        None
    }
    fn alloc_split(&mut self, text_size: u32, data_size: u32, _caps: AllocCaps) -> Option<SplitAllocation> {
        let text_base = self.text_arena.bump(text_size)?;
        let data_base = self.data_arena.bump(data_size)?;
        let mmu_count = text_size.div_ceil(self.page_size.max(1));
        let mmu_off = self.next_mmu_slot;
        self.next_mmu_slot += mmu_count;
        Some(SplitAllocation {
            text_base,
            text_ctx: MemCtx { mmu_off, mmu_count, text_offset: 0 },
            data_base,
            data_ctx: MemCtx::UNIFIED,
        })
    }
    fn free(&mut self, _base: u32, mem_ctx: MemCtx) {
        self.next_mmu_slot = self.next_mmu_slot.saturating_sub(mem_ctx.mmu_count);
    }
    fn sync_cache(&mut self, _base: u32, _size: u32) {}
}

/// Port variant 4: executable memory that only accepts word-aligned
/// stores, exercising the image writer's word-aligned path.
pub struct WordOnlyExecPort {
    arena: Arena,
}

impl WordOnlyExecPort {
    pub fn new(arena_size: usize) -> Self {
        Self { arena: Arena::new(arena_size) }
    }
}

impl ChipPort for WordOnlyExecPort {
    fn requires_split_alloc(&self) -> bool {
        false
    }
    fn prefer_external_ram(&self) -> bool {
        false
    }
    fn allow_internal_ram_fallback(&self) -> bool {
        false
    }
    fn requires_word_aligned_exec_io(&self) -> bool {
        true
    }
    fn alloc(&mut self, size: u32, _caps: AllocCaps) -> Option<Allocation> {
        Some(Allocation { base: self.arena.bump(size.div_ceil(4) * 4)?, mem_ctx: MemCtx::UNIFIED })
    }
    fn alloc_split(&mut self, _text_size: u32, _data_size: u32, _caps: AllocCaps) -> Option<SplitAllocation> {
        None
    }
    fn free(&mut self, _base: u32, _mem_ctx: MemCtx) {}
    fn sync_cache(&mut self, _base: u32, _size: u32) {}
}
