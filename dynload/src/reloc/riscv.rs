//! RISC-V relocation types.
//!
//! `goblin` carries no RISC-V relocation constants, so these are defined
//! here directly from the RISC-V psABI.

use log::warn;

use crate::context::Layout;
use crate::elf::Relocation;
use crate::port::MemCtx;

use super::{load32, store32, Outcome, PairTable};

pub const R_RISCV_NONE: u32 = 0;
pub const R_RISCV_32: u32 = 1;
pub const R_RISCV_64: u32 = 2;
pub const R_RISCV_RELATIVE: u32 = 3;
pub const R_RISCV_COPY: u32 = 4;
pub const R_RISCV_JUMP_SLOT: u32 = 5;
pub const R_RISCV_PCREL_HI20: u32 = 23;
pub const R_RISCV_PCREL_LO12_I: u32 = 24;
pub const R_RISCV_PCREL_LO12_S: u32 = 25;
pub const R_RISCV_RELAX: u32 = 51;
pub const R_RISCV_ALIGN: u32 = 43;

const U_TYPE_LOW_MASK: u32 = 0x0000_0fff;
const I_TYPE_FIXED_MASK: u32 = 0x000f_ffff;
const S_TYPE_FIXED_MASK: u32 = 0x01ff_f07f;

/// Applies one RISC-V-specific relocation (everything `RELATIVE` and
/// `JUMP_SLOT`, handled in the common case, don't cover).
pub fn apply<const N: usize>(
    layout: &Layout, mem_ctx: MemCtx, where_addr: u32, entry: &Relocation, pair_table: &mut PairTable<N>,
) -> Outcome {
    match entry.reloc_type {
        R_RISCV_32 => {
            let Some(value) = layout.translate_lenient(entry.sym_value.wrapping_add(entry.addend as u32))
            else {
                return Outcome::SkippedUnknown;
            };
            store32(where_addr, value);
            Outcome::Applied
        }
        R_RISCV_PCREL_HI20 => apply_pcrel_hi20(layout, mem_ctx, where_addr, entry, pair_table),
        R_RISCV_PCREL_LO12_I => apply_pcrel_lo12(where_addr, entry, pair_table, false),
        R_RISCV_PCREL_LO12_S => apply_pcrel_lo12(where_addr, entry, pair_table, true),
        // Linker-relaxation hints and alignment padding markers carry no
        // runtime effect once the image is already laid out.
        R_RISCV_RELAX | R_RISCV_ALIGN | R_RISCV_NONE | R_RISCV_64 | R_RISCV_COPY => Outcome::SkippedValid,
        _ => Outcome::SkippedUnknown,
    }
}

/// `PCREL_HI20` patches a `U`-type instruction's (`AUIPC`, `LUI`) upper 20
/// bits with the rounded-to-page difference between the referenced
/// symbol and this instruction's own address, recording the exact
/// (unrounded) difference in `pair_table` for the matching `LO12` entry.
///
/// `where_addr` is this instruction's data-bus load address; when the
/// port reports a non-zero `text_offset` the instruction actually
/// executes from `where_addr + text_offset` on the instruction bus, so
/// the PC-relative distance must be computed from there.
fn apply_pcrel_hi20<const N: usize>(
    layout: &Layout, mem_ctx: MemCtx, where_addr: u32, entry: &Relocation, pair_table: &mut PairTable<N>,
) -> Outcome {
    let Some(target) = layout.translate_lenient(entry.sym_value.wrapping_add(entry.addend as u32)) else {
        return Outcome::SkippedUnknown;
    };
    let exec_where = where_addr.wrapping_add(mem_ctx.text_offset);
    let pcrel = target.wrapping_sub(exec_where) as i32;
    let hi20 = pcrel.wrapping_add(0x800) >> 12;

    let word = load32(where_addr);
    let patched = (word & U_TYPE_LOW_MASK) | ((hi20 as u32) << 12);
    store32(where_addr, patched);

    pair_table.insert(entry.offset, pcrel);
    Outcome::Applied
}

/// `PCREL_LO12_{I,S}` patches a second instruction with the low 12 bits of
/// the same difference computed for a `PCREL_HI20` entry, found in
/// `pair_table` by the associated symbol's VMA (per the RISC-V psABI,
/// this relocation's symbol is the local label at the `HI20`
/// instruction's own address, not the ultimate target).
fn apply_pcrel_lo12<const N: usize>(
    where_addr: u32, entry: &Relocation, pair_table: &PairTable<N>, s_type: bool,
) -> Outcome {
    let Some(pcrel) = pair_table.get(entry.sym_value) else {
        warn!("orphan PCREL_LO12 at {:#x}: no matching PCREL_HI20 recorded for {:#x}", entry.offset, entry.sym_value);
        return Outcome::SkippedUnknown;
    };
    let hi20 = pcrel.wrapping_add(0x800) >> 12;
    let lo12 = (pcrel - (hi20 << 12)) as u32 & 0xfff;

    let word = load32(where_addr);
    let patched = if s_type {
        let imm11_5 = (lo12 >> 5) & 0x7f;
        let imm4_0 = lo12 & 0x1f;
        (word & S_TYPE_FIXED_MASK) | (imm11_5 << 25) | (imm4_0 << 7)
    } else {
        (word & I_TYPE_FIXED_MASK) | (lo12 << 20)
    };
    store32(where_addr, patched);
    Outcome::Applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use crate::context::UnifiedLayout;

    fn reloc(offset: u32, reloc_type: u32, sym_value: u32, addend: i32) -> Relocation {
        Relocation {
            offset,
            info: 0,
            reloc_type,
            sym_value,
            addend,
            target_section_name: String::new(),
            symbol_name: String::new(),
        }
    }

    fn unified(vma_base: u32, ram_base: u32, text_offset: u32) -> Layout {
        Layout::Unified(UnifiedLayout {
            vma_base,
            ram_size: 0x10000,
            ram_base,
            mem_ctx: MemCtx { mmu_off: 0, mmu_count: 0, text_offset },
        })
    }

    #[test]
    fn hi20_lo12_i_pair_reconstructs_the_exact_pcrel_distance() {
        // identity mapping (vma_base == ram_base), unified bus
        let layout = unified(0, 0, 0);
        let mut pt: PairTable<4> = PairTable::new();

        // AUIPC at 0x2000, target 0x2abc -> pcrel = 0xabc
        let hi20_entry = reloc(0x2000, R_RISCV_PCREL_HI20, 0x2abc, 0);
        let mem_ctx = layout.exec_mem_ctx();
        let outcome = apply_pcrel_hi20(&layout, mem_ctx, 0x2000, &hi20_entry, &mut pt);
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(pt.get(0x2000), Some(0xabc));

        // LO12_I references the HI20 instruction's own VMA as its symbol.
        let lo12_entry = reloc(0x2004, R_RISCV_PCREL_LO12_I, 0x2000, 0);
        let outcome = apply_pcrel_lo12(0x2004, &lo12_entry, &pt, false);
        assert_eq!(outcome, Outcome::Applied);
    }

    #[test]
    fn lo12_with_no_matching_hi20_is_an_orphan() {
        let pt: PairTable<4> = PairTable::new();
        let lo12_entry = reloc(0x2004, R_RISCV_PCREL_LO12_I, 0xffff, 0);
        assert_eq!(apply_pcrel_lo12(0x2004, &lo12_entry, &pt, false), Outcome::SkippedUnknown);
    }

    #[test]
    fn hi20_accounts_for_a_nonzero_text_offset() {
        // Split I/D bus: instruction executes at where_addr + text_offset.
        let layout = unified(0, 0, 0x1000_0000);
        let mut pt: PairTable<4> = PairTable::new();
        let hi20_entry = reloc(0x100, R_RISCV_PCREL_HI20, 0x200, 0);
        let mem_ctx = MemCtx { mmu_off: 0, mmu_count: 0, text_offset: 0x1000_0000 };
        apply_pcrel_hi20(&layout, mem_ctx, 0x100, &hi20_entry, &mut pt);
        // exec_where = 0x1000_0100, target = 0x200 -> pcrel is hugely negative,
        // not the naive (target - where_addr) = 0x100.
        let naive = 0x200i32 - 0x100;
        assert_ne!(pt.get(0x100), Some(naive));
    }
}
