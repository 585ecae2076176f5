//! Xtensa relocation types.
//!
//! `goblin` carries no Xtensa relocation constants, so these are defined
//! here directly from the architecture's ABI supplement.

use log::trace;

use crate::context::Layout;
use crate::elf::Relocation;

use super::{store32, Outcome};

pub const R_XTENSA_NONE: u32 = 0;
pub const R_XTENSA_32: u32 = 1;
pub const R_XTENSA_RTLD: u32 = 2;
pub const R_XTENSA_GLOB_DAT: u32 = 3;
pub const R_XTENSA_JMP_SLOT: u32 = 4;
pub const R_XTENSA_RELATIVE: u32 = 5;
pub const R_XTENSA_PLT: u32 = 6;
pub const R_XTENSA_OP0: u32 = 8;
pub const R_XTENSA_OP1: u32 = 9;
pub const R_XTENSA_OP2: u32 = 10;
pub const R_XTENSA_ASM_EXPAND: u32 = 11;
pub const R_XTENSA_ASM_SIMPLIFY: u32 = 12;
pub const R_XTENSA_32_PCREL: u32 = 14;
pub const R_XTENSA_GNU_VTINHERIT: u32 = 15;
pub const R_XTENSA_GNU_VTENTRY: u32 = 16;
pub const R_XTENSA_DIFF8: u32 = 17;
pub const R_XTENSA_DIFF16: u32 = 18;
pub const R_XTENSA_DIFF32: u32 = 19;
pub const R_XTENSA_SLOT0_OP: u32 = 20;
pub const R_XTENSA_SLOT1_OP: u32 = 21;

/// Applies one Xtensa-specific relocation (everything `RELATIVE` and
/// `JMP_SLOT`/`PLT`, handled in the common case, don't cover).
pub fn apply(layout: &Layout, where_addr: u32, entry: &Relocation) -> Outcome {
    match entry.reloc_type {
        R_XTENSA_32 => {
            let Some(value) = layout.translate_lenient(entry.sym_value.wrapping_add(entry.addend as u32))
            else {
                return Outcome::SkippedUnknown;
            };
            store32(where_addr, value);
            Outcome::Applied
        }
        R_XTENSA_GLOB_DAT => {
            store32(where_addr, entry.sym_value);
            Outcome::Applied
        }
        // The layout planner preserves every segment's original VMA, so
        // instruction operands and literal-pool diffs that were already
        // encoded relative to those VMAs stay correct without patching.
        // This is the whole reason post-load fixups can be a no-op on
        // Xtensa.
        R_XTENSA_SLOT0_OP
        | R_XTENSA_SLOT1_OP
        | R_XTENSA_OP0
        | R_XTENSA_OP1
        | R_XTENSA_OP2
        | R_XTENSA_ASM_EXPAND
        | R_XTENSA_ASM_SIMPLIFY
        | R_XTENSA_32_PCREL
        | R_XTENSA_DIFF8
        | R_XTENSA_DIFF16
        | R_XTENSA_DIFF32
        | R_XTENSA_GNU_VTINHERIT
        | R_XTENSA_GNU_VTENTRY
        | R_XTENSA_NONE
        | R_XTENSA_RTLD => {
            trace!("xtensa relocation type {} is a VMA-preserving no-op, skipping", entry.reloc_type);
            Outcome::SkippedValid
        }
        _ => Outcome::SkippedUnknown,
    }
}
