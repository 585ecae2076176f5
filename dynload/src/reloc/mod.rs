//! Relocator.
//!
//! Split into two parallel implementations chosen at build time via the
//! `xtensa` / `riscv` Cargo features, rather than dispatching on chip
//! identity at runtime. This module holds the dispatch loop and the
//! relocation types common to both architectures (`RELATIVE`, `JMP_SLOT`
//! / `PLT`); each arch submodule supplies its own type constants and the
//! architecture-specific cases (Xtensa's `SLOT0_OP` skip, RISC-V's
//! `PCREL_HI20`/`PCREL_LO12` pair).

#[cfg(feature = "riscv")]
pub mod riscv;
#[cfg(feature = "xtensa")]
pub mod xtensa;

use log::{trace, warn};

use crate::context::Layout;
use crate::elf::Relocation;
use crate::error::Result;
use crate::port::MemCtx;

/// A bounded table pairing up RISC-V `AUIPC` instructions (by their VMA)
/// with the `pcrel` value computed for their `PCREL_HI20` relocation, so
/// the matching `PCREL_LO12_{I,S}` relocation can recover it. The bound
/// keeps the table's size fixed and known at compile time rather than
/// growing with the image.
///
/// Cleared at the start of every relocation pass. Once full, further
/// `AUIPC`s are simply not recorded; a warning fires once per pass
/// rather than once per dropped entry.
pub struct PairTable<const N: usize> {
    keys: [u32; N],
    values: [i32; N],
    len: usize,
    overflowed: bool,
}

impl<const N: usize> Default for PairTable<N> {
    fn default() -> Self {
        Self { keys: [0; N], values: [0; N], len: 0, overflowed: false }
    }
}

impl<const N: usize> PairTable<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the table has refused at least one entry this pass.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Records a new `AUIPC`/`pcrel` pair. Once the table is full,
    /// further entries are dropped (warned once) rather than evicting
    /// older ones -- the matching `LO12` relocation for a dropped entry
    /// will warn and skip, the same as for any other orphan.
    pub fn insert(&mut self, auipc_vma: u32, pcrel: i32) {
        if self.len < N {
            self.keys[self.len] = auipc_vma;
            self.values[self.len] = pcrel;
            self.len += 1;
        } else if !self.overflowed {
            self.overflowed = true;
            warn!("HI20/LO12 pair table (capacity {N}) full; further PCREL_HI20 entries this pass will not be paired");
        }
    }

    pub fn get(&self, auipc_vma: u32) -> Option<i32> {
        self.keys[..self.len]
            .iter()
            .position(|&k| k == auipc_vma)
            .map(|i| self.values[i])
    }
}

/// Outcome of a single relocation entry, for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Intra-image PC-relative instructions that stay correct under
    /// VMA-preserving layout, or other relocation types that are no-ops
    /// by design.
    SkippedValid,
    /// Unrecognized relocation type, or recognized but with missing
    /// inputs (e.g. an orphan `PCREL_LO12`) -- logged at `warn`, never
    /// fails the load.
    SkippedUnknown,
}

/// Tally of what happened across one relocation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelocStats {
    pub applied: u32,
    pub skipped: u32,
}

/// Writes a 32-bit little-endian word at a load-time address.
///
/// Safety: the caller guarantees `addr` points into allocated, writable
/// memory for this load, with no concurrent loads and no other reader.
pub(crate) fn store32(addr: u32, value: u32) {
    unsafe { core::ptr::write_unaligned(addr as *mut u32, value) };
}

pub(crate) fn load32(addr: u32) -> u32 {
    unsafe { core::ptr::read_unaligned(addr as *const u32) }
}

/// Applies every `RELA` entry against the loaded image.
pub fn apply_relocations(
    layout: &Layout, mem_ctx: MemCtx, relocations: &[Relocation],
) -> Result<RelocStats> {
    let mut stats = RelocStats::default();

    #[cfg(feature = "riscv")]
    let mut pair_table: PairTable<32> = PairTable::new();

    for entry in relocations {
        trace!(
            "reloc type={:#x} offset={:#x} addend={:#x} sym={}",
            entry.reloc_type, entry.offset, entry.addend, entry.symbol_name,
        );
        let Some(where_addr) = layout.load_base_for(entry.offset) else {
            trace!("relocation offset {:#x} outside any loaded range, skipping", entry.offset);
            stats.skipped += 1;
            continue;
        };

        let outcome = if let Some(outcome) = common_case(layout, where_addr, entry) {
            outcome
        } else {
            #[cfg(feature = "xtensa")]
            {
                xtensa::apply(layout, where_addr, entry)
            }
            #[cfg(feature = "riscv")]
            {
                riscv::apply(layout, mem_ctx, where_addr, entry, &mut pair_table)
            }
        };

        match outcome {
            Outcome::Applied => stats.applied += 1,
            Outcome::SkippedValid => {}
            Outcome::SkippedUnknown => {
                warn!("unsupported relocation type {:#x}, skipping", entry.reloc_type);
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}

/// `RELATIVE` and `JMP_SLOT`/`PLT` behave identically on both
/// architectures; everything else is architecture-specific.
fn common_case(layout: &Layout, where_addr: u32, entry: &Relocation) -> Option<Outcome> {
    #[cfg(feature = "xtensa")]
    use xtensa::{R_XTENSA_JMP_SLOT as JMP_SLOT, R_XTENSA_PLT as PLT, R_XTENSA_RELATIVE as RELATIVE};
    #[cfg(feature = "riscv")]
    use riscv::{R_RISCV_JUMP_SLOT as JMP_SLOT, R_RISCV_RELATIVE as RELATIVE};
    #[cfg(feature = "riscv")]
    const PLT: u32 = u32::MAX; // RISC-V has no separate PLT relocation type.

    match entry.reloc_type {
        t if t == RELATIVE => {
            let value = layout.translate_lenient(entry.addend as u32).unwrap_or(entry.addend as u32);
            store32(where_addr, value);
            Some(Outcome::Applied)
        }
        t if t == JMP_SLOT || t == PLT => {
            // The symbol's value is already the host's resolved absolute
            // address; write it straight into the slot.
            store32(where_addr, entry.sym_value);
            Some(Outcome::Applied)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_round_trip() {
        let mut t: PairTable<4> = PairTable::new();
        t.insert(0x1000, 42);
        t.insert(0x1004, -7);
        assert_eq!(t.get(0x1000), Some(42));
        assert_eq!(t.get(0x1004), Some(-7));
        assert!(!t.overflowed());
    }

    #[test]
    fn get_on_unknown_key_is_none() {
        let mut t: PairTable<4> = PairTable::new();
        t.insert(0x1000, 1);
        assert_eq!(t.get(0x2000), None);
    }

    #[test]
    fn overflow_past_capacity_drops_entries_and_sets_the_flag_once() {
        let mut t: PairTable<2> = PairTable::new();
        t.insert(0x1000, 1);
        t.insert(0x1004, 2);
        assert!(!t.overflowed());
        t.insert(0x1008, 3);
        assert!(t.overflowed());
        // The third entry was never recorded -- no eviction of the first two.
        assert_eq!(t.get(0x1000), Some(1));
        assert_eq!(t.get(0x1004), Some(2));
        assert_eq!(t.get(0x1008), None);
    }

    #[test]
    fn duplicate_key_insert_keeps_both_and_get_returns_the_first_match() {
        let mut t: PairTable<4> = PairTable::new();
        t.insert(0x1000, 1);
        t.insert(0x1000, 2);
        assert_eq!(t.get(0x1000), Some(1));
    }
}
