//! Symbol resolver and the host symbol table contract.

use log::warn;

use crate::context::Layout;
use crate::elf::{Symbol, STT_FUNC};
use crate::port::{ChipPort, MemCtx};

/// The three extern symbols a host image defines for stub dispatch: a
/// writable array of machine-word slots, a parallel array of slot names,
/// and the slot count. Implemented by the host; the loader only ever
/// writes slots, never frees or reads back the name array for anything
/// but lookup.
pub trait HostSymbolTable {
    fn slot_count(&self) -> usize;
    fn slot_name(&self, index: usize) -> &str;
    /// Writes the resolved instruction-bus address for slot `index`, or
    /// `0` if the symbol named there could not be resolved.
    fn set_slot(&mut self, index: usize, addr: u32);
}

/// Resolves one symbol name against the loaded image's symbol table and
/// translates its value to a callable (for functions) or readable (for
/// data) address.
///
/// Returns `None` for a missing name, a name with no matching symbol, or
/// a symbol whose value is `0` -- a value of `0` marks an undefined or
/// meta-symbol entry, not a valid address, so it is excluded from lookup.
pub fn resolve(
    name: &str, symbols: &[Symbol], layout: &Layout, mem_ctx: MemCtx, port: &impl ChipPort,
) -> Option<u32> {
    if name.is_empty() {
        return None;
    }
    let sym = symbols.iter().find(|s| s.name == name && s.value != 0)?;
    let data_addr = layout.translate_lenient(sym.value)?;
    if sym.sym_type == STT_FUNC {
        Some(port.to_exec_addr(mem_ctx, data_addr))
    } else {
        Some(data_addr)
    }
}

/// Populates every slot in a [`HostSymbolTable`] by resolving its name
/// against the loaded image. Unresolved slots are set to `0` and logged
/// at `warn`, never fail the load. Returns `(resolved, missing)` counts
/// for the caller's [`crate::loader::LoadStats`].
pub fn populate(
    table: &mut impl HostSymbolTable, symbols: &[Symbol], layout: &Layout, mem_ctx: MemCtx,
    port: &impl ChipPort,
) -> (u32, u32) {
    let (mut resolved, mut missing) = (0u32, 0u32);
    for i in 0..table.slot_count() {
        let name = table.slot_name(i);
        match resolve(name, symbols, layout, mem_ctx, port) {
            Some(addr) => {
                table.set_slot(i, addr);
                resolved += 1;
            }
            None => {
                warn!("symbol '{name}' unresolved, slot {i} set to 0");
                table.set_slot(i, 0);
                missing += 1;
            }
        }
    }
    (resolved, missing)
}
