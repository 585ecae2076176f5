//! Post-load fixups.
//!
//! Architecture-dependent patching that must run after the image writer
//! and before the relocator. Selected at compile time by the `xtensa` /
//! `riscv` Cargo features, the same way the relocator is -- chip identity
//! is never dispatched on at runtime.

use crate::context::Layout;
use crate::elf::ElfView;
use crate::error::Result;
use crate::port::MemCtx;
use crate::read::ImageSource;

#[cfg(feature = "xtensa")]
pub fn run<S: ImageSource>(_view: &ElfView<S>, _layout: &Layout, _mem_ctx: MemCtx) -> Result<()> {
    // No-op on Xtensa.
    Ok(())
}

#[cfg(feature = "riscv")]
pub fn run<S: ImageSource>(view: &ElfView<S>, layout: &Layout, mem_ctx: MemCtx) -> Result<()> {
    riscv::patch_plt_auipc(view, layout, mem_ctx)
}

#[cfg(feature = "riscv")]
mod riscv {
    use log::{debug, warn};

    use super::*;

    const AUIPC_OPCODE: u32 = 0x17;
    const OPCODE_MASK: u32 = 0x7f;
    const PLT_ENTRY_SIZE: u32 = 16;

    /// Each `.plt` entry is a four-instruction stanza starting with
    /// `AUIPC t, imm20` that computes a PC-relative GOT address. Because
    /// execution proceeds from the instruction-bus view of the page but
    /// GOT loads must use the data-bus view, every `AUIPC` in `.plt` is
    /// adjusted so that `PC + (imm20 << 12) == data_addr` given
    /// `PC == instruction_bus_addr == data_bus_addr + text_offset`.
    ///
    /// This only matters when the port reports a non-zero `text_offset`;
    /// a unified-bus RISC-V chip never needs this adjustment, hence the
    /// early return guarding it below.
    pub(super) fn patch_plt_auipc<S: ImageSource>(
        view: &ElfView<S>, layout: &Layout, mem_ctx: MemCtx,
    ) -> Result<()> {
        if mem_ctx.text_offset == 0 {
            return Ok(());
        }
        let Some(plt) = view.section_by_name(".plt") else {
            warn!("no .plt section found; image may have no external calls");
            return Ok(());
        };
        let Some(base) = layout.load_base_for(plt.vma) else {
            warn!(".plt section's VMA is not inside any loaded region");
            return Ok(());
        };

        let adjustment = (mem_ctx.text_offset >> 12) as i32;
        let mut offset = 0u32;
        let mut patched = 0u32;
        // The header is a single AUIPC, followed by each subsequent
        // 16-byte entry, itself starting with an AUIPC.
        while offset + 4 <= plt.size {
            // SAFETY: `base` points to `plt.size` allocated, writable
            // bytes that the image writer already copied into place.
            let word_ptr = (base + offset) as *mut u32;
            let word = unsafe { core::ptr::read_unaligned(word_ptr) };
            if word & OPCODE_MASK == AUIPC_OPCODE {
                let imm20 = (word as i32) >> 12;
                let new_imm20 = imm20.wrapping_sub(adjustment);
                let patched_word = ((new_imm20 << 12) as u32) | (word & 0xfff);
                unsafe { core::ptr::write_unaligned(word_ptr, patched_word) };
                patched += 1;
                debug!("patched AUIPC at plt+{offset:#x}: imm20 {imm20:#x} -> {new_imm20:#x}");
            }
            offset += PLT_ENTRY_SIZE;
        }
        debug!("post-load fixups patched {patched} PLT AUIPC instructions");
        Ok(())
    }
}
