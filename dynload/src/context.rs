//! The loader context data model.

use crate::port::MemCtx;

/// Whether the image was laid out and allocated as one unified region or
/// as separate text/data regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationMode {
    Unified,
    Split,
}

/// Layout and allocation state for a unified-bus load.
#[derive(Debug, Clone, Copy)]
pub struct UnifiedLayout {
    pub vma_base: u32,
    pub ram_size: u32,
    pub ram_base: u32,
    pub mem_ctx: MemCtx,
}

/// Layout and allocation state for a split text/data load.
#[derive(Debug, Clone, Copy)]
pub struct SplitLayout {
    pub text_vma_lo: u32,
    pub text_vma_hi: u32,
    pub text_size: u32,
    pub text_base: u32,
    pub text_mem_ctx: MemCtx,

    pub data_vma_lo: u32,
    pub data_vma_hi: u32,
    pub data_size: u32,
    pub data_base: u32,
    pub data_mem_ctx: MemCtx,
}

impl SplitLayout {
    /// True when `vma` falls inside the text region.
    pub fn is_text_vma(&self, vma: u32) -> bool {
        vma >= self.text_vma_lo && vma < self.text_vma_hi
    }

    /// Translates a VMA to a load-time address in the region that
    /// contains it, or `None` if it's in neither.
    pub fn load_base_for(&self, vma: u32) -> Option<u32> {
        if self.is_text_vma(vma) {
            Some(self.text_base.wrapping_add(vma.wrapping_sub(self.text_vma_lo)))
        } else if vma >= self.data_vma_lo && vma < self.data_vma_hi {
            Some(self.data_base.wrapping_add(vma.wrapping_sub(self.data_vma_lo)))
        } else {
            None
        }
    }
}

/// Either layout, keyed by [`AllocationMode`].
#[derive(Debug, Clone, Copy)]
pub enum Layout {
    Unified(UnifiedLayout),
    Split(SplitLayout),
}

impl Layout {
    pub fn mode(&self) -> AllocationMode {
        match self {
            Layout::Unified(_) => AllocationMode::Unified,
            Layout::Split(_) => AllocationMode::Split,
        }
    }

    /// The `MemCtx` to translate a resolved function address through. In
    /// `Split` mode this is always the text region's context, since only
    /// code executes.
    pub fn exec_mem_ctx(&self) -> MemCtx {
        match self {
            Layout::Unified(u) => u.mem_ctx,
            Layout::Split(s) => s.text_mem_ctx,
        }
    }

    /// Translates a segment VMA into its load-time destination address.
    /// Returns `None` if the VMA is outside every loaded range -- callers
    /// (the relocator, in particular) must skip such entries rather than
    /// fail the whole load.
    pub fn load_base_for(&self, vma: u32) -> Option<u32> {
        match self {
            Layout::Unified(u) => Some(u.ram_base.wrapping_add(vma.wrapping_sub(u.vma_base))),
            Layout::Split(s) => s.load_base_for(vma),
        }
    }

    /// Like [`Layout::load_base_for`], but never rejects a value outside
    /// every declared VMA range. In `Unified` mode there is only one
    /// region, so the single flat delta always applies. In `Split` mode,
    /// a value inside the text range translates through the text delta;
    /// anything else translates through the data delta unconditionally --
    /// there is no second bounds check against the data range. Used for
    /// relocation addends and symbol values, both of which may
    /// legitimately point outside the image for an externally-resolved
    /// symbol.
    pub fn translate_lenient(&self, vma: u32) -> Option<u32> {
        match self {
            Layout::Unified(u) => Some(u.ram_base.wrapping_add(vma.wrapping_sub(u.vma_base))),
            Layout::Split(s) => Some(if s.is_text_vma(vma) {
                s.text_base.wrapping_add(vma.wrapping_sub(s.text_vma_lo))
            } else {
                s.data_base.wrapping_add(vma.wrapping_sub(s.data_vma_lo))
            }),
        }
    }
}
