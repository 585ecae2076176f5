//! The chip-porting contract.
//!
//! The relocator and the resolver never branch on chip identity -- they
//! branch only on what a [`ChipPort`] reports through its capability
//! queries and on the architecture the crate was built for (the `xtensa`
//! / `riscv` Cargo features). Concrete chips are out of scope for this
//! crate; `dynload-fixtures` supplies software stand-ins for a handful of
//! representative port shapes so the pipeline can be exercised without
//! real silicon.

/// Opaque, port-defined memory-context token returned by [`ChipPort::alloc`]
/// and threaded back through [`ChipPort::to_exec_addr`]/[`ChipPort::free`].
///
/// Carries whatever the port needs to reverse its own mapping later (MMU
/// table indices, a fixed data/instruction-bus offset, or nothing at all
/// on a unified-bus chip).
#[derive(Debug, Clone, Copy, Default)]
pub struct MemCtx {
    /// First of `mmu_count` consecutive MMU entries claimed at `alloc`
    /// time, for chips that page-map external RAM into the instruction
    /// bus. `0` when unused.
    pub mmu_off: u32,
    /// Number of consecutive MMU entries claimed. `0` when unused.
    pub mmu_count: u32,
    /// Constant added to a data-bus address to obtain the matching
    /// instruction-bus address. `0` on unified-bus chips.
    pub text_offset: u32,
}

impl MemCtx {
    pub const UNIFIED: MemCtx = MemCtx { mmu_off: 0, mmu_count: 0, text_offset: 0 };
}

/// Allocation capability hints: an opaque 32-bit value consumed by the
/// port's `alloc`/`alloc_split`, where `0` means "use the port's own
/// default policy".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocCaps(pub u32);

impl AllocCaps {
    pub const DEFAULT: AllocCaps = AllocCaps(0);
    /// Ask the port to prefer external RAM even if internal RAM would fit.
    pub const PREFER_EXTERNAL_RAM: u32 = 1 << 0;
    /// Allow falling back to internal RAM if external RAM allocation fails.
    pub const ALLOW_INTERNAL_FALLBACK: u32 = 1 << 1;

    pub fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }
}

/// A single unified allocation: base address plus the context the port
/// needs to free and translate it later.
#[derive(Debug, Clone, Copy)]
pub struct Allocation {
    pub base: u32,
    pub mem_ctx: MemCtx,
}

/// A split text/data allocation.
#[derive(Debug, Clone, Copy)]
pub struct SplitAllocation {
    pub text_base: u32,
    pub text_ctx: MemCtx,
    pub data_base: u32,
    pub data_ctx: MemCtx,
}

/// The chip-porting interface the loader is generic over.
///
/// All operations are synchronous; on MMU-capable chips, `alloc`/`free`
/// may briefly disable interrupts while mapping-table entries are
/// modified, but they never suspend in the async sense.
pub trait ChipPort {
    /// True when executable memory cannot also hold byte-addressable
    /// data (e.g. word-only executable RAM), forcing a split allocation.
    fn requires_split_alloc(&self) -> bool;

    /// True when code must execute from external RAM because internal
    /// RAM is write-protected for code.
    fn prefer_external_ram(&self) -> bool;

    /// True when internal RAM is a valid fallback if external RAM can't
    /// be allocated.
    fn allow_internal_ram_fallback(&self) -> bool;

    /// True when the executable region only supports 32-bit-aligned
    /// stores, forcing the image writer onto its word-aligned path.
    fn requires_word_aligned_exec_io(&self) -> bool {
        false
    }

    /// Allocates `size` bytes of unified, 4-byte-aligned memory.
    fn alloc(&mut self, size: u32, caps: AllocCaps) -> Option<Allocation>;

    /// Allocates separate text and data regions, each 4-byte-aligned.
    /// Only called when [`ChipPort::requires_split_alloc`] is true.
    fn alloc_split(&mut self, text_size: u32, data_size: u32, caps: AllocCaps) -> Option<SplitAllocation>;

    /// Tears down a unified allocation made by [`ChipPort::alloc`].
    fn free(&mut self, base: u32, mem_ctx: MemCtx);

    /// Tears down a split allocation made by [`ChipPort::alloc_split`].
    fn free_split(&mut self, alloc: SplitAllocation) {
        self.free(alloc.text_base, alloc.text_ctx);
        self.free(alloc.data_base, alloc.data_ctx);
    }

    /// Translates a data-bus address into the matching instruction-bus
    /// address. Identity on unified-bus chips.
    fn to_exec_addr(&self, mem_ctx: MemCtx, data_addr: u32) -> u32 {
        data_addr.wrapping_add(mem_ctx.text_offset)
    }

    /// Flushes/invalidates caches so instruction fetch from
    /// `[base, base + size)` observes every prior write.
    ///
    /// A port with no cache to manage can simply do nothing here; there
    /// is no way to report "unsupported" since the loader always treats
    /// a no-op sync as success.
    fn sync_cache(&mut self, base: u32, size: u32);
}
