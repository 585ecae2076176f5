//! Loader orchestrator.
//!
//! Drives the pipeline: parse the ELF view, plan the layout, allocate
//! memory, write segments, run post-load fixups, apply relocations,
//! sync caches, populate the host symbol table -- and owns the single
//! live [`LoadContext`]. The only stateful public type; every other
//! module is a pure transform.

use alloc::vec::Vec;

use log::{error, info};

use crate::cache;
use crate::context::Layout;
use crate::elf::ElfView;
use crate::error::{LoaderError, Result};
use crate::fixup;
use crate::layout;
use crate::port::{AllocCaps, Allocation, ChipPort, SplitAllocation};
use crate::read::{ImageSource, SliceSource};
use crate::reloc;
use crate::symtab::{self, HostSymbolTable};
use crate::writer;

/// The pipeline stage a [`Loader`] has most recently completed.
///
/// Every transition corresponds to one step inside [`Loader::load_from_source`]
/// / [`Loader::load_from_buffer`]; there is no suspension between them --
/// every call runs to completion before returning. The state is kept as
/// a named value anyway so a failed load can be diagnosed by its
/// furthest-reached stage, and so [`Loader::unload`] can refuse anything
/// other than `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Empty,
    Validated,
    LaidOut,
    Allocated,
    Loaded,
    Fixed,
    Relocated,
    Ready,
}

enum AllocKind {
    Unified(Allocation),
    Split(SplitAllocation),
}

struct LoadContext {
    layout: Layout,
    alloc: AllocKind,
}

/// Summary of a successful `load`/`reload`, returned so host firmware can
/// log or report it without the loader needing to know the host's
/// logging format.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadStats {
    pub text_size: u32,
    pub data_size: u32,
    pub segment_count: u32,
    pub relocations_applied: u32,
    pub relocations_skipped: u32,
    pub symbols_resolved: u32,
    pub symbols_missing: u32,
}

impl LoadStats {
    pub fn ram_size(&self) -> u32 {
        self.text_size + self.data_size
    }
}

/// Drives one chip port through the full load/unload lifecycle.
///
/// Holds the only live [`LoadContext`]; a second `load` first destroys
/// whatever is currently loaded, so a load always atomically replaces
/// the previous context rather than ever running two side by side.
pub struct Loader<P: ChipPort> {
    port: P,
    state: State,
    ctx: Option<LoadContext>,
    update_available: bool,
}

impl<P: ChipPort> Loader<P> {
    pub fn new(port: P) -> Self {
        Self { port, state: State::Empty, ctx: None, update_available: false }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The pending-update flag. Set by [`Loader::mark_update_ready`],
    /// cleared on a successful load.
    pub fn update_available(&self) -> bool {
        self.update_available
    }

    /// Called by the external upload path once a new image is staged and
    /// ready to be picked up at the host's next safe point -- never from
    /// inside a reloadable call frame.
    pub fn mark_update_ready(&mut self) {
        self.update_available = true;
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Loads from a borrowed in-memory byte range.
    pub fn load_from_buffer(
        &mut self, bytes: &[u8], caps: AllocCaps, table: &mut impl HostSymbolTable,
    ) -> Result<LoadStats> {
        self.load_from_source(&SliceSource::new(bytes), caps, table)
    }

    /// Loads from any [`ImageSource`], generalized over the
    /// partition-vs-buffer distinction since both resolve to the same
    /// read callback contract.
    pub fn load_from_source<S: ImageSource>(
        &mut self, source: &S, caps: AllocCaps, table: &mut impl HostSymbolTable,
    ) -> Result<LoadStats> {
        if self.ctx.is_some() {
            // Replacement loading destroys the previous context before
            // starting the new one; if the new load fails, the previous
            // is not resurrected.
            self.teardown();
        }

        match self.run_pipeline(source, caps, table) {
            Ok((stats, ctx)) => {
                self.ctx = Some(ctx);
                self.state = State::Ready;
                self.update_available = false;
                info!(
                    "load succeeded: {} segments, ram={} bytes, relocations {}/{} applied, symbols {}/{} resolved",
                    stats.segment_count, stats.ram_size(), stats.relocations_applied,
                    stats.relocations_applied + stats.relocations_skipped, stats.symbols_resolved,
                    stats.symbols_resolved + stats.symbols_missing,
                );
                Ok(stats)
            }
            Err(e) => {
                error!("load failed: {e}");
                self.state = State::Empty;
                Err(e)
            }
        }
    }

    /// `unload` then `load`.
    pub fn reload<S: ImageSource>(
        &mut self, source: &S, caps: AllocCaps, table: &mut impl HostSymbolTable,
    ) -> Result<LoadStats> {
        if self.state == State::Ready {
            self.teardown();
        }
        self.load_from_source(source, caps, table)
    }

    /// Frees every resource the current context holds. Returns
    /// `InvalidState` if called outside `Ready` -- so a second back-to-back
    /// `unload()` call is rejected rather than silently a no-op.
    pub fn unload(&mut self) -> Result<()> {
        if self.state != State::Ready {
            return Err(LoaderError::InvalidState);
        }
        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.free(&ctx.alloc);
        }
        self.state = State::Empty;
    }

    fn free(&mut self, alloc: &AllocKind) {
        match alloc {
            AllocKind::Unified(a) => self.port.free(a.base, a.mem_ctx),
            AllocKind::Split(a) => self.port.free_split(*a),
        }
    }

    /// Runs the full pipeline to completion, tearing down any allocation
    /// it made if a later stage fails, so a failed load always leaves the
    /// context in `Empty` rather than holding a half-initialized one.
    fn run_pipeline<S: ImageSource>(
        &mut self, source: &S, caps: AllocCaps, table: &mut impl HostSymbolTable,
    ) -> Result<(LoadStats, LoadContext)> {
        self.state = State::Validated;
        let view = ElfView::open(source)?;

        self.state = State::LaidOut;
        let plan = layout::plan(view.segments())?;

        self.state = State::Allocated;
        let (load_layout, alloc) = self.allocate(&plan, caps)?;

        match self.run_loaded_stages(source, &view, &load_layout, table) {
            Ok((applied, skipped, resolved, missing)) => {
                let stats = LoadStats {
                    text_size: plan.text_size(),
                    data_size: if plan.has_text() { plan.data_size() } else { plan.ram_size() },
                    segment_count: plan.segment_count,
                    relocations_applied: applied,
                    relocations_skipped: skipped,
                    symbols_resolved: resolved,
                    symbols_missing: missing,
                };
                Ok((stats, LoadContext { layout: load_layout, alloc }))
            }
            Err(e) => {
                self.free(&alloc);
                Err(e)
            }
        }
    }

    /// Writes segments, runs post-load fixups, applies relocations, syncs
    /// caches, and populates the host symbol table, against an
    /// already-allocated layout.
    fn run_loaded_stages<S: ImageSource>(
        &mut self, source: &S, view: &ElfView<S>, load_layout: &Layout, table: &mut impl HostSymbolTable,
    ) -> Result<(u32, u32, u32, u32)> {
        self.state = State::Loaded;
        writer::load_segments(source, load_layout, &self.port, view.segments())?;

        self.state = State::Fixed;
        fixup::run(view, load_layout, load_layout.exec_mem_ctx())?;

        self.state = State::Relocated;
        let relocations = view.relocations()?;
        let reloc_stats = reloc::apply_relocations(load_layout, load_layout.exec_mem_ctx(), &relocations)?;

        cache::sync(load_layout, &mut self.port);

        let symbols: Vec<_> = view.symbols()?;
        let (resolved, missing) =
            symtab::populate(table, &symbols, load_layout, load_layout.exec_mem_ctx(), &self.port);

        Ok((reloc_stats.applied, reloc_stats.skipped, resolved, missing))
    }

    /// Asks the port for memory shaped the way it needs (unified vs
    /// split, per [`ChipPort::requires_split_alloc`]) and builds the
    /// matching [`Layout`].
    fn allocate(&mut self, plan: &layout::Plan, caps: AllocCaps) -> Result<(Layout, AllocKind)> {
        if self.port.requires_split_alloc() {
            let alloc = self
                .port
                .alloc_split(plan.text_size(), plan.data_size(), caps)
                .ok_or(LoaderError::NoMem)?;
            let layout = Layout::Split(crate::context::SplitLayout {
                text_vma_lo: plan.text.lo,
                text_vma_hi: plan.text.hi,
                text_size: plan.text_size(),
                text_base: alloc.text_base,
                text_mem_ctx: alloc.text_ctx,
                data_vma_lo: plan.data.lo,
                data_vma_hi: plan.data.hi,
                data_size: plan.data_size(),
                data_base: alloc.data_base,
                data_mem_ctx: alloc.data_ctx,
            });
            Ok((layout, AllocKind::Split(alloc)))
        } else {
            let alloc = self.port.alloc(plan.ram_size(), caps).ok_or(LoaderError::NoMem)?;
            let layout = Layout::Unified(crate::context::UnifiedLayout {
                vma_base: plan.unified.lo,
                ram_size: plan.ram_size(),
                ram_base: alloc.base,
                mem_ctx: alloc.mem_ctx,
            });
            Ok((layout, AllocKind::Unified(alloc)))
        }
    }
}
