//! Image writer.
//!
//! Copies each `PT_LOAD` segment's file bytes to its allocated destination
//! and zero-fills the `memsz - filesz` BSS tail. On ports whose executable
//! memory only supports word-aligned stores, both the copy and the fill
//! go through [`write_word_aligned`] instead of a byte loop.

use log::debug;

use crate::context::Layout;
use crate::elf::{PF_X, PT_LOAD};
use crate::error::{LoaderError, Result};
use crate::port::ChipPort;
use crate::read::{read_exact, ImageSource};

/// Destination for one segment's bytes, as a raw pointer into allocated
/// memory. Safety: the caller (the orchestrator) guarantees `ptr` points
/// to at least `memsz` allocated, writable bytes, and that nothing else
/// observes this memory concurrently (no concurrent loads ever run).
struct Dest {
    ptr: *mut u8,
    filesz: u32,
    memsz: u32,
}

/// Copies every `PT_LOAD` segment into its allocated region and zero-fills
/// its BSS tail.
pub fn load_segments(
    source: &impl ImageSource,
    layout: &Layout,
    port: &impl ChipPort,
    segments: impl Iterator<Item = crate::elf::Segment>,
) -> Result<()> {
    for seg in segments {
        if seg.p_type != PT_LOAD || seg.memsz == 0 {
            continue;
        }
        let Some(dest_base) = layout.load_base_for(seg.vma) else {
            // Planning already ensured every PT_LOAD segment is covered;
            // this would mean layout and segment iteration disagreed.
            return Err(LoaderError::InvalidState);
        };
        let word_aligned = port.requires_word_aligned_exec_io() && (seg.flags & PF_X != 0);
        debug!(
            "loading segment vma={:#x} -> {:#x} filesz={} memsz={} word_aligned={}",
            seg.vma, dest_base, seg.filesz, seg.memsz, word_aligned,
        );

        let dest = Dest { ptr: dest_base as *mut u8, filesz: seg.filesz, memsz: seg.memsz };

        if word_aligned {
            write_word_aligned(source, seg.file_offset, &dest)?;
        } else {
            write_byte_aligned(source, seg.file_offset, &dest)?;
        }
    }
    Ok(())
}

fn write_byte_aligned(source: &impl ImageSource, file_offset: u32, dest: &Dest) -> Result<()> {
    // SAFETY: see `Dest`'s invariant.
    let out = unsafe { core::slice::from_raw_parts_mut(dest.ptr, dest.memsz as usize) };
    let (copied, tail) = out.split_at_mut(dest.filesz as usize);
    read_exact(source, file_offset as usize, copied)?;
    tail.fill(0);
    Ok(())
}

/// Word-at-a-time copy-and-zero for executable memory that can't be
/// stored to at byte granularity. A trailing partial word is
/// zero-extended before the final store.
fn write_word_aligned(source: &impl ImageSource, file_offset: u32, dest: &Dest) -> Result<()> {
    const WORD: usize = 4;
    let filesz = dest.filesz as usize;
    let memsz = dest.memsz as usize;
    let words = memsz.div_ceil(WORD);

    // SAFETY: see `Dest`'s invariant; the destination has room for
    // `words * WORD >= memsz` bytes because callers size allocations to
    // a whole number of words when this path is taken.
    let out = unsafe { core::slice::from_raw_parts_mut(dest.ptr as *mut u32, words) };

    let mut scratch = [0u8; WORD];
    let mut read_so_far = 0usize;
    for word in out.iter_mut() {
        scratch = [0u8; WORD];
        let remaining = filesz.saturating_sub(read_so_far);
        let n = remaining.min(WORD);
        if n > 0 {
            read_exact(source, file_offset as usize + read_so_far, &mut scratch[..n])?;
            read_so_far += n;
        }
        *word = u32::from_le_bytes(scratch);
    }
    Ok(())
}
