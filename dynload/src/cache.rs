//! Cache sync.
//!
//! Runs once the relocator has finished writing, so instruction fetch for
//! the loaded image observes every write made by the image writer, the
//! post-load fixups, and the relocator.

use log::debug;

use crate::context::Layout;
use crate::port::ChipPort;

/// Flushes/invalidates caches over every region written during this load:
/// once for a unified region, twice (text, then data) for a split one.
pub fn sync(layout: &Layout, port: &mut impl ChipPort) {
    match layout {
        Layout::Unified(u) => {
            debug!("syncing cache over unified region {:#x}..{:#x}", u.ram_base, u.ram_base + u.ram_size);
            port.sync_cache(u.ram_base, u.ram_size);
        }
        Layout::Split(s) => {
            debug!("syncing cache over text region {:#x}..{:#x}", s.text_base, s.text_base + s.text_size);
            port.sync_cache(s.text_base, s.text_size);
            debug!("syncing cache over data region {:#x}..{:#x}", s.data_base, s.data_base + s.data_size);
            port.sync_cache(s.data_base, s.data_size);
        }
    }
}
