//! Dynamic loader for position-independent, reloadable ELF modules on
//! resource-constrained microcontrollers.
//!
//! Consumes a 32-bit little-endian `ET_EXEC`/`ET_DYN` image compiled
//! with `RELA` relocations against a host-pinned symbol map, copies it
//! into RAM through a chip-specific [`port`], applies its relocations,
//! and exposes its symbols to the host through a [`symtab`] table of
//! stub slots. See [`loader::Loader`] for the entry point.
//!
//! Exactly one of the `xtensa` / `riscv` Cargo features must be enabled;
//! the relocator and post-load fixups are compiled for one architecture
//! at a time rather than dispatching on chip identity at runtime.

#![no_std]

#[cfg(not(any(feature = "xtensa", feature = "riscv")))]
compile_error!("dynload requires exactly one of the `xtensa` or `riscv` features");
#[cfg(all(feature = "xtensa", feature = "riscv"))]
compile_error!("dynload requires exactly one of the `xtensa` or `riscv` features, not both");

extern crate alloc;

pub mod cache;
pub mod context;
pub mod elf;
pub mod error;
pub mod fixup;
pub mod layout;
pub mod loader;
pub mod port;
pub mod read;
pub mod reloc;
pub mod symtab;
pub mod writer;

pub use error::{LoaderError, Result};
pub use loader::{LoadStats, Loader};
pub use port::{AllocCaps, ChipPort, MemCtx};
pub use read::{ImageSource, SliceSource};
pub use symtab::HostSymbolTable;
