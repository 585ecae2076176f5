//! The error taxonomy returned by every stage of the loader pipeline.

use core::fmt;

/// Every way a load, unload, or symbol lookup can fail.
///
/// Unknown relocation types are deliberately *not* a variant that can be
/// returned from [`crate::loader::Loader::load`] -- they are logged at
/// `warn` and skipped so that a debug-only relocation never fails a load.
/// [`LoaderError::UnsupportedRelocation`] exists purely so internal
/// helpers have a typed value to log before discarding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderError {
    /// A `NULL` handle, a buffer shorter than the ELF header minimum, or
    /// an empty symbol name was passed in.
    InvalidArg,
    /// Bad magic, wrong class/data encoding, unsupported version or type.
    InvalidFormat,
    /// A pipeline stage was invoked out of order (e.g. relocating before
    /// allocating, or unloading twice).
    InvalidState,
    /// A partition/buffer/symbol could not be found.
    NotFound,
    /// Allocation failed, including a sub-region failure in split mode.
    NoMem,
    /// The read callback returned fewer bytes than requested.
    IoShort {
        /// How many bytes were requested.
        requested: usize,
        /// How many bytes were actually delivered.
        actual: usize,
    },
    /// An unrecognized `RELA` type was encountered (logged, then skipped;
    /// never actually surfaced to a caller -- see the type-level doc).
    UnsupportedRelocation {
        /// The raw `r_info` relocation type field.
        reloc_type: u32,
    },
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::InvalidArg => write!(f, "invalid argument"),
            LoaderError::InvalidFormat => write!(f, "invalid ELF image format"),
            LoaderError::InvalidState => write!(f, "loader called out of order"),
            LoaderError::NotFound => write!(f, "not found"),
            LoaderError::NoMem => write!(f, "out of memory"),
            LoaderError::IoShort { requested, actual } => write!(
                f, "short read: requested {requested} bytes, got {actual}",
            ),
            LoaderError::UnsupportedRelocation { reloc_type } => {
                write!(f, "unsupported relocation type {reloc_type:#x}")
            }
        }
    }
}

impl core::error::Error for LoaderError {}

/// Shorthand used throughout the crate.
pub type Result<T> = core::result::Result<T, LoaderError>;
