//! End-to-end scenarios, run against [`dynload_fixtures`] instead of
//! real silicon.
//!
//! A genuine end-to-end test would call through a stub into loaded
//! machine code; there is no way to do that portably here, since the
//! bytes `dynload` copies in are Xtensa or RISC-V instructions that mean
//! nothing to the host CPU running this test binary. These scenarios
//! instead verify everything short of the jump: the right bytes land at
//! the right address, symbols resolve to the right (translated)
//! address, and relocations patch the expected words.
#![cfg(test)]

use dynload::error::LoaderError;
use dynload::loader::Loader;
use dynload::port::AllocCaps;
use dynload::symtab::HostSymbolTable;
use dynload_fixtures::{ElfBuilder, RelaSpec, SymbolSpec, PF_R, PF_W, PF_X};

#[ctor::ctor]
fn init() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    let _ = env_logger::builder().is_test(true).try_init();
}

const STB_GLOBAL: u8 = 1;
const STT_OBJECT: u8 = 1;
const STT_FUNC: u8 = 2;
const ET_DYN: u16 = 3;

struct TestSymbolTable {
    names: Vec<String>,
    slots: Vec<u32>,
}

impl TestSymbolTable {
    fn new(names: &[&str]) -> Self {
        Self { names: names.iter().map(|s| s.to_string()).collect(), slots: vec![0; names.len()] }
    }
}

impl HostSymbolTable for TestSymbolTable {
    fn slot_count(&self) -> usize {
        self.names.len()
    }
    fn slot_name(&self, index: usize) -> &str {
        &self.names[index]
    }
    fn set_slot(&mut self, index: usize, addr: u32) {
        self.slots[index] = addr;
    }
}

/// A single data segment carrying `pattern`, with a data symbol
/// `"greeting"` pointing at its start -- used by the replacement test
/// and the negative symbol lookup test.
fn build_greeting_image(pattern: &[u8]) -> Vec<u8> {
    let mut b = ElfBuilder::new(ET_DYN, 0);
    let data_sec = b.add_loadable(".data", 0x2000, PF_R | PF_W, pattern.to_vec(), pattern.len() as u32);
    b.add_symbol(SymbolSpec {
        name: "greeting".to_string(),
        value: 0x2000,
        size: pattern.len() as u32,
        bind: STB_GLOBAL,
        sym_type: STT_OBJECT,
        shndx: data_sec as u16,
    });
    b.build()
}

#[test]
fn replacement_load_sees_new_data_not_old() {
    let mut loader = Loader::new(dynload_fixtures::UnifiedPort::new(64 * 1024));
    let mut table = TestSymbolTable::new(&["greeting"]);

    let image_a = build_greeting_image(b"Hello");
    loader.load_from_buffer(&image_a, AllocCaps::DEFAULT, &mut table).expect("load A");
    let addr_a = table.slots[0];
    assert_ne!(addr_a, 0);
    let bytes_a = unsafe { core::slice::from_raw_parts(addr_a as *const u8, 5) };
    assert_eq!(bytes_a, b"Hello");

    loader.mark_update_ready();
    assert!(loader.update_available());

    let image_b = build_greeting_image(b"Goodbye!!");
    loader.load_from_buffer(&image_b, AllocCaps::DEFAULT, &mut table).expect("load B");
    assert!(!loader.update_available());
    let addr_b = table.slots[0];
    let bytes_b = unsafe { core::slice::from_raw_parts(addr_b as *const u8, 9) };
    assert_eq!(bytes_b, b"Goodbye!!");
    // The resolved address now points entirely at B's bytes; nothing
    // about the live symbol table still says "Hello".
    assert_ne!(&bytes_b[..5], b"Hello");
}

#[test]
fn invalid_images_are_rejected_without_disturbing_state() {
    let mut loader = Loader::new(dynload_fixtures::UnifiedPort::new(4096));
    let mut table = TestSymbolTable::new(&[]);

    // (a) header truncated
    let truncated = vec![0u8; 16];
    assert_eq!(
        loader.load_from_buffer(&truncated, AllocCaps::DEFAULT, &mut table).unwrap_err(),
        LoaderError::InvalidArg,
    );

    // (b) bad magic
    let mut bad_magic = build_greeting_image(b"x");
    bad_magic[0] = 0x00;
    assert_eq!(
        loader.load_from_buffer(&bad_magic, AllocCaps::DEFAULT, &mut table).unwrap_err(),
        LoaderError::InvalidFormat,
    );

    // (c) 64-bit class byte
    let mut bad_class = build_greeting_image(b"x");
    bad_class[4] = 2;
    assert_eq!(
        loader.load_from_buffer(&bad_class, AllocCaps::DEFAULT, &mut table).unwrap_err(),
        LoaderError::InvalidFormat,
    );

    // A subsequent valid load still succeeds.
    let good = build_greeting_image(b"still works");
    assert!(loader.load_from_buffer(&good, AllocCaps::DEFAULT, &mut table).is_ok());
}

#[test]
fn symbol_lookup_negative() {
    let mut loader = Loader::new(dynload_fixtures::UnifiedPort::new(4096));
    let mut table = TestSymbolTable::new(&["greeting", "nonexistent_xyz", ""]);
    let image = build_greeting_image(b"hi");
    loader.load_from_buffer(&image, AllocCaps::DEFAULT, &mut table).expect("load");

    assert_ne!(table.slots[0], 0, "real symbol should resolve");
    assert_eq!(table.slots[1], 0, "unknown symbol name stays at 0");
    assert_eq!(table.slots[2], 0, "empty name stays at 0");
}

#[test]
fn unload_twice_is_invalid_state() {
    let mut loader = Loader::new(dynload_fixtures::UnifiedPort::new(4096));
    let mut table = TestSymbolTable::new(&[]);
    let image = build_greeting_image(b"hi");
    loader.load_from_buffer(&image, AllocCaps::DEFAULT, &mut table).expect("load");

    loader.unload().expect("first unload");
    assert_eq!(loader.unload().unwrap_err(), LoaderError::InvalidState);
}

#[test]
fn zero_load_segments_is_not_found() {
    let mut loader = Loader::new(dynload_fixtures::UnifiedPort::new(4096));
    let mut table = TestSymbolTable::new(&[]);
    let empty = ElfBuilder::new(ET_DYN, 0).build();
    assert_eq!(
        loader.load_from_buffer(&empty, AllocCaps::DEFAULT, &mut table).unwrap_err(),
        LoaderError::NotFound,
    );
}

#[cfg(feature = "xtensa")]
mod xtensa_scenarios {
    use super::*;
    use dynload::reloc::xtensa::R_XTENSA_RELATIVE;

    /// Xtensa unified bus, a text segment and a data segment, two
    /// exported functions, one `RELATIVE` relocation patching a data
    /// pointer embedded in `.data`.
    #[test]
    fn unified_bus_minimal_reloadable() {
        let mut b = ElfBuilder::new(ET_DYN, 0x1000);
        let text = b.add_loadable(".text", 0x1000, PF_R | PF_X, vec![0u8; 16], 16);
        let data = b.add_loadable(".data", 0x2000, PF_R | PF_W, vec![0u8; 8], 8);
        b.add_symbol(SymbolSpec {
            name: "reloadable_init".to_string(),
            value: 0x1000,
            size: 8,
            bind: STB_GLOBAL,
            sym_type: STT_FUNC,
            shndx: text as u16,
        });
        b.add_symbol(SymbolSpec {
            name: "reloadable_hello".to_string(),
            value: 0x1008,
            size: 8,
            bind: STB_GLOBAL,
            sym_type: STT_FUNC,
            shndx: text as u16,
        });
        // A RELATIVE relocation embedding a self-pointer (e.g. a vtable
        // slot) at data+0, pointing back at data+4. RELA addends for
        // RELATIVE entries are absolute VMAs, not deltas.
        b.add_relocation(RelaSpec {
            symbol_index: 0, target_section: data, offset: 0x2000, reloc_type: R_XTENSA_RELATIVE, addend: 0x2004,
        });
        let image = b.build();

        let mut loader = Loader::new(dynload_fixtures::UnifiedPort::new(64 * 1024));
        let mut table = TestSymbolTable::new(&["reloadable_init", "reloadable_hello"]);
        let stats = loader.load_from_buffer(&image, AllocCaps::DEFAULT, &mut table).expect("load");
        assert_eq!(stats.relocations_applied, 1);
        assert_eq!(stats.symbols_resolved, 2);

        assert_ne!(table.slots[0], 0);
        assert_ne!(table.slots[1], 0);
        assert_eq!(table.slots[1] - table.slots[0], 0x1008 - 0x1000);

        // Read back the patched RELATIVE word: it should equal the
        // load-time address of data+4.
        let data_base = table.slots[0] - 0x1000 + 0x2000; // unified delta is constant
        let patched = unsafe { core::ptr::read_unaligned(data_base as *const u32) };
        assert_eq!(patched, data_base + 4);
    }
}

#[cfg(feature = "riscv")]
mod riscv_scenarios {
    use super::*;
    use dynload::reloc::riscv::R_RISCV_JUMP_SLOT;

    /// RISC-V split I/D bus, a `.plt` stanza whose `AUIPC` gets adjusted
    /// by post-load fixups, and a `JMP_SLOT` entry resolved to a
    /// host-supplied `printf` address.
    #[test]
    fn split_bus_plt_fixup_and_jump_slot() {
        const TEXT_OFFSET: u32 = 0x1000_0000;
        const AUIPC_T0: u32 = 0x17 | (5 << 7); // auipc x5, 0
        let mut plt = vec![0u8; 16];
        plt[0..4].copy_from_slice(&AUIPC_T0.to_le_bytes());

        let mut b = ElfBuilder::new(ET_DYN, 0);
        let text = b.add_loadable(".text", 0x0, PF_R | PF_X, plt.clone(), plt.len() as u32);
        b.add_section_alias(".plt", 0x0, plt.len() as u32);

        let printf_host_addr = 0xdead_beefu32;
        let printf_sym = b.add_symbol(SymbolSpec {
            name: "printf".to_string(),
            value: printf_host_addr,
            size: 0,
            bind: STB_GLOBAL,
            sym_type: STT_FUNC,
            shndx: 0,
        });
        b.add_relocation(RelaSpec {
            symbol_index: printf_sym, target_section: text, offset: 4, reloc_type: R_RISCV_JUMP_SLOT, addend: 0,
        });
        // A marker data symbol at the same offset the JMP_SLOT patches,
        // so the test can read back the patched word through the
        // ordinary resolver path instead of reaching into port internals.
        b.add_symbol(SymbolSpec {
            name: "plt_entry".to_string(),
            value: 4,
            size: 4,
            bind: STB_GLOBAL,
            sym_type: STT_OBJECT,
            shndx: text as u16,
        });
        let image = b.build();

        let mut loader = Loader::new(dynload_fixtures::FixedOffsetPort::new(64 * 1024, 64 * 1024, TEXT_OFFSET));
        let mut table = TestSymbolTable::new(&["plt_entry"]);
        let stats = loader.load_from_buffer(&image, AllocCaps::DEFAULT, &mut table).expect("load");
        assert_eq!(stats.relocations_applied, 1);

        let plt_entry_addr = table.slots[0];
        assert_ne!(plt_entry_addr, 0);
        let patched = unsafe { core::ptr::read_unaligned(plt_entry_addr as *const u32) };
        assert_eq!(patched, printf_host_addr, "JMP_SLOT should write the host's resolved printf address");

        let auipc_word = unsafe { core::ptr::read_unaligned((plt_entry_addr - 4) as *const u32) };
        assert_ne!(auipc_word, AUIPC_T0, "post-load fixups should have adjusted the AUIPC immediate");
    }
}
