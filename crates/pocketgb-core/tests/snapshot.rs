mod common;

use std::sync::Arc;

use common::{RomBuilder, gameboy_with};
use pocketgb_core::cartridge::MbcKind;
use pocketgb_core::persist::{MemoryStore, SaveStore};
use pocketgb_core::ppu::MODE_TRANSFER;
use pocketgb_core::snapshot::Snapshot;
use pocketgb_core::{EmuError, GameBoy, SnapshotError};

fn running_mbc1() -> GameBoy {
    let rom = RomBuilder::new(0x03, 8)
        .ram_code(0x02)
        .program(&[
            0x3E, 0x0A, 0xEA, 0x00, 0x00, // enable RAM
            0x3E, 0x03, 0xEA, 0x00, 0x20, // ROM bank 3
            0x3E, 0x77, 0xEA, 0x00, 0xA1, // (A100) = 77
            0x3C, 0xE0, 0x80, // INC A ; LDH (80),A
            0x18, 0xFB, // JR -5
        ])
        .build();
    let mut gb = gameboy_with(rom);
    for _ in 0..3 {
        gb.run_frame().expect("frame");
    }
    gb
}

#[test]
fn restore_undoes_arbitrary_mutation() {
    let mut gb = running_mbc1();
    let snapshot = gb.snapshot();
    let cpu = gb.cpu.clone();
    let memory = gb.mmu.memory().to_vec();
    let ram = gb.mmu.cart.ram().to_vec();
    let bank = gb.mmu.cart.rom_bank();

    gb.run_frame().expect("frame");
    gb.cpu.a = !gb.cpu.a;
    gb.cpu.set_hl(0xDEAD);
    gb.cpu.sp = 0x1234;
    gb.cpu.ime = !gb.cpu.ime;
    gb.mmu.write(0xC000, 0xEE);
    gb.mmu.write(0xFF90, 0x11);
    gb.mmu.write(0x2000, 0x05);
    gb.mmu.write(0xA100, 0x00);

    gb.restore(snapshot).expect("restore");

    assert_eq!(gb.cpu, cpu);
    assert_eq!(gb.mmu.memory(), &memory[..]);
    assert_eq!(gb.mmu.cart.ram(), &ram[..]);
    assert_eq!(gb.mmu.cart.rom_bank(), bank);
    assert_eq!(gb.mmu.read(0x4000), 3);
    assert_eq!(gb.mmu.read(0xA100), 0x77);
}

#[test]
fn encoded_state_resumes_identically() {
    let mut original = running_mbc1();
    let bytes = original.save_state().expect("encode");

    let mut copy = GameBoy::default();
    copy.load_state(&bytes).expect("decode");
    assert!(copy.rom_loaded());
    assert_eq!(copy.mmu.cart.kind(), MbcKind::Mbc1);

    for _ in 0..2 {
        original.run_frame().expect("frame");
        copy.run_frame().expect("frame");
    }
    assert_eq!(copy.cpu, original.cpu);
    assert_eq!(copy.mmu.memory(), original.mmu.memory());
    assert_eq!(copy.frame(), original.frame());
}

#[test]
fn snapshot_carries_pause_flag() {
    let gb = running_mbc1();
    gb.pause();
    let snapshot = gb.snapshot();
    assert!(snapshot.paused);
    assert_eq!(snapshot.mbc_kind(), MbcKind::Mbc1);

    let mut other = GameBoy::default();
    other.restore(snapshot).expect("restore");
    assert!(other.is_paused());
}

#[test]
fn restore_keeps_battery_store_connected() {
    let store = Arc::new(MemoryStore::new());
    let mut gb = GameBoy::default();
    gb.attach_store(store.clone());
    let snapshot = {
        let source = running_mbc1();
        source.snapshot()
    };
    gb.restore(snapshot).expect("restore");
    gb.save_ram().expect("save");
    let saved = store.load("TESTROM").expect("readable").expect("present");
    assert_eq!(saved[0x100], 0x77);
}

#[test]
fn truncated_bytes_are_rejected() {
    let gb = running_mbc1();
    let bytes = gb.save_state().expect("encode");
    let mut other = GameBoy::default();
    let err = other.load_state(&bytes[..bytes.len() / 2]).unwrap_err();
    assert!(matches!(err, EmuError::Snapshot(SnapshotError::Decode(_))));
    assert!(!other.rom_loaded());
}

#[test]
fn wrong_memory_size_is_rejected() {
    let gb = running_mbc1();
    let mut snapshot = gb.snapshot();
    snapshot.memory.truncate(0x8000);
    let bytes = snapshot.to_bytes().expect("encode");
    assert!(matches!(
        Snapshot::from_bytes(&bytes),
        Err(SnapshotError::BadMemorySize(0x8000))
    ));
}

#[test]
fn out_of_range_scanline_is_rejected_without_touching_machine() {
    let gb = running_mbc1();
    let mut snapshot = gb.snapshot();
    snapshot.ppu.ly = 200;
    let bytes = snapshot.to_bytes().expect("encode");

    let mut other = GameBoy::default();
    let err = other.load_state(&bytes).unwrap_err();
    assert!(matches!(
        err,
        EmuError::Snapshot(SnapshotError::OutOfRange(_))
    ));
    assert!(!other.rom_loaded());

    let mut snapshot = gb.snapshot();
    snapshot.ppu.mode = MODE_TRANSFER;
    snapshot.ppu.ly = 150;
    assert!(matches!(
        other.restore(snapshot),
        Err(EmuError::Snapshot(SnapshotError::OutOfRange(_)))
    ));
}
