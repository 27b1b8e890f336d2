mod common;

use common::{RomBuilder, gameboy_with};
use pocketgb_core::mmu::{Mmu, OAM_SIZE, OAM_START};

#[test]
fn echo_ram_mirrors_every_offset() {
    let mut mmu = Mmu::new();
    for addr in 0xE000..=0xFDFFu16 {
        let val = (addr as u8) ^ 0x5A;
        mmu.write(addr, val);
        assert_eq!(mmu.read(addr - 0x2000), val, "{addr:04X}");
    }
    for addr in 0xC000..=0xDDFFu16 {
        let val = (addr >> 4) as u8;
        mmu.write(addr, val);
        assert_eq!(mmu.read(addr + 0x2000), val, "{addr:04X}");
    }
}

fn mapped_bank(gb: &pocketgb_core::GameBoy) -> u8 {
    gb.mmu.read(0x4000)
}

#[test]
fn bank_zero_selects_bank_one() {
    for cart_type in [0x01, 0x11, 0x19] {
        let mut gb = gameboy_with(RomBuilder::new(cart_type, 8).build());
        gb.mmu.write(0x2000, 0x03);
        assert_eq!(mapped_bank(&gb), 3, "type {cart_type:02X}");
        gb.mmu.write(0x2000, 0x00);
        assert_eq!(mapped_bank(&gb), 1, "type {cart_type:02X}");
    }
}

#[test]
fn repeated_bank_select_is_idempotent() {
    for cart_type in [0x01, 0x11, 0x19] {
        let mut gb = gameboy_with(RomBuilder::new(cart_type, 8).build());
        gb.mmu.write(0x2000, 0x05);
        let once = (mapped_bank(&gb), gb.mmu.cart.rom_bank());
        gb.mmu.write(0x2000, 0x05);
        let twice = (mapped_bank(&gb), gb.mmu.cart.rom_bank());
        assert_eq!(once, twice);
        assert_eq!(once, (5, 5));
    }
}

#[test]
fn bank_number_wraps_to_rom_size() {
    let mut gb = gameboy_with(RomBuilder::new(0x19, 4).build());
    gb.mmu.write(0x2000, 0x06);
    assert_eq!(mapped_bank(&gb), 2);
}

#[test]
fn external_ram_needs_enable() {
    let mut gb = gameboy_with(RomBuilder::new(0x03, 4).ram_code(0x02).build());
    gb.mmu.write(0xA000, 0x42);
    assert_eq!(gb.mmu.read(0xA000), 0xFF);
    gb.mmu.write(0x0000, 0x0A);
    gb.mmu.write(0xA000, 0x42);
    assert_eq!(gb.mmu.read(0xA000), 0x42);
}

#[test]
fn oam_dma_copies_from_rom() {
    let table: Vec<u8> = (0..OAM_SIZE as u8).collect();
    let rom = RomBuilder::new(0x00, 2).code_at(0x2000, &table).build();
    let mut gb = gameboy_with(rom);
    gb.mmu.write(0xFF46, 0x20);
    for i in 0..OAM_SIZE {
        assert_eq!(gb.mmu.read(OAM_START + i), i as u8);
    }
}

#[test]
fn oam_dma_copies_from_work_ram() {
    let mut mmu = Mmu::new();
    for i in 0..OAM_SIZE {
        mmu.write(0xC100 + i, 0xA0 - i as u8);
    }
    mmu.write(0xFF46, 0xC1);
    assert_eq!(mmu.read(OAM_START), 0xA0);
    assert_eq!(mmu.read(OAM_START + OAM_SIZE - 1), 0x01);
}

#[test]
fn div_write_resets_counter() {
    let mut gb = gameboy_with(common::idle_rom());
    assert_ne!(gb.mmu.read(0xFF04), 0);
    gb.mmu.write(0xFF04, 0x77);
    assert_eq!(gb.mmu.read(0xFF04), 0);
    gb.mmu.tick(256);
    assert_eq!(gb.mmu.read(0xFF04), 1);
}

#[test]
fn apu_registers_read_with_mask() {
    let mut gb = gameboy_with(common::idle_rom());
    gb.mmu.write(0xFF11, 0x80);
    assert_eq!(gb.mmu.read(0xFF11), 0xBF);
    assert_eq!(gb.mmu.read(0xFF13), 0xFF);
    assert_eq!(gb.mmu.read(0xFF26) & 0x80, 0x80);
}

#[test]
fn joypad_reads_live_mask() {
    use pocketgb_core::input::button;

    let mut gb = gameboy_with(common::idle_rom());
    let pad = gb.joypad();
    pad.press(button::DOWN | button::START);
    gb.mmu.write(0xFF00, 0x20);
    assert_eq!(gb.mmu.read(0xFF00) & 0x0F, 0x07);
    gb.mmu.write(0xFF00, 0x10);
    assert_eq!(gb.mmu.read(0xFF00) & 0x0F, 0x07);
    pad.release(button::START);
    assert_eq!(gb.mmu.read(0xFF00) & 0x0F, 0x0F);
}
