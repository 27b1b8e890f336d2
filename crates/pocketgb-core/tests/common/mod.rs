#![allow(dead_code)]

use pocketgb_core::cartridge::header_checksum;
use pocketgb_core::{EmulatorConfig, GameBoy};

pub const BANK_SIZE: usize = 0x4000;

/// Synthetic cartridge image with a valid header.
///
/// Byte 0 of every switchable bank holds the bank number so tests can tell
/// which bank is mapped at 0x4000.
pub struct RomBuilder {
    rom: Vec<u8>,
}

impl RomBuilder {
    pub fn new(cart_type: u8, banks: usize) -> Self {
        let mut rom = vec![0u8; BANK_SIZE * banks.max(2)];
        for bank in 1..banks.max(2) {
            rom[bank * BANK_SIZE] = bank as u8;
        }
        rom[0x134..0x13C].copy_from_slice(b"TESTROM\0");
        rom[0x147] = cart_type;
        Self { rom }
    }

    pub fn ram_code(mut self, code: u8) -> Self {
        self.rom[0x149] = code;
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        let field = &mut self.rom[0x134..0x143];
        field.fill(0);
        let bytes = title.as_bytes();
        let n = bytes.len().min(field.len());
        field[..n].copy_from_slice(&bytes[..n]);
        self
    }

    /// Place `code` at `addr` in the ROM image.
    pub fn code_at(mut self, addr: usize, code: &[u8]) -> Self {
        self.rom[addr..addr + code.len()].copy_from_slice(code);
        self
    }

    /// Entry point program at 0x0100.
    pub fn program(self, code: &[u8]) -> Self {
        self.code_at(0x100, code)
    }

    pub fn build(mut self) -> Vec<u8> {
        self.rom[0x14D] = header_checksum(&self.rom);
        self.rom
    }
}

/// A plain 32 KiB ROM that spins on `JR -2` at the entry point.
pub fn idle_rom() -> Vec<u8> {
    RomBuilder::new(0x00, 2).program(&[0x18, 0xFE]).build()
}

pub fn gameboy_with(rom: Vec<u8>) -> GameBoy {
    let mut gb = GameBoy::new(EmulatorConfig::default());
    gb.load_rom(rom).expect("test ROM should load");
    gb
}
