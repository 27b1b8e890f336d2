//! Memory bus: the only place that decodes addresses.
//!
//! One flat 64 KiB array backs VRAM, WRAM, echo RAM, OAM, I/O and HRAM.
//! ROM and external RAM are served by the cartridge. Hardware blocks that
//! need register access while they run get a [`BusPort`], a narrow view over
//! the same array.

use log::{debug, trace, warn};

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::error::CartridgeError;
use crate::input::Joypad;
use crate::interrupt::{IE_ADDR, IF_ADDR, Interrupt};
use crate::ppu::Ppu;
use crate::timer::Timer;

pub const MEM_SIZE: usize = 0x10000;

pub const OAM_START: u16 = 0xFE00;
pub const OAM_SIZE: u16 = 0xA0;

/// A hardware block advanced in lock-step with CPU time.
pub trait Clocked {
    fn clock(&mut self, cycles: u32, port: &mut BusPort<'_>);
}

/// Register, VRAM and OAM access handed to [`Clocked`] components.
pub struct BusPort<'a> {
    mem: &'a mut [u8],
}

impl<'a> BusPort<'a> {
    pub(crate) fn new(mem: &'a mut [u8]) -> Self {
        debug_assert_eq!(mem.len(), MEM_SIZE);
        Self { mem }
    }

    #[inline]
    pub fn io(&self, addr: u16) -> u8 {
        debug_assert!(addr >= 0xFF00);
        self.mem[addr as usize]
    }

    #[inline]
    pub fn set_io(&mut self, addr: u16, val: u8) {
        debug_assert!(addr >= 0xFF00);
        self.mem[addr as usize] = val;
    }

    #[inline]
    pub fn vram(&self, addr: u16) -> u8 {
        debug_assert!((0x8000..0xA000).contains(&addr));
        self.mem[addr as usize]
    }

    #[inline]
    pub fn oam(&self, offset: usize) -> u8 {
        self.mem[OAM_START as usize + offset]
    }

    pub fn request_interrupt(&mut self, irq: Interrupt) {
        self.mem[IF_ADDR as usize] |= irq.bit();
    }
}

pub struct Mmu {
    mem: Box<[u8]>,
    pub cart: Cartridge,
    pub ppu: Ppu,
    pub apu: Apu,
    pub timer: Timer,
    pub joypad: Joypad,
    fault: Option<CartridgeError>,
    /// Unsupported cartridge writes since the cartridge was installed.
    unsupported_writes: u64,
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

impl Mmu {
    pub fn new() -> Self {
        Self {
            mem: vec![0; MEM_SIZE].into_boxed_slice(),
            cart: Cartridge::empty(),
            ppu: Ppu::new(),
            apu: Apu::new(),
            timer: Timer::new(),
            joypad: Joypad::new(),
            fault: None,
            unsupported_writes: 0,
        }
    }

    /// Zero memory, reinstall the empty controller and fresh hardware blocks.
    /// The joypad handle and audio output survive so hosts stay connected.
    pub fn reset(&mut self) {
        self.mem.fill(0);
        self.cart = Cartridge::empty();
        self.ppu = Ppu::new();
        let rate = self.apu.sample_rate();
        let output = self.apu.take_output();
        self.apu = Apu::new();
        self.apu.set_output(output, rate);
        self.timer = Timer::new();
        self.fault = None;
        self.unsupported_writes = 0;
    }

    /// I/O register values the DMG boot ROM leaves behind.
    pub fn apply_post_boot_io(&mut self) {
        self.timer.div = 0xABCC;
        self.mem[0xFF00] = 0x30;
        self.write(0xFF26, 0x80);
        self.write(0xFF24, 0x77);
        self.write(0xFF25, 0xF3);
        self.write(0xFF05, 0x00);
        self.write(0xFF06, 0x00);
        self.write(0xFF07, 0x00);
        self.mem[0xFF40] = 0x91;
        self.mem[0xFF41] = 0x80;
        self.mem[0xFF42] = 0x00;
        self.mem[0xFF43] = 0x00;
        self.mem[0xFF45] = 0x00;
        self.mem[0xFF47] = 0xFC;
        self.mem[0xFF48] = 0xFF;
        self.mem[0xFF49] = 0xFF;
        self.mem[0xFF4A] = 0x00;
        self.mem[0xFF4B] = 0x00;
        self.mem[IF_ADDR as usize] = 0xE1;
        self.mem[IE_ADDR as usize] = 0x00;
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF => self.cart.read_rom(addr),
            0xA000..=0xBFFF => self.cart.read_ram(addr),
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00 => self.joypad.read(self.mem[0xFF00]),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => self.mem[addr as usize] | 0xE0,
            0xFF10..=0xFF3F => self.apu.read_reg(addr),
            _ => self.mem[addr as usize],
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF => {
                if let Err(e) = self.cart.write_control(addr, val) {
                    self.unsupported_writes += 1;
                    if self.unsupported_writes == 1 {
                        warn!("Cartridge write {val:02X} -> {addr:04X}: {e}; repeats logged at debug");
                    } else {
                        debug!("Cartridge write {val:02X} -> {addr:04X}: {e}");
                    }
                    self.fault = Some(e);
                }
            }
            0xA000..=0xBFFF => self.cart.write_ram(addr, val),
            0xC000..=0xDDFF => {
                self.mem[addr as usize] = val;
                self.mem[addr as usize + 0x2000] = val;
            }
            0xE000..=0xFDFF => {
                self.mem[addr as usize] = val;
                self.mem[addr as usize - 0x2000] = val;
            }
            0xFEA0..=0xFEFF => {}
            0xFF00 => self.mem[0xFF00] = val & 0x30,
            0xFF04..=0xFF07 => {
                if self.timer.write(addr, val) {
                    self.request_interrupt(Interrupt::Timer);
                }
            }
            0xFF10..=0xFF3F => {
                self.apu.write_reg(addr, val);
                if addr == 0xFF26 {
                    for a in 0xFF10..=0xFF26u16 {
                        self.mem[a as usize] = self.apu.raw_reg(a);
                    }
                } else {
                    self.mem[addr as usize] = self.apu.raw_reg(addr);
                }
            }
            0xFF41 => {
                let mode_bits = self.mem[0xFF41] & 0x07;
                self.mem[0xFF41] = 0x80 | (val & 0x78) | mode_bits;
            }
            0xFF44 => {}
            0xFF46 => {
                self.mem[0xFF46] = val;
                self.oam_dma(val);
            }
            _ => self.mem[addr as usize] = val,
        }
    }

    /// Copy 0xA0 bytes from `page << 8` into OAM in one go.
    fn oam_dma(&mut self, page: u8) {
        let src = (page as u16) << 8;
        for i in 0..OAM_SIZE {
            let b = self.read(src.wrapping_add(i));
            self.mem[(OAM_START + i) as usize] = b;
        }
        debug!("OAM DMA from {src:04X}");
    }

    pub fn request_interrupt(&mut self, irq: Interrupt) {
        self.mem[IF_ADDR as usize] |= irq.bit();
    }

    /// Enabled and requested interrupt bits.
    #[inline]
    pub fn pending_interrupts(&self) -> u8 {
        self.mem[IF_ADDR as usize] & self.mem[IE_ADDR as usize] & 0x1F
    }

    pub fn clear_interrupt(&mut self, irq: Interrupt) {
        self.mem[IF_ADDR as usize] &= !irq.bit();
    }

    /// Advance timer, APU and PPU by `cycles`. Returns true when the PPU
    /// entered V-blank during this slice.
    pub fn tick(&mut self, cycles: u32) -> bool {
        let mut port = BusPort::new(&mut self.mem);
        let components: [&mut dyn Clocked; 3] = [&mut self.timer, &mut self.apu, &mut self.ppu];
        for component in components {
            component.clock(cycles, &mut port);
        }
        let vblank = self.ppu.take_vblank();
        if vblank {
            trace!("V-blank");
        }
        vblank
    }

    /// Unsupported-feature signal raised by the last cartridge write, if any.
    pub fn take_fault(&mut self) -> Option<CartridgeError> {
        self.fault.take()
    }

    /// Raw view of the backing array for snapshots.
    pub fn memory(&self) -> &[u8] {
        &self.mem
    }

    pub(crate) fn restore_memory(&mut self, bytes: &[u8]) {
        self.mem.copy_from_slice(bytes);
    }

    pub fn install_cartridge(&mut self, cart: Cartridge) {
        self.cart = cart;
        self.unsupported_writes = 0;
    }

    pub fn unsupported_writes(&self) -> u64 {
        self.unsupported_writes
    }
}
