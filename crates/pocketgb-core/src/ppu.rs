use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::interrupt::Interrupt;
use crate::mmu::{BusPort, Clocked};

#[cfg(feature = "ppu-trace")]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "ppu-trace"))]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {};
}

// Screen resolution used by the Game Boy PPU
pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

// Timing constants per LCD mode in T-cycles
const MODE0_CYCLES: u32 = 204; // HBlank
const MODE1_CYCLES: u32 = 456; // One line during VBlank
const MODE2_CYCLES: u32 = 80; // OAM scan
const MODE3_CYCLES: u32 = 172; // Pixel transfer

pub const CYCLES_PER_FRAME: u32 = 70_224;

const LAST_LINE: u8 = 153;

const MAX_SPRITES_PER_LINE: usize = 10;
const TOTAL_SPRITES: usize = 40;

// LCD modes used in the `mode` field
pub const MODE_HBLANK: u8 = 0;
pub const MODE_VBLANK: u8 = 1;
pub const MODE_OAM: u8 = 2;
pub const MODE_TRANSFER: u8 = 3;

const LCDC: u16 = 0xFF40;
const STAT: u16 = 0xFF41;
const SCY: u16 = 0xFF42;
const SCX: u16 = 0xFF43;
const LY: u16 = 0xFF44;
const LYC: u16 = 0xFF45;
const BGP: u16 = 0xFF47;
const OBP0: u16 = 0xFF48;
const OBP1: u16 = 0xFF49;
const WY: u16 = 0xFF4A;
const WX: u16 = 0xFF4B;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Sprite {
    y: i16,
    x: i16,
    tile: u8,
    flags: u8,
    index: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ppu {
    pub mode: u8,
    mode_clock: u32,
    pub ly: u8,
    lcd_on: bool,
    /// Scanline currently being composed, 2-bit shades.
    back: Vec<u8>,
    /// Last finished frame.
    front: Vec<u8>,
    /// Background color index per pixel of the current frame.
    bg_index: Vec<u8>,
    line_sprites: Vec<Sprite>,
    vblank: bool,
    pub frames: u64,
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

fn tile_data_addr(lcdc: u8, tile: u8) -> u16 {
    if lcdc & 0x10 != 0 {
        0x8000 + tile as u16 * 16
    } else {
        (0x9000i32 + (tile as i8 as i32) * 16) as u16
    }
}

#[inline]
fn tile_pixel(lo: u8, hi: u8, bit: u8) -> u8 {
    (((hi >> bit) & 1) << 1) | ((lo >> bit) & 1)
}

#[inline]
fn shade(palette: u8, color: u8) -> u8 {
    (palette >> (color * 2)) & 0x03
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            mode: MODE_OAM,
            mode_clock: 0,
            ly: 0,
            lcd_on: false,
            back: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
            front: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
            bg_index: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
            line_sprites: Vec::with_capacity(MAX_SPRITES_PER_LINE),
            vblank: false,
            frames: 0,
        }
    }

    /// Most recent complete frame, row-major shades 0-3.
    pub fn frame(&self) -> &[u8] {
        &self.front
    }

    /// Check a decoded state before it is used to index the frame buffers.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let pixels = SCREEN_WIDTH * SCREEN_HEIGHT;
        if self.back.len() != pixels || self.front.len() != pixels || self.bg_index.len() != pixels
        {
            return Err(SnapshotError::OutOfRange("PPU frame buffer"));
        }
        if self.mode > MODE_TRANSFER {
            return Err(SnapshotError::OutOfRange("PPU mode"));
        }
        let visible = (self.ly as usize) < SCREEN_HEIGHT;
        if self.ly > LAST_LINE || (self.mode != MODE_VBLANK && !visible) {
            return Err(SnapshotError::OutOfRange("PPU LY"));
        }
        if self.line_sprites.len() > MAX_SPRITES_PER_LINE {
            return Err(SnapshotError::OutOfRange("PPU sprite list"));
        }
        // The list only has to match LY while it is about to be drawn.
        if self.mode != MODE_TRANSFER {
            return Ok(());
        }
        let ly = self.ly as i16;
        for sprite in &self.line_sprites {
            if ly < sprite.y || ly >= sprite.y + 16 || !(-7..SCREEN_WIDTH as i16).contains(&sprite.x) {
                return Err(SnapshotError::OutOfRange("PPU sprite"));
            }
        }
        Ok(())
    }

    pub(crate) fn take_vblank(&mut self) -> bool {
        std::mem::take(&mut self.vblank)
    }

    fn set_mode(&mut self, mode: u8, port: &mut BusPort<'_>) {
        self.mode = mode;
        let stat = port.io(STAT);
        port.set_io(STAT, 0x80 | (stat & 0x7C) | mode);
        let source = match mode {
            MODE_HBLANK => 0x08,
            MODE_VBLANK => 0x10,
            MODE_OAM => 0x20,
            _ => 0,
        };
        if stat & source != 0 {
            port.request_interrupt(Interrupt::LcdStat);
        }
        ppu_trace!("LY={} mode {}", self.ly, mode);
    }

    fn update_ly(&mut self, port: &mut BusPort<'_>) {
        port.set_io(LY, self.ly);
        let stat = port.io(STAT);
        if self.ly == port.io(LYC) {
            port.set_io(STAT, stat | 0x04);
            if stat & 0x40 != 0 {
                port.request_interrupt(Interrupt::LcdStat);
            }
        } else {
            port.set_io(STAT, stat & !0x04);
        }
    }

    fn scan_oam(&mut self, port: &BusPort<'_>) {
        self.line_sprites.clear();
        let height: i16 = if port.io(LCDC) & 0x04 != 0 { 16 } else { 8 };
        let ly = self.ly as i16;
        for i in 0..TOTAL_SPRITES {
            let base = i * 4;
            let y = port.oam(base) as i16 - 16;
            let x = port.oam(base + 1) as i16 - 8;
            if ly < y || ly >= y + height || x <= -8 || x >= SCREEN_WIDTH as i16 {
                continue;
            }
            self.line_sprites.push(Sprite {
                y,
                x,
                tile: port.oam(base + 2),
                flags: port.oam(base + 3),
                index: i as u8,
            });
            if self.line_sprites.len() == MAX_SPRITES_PER_LINE {
                break;
            }
        }
        // Stable: equal X keeps OAM order.
        self.line_sprites.sort_by_key(|s| s.x);
    }

    fn render_scanline(&mut self, port: &BusPort<'_>) {
        let lcdc = port.io(LCDC);
        let row = self.ly as usize * SCREEN_WIDTH;
        let bgp = port.io(BGP);

        if lcdc & 0x01 != 0 {
            let map = if lcdc & 0x08 != 0 { 0x9C00 } else { 0x9800 };
            let y = self.ly.wrapping_add(port.io(SCY));
            let scx = port.io(SCX);
            let line = (y % 8) as u16;
            for x in 0..SCREEN_WIDTH {
                let px = (x as u8).wrapping_add(scx);
                let tile = port.vram(map + (y as u16 / 8) * 32 + px as u16 / 8);
                let addr = tile_data_addr(lcdc, tile) + line * 2;
                let color = tile_pixel(port.vram(addr), port.vram(addr + 1), 7 - px % 8);
                self.bg_index[row + x] = color;
                self.back[row + x] = shade(bgp, color);
            }
        } else {
            self.bg_index[row..row + SCREEN_WIDTH].fill(0);
            self.back[row..row + SCREEN_WIDTH].fill(0);
        }

        if lcdc & 0x02 != 0 {
            self.render_sprites(port, lcdc, row);
        }
    }

    fn render_sprites(&mut self, port: &BusPort<'_>, lcdc: u8, row: usize) {
        let tall = lcdc & 0x04 != 0;
        let height: i16 = if tall { 16 } else { 8 };
        let mut claimed = [false; SCREEN_WIDTH];
        let obp = [port.io(OBP0), port.io(OBP1)];

        let sprites = std::mem::take(&mut self.line_sprites);
        for sprite in &sprites {
            let mut line = self.ly as i16 - sprite.y;
            // LCDC may have switched to 8px sprites since the OAM scan.
            if !(0..height).contains(&line) {
                continue;
            }
            if sprite.flags & 0x40 != 0 {
                line = height - 1 - line;
            }
            let tile = if tall { sprite.tile & 0xFE } else { sprite.tile };
            let addr = 0x8000 + tile as u16 * 16 + line as u16 * 2;
            let lo = port.vram(addr);
            let hi = port.vram(addr + 1);
            let palette = obp[((sprite.flags >> 4) & 1) as usize];

            for px in 0..8i16 {
                let sx = sprite.x + px;
                if !(0..SCREEN_WIDTH as i16).contains(&sx) {
                    continue;
                }
                let sx = sx as usize;
                if claimed[sx] {
                    continue;
                }
                let bit = (if sprite.flags & 0x20 != 0 { px } else { 7 - px }) as u8;
                let color = tile_pixel(lo, hi, bit);
                if color == 0 {
                    continue;
                }
                claimed[sx] = true;
                if sprite.flags & 0x80 != 0 && self.bg_index[row + sx] != 0 {
                    continue;
                }
                self.back[row + sx] = shade(palette, color);
            }
        }
        self.line_sprites = sprites;
    }

    /// Draw the window layer over the whole finished frame.
    fn compose_window(&mut self, port: &BusPort<'_>) {
        let lcdc = port.io(LCDC);
        if lcdc & 0x20 == 0 {
            return;
        }
        let wy = port.io(WY) as usize;
        let wx = port.io(WX) as i16 - 7;
        if wy >= SCREEN_HEIGHT || wx >= SCREEN_WIDTH as i16 {
            return;
        }
        let map = if lcdc & 0x40 != 0 { 0x9C00 } else { 0x9800 };
        let bgp = port.io(BGP);
        for y in wy..SCREEN_HEIGHT {
            let wline = (y - wy) as u16;
            for x in wx.max(0) as usize..SCREEN_WIDTH {
                let wcol = (x as i16 - wx) as u16;
                let tile = port.vram(map + (wline / 8) * 32 + wcol / 8);
                let addr = tile_data_addr(lcdc, tile) + (wline % 8) * 2;
                let color = tile_pixel(port.vram(addr), port.vram(addr + 1), 7 - (wcol % 8) as u8);
                self.back[y * SCREEN_WIDTH + x] = shade(bgp, color);
            }
        }
    }

    fn enter_vblank(&mut self, port: &mut BusPort<'_>) {
        self.set_mode(MODE_VBLANK, port);
        port.request_interrupt(Interrupt::VBlank);
        self.compose_window(port);
        self.front.copy_from_slice(&self.back);
        self.frames += 1;
        self.vblank = true;
    }

    pub fn step(&mut self, cycles: u32, port: &mut BusPort<'_>) {
        let lcdc = port.io(LCDC);
        if lcdc & 0x80 == 0 {
            if self.lcd_on {
                self.lcd_on = false;
                self.ly = 0;
                self.mode_clock = 0;
                port.set_io(LY, 0);
                self.set_mode(MODE_HBLANK, port);
            }
            return;
        }
        if !self.lcd_on {
            self.lcd_on = true;
            self.ly = 0;
            self.mode_clock = 0;
            self.set_mode(MODE_OAM, port);
            self.update_ly(port);
        }

        self.mode_clock += cycles;
        loop {
            match self.mode {
                MODE_OAM if self.mode_clock >= MODE2_CYCLES => {
                    self.mode_clock -= MODE2_CYCLES;
                    self.scan_oam(port);
                    self.set_mode(MODE_TRANSFER, port);
                }
                MODE_TRANSFER if self.mode_clock >= MODE3_CYCLES => {
                    self.mode_clock -= MODE3_CYCLES;
                    self.render_scanline(port);
                    self.set_mode(MODE_HBLANK, port);
                }
                MODE_HBLANK if self.mode_clock >= MODE0_CYCLES => {
                    self.mode_clock -= MODE0_CYCLES;
                    self.ly += 1;
                    if self.ly as usize == SCREEN_HEIGHT {
                        self.enter_vblank(port);
                    } else {
                        self.set_mode(MODE_OAM, port);
                    }
                    self.update_ly(port);
                }
                MODE_VBLANK if self.mode_clock >= MODE1_CYCLES => {
                    self.mode_clock -= MODE1_CYCLES;
                    if self.ly == LAST_LINE {
                        self.ly = 0;
                        self.set_mode(MODE_OAM, port);
                    } else {
                        self.ly += 1;
                    }
                    self.update_ly(port);
                }
                _ => break,
            }
        }
    }
}

impl Clocked for Ppu {
    fn clock(&mut self, cycles: u32, port: &mut BusPort<'_>) {
        self.step(cycles, port);
    }
}
