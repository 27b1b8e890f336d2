//! Joypad state shared between the host and the 0xFF00 register.
//!
//! The host owns a [`JoypadHandle`] and flips bits from any thread; the bus
//! samples the mask live on every P1 read.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

pub mod button {
    pub const RIGHT: u8 = 0x01;
    pub const LEFT: u8 = 0x02;
    pub const UP: u8 = 0x04;
    pub const DOWN: u8 = 0x08;
    pub const A: u8 = 0x10;
    pub const B: u8 = 0x20;
    pub const SELECT: u8 = 0x40;
    pub const START: u8 = 0x80;
}

/// Cloneable writer for the pressed-button mask (1 = pressed).
#[derive(Clone, Debug, Default)]
pub struct JoypadHandle(Arc<AtomicU8>);

impl JoypadHandle {
    pub fn set(&self, mask: u8) {
        self.0.store(mask, Ordering::Relaxed);
    }

    pub fn press(&self, buttons: u8) {
        self.0.fetch_or(buttons, Ordering::Relaxed);
    }

    pub fn release(&self, buttons: u8) {
        self.0.fetch_and(!buttons, Ordering::Relaxed);
    }

    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Joypad {
    handle: JoypadHandle,
    seen: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> JoypadHandle {
        self.handle.clone()
    }

    /// P1 value for the selector bits last written by software.
    /// A low select bit picks a group; pressed lines read as 0.
    pub fn read(&self, select: u8) -> u8 {
        let mask = self.handle.get();
        let mut lines = 0x0F;
        if select & 0x10 == 0 {
            lines &= !(mask & 0x0F);
        }
        if select & 0x20 == 0 {
            lines &= !(mask >> 4);
        }
        0xC0 | (select & 0x30) | (lines & 0x0F)
    }

    /// True if any button went from released to pressed since the last poll.
    pub fn poll_new_presses(&mut self) -> bool {
        let now = self.handle.get();
        let pressed = now & !self.seen;
        self.seen = now;
        pressed != 0
    }
}
