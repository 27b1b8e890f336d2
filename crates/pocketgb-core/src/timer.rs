use serde::{Deserialize, Serialize};

use crate::interrupt::Interrupt;
use crate::mmu::{BusPort, Clocked};

/// DIV/TIMA/TMA/TAC block at 0xFF04-0xFF07.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    /// 16-bit internal divider counter. DIV register is the upper 8 bits.
    pub div: u16,
    pub tima: u8,
    pub tma: u8,
    pub tac: u8,
    last_signal: bool,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => (self.div >> 8) as u8,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => self.tac | 0xF8,
            _ => 0xFF,
        }
    }

    /// Returns true when the write caused TIMA to overflow.
    pub fn write(&mut self, addr: u16, val: u8) -> bool {
        match addr {
            0xFF04 => {
                self.div = 0;
                self.sync_signal()
            }
            0xFF05 => {
                self.tima = val;
                false
            }
            0xFF06 => {
                self.tma = val;
                false
            }
            0xFF07 => {
                self.tac = val & 0x07;
                self.sync_signal()
            }
            _ => false,
        }
    }

    /// Divider bit whose falling edge clocks TIMA for the current TAC.
    fn tap(tac: u8) -> u16 {
        match tac & 0x03 {
            0 => 1 << 9,
            1 => 1 << 3,
            2 => 1 << 5,
            _ => 1 << 7,
        }
    }

    fn signal(&self) -> bool {
        self.tac & 0x04 != 0 && self.div & Self::tap(self.tac) != 0
    }

    /// Re-evaluate the edge detector after DIV or TAC changed outside of
    /// normal counting.
    fn sync_signal(&mut self) -> bool {
        let new = self.signal();
        let fell = self.last_signal && !new;
        self.last_signal = new;
        fell && self.increment()
    }

    fn increment(&mut self) -> bool {
        let (tima, overflow) = self.tima.overflowing_add(1);
        self.tima = if overflow { self.tma } else { tima };
        overflow
    }

    /// Advance by `cycles` clocks and return how many times TIMA overflowed.
    pub fn step(&mut self, cycles: u32) -> u32 {
        let mut overflows = 0;
        for _ in 0..cycles {
            self.div = self.div.wrapping_add(1);
            let new = self.signal();
            if self.last_signal && !new && self.increment() {
                overflows += 1;
            }
            self.last_signal = new;
        }
        overflows
    }
}

impl Clocked for Timer {
    fn clock(&mut self, cycles: u32, port: &mut BusPort<'_>) {
        if self.step(cycles) > 0 {
            port.request_interrupt(Interrupt::Timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn div_is_upper_byte_of_counter() {
        let mut t = Timer::new();
        t.step(256 * 3 + 10);
        assert_eq!(t.read(0xFF04), 3);
    }

    #[test]
    fn tima_counts_at_selected_rate() {
        let mut t = Timer::new();
        t.write(0xFF07, 0x05); // enabled, 262144 Hz = every 16 clocks
        t.step(16 * 10);
        assert_eq!(t.tima, 10);
    }

    #[test]
    fn overflow_reloads_from_tma() {
        let mut t = Timer::new();
        t.write(0xFF06, 0xAB);
        t.write(0xFF05, 0xFF);
        t.write(0xFF07, 0x05);
        assert_eq!(t.step(16), 1);
        assert_eq!(t.tima, 0xAB);
    }

    #[test]
    fn disabled_timer_does_not_count() {
        let mut t = Timer::new();
        t.write(0xFF07, 0x01);
        t.step(1024);
        assert_eq!(t.tima, 0);
        assert_eq!(t.read(0xFF07), 0xF9);
    }

    #[test]
    fn div_write_resets_counter() {
        let mut t = Timer::new();
        t.step(0x1234);
        t.write(0xFF04, 0x99);
        assert_eq!(t.div, 0);
        assert_eq!(t.read(0xFF04), 0);
    }

    #[test]
    fn div_reset_on_high_tap_bumps_tima() {
        let mut t = Timer::new();
        t.write(0xFF07, 0x05);
        t.step(8); // tap bit 3 now set
        let before = t.tima;
        t.write(0xFF04, 0);
        assert_eq!(t.tima, before + 1);
    }
}
