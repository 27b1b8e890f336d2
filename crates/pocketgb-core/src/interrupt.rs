/// Interrupt Flag register (IF).
pub const IF_ADDR: u16 = 0xFF0F;
/// Interrupt Enable register (IE).
pub const IE_ADDR: u16 = 0xFFFF;

/// Interrupt sources in priority order (gbdev.io/pandocs/Interrupts.html).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    VBlank,
    LcdStat,
    Timer,
    Serial,
    Joypad,
}

impl Interrupt {
    pub const ALL: [Interrupt; 5] = [
        Interrupt::VBlank,
        Interrupt::LcdStat,
        Interrupt::Timer,
        Interrupt::Serial,
        Interrupt::Joypad,
    ];

    #[inline]
    pub const fn index(self) -> u8 {
        match self {
            Interrupt::VBlank => 0,
            Interrupt::LcdStat => 1,
            Interrupt::Timer => 2,
            Interrupt::Serial => 3,
            Interrupt::Joypad => 4,
        }
    }

    #[inline]
    pub const fn bit(self) -> u8 {
        1 << self.index()
    }

    /// Fixed dispatch address `0x40 + 8 * index`.
    #[inline]
    pub const fn vector(self) -> u16 {
        0x40 + 8 * self.index() as u16
    }

    /// Highest-priority interrupt set in `pending`, if any.
    pub fn highest(pending: u8) -> Option<Interrupt> {
        Self::ALL
            .into_iter()
            .find(|irq| pending & irq.bit() != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_follow_priority_order() {
        assert_eq!(Interrupt::VBlank.vector(), 0x40);
        assert_eq!(Interrupt::LcdStat.vector(), 0x48);
        assert_eq!(Interrupt::Timer.vector(), 0x50);
        assert_eq!(Interrupt::Serial.vector(), 0x58);
        assert_eq!(Interrupt::Joypad.vector(), 0x60);
    }

    #[test]
    fn lowest_bit_wins() {
        assert_eq!(Interrupt::highest(0x14), Some(Interrupt::Timer));
        assert_eq!(Interrupt::highest(0x1F), Some(Interrupt::VBlank));
        assert_eq!(Interrupt::highest(0x00), None);
    }
}
