use serde::{Deserialize, Serialize};

use crate::error::CpuError;
use crate::interrupt::Interrupt;
use crate::mmu::Mmu;

#[cfg(feature = "cpu-trace")]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "cpu-trace"))]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {};
}

pub const FLAG_Z: u8 = 0x80;
pub const FLAG_N: u8 = 0x40;
pub const FLAG_H: u8 = 0x20;
pub const FLAG_C: u8 = 0x10;

const CYCLES_PER_M_CYCLE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
    pub cycles: u64,
    pub ime: bool,
    /// Instructions left until a pending EI sets IME.
    pub ime_pending: u8,
    pub halted: bool,
    pub stopped: bool,
    /// Next opcode fetch does not advance PC.
    halt_bug: bool,
    /// Cost of the iteration in progress. Zero between steps.
    #[serde(skip)]
    step_cycles: u32,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    /// Registers as the DMG boot ROM leaves them.
    pub fn new() -> Self {
        Self {
            a: 0x01,
            f: 0xB0,
            b: 0x00,
            c: 0x13,
            d: 0x00,
            e: 0xD8,
            h: 0x01,
            l: 0x4D,
            sp: 0xFFFE,
            pc: 0x0100,
            cycles: 0,
            ime: false,
            ime_pending: 0,
            halted: false,
            stopped: false,
            halt_bug: false,
            step_cycles: 0,
        }
    }

    #[inline(always)]
    fn tick(&mut self, m_cycles: u32) {
        self.step_cycles += m_cycles * CYCLES_PER_M_CYCLE;
    }

    #[inline(always)]
    fn fetch8(&mut self, mmu: &Mmu) -> u8 {
        let val = mmu.read(self.pc);
        if self.halt_bug {
            self.halt_bug = false;
        } else {
            self.pc = self.pc.wrapping_add(1);
        }
        self.tick(1);
        val
    }

    #[inline(always)]
    fn fetch16(&mut self, mmu: &Mmu) -> u16 {
        let lo = self.fetch8(mmu) as u16;
        let hi = self.fetch8(mmu) as u16;
        (hi << 8) | lo
    }

    #[inline(always)]
    fn read8(&mut self, mmu: &Mmu, addr: u16) -> u8 {
        let val = mmu.read(addr);
        self.tick(1);
        val
    }

    #[inline(always)]
    fn write8(&mut self, mmu: &mut Mmu, addr: u16, val: u8) {
        mmu.write(addr, val);
        self.tick(1);
    }

    /// Formatted CPU state string for debugging.
    pub fn debug_state(&self) -> String {
        format!(
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} PC:{:04X} SP:{:04X} CY:{}",
            self.get_af(),
            self.get_bc(),
            self.get_de(),
            self.get_hl(),
            self.pc,
            self.sp,
            self.cycles
        )
    }

    pub fn get_af(&self) -> u16 {
        ((self.a as u16) << 8) | self.f as u16
    }

    pub fn set_af(&mut self, val: u16) {
        self.a = (val >> 8) as u8;
        self.f = val as u8 & 0xF0;
    }

    pub fn get_bc(&self) -> u16 {
        ((self.b as u16) << 8) | self.c as u16
    }

    pub fn set_bc(&mut self, val: u16) {
        self.b = (val >> 8) as u8;
        self.c = val as u8;
    }

    pub fn get_de(&self) -> u16 {
        ((self.d as u16) << 8) | self.e as u16
    }

    pub fn set_de(&mut self, val: u16) {
        self.d = (val >> 8) as u8;
        self.e = val as u8;
    }

    pub fn get_hl(&self) -> u16 {
        ((self.h as u16) << 8) | self.l as u16
    }

    pub fn set_hl(&mut self, val: u16) {
        self.h = (val >> 8) as u8;
        self.l = val as u8;
    }

    pub fn enable_interrupts(&mut self) {
        self.ime = true;
        self.ime_pending = 0;
    }

    pub fn disable_interrupts(&mut self) {
        self.ime = false;
        self.ime_pending = 0;
    }

    /// EI semantics: IME turns on after the instruction following this one.
    pub fn schedule_interrupt_enable(&mut self) {
        if !self.ime {
            self.ime_pending = 2;
        }
    }

    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn unhalt(&mut self) {
        self.halted = false;
    }

    /// Index 0-3 selects BC, DE, HL, SP.
    fn get_rp(&self, index: u8) -> u16 {
        match index & 3 {
            0 => self.get_bc(),
            1 => self.get_de(),
            2 => self.get_hl(),
            _ => self.sp,
        }
    }

    fn set_rp(&mut self, index: u8, val: u16) {
        match index & 3 {
            0 => self.set_bc(val),
            1 => self.set_de(val),
            2 => self.set_hl(val),
            _ => self.sp = val,
        }
    }

    fn push_stack(&mut self, mmu: &mut Mmu, val: u16) {
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, (val >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, val as u8);
    }

    fn pop_stack(&mut self, mmu: &Mmu) -> u16 {
        let lo = self.read8(mmu, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        let hi = self.read8(mmu, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        (hi << 8) | lo
    }

    /// Index 0-7 selects B, C, D, E, H, L, (HL), A.
    fn read_reg(&mut self, mmu: &Mmu, index: u8) -> u8 {
        match index & 7 {
            0 => self.b,
            1 => self.c,
            2 => self.d,
            3 => self.e,
            4 => self.h,
            5 => self.l,
            6 => self.read8(mmu, self.get_hl()),
            _ => self.a,
        }
    }

    fn write_reg(&mut self, mmu: &mut Mmu, index: u8, val: u8) {
        match index & 7 {
            0 => self.b = val,
            1 => self.c = val,
            2 => self.d = val,
            3 => self.e = val,
            4 => self.h = val,
            5 => self.l = val,
            6 => {
                let addr = self.get_hl();
                self.write8(mmu, addr, val);
            }
            _ => self.a = val,
        }
    }

    /// Condition index 0-3: NZ, Z, NC, C.
    fn condition(&self, index: u8) -> bool {
        match index & 3 {
            0 => self.f & FLAG_Z == 0,
            1 => self.f & FLAG_Z != 0,
            2 => self.f & FLAG_C == 0,
            _ => self.f & FLAG_C != 0,
        }
    }

    #[inline]
    fn zero(val: u8) -> u8 {
        if val == 0 { FLAG_Z } else { 0 }
    }

    fn add8(&mut self, val: u8, with_carry: bool) {
        let carry = (with_carry && self.f & FLAG_C != 0) as u8;
        let a = self.a;
        let wide = a as u16 + val as u16 + carry as u16;
        let res = wide as u8;
        let mut f = Self::zero(res);
        if (a & 0x0F) + (val & 0x0F) + carry > 0x0F {
            f |= FLAG_H;
        }
        if wide > 0xFF {
            f |= FLAG_C;
        }
        self.f = f;
        self.a = res;
    }

    fn sub8(&mut self, val: u8, with_carry: bool) -> u8 {
        let carry = (with_carry && self.f & FLAG_C != 0) as i16;
        let a = self.a;
        let wide = a as i16 - val as i16 - carry;
        let res = wide as u8;
        let mut f = Self::zero(res) | FLAG_N;
        if (a & 0x0F) as i16 - (val & 0x0F) as i16 - carry < 0 {
            f |= FLAG_H;
        }
        if wide < 0 {
            f |= FLAG_C;
        }
        self.f = f;
        res
    }

    /// ADD, ADC, SUB, SBC, AND, XOR, OR, CP selected by bits 3-5 of the opcode.
    fn alu(&mut self, op: u8, val: u8) {
        match op & 7 {
            0 => self.add8(val, false),
            1 => self.add8(val, true),
            2 => self.a = self.sub8(val, false),
            3 => self.a = self.sub8(val, true),
            4 => {
                self.a &= val;
                self.f = Self::zero(self.a) | FLAG_H;
            }
            5 => {
                self.a ^= val;
                self.f = Self::zero(self.a);
            }
            6 => {
                self.a |= val;
                self.f = Self::zero(self.a);
            }
            _ => {
                self.sub8(val, false);
            }
        }
    }

    fn inc8(&mut self, val: u8) -> u8 {
        let res = val.wrapping_add(1);
        let mut f = (self.f & FLAG_C) | Self::zero(res);
        if val & 0x0F == 0x0F {
            f |= FLAG_H;
        }
        self.f = f;
        res
    }

    fn dec8(&mut self, val: u8) -> u8 {
        let res = val.wrapping_sub(1);
        let mut f = (self.f & FLAG_C) | Self::zero(res) | FLAG_N;
        if val & 0x0F == 0 {
            f |= FLAG_H;
        }
        self.f = f;
        res
    }

    fn add_hl(&mut self, val: u16) {
        let hl = self.get_hl();
        let (res, carry) = hl.overflowing_add(val);
        let mut f = self.f & FLAG_Z;
        if (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF {
            f |= FLAG_H;
        }
        if carry {
            f |= FLAG_C;
        }
        self.f = f;
        self.set_hl(res);
    }

    /// SP plus signed displacement. H and C come from the low byte; Z and N
    /// are cleared.
    fn add_sp_signed(&mut self, offset: u8) -> u16 {
        let sp = self.sp;
        let mut f = 0;
        if (sp & 0x000F) + (offset as u16 & 0x000F) > 0x000F {
            f |= FLAG_H;
        }
        if (sp & 0x00FF) + offset as u16 > 0x00FF {
            f |= FLAG_C;
        }
        self.f = f;
        sp.wrapping_add(offset as i8 as i16 as u16)
    }

    fn daa(&mut self) {
        let mut a = self.a;
        let mut carry = self.f & FLAG_C != 0;
        if self.f & FLAG_N == 0 {
            let mut adjust = 0;
            if carry || a > 0x99 {
                adjust |= 0x60;
                carry = true;
            }
            if self.f & FLAG_H != 0 || a & 0x0F > 0x09 {
                adjust |= 0x06;
            }
            a = a.wrapping_add(adjust);
        } else {
            let mut adjust = 0;
            if carry {
                adjust |= 0x60;
            }
            if self.f & FLAG_H != 0 {
                adjust |= 0x06;
            }
            a = a.wrapping_sub(adjust);
        }
        self.a = a;
        self.f = (self.f & FLAG_N) | Self::zero(a) | if carry { FLAG_C } else { 0 };
    }

    /// RLC, RRC, RL, RR, SLA, SRA, SWAP, SRL selected by bits 3-5.
    fn rotate_shift(&mut self, op: u8, val: u8) -> u8 {
        let carry_in = (self.f & FLAG_C != 0) as u8;
        let (res, carry_out) = match op & 7 {
            0 => (val.rotate_left(1), val & 0x80 != 0),
            1 => (val.rotate_right(1), val & 0x01 != 0),
            2 => ((val << 1) | carry_in, val & 0x80 != 0),
            3 => ((val >> 1) | (carry_in << 7), val & 0x01 != 0),
            4 => (val << 1, val & 0x80 != 0),
            5 => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
            6 => (val.rotate_left(4), false),
            _ => (val >> 1, val & 0x01 != 0),
        };
        self.f = Self::zero(res) | if carry_out { FLAG_C } else { 0 };
        res
    }

    fn dispatch_interrupt(&mut self, mmu: &mut Mmu, pending: u8) {
        let Some(irq) = Interrupt::highest(pending) else {
            return;
        };
        self.halted = false;
        self.ime = false;
        self.ime_pending = 0;
        mmu.clear_interrupt(irq);
        self.tick(2);
        let pc = self.pc;
        self.push_stack(mmu, pc);
        self.pc = irq.vector();
        self.tick(1);
        cpu_trace!("IRQ {:?} -> {:04X}", irq, self.pc);
    }

    /// Run one scheduling iteration: an interrupt dispatch, one halted or
    /// stopped idle slot, or one instruction. Returns the cycles it took.
    ///
    /// Waking from HALT with IME clear never moves PC back. The halt bug is
    /// applied when HALT itself executes with an interrupt already pending
    /// (see opcode 0x76): the byte after HALT is then fetched twice. Backing
    /// PC up on the wake instead would execute HALT again.
    ///
    /// STOP is only left through a joypad press, so interrupts stay queued
    /// until then.
    pub fn step(&mut self, mmu: &mut Mmu) -> Result<u32, CpuError> {
        self.step_cycles = 0;
        let pending = mmu.pending_interrupts();

        if self.ime && pending != 0 && !self.stopped {
            self.dispatch_interrupt(mmu, pending);
        } else if self.halted {
            // With IME clear, a pending interrupt only ends the halt.
            if pending != 0 {
                self.halted = false;
            }
            self.tick(1);
        } else if self.stopped {
            self.tick(1);
        } else {
            let pc = self.pc;
            let opcode = self.fetch8(mmu);
            cpu_trace!("{:04X}: {:02X} {}", pc, opcode, self.debug_state());
            self.execute(mmu, opcode, pc)?;
            self.f &= 0xF0;
            if self.ime_pending > 0 {
                self.ime_pending -= 1;
                if self.ime_pending == 0 {
                    self.ime = true;
                }
            }
        }

        let cycles = std::mem::take(&mut self.step_cycles);
        self.cycles += cycles as u64;
        Ok(cycles)
    }

    fn execute(&mut self, mmu: &mut Mmu, opcode: u8, pc: u16) -> Result<(), CpuError> {
        match opcode {
            0x00 => {}
            0x01 | 0x11 | 0x21 | 0x31 => {
                let val = self.fetch16(mmu);
                self.set_rp(opcode >> 4, val);
            }
            0x02 => {
                let addr = self.get_bc();
                self.write8(mmu, addr, self.a);
            }
            0x12 => {
                let addr = self.get_de();
                self.write8(mmu, addr, self.a);
            }
            0x22 => {
                let addr = self.get_hl();
                self.write8(mmu, addr, self.a);
                self.set_hl(addr.wrapping_add(1));
            }
            0x32 => {
                let addr = self.get_hl();
                self.write8(mmu, addr, self.a);
                self.set_hl(addr.wrapping_sub(1));
            }
            0x0A => self.a = self.read8(mmu, self.get_bc()),
            0x1A => self.a = self.read8(mmu, self.get_de()),
            0x2A => {
                let addr = self.get_hl();
                self.a = self.read8(mmu, addr);
                self.set_hl(addr.wrapping_add(1));
            }
            0x3A => {
                let addr = self.get_hl();
                self.a = self.read8(mmu, addr);
                self.set_hl(addr.wrapping_sub(1));
            }
            0x03 | 0x13 | 0x23 | 0x33 => {
                let idx = opcode >> 4;
                let val = self.get_rp(idx).wrapping_add(1);
                self.set_rp(idx, val);
                self.tick(1);
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let idx = opcode >> 4;
                let val = self.get_rp(idx).wrapping_sub(1);
                self.set_rp(idx, val);
                self.tick(1);
            }
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                let r = opcode >> 3;
                let val = self.read_reg(mmu, r);
                let res = self.inc8(val);
                self.write_reg(mmu, r, res);
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                let r = opcode >> 3;
                let val = self.read_reg(mmu, r);
                let res = self.dec8(val);
                self.write_reg(mmu, r, res);
            }
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
                let val = self.fetch8(mmu);
                self.write_reg(mmu, opcode >> 3, val);
            }
            0x07 | 0x0F | 0x17 | 0x1F => {
                // Accumulator rotates always clear Z.
                self.a = self.rotate_shift(opcode >> 3, self.a);
                self.f &= FLAG_C;
            }
            0x08 => {
                let addr = self.fetch16(mmu);
                self.write8(mmu, addr, self.sp as u8);
                self.write8(mmu, addr.wrapping_add(1), (self.sp >> 8) as u8);
            }
            0x09 | 0x19 | 0x29 | 0x39 => {
                let val = self.get_rp(opcode >> 4);
                self.add_hl(val);
                self.tick(1);
            }
            0x10 => {
                self.fetch8(mmu);
                self.stopped = true;
            }
            0x18 => {
                let offset = self.fetch8(mmu) as i8;
                self.pc = self.pc.wrapping_add(offset as u16);
                self.tick(1);
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch8(mmu) as i8;
                if self.condition(opcode >> 3) {
                    self.pc = self.pc.wrapping_add(offset as u16);
                    self.tick(1);
                }
            }
            0x27 => self.daa(),
            0x2F => {
                self.a = !self.a;
                self.f |= FLAG_N | FLAG_H;
            }
            0x37 => self.f = (self.f & FLAG_Z) | FLAG_C,
            0x3F => self.f = (self.f & FLAG_Z) | ((self.f ^ FLAG_C) & FLAG_C),
            0x76 => {
                if !self.ime && mmu.pending_interrupts() != 0 {
                    self.halt_bug = true;
                } else {
                    self.halted = true;
                }
            }
            0x40..=0x7F => {
                let val = self.read_reg(mmu, opcode);
                self.write_reg(mmu, opcode >> 3, val);
            }
            0x80..=0xBF => {
                let val = self.read_reg(mmu, opcode);
                self.alu(opcode >> 3, val);
            }
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let val = self.fetch8(mmu);
                self.alu(opcode >> 3, val);
            }
            0xC0 | 0xC8 | 0xD0 | 0xD8 => {
                self.tick(1);
                if self.condition(opcode >> 3) {
                    self.pc = self.pop_stack(mmu);
                    self.tick(1);
                }
            }
            0xC9 => {
                self.pc = self.pop_stack(mmu);
                self.tick(1);
            }
            0xD9 => {
                self.pc = self.pop_stack(mmu);
                self.tick(1);
                self.enable_interrupts();
            }
            0xC1 | 0xD1 | 0xE1 => {
                let val = self.pop_stack(mmu);
                self.set_rp((opcode >> 4) & 3, val);
            }
            0xF1 => {
                let val = self.pop_stack(mmu);
                self.set_af(val);
            }
            0xC5 | 0xD5 | 0xE5 => {
                self.tick(1);
                let val = self.get_rp((opcode >> 4) & 3);
                self.push_stack(mmu, val);
            }
            0xF5 => {
                self.tick(1);
                let val = self.get_af();
                self.push_stack(mmu, val);
            }
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let addr = self.fetch16(mmu);
                if self.condition(opcode >> 3) {
                    self.pc = addr;
                    self.tick(1);
                }
            }
            0xC3 => {
                self.pc = self.fetch16(mmu);
                self.tick(1);
            }
            0xE9 => self.pc = self.get_hl(),
            0xC4 | 0xCC | 0xD4 | 0xDC => {
                let addr = self.fetch16(mmu);
                if self.condition(opcode >> 3) {
                    self.tick(1);
                    let ret = self.pc;
                    self.push_stack(mmu, ret);
                    self.pc = addr;
                }
            }
            0xCD => {
                let addr = self.fetch16(mmu);
                self.tick(1);
                let ret = self.pc;
                self.push_stack(mmu, ret);
                self.pc = addr;
            }
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                self.tick(1);
                let ret = self.pc;
                self.push_stack(mmu, ret);
                self.pc = (opcode & 0x38) as u16;
            }
            0xCB => {
                let cb = self.fetch8(mmu);
                self.execute_cb(mmu, cb);
            }
            0xE0 => {
                let offset = self.fetch8(mmu);
                self.write8(mmu, 0xFF00 | offset as u16, self.a);
            }
            0xF0 => {
                let offset = self.fetch8(mmu);
                self.a = self.read8(mmu, 0xFF00 | offset as u16);
            }
            0xE2 => self.write8(mmu, 0xFF00 | self.c as u16, self.a),
            0xF2 => self.a = self.read8(mmu, 0xFF00 | self.c as u16),
            0xEA => {
                let addr = self.fetch16(mmu);
                self.write8(mmu, addr, self.a);
            }
            0xFA => {
                let addr = self.fetch16(mmu);
                self.a = self.read8(mmu, addr);
            }
            0xE8 => {
                let offset = self.fetch8(mmu);
                self.sp = self.add_sp_signed(offset);
                self.tick(2);
            }
            0xF8 => {
                let offset = self.fetch8(mmu);
                let val = self.add_sp_signed(offset);
                self.set_hl(val);
                self.tick(1);
            }
            0xF9 => {
                self.sp = self.get_hl();
                self.tick(1);
            }
            0xF3 => self.disable_interrupts(),
            0xFB => self.schedule_interrupt_enable(),
            0xD3 | 0xDB | 0xDD | 0xE3 | 0xE4 | 0xEB | 0xEC | 0xED | 0xF4 | 0xFC | 0xFD => {
                return Err(CpuError::UnknownOpcode { opcode, pc });
            }
        }
        Ok(())
    }

    fn execute_cb(&mut self, mmu: &mut Mmu, cb: u8) {
        let r = cb & 7;
        let bit = (cb >> 3) & 7;
        match cb >> 6 {
            0 => {
                let val = self.read_reg(mmu, r);
                let res = self.rotate_shift(bit, val);
                self.write_reg(mmu, r, res);
            }
            1 => {
                let val = self.read_reg(mmu, r);
                let z = if val & (1 << bit) == 0 { FLAG_Z } else { 0 };
                self.f = (self.f & FLAG_C) | FLAG_H | z;
            }
            2 => {
                let val = self.read_reg(mmu, r);
                self.write_reg(mmu, r, val & !(1 << bit));
            }
            _ => {
                let val = self.read_reg(mmu, r);
                self.write_reg(mmu, r, val | (1 << bit));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::IE_ADDR;

    /// CPU at 0xC000 in work RAM with `program` loaded there.
    fn setup(program: &[u8]) -> (Cpu, Mmu) {
        let mut mmu = Mmu::new();
        for (i, &b) in program.iter().enumerate() {
            mmu.write(0xC000 + i as u16, b);
        }
        let mut cpu = Cpu::new();
        cpu.pc = 0xC000;
        (cpu, mmu)
    }

    #[test]
    fn post_boot_registers() {
        let cpu = Cpu::new();
        assert_eq!(cpu.get_af(), 0x01B0);
        assert_eq!(cpu.get_bc(), 0x0013);
        assert_eq!(cpu.get_de(), 0x00D8);
        assert_eq!(cpu.get_hl(), 0x014D);
        assert_eq!(cpu.sp, 0xFFFE);
        assert_eq!(cpu.pc, 0x0100);
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let (mut cpu, mut mmu) = setup(&[0xD3]);
        assert_eq!(
            cpu.step(&mut mmu),
            Err(CpuError::UnknownOpcode {
                opcode: 0xD3,
                pc: 0xC000
            })
        );
    }

    #[test]
    fn call_and_ret_cycle_counts() {
        // CALL C010; ... at C010: RET
        let mut program = vec![0xCD, 0x10, 0xC0];
        program.resize(0x10, 0x00);
        program.push(0xC9);
        let (mut cpu, mut mmu) = setup(&program);
        assert_eq!(cpu.step(&mut mmu), Ok(24));
        assert_eq!(cpu.pc, 0xC010);
        assert_eq!(cpu.sp, 0xFFFC);
        assert_eq!(cpu.step(&mut mmu), Ok(16));
        assert_eq!(cpu.pc, 0xC003);
    }

    #[test]
    fn conditional_jr_not_taken() {
        // F = Z set, JR NZ,+5
        let (mut cpu, mut mmu) = setup(&[0x20, 0x05]);
        cpu.f = FLAG_Z;
        assert_eq!(cpu.step(&mut mmu), Ok(8));
        assert_eq!(cpu.pc, 0xC002);
    }

    #[test]
    fn push_pop_af_masks_low_nibble() {
        // LD BC,12FF; PUSH BC; POP AF
        let (mut cpu, mut mmu) = setup(&[0x01, 0xFF, 0x12, 0xC5, 0xF1]);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.step(&mut mmu), Ok(16));
        assert_eq!(cpu.step(&mut mmu), Ok(12));
        assert_eq!(cpu.a, 0x12);
        assert_eq!(cpu.f, 0xF0);
    }

    #[test]
    fn ei_takes_effect_after_next_instruction() {
        // EI; NOP; NOP
        let (mut cpu, mut mmu) = setup(&[0xFB, 0x00, 0x00]);
        mmu.write(IE_ADDR, 0x01);
        mmu.request_interrupt(Interrupt::VBlank);
        cpu.step(&mut mmu).unwrap();
        assert!(!cpu.ime);
        cpu.step(&mut mmu).unwrap();
        assert!(cpu.ime);
        assert_eq!(cpu.pc, 0xC002);
        assert_eq!(cpu.step(&mut mmu), Ok(20));
        assert_eq!(cpu.pc, 0x0040);
    }

    #[test]
    fn di_cancels_pending_ei() {
        let (mut cpu, mut mmu) = setup(&[0xFB, 0xF3, 0x00]);
        cpu.step(&mut mmu).unwrap();
        cpu.step(&mut mmu).unwrap();
        cpu.step(&mut mmu).unwrap();
        assert!(!cpu.ime);
    }

    #[test]
    fn halt_bug_repeats_next_byte() {
        // HALT with IME=0 and an interrupt pending; INC A runs twice.
        let (mut cpu, mut mmu) = setup(&[0x76, 0x3C, 0x00]);
        mmu.write(IE_ADDR, 0x04);
        mmu.request_interrupt(Interrupt::Timer);
        cpu.a = 0;
        cpu.step(&mut mmu).unwrap();
        assert!(!cpu.halted);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.pc, 0xC001);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.pc, 0xC002);
        assert_eq!(cpu.a, 2);
    }

    #[test]
    fn halt_without_ime_wakes_on_interrupt() {
        let (mut cpu, mut mmu) = setup(&[0x76, 0x00]);
        mmu.write(IE_ADDR, 0x01);
        cpu.step(&mut mmu).unwrap();
        assert!(cpu.halted);
        assert_eq!(cpu.step(&mut mmu), Ok(4));
        assert!(cpu.halted);
        mmu.request_interrupt(Interrupt::VBlank);
        assert_eq!(cpu.step(&mut mmu), Ok(4));
        assert!(!cpu.halted);
        assert_eq!(cpu.pc, 0xC001);
        // IF stays set since nothing was dispatched.
        assert_eq!(mmu.pending_interrupts(), 0x01);
    }

    #[test]
    fn cb_hl_timings() {
        // LD HL,C100; SET 0,(HL); BIT 0,(HL); SWAP B
        let (mut cpu, mut mmu) = setup(&[0x21, 0x00, 0xC1, 0xCB, 0xC6, 0xCB, 0x46, 0xCB, 0x30]);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.step(&mut mmu), Ok(16));
        assert_eq!(mmu.read(0xC100), 0x01);
        assert_eq!(cpu.step(&mut mmu), Ok(12));
        assert_eq!(cpu.f & FLAG_Z, 0);
        cpu.b = 0x00;
        cpu.f = FLAG_C | FLAG_N | FLAG_H;
        assert_eq!(cpu.step(&mut mmu), Ok(8));
        assert_eq!(cpu.f, FLAG_Z);
    }

    #[test]
    fn swap_clears_carry() {
        let (mut cpu, mut mmu) = setup(&[0xCB, 0x37]);
        cpu.a = 0xF1;
        cpu.f = FLAG_C;
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.a, 0x1F);
        assert_eq!(cpu.f, 0);
    }

    #[test]
    fn cpl_sets_n_and_h() {
        let (mut cpu, mut mmu) = setup(&[0x2F]);
        cpu.a = 0x35;
        cpu.f = 0;
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.a, 0xCA);
        assert_eq!(cpu.f, FLAG_N | FLAG_H);
    }

    #[test]
    fn daa_after_add_and_sub() {
        // ADD A,n ; DAA ; SUB n ; DAA
        let (mut cpu, mut mmu) = setup(&[0xC6, 0x27, 0x27, 0xD6, 0x09, 0x27]);
        cpu.a = 0x15;
        cpu.step(&mut mmu).unwrap();
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.a, 0x42);
        assert_eq!(cpu.f & FLAG_C, 0);
        cpu.step(&mut mmu).unwrap();
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.a, 0x33);
    }

    #[test]
    fn add_sp_flags_from_low_byte() {
        // LD SP,00FF ; LD HL,SP+1
        let (mut cpu, mut mmu) = setup(&[0x31, 0xFF, 0x00, 0xF8, 0x01]);
        cpu.step(&mut mmu).unwrap();
        assert_eq!(cpu.step(&mut mmu), Ok(12));
        assert_eq!(cpu.get_hl(), 0x0100);
        assert_eq!(cpu.f, FLAG_H | FLAG_C);

        // ADD SP,-1 from 0x0000
        let (mut cpu, mut mmu) = setup(&[0xE8, 0xFF]);
        cpu.sp = 0x0000;
        assert_eq!(cpu.step(&mut mmu), Ok(16));
        assert_eq!(cpu.sp, 0xFFFF);
        assert_eq!(cpu.f, 0);
    }

    #[test]
    fn stop_waits_and_skips_padding() {
        let (mut cpu, mut mmu) = setup(&[0x10, 0x00, 0x3C]);
        cpu.step(&mut mmu).unwrap();
        assert!(cpu.stopped);
        assert_eq!(cpu.pc, 0xC002);
        assert_eq!(cpu.step(&mut mmu), Ok(4));
        assert_eq!(cpu.pc, 0xC002);
    }

    #[test]
    fn debug_state_format() {
        let cpu = Cpu::new();
        assert_eq!(
            cpu.debug_state(),
            "AF:01B0 BC:0013 DE:00D8 HL:014D PC:0100 SP:FFFE CY:0"
        );
    }
}
