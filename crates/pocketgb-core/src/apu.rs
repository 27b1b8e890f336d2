use log::debug;
use serde::{Deserialize, Serialize};

use crate::audio_queue::{AudioConsumer, AudioProducer, audio_queue};
use crate::error::SnapshotError;
use crate::mmu::{BusPort, Clocked};

const CPU_CLOCK_HZ: u32 = 4_194_304;
// 512 Hz frame sequencer tick
const FRAME_SEQUENCER_PERIOD: u32 = 8192;
const VOLUME_FACTOR: i16 = 32;
pub const AUDIO_LATENCY_MS: u32 = 40;

// Duty table for pulse channels (CH1, CH2). Index is the NRx1 duty selector:
// 0 -> 00000001 (12.5%)
// 1 -> 10000001 (25%)
// 2 -> 10000111 (50%)
// 3 -> 01111110 (75%)
const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 1, 1, 1],
    [0, 1, 1, 1, 1, 1, 1, 0],
];

const NOISE_DIVISORS: [u32; 8] = [8, 16, 32, 48, 64, 80, 96, 112];

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
struct Envelope {
    initial: u8,
    period: u8,
    add: bool,
    volume: u8,
    timer: u8,
}

impl Envelope {
    /// Period 0 freezes the volume.
    fn clock(&mut self) {
        if self.period == 0 {
            return;
        }
        self.timer = self.timer.saturating_sub(1);
        if self.timer == 0 {
            self.timer = self.period;
            if self.add && self.volume < 15 {
                self.volume += 1;
            } else if !self.add && self.volume > 0 {
                self.volume -= 1;
            }
        }
    }

    fn reset(&mut self, val: u8) {
        self.initial = val >> 4;
        self.volume = self.initial;
        self.period = val & 0x07;
        self.add = val & 0x08 != 0;
        self.timer = self.period;
    }
}

// Channel 1 frequency sweep.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Sweep {
    period: u8,
    negate: bool,
    shift: u8,
    timer: u8,
    shadow: u16,
    enabled: bool,
}

impl Sweep {
    fn calculate(&self) -> u16 {
        let delta = self.shadow >> self.shift;
        if self.negate {
            self.shadow.wrapping_sub(delta)
        } else {
            self.shadow.wrapping_add(delta)
        }
    }

    fn set_params(&mut self, val: u8) {
        self.period = (val >> 4) & 0x07;
        self.negate = val & 0x08 != 0;
        self.shift = val & 0x07;
    }

    fn reload(&mut self, freq: u16) {
        self.shadow = freq;
        self.timer = if self.period == 0 { 8 } else { self.period };
        self.enabled = self.period != 0 || self.shift != 0;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SquareChannel {
    enabled: bool,
    dac_enabled: bool,
    duty: u8,
    duty_pos: u8,
    length: u16,
    length_enabled: bool,
    frequency: u16,
    timer: i32,
    envelope: Envelope,
    sweep: Option<Sweep>,
}

impl SquareChannel {
    fn new(with_sweep: bool) -> Self {
        Self {
            enabled: false,
            dac_enabled: false,
            duty: 0,
            duty_pos: 0,
            length: 0,
            length_enabled: false,
            frequency: 0,
            timer: 0,
            envelope: Envelope::default(),
            sweep: with_sweep.then(Sweep::default),
        }
    }

    fn period(&self) -> i32 {
        (2048 - self.frequency as i32) * 4
    }

    fn step(&mut self, cycles: u32) {
        if !self.enabled {
            return;
        }
        self.timer -= cycles as i32;
        while self.timer <= 0 {
            self.timer += self.period();
            self.duty_pos = (self.duty_pos + 1) & 7;
        }
    }

    fn output(&self) -> u8 {
        if self.enabled && self.dac_enabled && DUTY_TABLE[self.duty as usize][self.duty_pos as usize] != 0
        {
            self.envelope.volume
        } else {
            0
        }
    }

    fn trigger(&mut self, nrx2: u8) {
        self.enabled = self.dac_enabled;
        if self.length == 0 {
            self.length = 64;
        }
        self.timer = self.period();
        self.envelope.reset(nrx2);
        if let Some(sweep) = self.sweep.as_mut() {
            sweep.reload(self.frequency);
            if sweep.shift != 0 && sweep.calculate() > 2047 {
                self.enabled = false;
            }
        }
    }

    fn clock_length(&mut self) {
        if self.length_enabled && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    /// Returns the new frequency when the sweep rewrote it.
    fn clock_sweep(&mut self) -> Option<u16> {
        let sweep = self.sweep.as_mut()?;
        if sweep.timer > 0 {
            sweep.timer -= 1;
        }
        if sweep.timer != 0 {
            return None;
        }
        sweep.timer = if sweep.period == 0 { 8 } else { sweep.period };
        // A shift of 0 never recalculates.
        if !sweep.enabled || sweep.period == 0 || sweep.shift == 0 {
            return None;
        }
        let new = sweep.calculate();
        if new > 2047 {
            self.enabled = false;
            return None;
        }
        sweep.shadow = new;
        self.frequency = new;
        Some(new)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct WaveChannel {
    enabled: bool,
    dac_enabled: bool,
    length: u16,
    length_enabled: bool,
    frequency: u16,
    timer: i32,
    position: u8,
    volume_code: u8,
}

impl WaveChannel {
    fn period(&self) -> i32 {
        (2048 - self.frequency as i32) * 2
    }

    fn step(&mut self, cycles: u32) {
        if !self.enabled {
            return;
        }
        self.timer -= cycles as i32;
        while self.timer <= 0 {
            self.timer += self.period();
            self.position = (self.position + 1) & 31;
        }
    }

    fn output(&self, wave_ram: &[u8; 0x10]) -> u8 {
        if !self.enabled || !self.dac_enabled {
            return 0;
        }
        let byte = wave_ram[(self.position / 2) as usize];
        let sample = if self.position & 1 == 0 {
            byte >> 4
        } else {
            byte & 0x0F
        };
        match self.volume_code {
            0 => 0,
            1 => sample,
            2 => sample >> 1,
            _ => sample >> 2,
        }
    }

    fn trigger(&mut self) {
        self.enabled = self.dac_enabled;
        if self.length == 0 {
            self.length = 256;
        }
        self.timer = self.period();
        self.position = 0;
    }

    fn clock_length(&mut self) {
        if self.length_enabled && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NoiseChannel {
    enabled: bool,
    dac_enabled: bool,
    length: u16,
    length_enabled: bool,
    envelope: Envelope,
    lfsr: u16,
    width7: bool,
    clock_shift: u8,
    divisor: u8,
    timer: i32,
}

impl Default for NoiseChannel {
    fn default() -> Self {
        Self {
            enabled: false,
            dac_enabled: false,
            length: 0,
            length_enabled: false,
            envelope: Envelope::default(),
            lfsr: 0x7FFF,
            width7: false,
            clock_shift: 0,
            divisor: 0,
            timer: 0,
        }
    }
}

impl NoiseChannel {
    fn period(&self) -> i32 {
        (NOISE_DIVISORS[self.divisor as usize] << self.clock_shift) as i32
    }

    fn step(&mut self, cycles: u32) {
        if !self.enabled {
            return;
        }
        self.timer -= cycles as i32;
        while self.timer <= 0 {
            self.timer += self.period();
            let bit = (self.lfsr & 1) ^ ((self.lfsr >> 1) & 1);
            self.lfsr = (self.lfsr >> 1) | (bit << 14);
            if self.width7 {
                self.lfsr = (self.lfsr & !0x40) | (bit << 6);
            }
        }
    }

    fn output(&self) -> u8 {
        if self.enabled && self.dac_enabled && self.lfsr & 1 == 0 {
            self.envelope.volume
        } else {
            0
        }
    }

    fn trigger(&mut self, nr42: u8) {
        self.enabled = self.dac_enabled;
        if self.length == 0 {
            self.length = 64;
        }
        self.timer = self.period();
        self.lfsr = 0x7FFF;
        self.envelope.reset(nr42);
    }

    fn clock_length(&mut self) {
        if self.length_enabled && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct FrameSequencer {
    step: u8,
    counter: u32,
}

impl FrameSequencer {
    fn advance(&mut self) -> u8 {
        let s = self.step;
        self.step = (self.step + 1) & 7;
        s
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Apu {
    ch1: SquareChannel,
    ch2: SquareChannel,
    ch3: WaveChannel,
    ch4: NoiseChannel,
    wave_ram: [u8; 0x10],
    /// Raw register bytes for 0xFF10-0xFF2F as last written.
    regs: [u8; 0x20],
    powered: bool,
    sequencer: FrameSequencer,
    sample_rate: u32,
    sample_acc: u64,
    hp_coef: f32,
    hp_prev_input: [f32; 2],
    hp_prev_output: [f32; 2],
    #[serde(skip)]
    output: Option<AudioProducer>,
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

impl Apu {
    pub fn new() -> Self {
        let sample_rate = 44_100;
        Self {
            ch1: SquareChannel::new(true),
            ch2: SquareChannel::new(false),
            ch3: WaveChannel::default(),
            ch4: NoiseChannel::default(),
            wave_ram: [0; 0x10],
            regs: [0; 0x20],
            powered: false,
            sequencer: FrameSequencer::default(),
            sample_rate,
            sample_acc: 0,
            hp_coef: Self::calc_hp_coef(sample_rate),
            hp_prev_input: [0.0; 2],
            hp_prev_output: [0.0; 2],
            output: None,
        }
    }

    fn calc_hp_coef(rate: u32) -> f32 {
        0.999_958_f32.powf(CPU_CLOCK_HZ as f32 / rate as f32)
    }

    /// Start producing stereo frames at `sample_rate` and return the
    /// receiving end. Frames are dropped while nobody drains the queue.
    pub fn enable_output(&mut self, sample_rate: u32) -> AudioConsumer {
        let sample_rate = sample_rate.max(1);
        let capacity = (sample_rate * AUDIO_LATENCY_MS / 1000).max(64) as usize * 2;
        let (producer, consumer) = audio_queue(capacity);
        self.sample_rate = sample_rate;
        self.sample_acc = 0;
        self.hp_coef = Self::calc_hp_coef(sample_rate);
        self.output = Some(producer);
        debug!("Audio output at {sample_rate} Hz, {capacity} frames buffered");
        consumer
    }

    /// Check a decoded state before its fields index the duty, wave and
    /// divisor tables.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        for (name, ch) in [("channel 1", &self.ch1), ("channel 2", &self.ch2)] {
            if ch.duty > 3 || ch.duty_pos > 7 || ch.frequency > 2047 || ch.envelope.volume > 15 {
                return Err(SnapshotError::OutOfRange(name));
            }
            if let Some(sweep) = &ch.sweep
                && (sweep.shift > 7 || sweep.shadow > 2047)
            {
                return Err(SnapshotError::OutOfRange(name));
            }
        }
        if self.ch3.position > 31 || self.ch3.frequency > 2047 || self.ch3.volume_code > 3 {
            return Err(SnapshotError::OutOfRange("channel 3"));
        }
        let ch4 = &self.ch4;
        if ch4.divisor as usize >= NOISE_DIVISORS.len()
            || ch4.clock_shift > 15
            || ch4.envelope.volume > 15
        {
            return Err(SnapshotError::OutOfRange("channel 4"));
        }
        if self.sequencer.step > 7 {
            return Err(SnapshotError::OutOfRange("frame sequencer"));
        }
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub(crate) fn take_output(&mut self) -> Option<AudioProducer> {
        self.output.take()
    }

    /// Hand an existing queue to this APU. The queue's consumer drains at
    /// `sample_rate`, so generation is retuned to match.
    pub(crate) fn set_output(&mut self, output: Option<AudioProducer>, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
        self.sample_acc = 0;
        self.hp_coef = Self::calc_hp_coef(self.sample_rate);
        self.output = output;
    }

    pub(crate) fn detach_output(&mut self) {
        self.output = None;
    }

    fn read_mask(addr: u16) -> u8 {
        match addr {
            0xFF10 => 0x80,
            0xFF11 | 0xFF16 => 0x3F,
            0xFF12 | 0xFF17 | 0xFF21 | 0xFF22 | 0xFF24 | 0xFF25 => 0x00,
            0xFF13 | 0xFF18 | 0xFF1B | 0xFF1D | 0xFF20 => 0xFF,
            0xFF14 | 0xFF19 | 0xFF1E | 0xFF23 => 0xBF,
            0xFF1A => 0x7F,
            0xFF1C => 0x9F,
            0xFF26 => 0x70,
            0xFF30..=0xFF3F => 0x00,
            _ => 0xFF,
        }
    }

    fn status(&self) -> u8 {
        let mut val = if self.powered { 0x80 } else { 0x00 };
        if self.ch1.enabled {
            val |= 0x01;
        }
        if self.ch2.enabled {
            val |= 0x02;
        }
        if self.ch3.enabled {
            val |= 0x04;
        }
        if self.ch4.enabled {
            val |= 0x08;
        }
        val
    }

    /// Register value as stored, without the unreadable-bit mask.
    pub fn raw_reg(&self, addr: u16) -> u8 {
        match addr {
            0xFF26 => self.status(),
            0xFF30..=0xFF3F => self.wave_ram[(addr - 0xFF30) as usize],
            0xFF10..=0xFF2F => self.regs[(addr - 0xFF10) as usize],
            _ => 0xFF,
        }
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        self.raw_reg(addr) | Self::read_mask(addr)
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        if (0xFF30..=0xFF3F).contains(&addr) {
            self.wave_ram[(addr - 0xFF30) as usize] = val;
            return;
        }
        if addr == 0xFF26 {
            let on = val & 0x80 != 0;
            if self.powered && !on {
                self.power_off();
            } else if !self.powered && on {
                self.power_on();
            }
            return;
        }
        if !self.powered || !(0xFF10..=0xFF2F).contains(&addr) {
            return;
        }
        self.regs[(addr - 0xFF10) as usize] = val;

        match addr {
            0xFF10 => {
                if let Some(s) = self.ch1.sweep.as_mut() {
                    s.set_params(val);
                }
            }
            0xFF11 => {
                self.ch1.duty = val >> 6;
                self.ch1.length = 64 - (val & 0x3F) as u16;
            }
            0xFF12 => {
                self.ch1.dac_enabled = val & 0xF8 != 0;
                if !self.ch1.dac_enabled {
                    self.ch1.enabled = false;
                }
            }
            0xFF13 => {
                self.ch1.frequency = (self.ch1.frequency & 0x0700) | val as u16;
            }
            0xFF14 => {
                self.ch1.frequency = (self.ch1.frequency & 0x00FF) | (((val & 0x07) as u16) << 8);
                self.ch1.length_enabled = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    let nr12 = self.regs[0x02];
                    self.ch1.trigger(nr12);
                }
            }
            0xFF16 => {
                self.ch2.duty = val >> 6;
                self.ch2.length = 64 - (val & 0x3F) as u16;
            }
            0xFF17 => {
                self.ch2.dac_enabled = val & 0xF8 != 0;
                if !self.ch2.dac_enabled {
                    self.ch2.enabled = false;
                }
            }
            0xFF18 => {
                self.ch2.frequency = (self.ch2.frequency & 0x0700) | val as u16;
            }
            0xFF19 => {
                self.ch2.frequency = (self.ch2.frequency & 0x00FF) | (((val & 0x07) as u16) << 8);
                self.ch2.length_enabled = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    let nr22 = self.regs[0x07];
                    self.ch2.trigger(nr22);
                }
            }
            0xFF1A => {
                self.ch3.dac_enabled = val & 0x80 != 0;
                if !self.ch3.dac_enabled {
                    self.ch3.enabled = false;
                }
            }
            0xFF1B => {
                self.ch3.length = 256 - val as u16;
            }
            0xFF1C => {
                self.ch3.volume_code = (val >> 5) & 0x03;
            }
            0xFF1D => {
                self.ch3.frequency = (self.ch3.frequency & 0x0700) | val as u16;
            }
            0xFF1E => {
                self.ch3.frequency = (self.ch3.frequency & 0x00FF) | (((val & 0x07) as u16) << 8);
                self.ch3.length_enabled = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.ch3.trigger();
                }
            }
            0xFF20 => {
                self.ch4.length = 64 - (val & 0x3F) as u16;
            }
            0xFF21 => {
                self.ch4.dac_enabled = val & 0xF8 != 0;
                if !self.ch4.dac_enabled {
                    self.ch4.enabled = false;
                }
            }
            0xFF22 => {
                self.ch4.clock_shift = val >> 4;
                self.ch4.width7 = val & 0x08 != 0;
                self.ch4.divisor = val & 0x07;
            }
            0xFF23 => {
                self.ch4.length_enabled = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    let nr42 = self.regs[0x11];
                    self.ch4.trigger(nr42);
                }
            }
            _ => {}
        }
    }

    /// Silence everything and clear registers. Wave RAM survives.
    fn power_off(&mut self) {
        self.ch1 = SquareChannel::new(true);
        self.ch2 = SquareChannel::new(false);
        self.ch3 = WaveChannel::default();
        self.ch4 = NoiseChannel::default();
        self.regs.fill(0);
        self.powered = false;
        self.sequencer = FrameSequencer::default();
        self.hp_prev_input = [0.0; 2];
        self.hp_prev_output = [0.0; 2];
    }

    fn power_on(&mut self) {
        self.ch1 = SquareChannel::new(true);
        self.ch2 = SquareChannel::new(false);
        self.ch3 = WaveChannel::default();
        self.ch4 = NoiseChannel::default();
        self.sequencer = FrameSequencer::default();
        self.powered = true;
    }

    fn clock_frame_sequencer(&mut self, step: u8) {
        if matches!(step, 0 | 4) {
            self.ch1.clock_length();
            self.ch2.clock_length();
            self.ch3.clock_length();
            self.ch4.clock_length();
        }
        if matches!(step, 2 | 6)
            && let Some(freq) = self.ch1.clock_sweep()
        {
            self.regs[0x03] = freq as u8;
            self.regs[0x04] = (self.regs[0x04] & 0xF8) | ((freq >> 8) as u8 & 0x07);
        }
        if step == 7 {
            self.ch1.envelope.clock();
            self.ch2.envelope.clock();
            self.ch4.envelope.clock();
        }
    }

    pub fn step(&mut self, cycles: u32) {
        if !self.powered {
            self.emit_samples(cycles);
            return;
        }

        self.sequencer.counter += cycles;
        while self.sequencer.counter >= FRAME_SEQUENCER_PERIOD {
            self.sequencer.counter -= FRAME_SEQUENCER_PERIOD;
            let step = self.sequencer.advance();
            self.clock_frame_sequencer(step);
        }

        self.ch1.step(cycles);
        self.ch2.step(cycles);
        self.ch3.step(cycles);
        self.ch4.step(cycles);
        self.emit_samples(cycles);
    }

    fn emit_samples(&mut self, cycles: u32) {
        if self.output.is_none() {
            return;
        }
        self.sample_acc += cycles as u64 * self.sample_rate as u64;
        while self.sample_acc >= CPU_CLOCK_HZ as u64 {
            self.sample_acc -= CPU_CLOCK_HZ as u64;
            let (left, right) = self.mix_output();
            if let Some(out) = &self.output {
                out.push_stereo(left, right);
            }
        }
    }

    fn mix_output(&mut self) -> (i16, i16) {
        let dacs = [
            self.ch1.dac_enabled,
            self.ch2.dac_enabled,
            self.ch3.dac_enabled,
            self.ch4.dac_enabled,
        ];
        if !self.powered || !dacs.iter().any(|&d| d) {
            self.hp_prev_input = [0.0; 2];
            self.hp_prev_output = [0.0; 2];
            return (0, 0);
        }

        let outputs = [
            self.ch1.output(),
            self.ch2.output(),
            self.ch3.output(&self.wave_ram),
            self.ch4.output(),
        ];
        let nr51 = self.regs[0x15];
        let mut left = 0i16;
        let mut right = 0i16;
        for (i, (&out, &dac)) in outputs.iter().zip(dacs.iter()).enumerate() {
            if !dac {
                continue;
            }
            let analog = out as i16 * 2 - 15;
            if nr51 & (0x10 << i) != 0 {
                left += analog;
            }
            if nr51 & (0x01 << i) != 0 {
                right += analog;
            }
        }

        let nr50 = self.regs[0x14];
        let left_vol = ((nr50 >> 4) & 0x07) as i16 + 1;
        let right_vol = (nr50 & 0x07) as i16 + 1;
        self.dc_block(
            left * left_vol * VOLUME_FACTOR,
            right * right_vol * VOLUME_FACTOR,
        )
    }

    fn dc_block(&mut self, left: i16, right: i16) -> (i16, i16) {
        let r = self.hp_coef;
        let mut out = [0i16; 2];
        for (i, input) in [left as f32, right as f32].into_iter().enumerate() {
            let filtered = input - self.hp_prev_input[i] + r * self.hp_prev_output[i];
            self.hp_prev_input[i] = input;
            self.hp_prev_output[i] = filtered;
            out[i] = filtered.round() as i16;
        }
        (out[0], out[1])
    }

    pub fn powered(&self) -> bool {
        self.powered
    }

    pub fn sequencer_step(&self) -> u8 {
        self.sequencer.step
    }

    pub fn channel_enabled(&self, ch: u8) -> bool {
        match ch {
            1 => self.ch1.enabled,
            2 => self.ch2.enabled,
            3 => self.ch3.enabled,
            4 => self.ch4.enabled,
            _ => false,
        }
    }

    pub fn ch1_frequency(&self) -> u16 {
        self.ch1.frequency
    }

    pub fn ch1_volume(&self) -> u8 {
        self.ch1.envelope.volume
    }

    pub fn ch1_length(&self) -> u16 {
        self.ch1.length
    }

    pub fn ch1_sweep_shadow(&self) -> u16 {
        self.ch1.sweep.as_ref().map_or(0, |s| s.shadow)
    }

    pub fn ch2_volume(&self) -> u8 {
        self.ch2.envelope.volume
    }

    pub fn ch3_output(&self) -> u8 {
        self.ch3.output(&self.wave_ram)
    }

    pub fn ch4_lfsr(&self) -> u16 {
        self.ch4.lfsr
    }
}

impl Clocked for Apu {
    fn clock(&mut self, cycles: u32, _port: &mut BusPort<'_>) {
        self.step(cycles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn powered() -> Apu {
        let mut apu = Apu::new();
        apu.write_reg(0xFF26, 0x80);
        apu
    }

    #[test]
    fn validate_rejects_table_indices_out_of_range() {
        assert!(powered().validate().is_ok());

        let mut apu = powered();
        apu.ch1.duty = 4;
        assert!(matches!(apu.validate(), Err(SnapshotError::OutOfRange("channel 1"))));

        let mut apu = powered();
        apu.ch4.divisor = 8;
        assert!(matches!(apu.validate(), Err(SnapshotError::OutOfRange("channel 4"))));

        let mut apu = powered();
        apu.ch3.position = 32;
        assert!(apu.validate().is_err());

        let mut apu = powered();
        apu.ch2.frequency = 2048;
        assert!(apu.validate().is_err());
    }

    #[test]
    fn bad_duty_state_is_rejected_on_load() {
        let mut gb = crate::gameboy::GameBoy::default();
        let mut snapshot = gb.snapshot();
        snapshot.apu.ch2.duty = 9;
        let bytes = snapshot.to_bytes().unwrap();
        assert!(gb.load_state(&bytes).is_err());
    }

    #[test]
    fn dc_filter_converges_to_zero() {
        let mut apu = Apu::new();
        let mut last = (i16::MAX, i16::MAX);
        for _ in 0..200_000 {
            last = apu.dc_block(1000, -1000);
        }
        assert!(last.0.abs() < 10 && last.1.abs() < 10);
    }

    #[test]
    fn read_mask_forces_unreadable_bits() {
        let mut apu = powered();
        apu.write_reg(0xFF11, 0x80);
        assert_eq!(apu.read_reg(0xFF11), 0xBF);
        assert_eq!(apu.read_reg(0xFF13), 0xFF);
        assert_eq!(apu.read_reg(0xFF15), 0xFF);
        assert_eq!(apu.read_reg(0xFF26), 0xF0);
    }

    #[test]
    fn dac_off_disables_channel() {
        let mut apu = powered();
        apu.write_reg(0xFF12, 0xF0);
        apu.write_reg(0xFF14, 0x80);
        assert!(apu.channel_enabled(1));
        apu.write_reg(0xFF12, 0x00);
        assert!(!apu.channel_enabled(1));
    }

    #[test]
    fn trigger_with_dac_off_stays_silent() {
        let mut apu = powered();
        apu.write_reg(0xFF21, 0x07);
        apu.write_reg(0xFF23, 0x80);
        assert!(!apu.channel_enabled(4));
    }

    #[test]
    fn length_counter_expires_channel() {
        let mut apu = powered();
        apu.write_reg(0xFF17, 0xF0);
        apu.write_reg(0xFF16, 0x3E); // length 2
        apu.write_reg(0xFF19, 0xC0);
        assert!(apu.channel_enabled(2));
        // Steps 0 and 4 clock length.
        apu.step(FRAME_SEQUENCER_PERIOD);
        assert!(apu.channel_enabled(2));
        apu.step(FRAME_SEQUENCER_PERIOD * 4);
        assert!(!apu.channel_enabled(2));
    }

    #[test]
    fn envelope_decreases_on_step_seven() {
        let mut apu = powered();
        apu.write_reg(0xFF17, 0xA1); // volume 10, decrease, period 1
        apu.write_reg(0xFF19, 0x80);
        apu.step(FRAME_SEQUENCER_PERIOD * 7);
        assert_eq!(apu.ch2_volume(), 10);
        apu.step(FRAME_SEQUENCER_PERIOD);
        assert_eq!(apu.ch2_volume(), 9);
    }

    #[test]
    fn envelope_period_zero_holds_volume() {
        let mut apu = powered();
        apu.write_reg(0xFF17, 0xA0);
        apu.write_reg(0xFF19, 0x80);
        apu.step(FRAME_SEQUENCER_PERIOD * 32);
        assert_eq!(apu.ch2_volume(), 10);
    }

    #[test]
    fn sweep_overflow_disables_channel() {
        let mut apu = powered();
        apu.write_reg(0xFF10, 0x11); // period 1, add, shift 1
        apu.write_reg(0xFF12, 0xF0);
        apu.write_reg(0xFF13, 0x00);
        apu.write_reg(0xFF14, 0x85); // freq 0x500
        assert!(apu.channel_enabled(1));
        apu.step(FRAME_SEQUENCER_PERIOD * 3); // steps 0,1,2
        assert_eq!(apu.ch1_frequency(), 0x780);
        apu.step(FRAME_SEQUENCER_PERIOD * 4); // through step 6
        assert!(!apu.channel_enabled(1));
    }

    #[test]
    fn power_off_clears_registers_but_keeps_wave_ram() {
        let mut apu = powered();
        apu.write_reg(0xFF30, 0x12);
        apu.write_reg(0xFF24, 0x77);
        apu.write_reg(0xFF12, 0xF0);
        apu.write_reg(0xFF14, 0x80);
        apu.write_reg(0xFF26, 0x00);
        assert_eq!(apu.raw_reg(0xFF24), 0);
        assert_eq!(apu.read_reg(0xFF26), 0x70);
        assert_eq!(apu.read_reg(0xFF30), 0x12);
        apu.write_reg(0xFF24, 0x55);
        assert_eq!(apu.raw_reg(0xFF24), 0);
    }

    #[test]
    fn wave_volume_codes_shift_sample() {
        let mut apu = powered();
        apu.write_reg(0xFF30, 0xF0);
        apu.write_reg(0xFF1A, 0x80);
        apu.write_reg(0xFF1C, 0x20); // full
        apu.write_reg(0xFF1E, 0x80);
        assert_eq!(apu.ch3_output(), 0x0F);
        apu.write_reg(0xFF1C, 0x40);
        assert_eq!(apu.ch3_output(), 0x07);
        apu.write_reg(0xFF1C, 0x60);
        assert_eq!(apu.ch3_output(), 0x03);
        apu.write_reg(0xFF1C, 0x00);
        assert_eq!(apu.ch3_output(), 0);
    }

    #[test]
    fn noise_lfsr_resets_on_trigger_and_shifts() {
        let mut apu = powered();
        apu.write_reg(0xFF21, 0xF0);
        apu.write_reg(0xFF22, 0x00);
        apu.write_reg(0xFF23, 0x80);
        assert_eq!(apu.ch4_lfsr(), 0x7FFF);
        apu.step(8);
        assert_eq!(apu.ch4_lfsr(), 0x3FFF);
    }

    #[test]
    fn output_queue_receives_frames() {
        let mut apu = powered();
        let rx = apu.enable_output(48_000);
        apu.write_reg(0xFF25, 0xFF);
        apu.write_reg(0xFF24, 0x77);
        apu.write_reg(0xFF12, 0xF0);
        apu.write_reg(0xFF14, 0x87);
        apu.step(CPU_CLOCK_HZ / 16);
        assert_eq!(rx.len(), 3000);
    }
}
