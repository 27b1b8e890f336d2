use std::sync::Arc;

use log::{error, info, warn};

use crate::audio_queue::AudioConsumer;
use crate::cartridge::Cartridge;
use crate::config::{EmulatorConfig, FaultPolicy};
use crate::cpu::Cpu;
use crate::error::{EmuError, PersistError};
use crate::input::JoypadHandle;
use crate::interrupt::Interrupt;
use crate::mmu::Mmu;
use crate::persist::SaveStore;
use crate::ppu::CYCLES_PER_FRAME;
use crate::scheduler::PauseHandle;
use crate::snapshot::Snapshot;

pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
    config: EmulatorConfig,
    store: Option<Arc<dyn SaveStore>>,
    audio: Option<AudioConsumer>,
    pause: PauseHandle,
    rom_loaded: bool,
    halted: bool,
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new(EmulatorConfig::default())
    }
}

impl GameBoy {
    pub fn new(config: EmulatorConfig) -> Self {
        let mut gb = Self {
            cpu: Cpu::new(),
            mmu: Mmu::new(),
            config,
            store: None,
            audio: None,
            pause: PauseHandle::new(),
            rom_loaded: false,
            halted: false,
        };
        if let Some(rate) = gb.config.sample_rate {
            gb.audio = Some(gb.mmu.apu.enable_output(rate));
        }
        gb.mmu.apply_post_boot_io();
        gb
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Zero memory, install the empty controller and restore post-boot
    /// registers. The loaded ROM is dropped.
    pub fn reset(&mut self) {
        self.mmu.reset();
        self.mmu.apply_post_boot_io();
        self.cpu = Cpu::new();
        self.rom_loaded = false;
        self.halted = false;
    }

    /// Validate `rom` and start it from the post-boot state. A rejected ROM
    /// leaves the machine untouched.
    pub fn load_rom(&mut self, rom: Vec<u8>) -> Result<(), EmuError> {
        let mut cart = Cartridge::from_rom(rom)?;
        if let Some(store) = &self.store {
            cart.attach_store(Arc::clone(store));
        }
        self.reset();
        self.mmu.install_cartridge(cart);
        self.rom_loaded = true;
        Ok(())
    }

    pub fn rom_loaded(&self) -> bool {
        self.rom_loaded
    }

    /// Use `store` for battery RAM from now on. The current cartridge pulls
    /// its backup immediately.
    pub fn attach_store(&mut self, store: Arc<dyn SaveStore>) {
        if self.rom_loaded {
            self.mmu.cart.attach_store(Arc::clone(&store));
        }
        self.store = Some(store);
    }

    pub fn save_ram(&self) -> Result<(), PersistError> {
        self.mmu.cart.save_ram()
    }

    /// Take the receiving end of the audio queue, if audio is enabled.
    pub fn take_audio(&mut self) -> Option<AudioConsumer> {
        self.audio.take()
    }

    /// Turn on audio output at `sample_rate`, replacing any previous queue.
    pub fn enable_audio(&mut self, sample_rate: u32) -> AudioConsumer {
        self.config.sample_rate = Some(sample_rate);
        self.mmu.apu.enable_output(sample_rate)
    }

    pub fn joypad(&self) -> JoypadHandle {
        self.mmu.joypad.handle()
    }

    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    pub fn pause(&self) {
        self.pause.pause();
    }

    pub fn unpause(&self) {
        self.pause.unpause();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn request_interrupt(&mut self, irq: Interrupt) {
        self.mmu.request_interrupt(irq);
    }

    /// Last completed frame, 160x144 shades 0-3.
    pub fn frame(&self) -> &[u8] {
        self.mmu.ppu.frame()
    }

    pub fn frame_count(&self) -> u64 {
        self.mmu.ppu.frames
    }

    /// Execute one CPU iteration and clock the hardware by its cost.
    /// Returns the cycles consumed and whether V-blank began.
    fn step_inner(&mut self) -> Result<(u32, bool), EmuError> {
        let cycles = self.cpu.step(&mut self.mmu)?;
        let vblank = self.mmu.tick(cycles);
        if let Some(fault) = self.mmu.take_fault()
            && self.config.fault_policy == FaultPolicy::Escalate
        {
            return Err(fault.into());
        }
        Ok((cycles, vblank))
    }

    pub fn step(&mut self) -> Result<u32, EmuError> {
        if self.halted {
            return Err(EmuError::Halted);
        }
        let result = self.step_inner().map(|(cycles, _)| cycles);
        self.check_fatal(result)
    }

    /// Run until V-blank or one frame's worth of cycles, whichever first.
    pub fn run_frame(&mut self) -> Result<u32, EmuError> {
        if self.halted {
            return Err(EmuError::Halted);
        }
        if !self.rom_loaded {
            return Err(EmuError::NoRom);
        }
        if self.mmu.joypad.poll_new_presses() {
            self.mmu.request_interrupt(Interrupt::Joypad);
            self.cpu.stopped = false;
        }
        let result = self.run_cycles();
        self.check_fatal(result)
    }

    fn run_cycles(&mut self) -> Result<u32, EmuError> {
        let mut elapsed = 0;
        while elapsed < CYCLES_PER_FRAME {
            let (cycles, vblank) = self.step_inner()?;
            elapsed += cycles;
            if vblank {
                break;
            }
        }
        Ok(elapsed)
    }

    fn check_fatal<T>(&mut self, result: Result<T, EmuError>) -> Result<T, EmuError> {
        if let Err(e) = &result
            && e.is_fatal()
        {
            error!("Execution halted: {e} ({})", self.cpu.debug_state());
            self.halted = true;
        }
        result
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut apu = self.mmu.apu.clone();
        apu.detach_output();
        Snapshot {
            cpu: self.cpu.clone(),
            paused: self.is_paused(),
            memory: self.mmu.memory().to_vec(),
            mbc: self.mmu.cart.state(),
            rom: self.mmu.cart.rom().to_vec(),
            ppu: self.mmu.ppu.clone(),
            timer: self.mmu.timer.clone(),
            apu,
        }
    }

    /// Replace the whole machine state with `snapshot`. The battery store,
    /// audio queue and joypad stay connected.
    pub fn restore(&mut self, snapshot: Snapshot) -> Result<(), EmuError> {
        snapshot.validate()?;
        let Snapshot {
            cpu,
            paused,
            memory,
            mbc,
            rom,
            ppu,
            timer,
            mut apu,
        } = snapshot;

        let rom_loaded = !rom.is_empty();
        let mut cart = Cartridge::restore(rom, mbc);
        cart.reattach_store(self.store.clone().or_else(|| self.mmu.cart.store()));

        self.mmu.install_cartridge(cart);
        self.mmu.restore_memory(&memory);
        self.mmu.ppu = ppu;
        self.mmu.timer = timer;
        let rate = self.mmu.apu.sample_rate();
        apu.set_output(self.mmu.apu.take_output(), rate);
        self.mmu.apu = apu;
        self.cpu = cpu;
        self.pause.set(paused);
        self.rom_loaded = rom_loaded;
        self.halted = false;
        info!("Restored save state for {}", self.mmu.cart.title);
        Ok(())
    }

    pub fn save_state(&self) -> Result<Vec<u8>, EmuError> {
        let bytes = self.snapshot().to_bytes()?;
        info!("Saved state ({} bytes)", bytes.len());
        Ok(bytes)
    }

    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), EmuError> {
        let snapshot = Snapshot::from_bytes(bytes).inspect_err(|e| {
            warn!("Rejected save state: {e}");
        })?;
        self.restore(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_frame_without_rom_is_an_error() {
        let mut gb = GameBoy::default();
        assert!(matches!(gb.run_frame(), Err(EmuError::NoRom)));
        assert!(!gb.is_halted());
    }

    #[test]
    fn fatal_cpu_fault_halts_for_good() {
        let mut gb = GameBoy::default();
        gb.mmu.write(0xC000, 0xDD);
        gb.cpu.pc = 0xC000;
        assert!(matches!(gb.step(), Err(EmuError::Cpu(_))));
        assert!(gb.is_halted());
        assert!(matches!(gb.step(), Err(EmuError::Halted)));
    }

    #[test]
    fn reset_restores_post_boot_state() {
        let mut gb = GameBoy::default();
        gb.cpu.a = 0x55;
        gb.mmu.write(0xC000, 0x12);
        gb.reset();
        assert_eq!(gb.cpu, Cpu::new());
        assert_eq!(gb.mmu.read(0xC000), 0);
        assert_eq!(gb.mmu.read(0xFF40), 0x91);
    }
}
