//! DMG Game Boy emulation core.
//!
//! Platform-agnostic machine logic (CPU/bus/PPU/APU/timer/cartridge). Hosts
//! drive it through the [`gameboy::GameBoy`] facade and the
//! [`scheduler::FrameLoop`] pacer.

/// Audio Processing Unit (APU) emulation and stereo mixing.
pub mod apu;

/// Bounded stereo sample queue between the APU and an audio callback.
pub mod audio_queue;

/// Cartridge header parsing and memory bank controllers.
pub mod cartridge;

/// Emulator-wide settings.
pub mod config;

/// SM83 CPU core.
pub mod cpu;

/// Shade-to-RGB helpers for presentation layers.
pub mod display;

pub mod error;

/// High-level facade that wires the CPU and bus into a single machine.
pub mod gameboy;

/// Joypad register and host-side button mask.
pub mod input;

pub mod interrupt;

/// Memory map and hardware plumbing.
pub mod mmu;

/// Battery RAM and save-state storage backends.
pub mod persist;

/// Pixel Processing Unit (PPU) emulation.
pub mod ppu;

/// Fixed-period frame pacing with pause support.
pub mod scheduler;

/// Serializable machine snapshots.
pub mod snapshot;

/// Divider/timer unit.
pub mod timer;

pub use config::{EmulatorConfig, FaultPolicy};
pub use error::{CartridgeError, CpuError, EmuError, PersistError, SnapshotError};
pub use gameboy::GameBoy;
pub use interrupt::Interrupt;
