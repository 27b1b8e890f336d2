//! Save states.
//!
//! A [`Snapshot`] is a deep copy of everything needed to resume a machine:
//! CPU registers and flags, the flat memory array, the cartridge ROM with its
//! controller state and RAM, and the PPU, timer and APU internals. Encoded
//! with bincode so any [`crate::persist::SaveStore`] can hold one.

use serde::{Deserialize, Serialize};

use crate::apu::Apu;
use crate::cartridge::{MbcKind, MbcSnapshot};
use crate::cpu::Cpu;
use crate::error::SnapshotError;
use crate::mmu::MEM_SIZE;
use crate::ppu::Ppu;
use crate::timer::Timer;

#[derive(Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub cpu: Cpu,
    pub paused: bool,
    pub memory: Vec<u8>,
    pub mbc: MbcSnapshot,
    pub rom: Vec<u8>,
    pub ppu: Ppu,
    pub timer: Timer,
    pub apu: Apu,
}

impl Snapshot {
    pub fn mbc_kind(&self) -> MbcKind {
        self.mbc.state.kind()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(SnapshotError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: Snapshot = bincode::deserialize(bytes).map_err(SnapshotError::Decode)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Reject states whose contents would index past fixed tables once
    /// running.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.memory.len() != MEM_SIZE {
            return Err(SnapshotError::BadMemorySize(self.memory.len()));
        }
        self.ppu.validate()?;
        self.apu.validate()
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("cpu", &self.cpu)
            .field("paused", &self.paused)
            .field("mbc", &self.mbc.state)
            .field("rom_len", &self.rom.len())
            .finish_non_exhaustive()
    }
}
