use std::io;

use thiserror::Error;

/// Fatal CPU faults. Execution cannot continue once one of these is raised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CpuError {
    #[error("unknown opcode {opcode:02X} at PC={pc:04X}")]
    UnknownOpcode { opcode: u8, pc: u16 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CartridgeError {
    #[error("header should be at least 336 bytes, was {len} bytes")]
    HeaderTooShort { len: usize },

    #[error("header checksum mismatch: header says {expected:02X}, computed {computed:02X}")]
    ChecksumMismatch { expected: u8, computed: u8 },

    #[error("unsupported cartridge type {0:02X}")]
    UnsupportedType(u8),

    /// A cartridge feature the mapper does not implement. Non-fatal unless the
    /// fault policy escalates it.
    #[error("unsupported cartridge feature: {0}")]
    Unsupported(&'static str),
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("persistence I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("battery RAM size mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("battery RAM backup is corrupt: {0}")]
    Corrupt(String),

    #[error("persistence backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode snapshot: {0}")]
    Decode(#[source] bincode::Error),

    #[error("snapshot memory image is {0} bytes, expected 65536")]
    BadMemorySize(usize),

    #[error("snapshot {0} is out of range")]
    OutOfRange(&'static str),
}

/// Umbrella error returned by the [`crate::gameboy::GameBoy`] facade.
#[derive(Error, Debug)]
pub enum EmuError {
    #[error(transparent)]
    Cpu(#[from] CpuError),

    #[error(transparent)]
    Cartridge(#[from] CartridgeError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("no ROM loaded")]
    NoRom,

    #[error("execution halted after a fatal fault")]
    Halted,
}

impl EmuError {
    /// True for faults that stop the run loop for good.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EmuError::Cpu(_) | EmuError::Cartridge(_) | EmuError::Halted
        )
    }
}
