use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CartridgeError, PersistError};
use crate::persist::{SaveStore, sanitize_key};

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;
const HEADER_END: usize = 0x150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MbcKind {
    NoMbc,
    Mbc1,
    Mbc3,
    Mbc5,
}

impl MbcKind {
    /// Decode cartridge header byte 0x147.
    pub fn from_cart_type(cart_type: u8) -> Result<Self, CartridgeError> {
        match cart_type {
            0x00 | 0x08 | 0x09 => Ok(MbcKind::NoMbc),
            0x01..=0x03 => Ok(MbcKind::Mbc1),
            0x0F..=0x13 => Ok(MbcKind::Mbc3),
            0x19..=0x1E => Ok(MbcKind::Mbc5),
            other => Err(CartridgeError::UnsupportedType(other)),
        }
    }
}

/// Bank-controller registers. Bank numbers are stored already coerced, so a
/// written 0 shows up here as 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MbcState {
    NoMbc {
        ram_enable: bool,
    },
    Mbc1 {
        rom_bank: u8,
        upper: u8,
        mode: u8,
        ram_enable: bool,
    },
    Mbc3 {
        rom_bank: u8,
        ram_bank: u8,
        ram_enable: bool,
    },
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
        ram_enable: bool,
    },
}

impl MbcState {
    fn initial(kind: MbcKind) -> Self {
        match kind {
            MbcKind::NoMbc => MbcState::NoMbc { ram_enable: false },
            MbcKind::Mbc1 => MbcState::Mbc1 {
                rom_bank: 1,
                upper: 0,
                mode: 0,
                ram_enable: false,
            },
            MbcKind::Mbc3 => MbcState::Mbc3 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
            },
            MbcKind::Mbc5 => MbcState::Mbc5 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
            },
        }
    }

    pub fn kind(&self) -> MbcKind {
        match self {
            MbcState::NoMbc { .. } => MbcKind::NoMbc,
            MbcState::Mbc1 { .. } => MbcKind::Mbc1,
            MbcState::Mbc3 { .. } => MbcKind::Mbc3,
            MbcState::Mbc5 { .. } => MbcKind::Mbc5,
        }
    }

    fn ram_enabled(&self) -> bool {
        match *self {
            MbcState::NoMbc { ram_enable }
            | MbcState::Mbc1 { ram_enable, .. }
            | MbcState::Mbc3 { ram_enable, .. }
            | MbcState::Mbc5 { ram_enable, .. } => ram_enable,
        }
    }

    fn set_ram_enabled(&mut self, on: bool) {
        match self {
            MbcState::NoMbc { ram_enable }
            | MbcState::Mbc1 { ram_enable, .. }
            | MbcState::Mbc3 { ram_enable, .. }
            | MbcState::Mbc5 { ram_enable, .. } => *ram_enable = on,
        }
    }
}

/// Everything needed to rebuild a controller: its registers and the
/// external RAM contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MbcSnapshot {
    pub state: MbcState,
    pub ram: Vec<u8>,
}

/// Parsed cartridge header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub title: String,
    pub cart_type: u8,
    pub ram_size: usize,
    pub checksum: u8,
}

impl Header {
    /// Parse and validate a header. Rejects short images and bad checksums
    /// without side effects.
    pub fn parse(rom: &[u8]) -> Result<Self, CartridgeError> {
        if rom.len() < HEADER_END {
            return Err(CartridgeError::HeaderTooShort { len: rom.len() });
        }
        let expected = rom[0x14D];
        let computed = header_checksum(rom);
        if expected != computed {
            return Err(CartridgeError::ChecksumMismatch { expected, computed });
        }

        let mut title = &rom[0x134..0x143];
        if let Some(pos) = title.iter().position(|&b| b == 0) {
            title = &title[..pos];
        }

        Ok(Self {
            title: String::from_utf8_lossy(title).trim().to_string(),
            cart_type: rom[0x147],
            ram_size: ram_size_from_code(rom[0x149]),
            checksum: expected,
        })
    }
}

/// `x = x - byte - 1` over 0x134..=0x14C.
pub fn header_checksum(rom: &[u8]) -> u8 {
    rom[0x134..=0x14C]
        .iter()
        .fold(0u8, |x, &b| x.wrapping_sub(b).wrapping_sub(1))
}

fn ram_size_from_code(code: u8) -> usize {
    match code {
        0x01 => 0x800,
        0x02 => 0x2000,
        0x03 => 0x8000,
        0x04 => 0x20000,
        0x05 => 0x10000,
        _ => 0,
    }
}

pub struct Cartridge {
    rom: Vec<u8>,
    ram: Vec<u8>,
    pub title: String,
    cart_type: u8,
    mbc: MbcState,
    store: Option<Arc<dyn SaveStore>>,
    save_key: String,
}

impl std::fmt::Debug for Cartridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cartridge")
            .field("title", &self.title)
            .field("cart_type", &self.cart_type)
            .field("mbc", &self.mbc)
            .field("rom_len", &self.rom.len())
            .field("ram_len", &self.ram.len())
            .finish()
    }
}

impl Cartridge {
    /// Controller installed on reset: no ROM, no RAM, reads float high.
    pub fn empty() -> Self {
        Self {
            rom: Vec::new(),
            ram: Vec::new(),
            title: String::new(),
            cart_type: 0,
            mbc: MbcState::initial(MbcKind::NoMbc),
            store: None,
            save_key: String::new(),
        }
    }

    pub fn from_rom(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        let header = Header::parse(&rom)?;
        let kind = MbcKind::from_cart_type(header.cart_type)?;
        info!(
            "Loaded ROM: {} (MBC: {:?}, RAM: {} bytes)",
            header.title, kind, header.ram_size
        );
        Ok(Self {
            rom,
            ram: vec![0; header.ram_size],
            save_key: sanitize_key(&header.title),
            title: header.title,
            cart_type: header.cart_type,
            mbc: MbcState::initial(kind),
            store: None,
        })
    }

    pub fn kind(&self) -> MbcKind {
        self.mbc.kind()
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn save_key(&self) -> &str {
        &self.save_key
    }

    pub fn has_battery(&self) -> bool {
        matches!(
            self.cart_type,
            0x03 | 0x09 | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E
        )
    }

    fn rom_bank_count(&self) -> usize {
        (self.rom.len() / ROM_BANK_SIZE).max(1)
    }

    /// Bank currently mapped at 0x4000-0x7FFF, before wrapping to ROM size.
    pub fn rom_bank(&self) -> usize {
        match self.mbc {
            MbcState::NoMbc { .. } => 1,
            MbcState::Mbc1 {
                rom_bank,
                upper,
                mode,
                ..
            } => {
                if mode == 0 {
                    ((upper as usize) << 5) | rom_bank as usize
                } else {
                    rom_bank as usize
                }
            }
            MbcState::Mbc3 { rom_bank, .. } => rom_bank as usize,
            MbcState::Mbc5 { rom_bank, .. } => rom_bank as usize,
        }
    }

    pub fn ram_bank(&self) -> usize {
        match self.mbc {
            MbcState::NoMbc { .. } => 0,
            MbcState::Mbc1 { upper, mode, .. } => {
                if mode == 1 {
                    upper as usize
                } else {
                    0
                }
            }
            MbcState::Mbc3 { ram_bank, .. } => ram_bank as usize,
            MbcState::Mbc5 { ram_bank, .. } => ram_bank as usize,
        }
    }

    pub fn read_rom(&self, addr: u16) -> u8 {
        let offset = match addr {
            0x0000..=0x3FFF => addr as usize,
            _ => {
                let bank = self.rom_bank() % self.rom_bank_count();
                bank * ROM_BANK_SIZE + (addr as usize - 0x4000)
            }
        };
        self.rom.get(offset).copied().unwrap_or(0xFF)
    }

    fn ram_offset(&self, addr: u16) -> Option<usize> {
        if self.ram.is_empty() || !self.mbc.ram_enabled() {
            return None;
        }
        // MBC3 banks 0x08-0x0C address clock registers, not RAM.
        if let MbcState::Mbc3 { ram_bank, .. } = self.mbc
            && ram_bank > 0x03
        {
            return None;
        }
        let offset = self.ram_bank() * RAM_BANK_SIZE + (addr as usize - 0xA000);
        Some(offset % self.ram.len())
    }

    pub fn read_ram(&self, addr: u16) -> u8 {
        self.ram_offset(addr)
            .and_then(|i| self.ram.get(i).copied())
            .unwrap_or(0xFF)
    }

    pub fn write_ram(&mut self, addr: u16, val: u8) {
        if let Some(i) = self.ram_offset(addr)
            && let Some(b) = self.ram.get_mut(i)
        {
            *b = val;
        }
    }

    /// Handle a write into 0x0000-0x7FFF. Errors are non-fatal "unsupported
    /// feature" signals; the register state is still consistent afterwards.
    pub fn write_control(&mut self, addr: u16, val: u8) -> Result<(), CartridgeError> {
        if addr < 0x2000 {
            let was_enabled = self.mbc.ram_enabled();
            let enable = val & 0x0F == 0x0A;
            self.mbc.set_ram_enabled(enable);
            if was_enabled && !enable {
                self.persist_ram();
            }
            return Ok(());
        }

        match (&mut self.mbc, addr) {
            (MbcState::NoMbc { .. }, _) => {}
            (MbcState::Mbc1 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = coerce_bank(val & 0x1F);
            }
            (MbcState::Mbc1 { upper, .. }, 0x4000..=0x5FFF) => {
                *upper = val & 0x03;
            }
            (MbcState::Mbc1 { mode, .. }, _) => {
                *mode = val & 0x01;
            }
            (MbcState::Mbc3 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = coerce_bank(val & 0x7F);
            }
            (MbcState::Mbc3 { ram_bank, .. }, 0x4000..=0x5FFF) => {
                *ram_bank = val;
            }
            (MbcState::Mbc3 { .. }, _) => {
                return Err(CartridgeError::Unsupported("MBC3 real-time clock latch"));
            }
            (MbcState::Mbc5 { rom_bank, .. }, 0x2000..=0x2FFF) => {
                let bank = (*rom_bank & 0x100) | val as u16;
                *rom_bank = if bank == 0 { 1 } else { bank };
            }
            (MbcState::Mbc5 { rom_bank, .. }, 0x3000..=0x3FFF) => {
                let bank = (((val & 0x01) as u16) << 8) | (*rom_bank & 0xFF);
                *rom_bank = if bank == 0 { 1 } else { bank };
            }
            (MbcState::Mbc5 { ram_bank, .. }, 0x4000..=0x5FFF) => {
                *ram_bank = val & 0x0F;
            }
            (MbcState::Mbc5 { .. }, _) => {}
        }
        debug!("ROM bank {} RAM bank {}", self.rom_bank(), self.ram_bank());
        Ok(())
    }

    /// Restore battery RAM from `store`. RAM is always left zeroed when the
    /// backup is missing, unreadable or the wrong size.
    pub fn load_ram(
        &mut self,
        store: &dyn SaveStore,
        key: &str,
        size: usize,
    ) -> Result<(), PersistError> {
        self.ram = vec![0; size];
        match store.load(key)? {
            None => Ok(()),
            Some(data) if data.len() == size => {
                self.ram.copy_from_slice(&data);
                info!("Restored {size} bytes of battery RAM for {key}");
                Ok(())
            }
            Some(data) => {
                error!(
                    "Battery RAM for {key} is {} bytes, expected {size}; starting with empty RAM",
                    data.len()
                );
                Err(PersistError::SizeMismatch {
                    expected: size,
                    actual: data.len(),
                })
            }
        }
    }

    /// Connect battery RAM to `store` and pull in any existing backup.
    pub fn attach_store(&mut self, store: Arc<dyn SaveStore>) {
        if self.has_battery() && !self.ram.is_empty() {
            let key = self.save_key.clone();
            let size = self.ram.len();
            if let Err(e) = self.load_ram(store.as_ref(), &key, size) {
                warn!("Battery RAM for {key} not restored: {e}");
            }
        }
        self.store = Some(store);
    }

    /// Reconnect a store without touching RAM contents.
    pub(crate) fn reattach_store(&mut self, store: Option<Arc<dyn SaveStore>>) {
        self.store = store;
    }

    pub(crate) fn store(&self) -> Option<Arc<dyn SaveStore>> {
        self.store.clone()
    }

    pub fn save_ram(&self) -> Result<(), PersistError> {
        match &self.store {
            Some(store) if self.has_battery() && !self.ram.is_empty() => {
                store.store(&self.save_key, &self.ram)
            }
            _ => Ok(()),
        }
    }

    fn persist_ram(&self) {
        if let Err(e) = self.save_ram() {
            warn!("Failed to save battery RAM for {}: {e}", self.save_key);
        }
    }

    pub fn state(&self) -> MbcSnapshot {
        MbcSnapshot {
            state: self.mbc.clone(),
            ram: self.ram.clone(),
        }
    }

    pub fn set_state(&mut self, snapshot: MbcSnapshot) {
        self.mbc = snapshot.state;
        self.ram = snapshot.ram;
    }

    /// Rebuild a controller from raw ROM bytes and a saved state without
    /// validating the header again.
    pub(crate) fn restore(rom: Vec<u8>, snapshot: MbcSnapshot) -> Self {
        let mut cart = Self::empty();
        if rom.len() >= HEADER_END {
            let mut title = &rom[0x134..0x143];
            if let Some(pos) = title.iter().position(|&b| b == 0) {
                title = &title[..pos];
            }
            cart.title = String::from_utf8_lossy(title).trim().to_string();
            cart.cart_type = rom[0x147];
            cart.save_key = sanitize_key(&cart.title);
        }
        cart.rom = rom;
        cart.set_state(snapshot);
        cart
    }
}

fn coerce_bank(bank: u8) -> u8 {
    if bank == 0 { 1 } else { bank }
}
