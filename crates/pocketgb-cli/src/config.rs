use log::warn;
use pocketgb_core::display::DMG_SHADES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct CliConfig {
    /// Directory for battery saves. Defaults to the ROM's directory.
    pub save_dir: Option<PathBuf>,
    /// Treat unsupported cartridge features as fatal.
    pub strict_cartridge: bool,
    /// Requested output rate; the device default is used when unset.
    pub sample_rate: Option<u32>,
    /// Four RGB colors, lightest first.
    pub palette: Option<[[u8; 3]; 4]>,
}

impl CliConfig {
    pub fn palette(&self) -> [[u8; 3]; 4] {
        self.palette.unwrap_or(DMG_SHADES)
    }
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("pocketgb").join("pocketgb.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("pocketgb").join("pocketgb.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("pocketgb")
            .join("pocketgb.toml");
    }

    PathBuf::from("pocketgb.toml")
}

/// Missing files give defaults silently; unparsable ones warn first.
pub fn load_from_file(path: &Path) -> CliConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return CliConfig::default(),
    };

    match toml::from_str::<CliConfig>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse config {}: {e}; using defaults",
                path.display()
            );
            CliConfig::default()
        }
    }
}
