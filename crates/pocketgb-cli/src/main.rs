#[cfg(feature = "audio")]
mod audio;
mod config;
mod screenshot;

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info, warn};
use pocketgb_core::config::DEFAULT_FRAME_PERIOD;
use pocketgb_core::persist::{BackgroundStore, FileStore, SaveStore};
use pocketgb_core::scheduler::{FrameLoop, RunState};
use pocketgb_core::{EmulatorConfig, FaultPolicy, GameBoy};

#[derive(Parser, Debug)]
#[command(name = "pocketgb", version, about = "Headless DMG Game Boy runner")]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// Number of frames to run
    #[arg(long)]
    frames: Option<u64>,

    /// Number of seconds to run
    #[arg(long)]
    seconds: Option<u64>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for battery saves
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Write the last frame to this PNG file on exit
    #[arg(long)]
    dump_frame: Option<PathBuf>,

    /// Write a save state to this file on exit
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Resume from a save state file
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Stop on unsupported cartridge features
    #[arg(long)]
    strict: bool,

    /// Play audio through the default output device
    #[arg(long)]
    audio: bool,

    /// Run frames back to back instead of at 60 Hz
    #[arg(long)]
    fast: bool,

    /// Print CPU state every 60 frames
    #[arg(long)]
    debug: bool,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn save_dir_for(args: &Args, cfg: &config::CliConfig) -> PathBuf {
    args.save_dir
        .clone()
        .or_else(|| cfg.save_dir.clone())
        .or_else(|| args.rom.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn run(args: Args) -> CliResult<ExitCode> {
    let cfg_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let cfg = config::load_from_file(&cfg_path);

    let emu_config = EmulatorConfig {
        fault_policy: if args.strict || cfg.strict_cartridge {
            FaultPolicy::Escalate
        } else {
            FaultPolicy::Log
        },
        sample_rate: None,
        frame_period: if args.fast {
            Duration::ZERO
        } else {
            DEFAULT_FRAME_PERIOD
        },
    };
    let mut gb = GameBoy::new(emu_config);

    let save_dir = save_dir_for(&args, &cfg);
    std::fs::create_dir_all(&save_dir)?;
    let files: Arc<dyn SaveStore> = Arc::new(FileStore::new(&save_dir));
    let saves = Arc::new(BackgroundStore::new(files));
    gb.attach_store(saves.clone());

    let rom = std::fs::read(&args.rom)
        .map_err(|e| format!("Failed to read ROM {}: {e}", args.rom.display()))?;
    gb.load_rom(rom)?;
    info!("Battery saves in {}", save_dir.display());

    if let Some(path) = &args.load_state {
        let bytes = std::fs::read(path)?;
        gb.load_state(&bytes)?;
    }

    #[cfg(feature = "audio")]
    let _stream = if args.audio {
        audio::start_stream(&mut gb, cfg.sample_rate)
    } else {
        None
    };
    if cfg!(not(feature = "audio")) && args.audio {
        warn!("Built without the `audio` feature; running silently");
    }

    let frame_limit = args.frames;
    let second_limit = args.seconds.map(Duration::from_secs);
    let start = Instant::now();
    let mut frame_count = 0u64;

    let mut scheduler = FrameLoop::new(gb.config().frame_period);
    let state = scheduler.run(&mut gb, |gb, state| {
        if matches!(state, RunState::Ran(_)) {
            frame_count += 1;
            if args.debug && frame_count.is_multiple_of(60) {
                println!("{}", gb.cpu.debug_state());
            }
        }
        if let Some(max) = frame_limit
            && frame_count >= max
        {
            return ControlFlow::Break(());
        }
        if let Some(limit) = second_limit
            && start.elapsed() >= limit
        {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    });
    info!("Ran {frame_count} frames in {:.2?}", start.elapsed());

    if let Err(e) = gb.save_ram() {
        warn!("Failed to save battery RAM: {e}");
    }
    saves.flush();

    if let Some(path) = &args.dump_frame {
        screenshot::write_png(path, gb.frame(), &cfg.palette())?;
        info!("Wrote frame to {}", path.display());
    }

    if let Some(path) = &args.save_state {
        let bytes = gb.save_state()?;
        std::fs::write(path, bytes)?;
    }

    if let RunState::Halted(e) = state {
        error!("Emulation stopped: {e}");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
