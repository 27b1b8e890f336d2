//! Fixed-period frame pacing.
//!
//! [`FrameLoop`] runs one [`GameBoy::run_frame`] per period and sleeps for
//! the remainder. Pausing is observed only between frames.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::error::EmuError;
use crate::gameboy::GameBoy;

/// Shared pause flag. Clones control the same machine.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle(Arc<AtomicBool>);

impl PauseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn unpause(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn set(&self, paused: bool) {
        self.0.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of one scheduler slot.
#[derive(Debug)]
pub enum RunState {
    /// A frame ran; carries the cycles it consumed.
    Ran(u32),
    Paused,
    /// A fatal fault stopped execution. No further frames will run.
    Halted(EmuError),
}

impl RunState {
    pub fn is_halted(&self) -> bool {
        matches!(self, RunState::Halted(_))
    }
}

pub struct FrameLoop {
    period: Duration,
    deadline: Option<Instant>,
}

impl FrameLoop {
    /// A zero `period` runs frames back to back.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run a single frame unless paused. Does not sleep.
    pub fn tick(&mut self, gb: &mut GameBoy) -> RunState {
        if gb.is_paused() {
            return RunState::Paused;
        }
        match gb.run_frame() {
            Ok(cycles) => RunState::Ran(cycles),
            Err(e) => RunState::Halted(e),
        }
    }

    /// Drive frames at the configured period until `on_frame` breaks or the
    /// machine halts. `on_frame` is called after every slot, paused or not.
    pub fn run<F>(&mut self, gb: &mut GameBoy, mut on_frame: F) -> RunState
    where
        F: FnMut(&mut GameBoy, &RunState) -> ControlFlow<()>,
    {
        loop {
            let state = self.tick(gb);
            if state.is_halted() {
                return state;
            }
            self.pace();
            if on_frame(gb, &state).is_break() {
                return state;
            }
        }
    }

    fn pace(&mut self) {
        if self.period.is_zero() {
            return;
        }
        let now = Instant::now();
        let deadline = self.deadline.unwrap_or(now) + self.period;
        if deadline > now {
            thread::sleep(deadline - now);
            self.deadline = Some(deadline);
        } else {
            // Too far behind; don't try to catch up.
            debug!("Frame overran by {:?}", now - deadline);
            self.deadline = Some(now);
        }
    }
}
