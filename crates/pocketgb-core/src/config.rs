use std::time::Duration;

/// Default frame period, 1000/60 ms.
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_nanos(1_000_000_000 / 60);

/// How unsupported cartridge features are surfaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Log a warning and keep running.
    #[default]
    Log,
    /// Return the fault from the step that caused it.
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorConfig {
    pub fault_policy: FaultPolicy,
    /// Host sample rate for the APU output queue. `None` keeps audio off.
    pub sample_rate: Option<u32>,
    pub frame_period: Duration,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            fault_policy: FaultPolicy::Log,
            sample_rate: None,
            frame_period: DEFAULT_FRAME_PERIOD,
        }
    }
}
