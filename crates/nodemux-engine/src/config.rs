use std::time::Duration;

use nodemux_frame::FrameConfig;

/// Ceiling of the adaptive idle interval.
pub const DEFAULT_IDLE_MAX: Duration = Duration::from_secs(1);

/// Minimum spacing between outbound sync packets on one stream.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound of the idle sleep between quiet cycles.
    pub idle_max: Duration,
    /// How often each protocol stream re-announces its node id.
    pub sync_interval: Duration,
    /// Codec limits for every stream's reader and writer.
    pub frame: FrameConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_max: DEFAULT_IDLE_MAX,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            frame: FrameConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Growth step of the idle interval, and its value right after activity.
    pub fn idle_step(&self) -> Duration {
        self.idle_max / 10
    }
}
