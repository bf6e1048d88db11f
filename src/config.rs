use std::path::PathBuf;
use std::time::Duration;

pub const SCRIPT_NAME: &str = "alphaMatchers";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_NATINF_FILE: &str = "data/natinf-survey.json";

/// Every wait and delay the engine uses.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Element polling while a step waits for its target.
    pub poll_interval: Duration,
    /// Busy-overlay polling inside the loading gate.
    pub idle_poll: Duration,
    pub idle_timeout: Duration,
    pub element_timeout: Duration,
    /// Pause between ticking "yes" and writing the comment.
    pub correction_pause: Duration,
    /// Delay between chained steps in loop mode.
    pub step_pacing: Duration,
    /// Minimum wall-clock length of a full sequence.
    pub min_sequence: Duration,
    /// Settle delay before resuming a loop after a reload.
    pub resume_settle: Duration,
    pub progress_interval: Duration,
    pub progress_lock_release: Duration,
    /// Page watcher cadence (reload and modal detection).
    pub watch_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            idle_poll: Duration::from_millis(200),
            idle_timeout: Duration::from_secs(30),
            element_timeout: Duration::from_secs(5),
            correction_pause: Duration::from_millis(500),
            step_pacing: Duration::from_millis(1000),
            min_sequence: Duration::from_millis(4000),
            resume_settle: Duration::from_millis(1500),
            progress_interval: Duration::from_secs(2),
            progress_lock_release: Duration::from_millis(100),
            watch_interval: Duration::from_millis(500),
        }
    }
}

/// Where the sensitive-code list comes from.
#[derive(Debug, Clone)]
pub struct ReferenceSource {
    /// Bundled file, tried first.
    pub path: PathBuf,
    /// Relay endpoint used when the bundled file cannot be read.
    pub relay_url: Option<String>,
}

impl Default for ReferenceSource {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_NATINF_FILE),
            relay_url: None,
        }
    }
}

/// `<local data dir>/faed-autopilot/state.json`, or `./faed-state.json`
/// when the platform has no data dir.
pub fn default_state_file() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("faed-autopilot").join("state.json"))
        .unwrap_or_else(|| PathBuf::from("faed-state.json"))
}
