//! Boot-time configuration for [`crate::init_time`].

pub use runtime_time_wheel::WheelConfig;

/// Knobs for the timing subsystem, gathered in one place rather than threaded through every
/// constructor individually.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeTimeConfig {
    /// Tick granularity, in milliseconds. Also the wheel ring's `tick_interval_ms`.
    pub clock_resolution_ms: u32,
    /// Number of wheels in the ring (normal schedulers share `wheel_count - 1` of them; the
    /// remainder is shared by dirty/unknown schedulers reporting id `0`).
    pub wheel_count: u32,
    /// Slot count per wheel.
    pub wheel_config: WheelConfig,
    /// Whether the TSC strategy should be allowed to activate. Mirrors
    /// `ERTS_ENABLE_TTOD_TSC`: when `true` and the environment variable is unset, this crate sets
    /// it for the current process before building the dispatcher, since [`runtime_time_ttod::tsc::TscStrategy`]
    /// reads the variable itself at `init()` time.
    pub enable_tsc: bool,
}

impl RuntimeTimeConfig {
    /// Reads `ERTS_ENABLE_TTOD_TSC` (non-empty means enabled, matching spec.md §6) and otherwise
    /// applies sane hosted-process defaults. Cannot fail.
    pub fn from_env() -> Self {
        let enable_tsc = std::env::var("ERTS_ENABLE_TTOD_TSC")
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        RuntimeTimeConfig {
            clock_resolution_ms: 1,
            wheel_count: num_cpus_hint(),
            wheel_config: WheelConfig::DEFAULT,
            enable_tsc,
        }
    }
}

impl Default for RuntimeTimeConfig {
    fn default() -> Self {
        RuntimeTimeConfig::from_env()
    }
}

fn num_cpus_hint() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
        .saturating_add(1) // +1 shared wheel for dirty/unknown schedulers
}
