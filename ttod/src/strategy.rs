//! The per-strategy contract every Tolerant Time Of Day implementation satisfies.

/// Result of one [`TtodStrategy::sample`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtodOutcome {
    /// Microseconds since the Unix epoch.
    Micros(u64),
    /// This strategy cannot answer *yet* (e.g. still accumulating calibration samples); the
    /// dispatcher should try the next strategy in the chain for this call only.
    Transient,
    /// This strategy is irrecoverably broken (e.g. its reference clock moved backwards, or its
    /// measured frequency wobbled outside tolerance). The dispatcher removes it from the active
    /// chain permanently.
    Permanent,
}

/// One Tolerant Time Of Day strategy: a self-calibrating wall-clock source built over some
/// high-resolution monotonic counter.
pub trait TtodStrategy: Send + Sync {
    /// Human-readable name, used in dispatcher log lines and by tests.
    fn name(&self) -> &'static str;

    /// Checks whether this strategy's prerequisites (CPU features, platform, environment gate)
    /// are satisfied in the current process, and performs any one-time calibration setup.
    /// Must never panic; an unsupported environment simply returns `false`.
    fn init(&self) -> bool;

    /// Produces the current wall-clock estimate, or signals transient/permanent failure.
    fn sample(&self) -> TtodOutcome;
}
