//! Scoped timing for the detection and cropping pipeline.
//!
//! A [`TimingGuard`] records when it was created and, if telemetry is switched on and the
//! `mtcnn::telemetry` log target accepts the requested level, logs the elapsed time on drop.
//! Guards created while telemetry is off cost one `Instant::now()`.

use std::{
    borrow::Cow,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Instant,
};

use log::{Level, LevelFilter, log, log_enabled};

/// Log target used for all timing output.
pub const TELEMETRY_TARGET: &str = "mtcnn::telemetry";

static ENABLED: AtomicBool = AtomicBool::new(false);
static MAX_LEVEL: AtomicUsize = AtomicUsize::new(LevelFilter::Off as usize);

/// RAII timer returned by [`timing_guard`].
pub struct TimingGuard {
    label: Cow<'static, str>,
    level: Level,
    start: Instant,
    active: bool,
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if self.active {
            log!(
                target: TELEMETRY_TARGET,
                self.level,
                "{} took {:.2?}",
                self.label,
                self.start.elapsed()
            );
        }
    }
}

/// Start timing `label`; the result is logged at `level` when the guard drops.
pub fn timing_guard(label: impl Into<Cow<'static, str>>, level: Level) -> TimingGuard {
    let active = telemetry_allows(level) && log_enabled!(target: TELEMETRY_TARGET, level);
    TimingGuard {
        label: label.into(),
        level,
        start: Instant::now(),
        active,
    }
}

/// Switch telemetry on or off and set the most verbose level it may log at.
pub fn configure(enabled: bool, level: LevelFilter) {
    ENABLED.store(enabled, Ordering::Relaxed);
    MAX_LEVEL.store(level as usize, Ordering::Relaxed);
}

/// Whether telemetry is currently switched on.
fn telemetry_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// The most verbose level telemetry may log at.
fn telemetry_level() -> LevelFilter {
    match MAX_LEVEL.load(Ordering::Relaxed) {
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        5 => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// True when telemetry is on and `level` is within the configured threshold.
fn telemetry_allows(level: Level) -> bool {
    telemetry_enabled() && level <= telemetry_level()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Global state is shared between tests, so everything lives in one test.
    #[test]
    fn configure_controls_level_threshold() {
        configure(false, LevelFilter::Trace);
        assert!(!telemetry_allows(Level::Error));

        configure(true, LevelFilter::Info);
        assert_eq!(telemetry_level(), LevelFilter::Info);
        assert!(telemetry_allows(Level::Warn));
        assert!(telemetry_allows(Level::Info));
        assert!(!telemetry_allows(Level::Debug));

        configure(true, LevelFilter::Off);
        assert!(!telemetry_allows(Level::Error));

        configure(false, LevelFilter::Off);
        let guard = timing_guard("inactive", Level::Debug);
        assert!(!guard.active);
    }
}
