//! Common helpers shared across the MTCNN cropper crates.

/// Cropper settings and the tuned default constants.
pub mod config;
/// Array conversions, resizing, and tensor layout helpers.
pub mod image_utils;
/// Instrumentation helpers for optional performance tracing.
pub mod telemetry;

use anyhow::Result;
use log::LevelFilter;

pub use config::{
    CropSettings, CropperSettings, DetectionSettings, ModelSettings, SelectionMode,
    TelemetrySettings,
};
pub use image_utils::{
    dynamic_to_hwc, grayscale_to_rgb, hwc_to_chw_normalized, padded_window, resize_bilinear,
};
pub use telemetry::{TELEMETRY_TARGET, TimingGuard, configure as configure_telemetry, timing_guard};

/// Initialize `env_logger` once.
///
/// `RUST_LOG` takes precedence; otherwise `default_filter` applies. Calling this again after
/// a logger is installed is a no-op.
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module(TELEMETRY_TARGET, LevelFilter::Trace);

    if builder.try_init().is_err() {
        log::trace!("logger already initialized");
    }
    Ok(())
}

/// Apply the telemetry section of the settings to the global timing state.
pub fn apply_telemetry_settings(settings: &TelemetrySettings) {
    configure_telemetry(settings.enabled, settings.level_filter());
}
