//! Logging init, standing in for the original's `verbose()` helper.

use log::LevelFilter;

/// Installs the global logger. `verbose` maps to the original's
/// `TEERANK_VERBOSE` flag: debug output instead of info-only.
pub fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_secs()
        .try_init();
}
