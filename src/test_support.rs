// src/test_support.rs

//! Shared test-only helpers.

/// Route `log` output through `env_logger` so the warnings this crate emits
/// on corrupt/crash-truncated logs are visible under
/// `cargo test -- --nocapture`, instead of being silently dropped.
pub fn enable_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}
