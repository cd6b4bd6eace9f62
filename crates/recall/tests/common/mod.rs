//! Shared helpers for recall integration tests

/// Route `tracing` output through the test harness so it shows up for
/// failing tests only. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}
