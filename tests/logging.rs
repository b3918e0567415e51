//! Smoke test for standalone logging setup. Lives in its own binary: the
//! global subscriber can only be installed once per process.

#![allow(clippy::unwrap_used)]

use warden::utils::logger::init_logging;

#[test]
fn init_creates_a_log_file_next_to_the_executable() {
    init_logging();
    tracing::info!("logging smoke test");

    let logs = std::env::current_exe()
        .unwrap()
        .parent()
        .unwrap()
        .join("logs");
    assert!(logs.is_dir());

    let has_run_file = std::fs::read_dir(&logs)
        .unwrap()
        .filter_map(Result::ok)
        .any(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.starts_with("warden.") && name.ends_with(".log")
        });
    assert!(has_run_file, "expected a warden.<timestamp>.log in {logs:?}");
}
