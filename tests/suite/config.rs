//! Runtime construction from a config file on disk.

use std::fs;

use tether_config::{DebugVerbosity, TetherConfig};
use tether_engine::{HostRuntime, Instrumentation};

use crate::common::WAIT;

#[test]
fn runtime_starts_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[host]
max_background_threads = 4
privileged_thread_name = "from-file"

[debug]
verbosity = "verbose"

[profiler]
enabled = true
"#,
    )
    .unwrap();

    let config = TetherConfig::load_from(&path).unwrap();
    assert_eq!(config.privileged_thread_name(), "from-file");
    assert_eq!(config.debug_verbosity(), DebugVerbosity::Verbose);

    let runtime = HostRuntime::start(&config).unwrap();
    assert!(runtime.profiler().enabled());
    assert!(!runtime.timings().enabled());
    runtime.shutdown(WAIT);
}

#[test]
fn malformed_config_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[host\nmax_background_threads = ").unwrap();

    let err = TetherConfig::load_from(&path).unwrap_err();
    assert_eq!(err.path(), path.as_path());
}
