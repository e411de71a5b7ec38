//! Checks the environment files shipped in `config/`.

use std::{path::PathBuf, time::Duration};

use darkmarket_deploy::{ConfigDir, ConfigResolver, EnvironmentKind};

fn shipped_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

#[test]
fn test_shipped_local_config() {
    let config = ConfigResolver::new(ConfigDir::new(shipped_config_dir()))
        .load("local")
        .expect("local config resolves");

    assert_eq!(config.kind, EnvironmentKind::Local);
    assert_eq!(config.network_endpoint.as_str(), "http://localhost:8080/");
    assert!(config.l1_rpc_url.is_some());
    assert_eq!(config.timeouts.connect, Duration::from_millis(30_000));
    assert_eq!(config.timeouts.transaction, Duration::from_millis(60_000));
    assert_eq!(config.timeouts.confirmation, Duration::from_millis(120_000));
}

#[test]
fn test_shipped_remote_config() {
    let config = ConfigResolver::new(ConfigDir::new(shipped_config_dir()))
        .load("REMOTE")
        .expect("remote config resolves");

    assert_eq!(config.kind, EnvironmentKind::Remote);
    assert!(!config.is_local());
}

#[test]
fn test_unknown_selector() {
    let err = ConfigResolver::new(ConfigDir::new(shipped_config_dir()))
        .load("staging")
        .unwrap_err();
    assert_eq!(err.category(), "ConfigNotFound");
}
