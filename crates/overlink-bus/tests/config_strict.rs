#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use overlink_bus::config::{self, StreamRole};

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
stream:
  socket_path: "/tmp/a.sock"
  max_backof_ms: 500 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn ok_minimal_config_uses_defaults() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.stream.role, StreamRole::Server);
    assert!(cfg.registry.enabled);
    assert_eq!(cfg.overlay.pose_interval(), Duration::from_millis(100));
    assert_eq!(cfg.overlay.stale_after(), Duration::from_secs(1));

    let policy = cfg.stream.reconnect_policy();
    assert_eq!(policy.initial_backoff, Duration::from_millis(200));
    assert_eq!(policy.max_backoff, Duration::from_millis(2000));
    assert_eq!(policy.max_attempts, 5);
}

#[test]
fn client_role_parses() {
    let ok = r#"
version: 1
stream:
  socket_path: "/run/overlink/host.sock"
  role: client
  initial_backoff_ms: 50
  max_backoff_ms: 800
  max_attempts: 0
registry:
  enabled: false
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.stream.role, StreamRole::Client);
    assert_eq!(cfg.stream.max_attempts, 0);
    assert!(!cfg.registry.enabled);
}

#[test]
fn unsupported_version_is_rejected() {
    let err = config::load_from_str("version: 2\n").expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn unknown_role_is_rejected() {
    let bad = "version: 1\nstream:\n  role: peer\n";
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn range_checks() {
    let cases = [
        "version: 1\nstream:\n  initial_backoff_ms: 5\n",
        "version: 1\nstream:\n  initial_backoff_ms: 3000\n  max_backoff_ms: 1000\n",
        "version: 1\nregistry:\n  queue_depth: 0\n",
        "version: 1\noverlay:\n  pose_interval_ms: 5\n",
        "version: 1\noverlay:\n  pose_interval_ms: 500\n  stale_after_ms: 400\n",
        "version: 1\nstream:\n  socket_path: /tmp/same.sock\nregistry:\n  socket_path: /tmp/same.sock\n",
    ];
    for bad in cases {
        let err = config::load_from_str(bad).expect_err(bad);
        assert_eq!(err.code().as_str(), "CONFIG", "{bad}");
    }
}

#[test]
fn same_socket_allowed_when_registry_disabled() {
    let ok = "version: 1\nstream:\n  socket_path: /tmp/same.sock\nregistry:\n  enabled: false\n  socket_path: /tmp/same.sock\n";
    assert!(config::load_from_str(ok).is_ok());
}

#[test]
fn load_from_file_reads_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("overlink.yaml");
    std::fs::write(&path, "version: 1\noverlay:\n  pose_interval_ms: 50\n").unwrap();

    let cfg = config::load_from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(cfg.overlay.pose_interval_ms, 50);

    let missing = dir.path().join("nope.yaml");
    let err = config::load_from_file(missing.to_str().unwrap()).unwrap_err();
    assert_eq!(err.code().as_str(), "CONFIG");
}
