
use harness::config;
use serde_json::json;
use serve2d::ConfigError;

fn config_error(err: &anyhow::Error) -> &ConfigError {
    err.downcast_ref::<ConfigError>().expect("config error")
}

#[tokio::test]
async fn unknown_kind_fails_before_binding() {
    let config = config(json!([{"kind": "echo"}, {"kind": "gopher"}])).unwrap();
    let err = serve2d::bind(&config).await.err().unwrap();

    assert!(matches!(
        config_error(&err),
        ConfigError::UnknownKind { index: 1, .. }
    ));
    assert_eq!(format!("{err:#}"), "protocol 1: unknown kind \"gopher\"");
}

#[tokio::test]
async fn unreadable_certificate_fails_before_binding() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(json!([{
        "kind": "tls",
        "conf": {"cert": dir.path().join("none.crt"), "key": dir.path().join("none.key"), "protos": []}
    }]))
    .unwrap();

    let err = serve2d::bind(&config).await.err().unwrap();
    assert!(matches!(config_error(&err), ConfigError::FileLoad { index: 0, .. }));
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = config(json!([{"kind": "echo"}])).unwrap();
    config.address = taken.local_addr().unwrap().to_string();

    let err = serve2d::bind(&config).await.err().unwrap();
    assert!(format!("{err:#}").starts_with("failed to listen on "));
}

#[tokio::test]
async fn run_rejects_conflicting_log_destinations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("serve2d.json");
    std::fs::write(
        &path,
        json!({
            "address": "127.0.0.1:0",
            "logStdout": true,
            "logFile": dir.path().join("serve2d.log"),
            "protocols": [{"kind": "echo"}]
        })
        .to_string(),
    )
    .unwrap();

    let err = serve2d::run(&path).await.err().unwrap();
    assert!(matches!(
        config_error(&err),
        ConfigError::ConflictingLogDestinations
    ));
}

#[tokio::test]
async fn run_reports_missing_config() {
    let dir = tempfile::tempdir().unwrap();
    let err = serve2d::run(&dir.path().join("missing.json")).await.err().unwrap();
    assert!(matches!(config_error(&err), ConfigError::Read { .. }));
}
