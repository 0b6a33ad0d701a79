use std::time::Duration;

use super::*;

fn write_temp(name: &str, body: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("nvr-live-{}-{}.json", name, std::process::id()));
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_defaults() {
    let config = LiveConfig::default();
    assert_eq!(config.max_sessions, 4);
    assert_eq!(config.listen, "0.0.0.0:8080");

    let settings = config.session_settings();
    assert_eq!(settings.warmup, Duration::from_millis(100));
    assert_eq!(settings.fade_in, Duration::from_millis(300));
    assert_eq!(config.snapshot_interval(), Duration::from_millis(500));
}

#[test]
fn test_partial_file_keeps_defaults() {
    let path = write_temp(
        "partial",
        r#"{ "gateway_url": "wss://gw.local/stream", "default_codec": "hevc",
             "hardware_acceleration": "prefer-software" }"#,
    );
    let config = LiveConfig::from_file(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    assert_eq!(config.gateway_url, "wss://gw.local/stream");
    assert_eq!(config.default_codec, Some(CodecFamily::H265));
    assert_eq!(config.hardware_acceleration, HardwareAcceleration::PreferSoftware);
    assert_eq!(config.max_sessions, 4);
    assert!(config.snapshot_dir.is_none());
}

#[test]
fn test_invalid_files_are_rejected() {
    let path = write_temp("zero", r#"{ "max_sessions": 0 }"#);
    assert!(LiveConfig::from_file(&path).is_err());
    let _ = std::fs::remove_file(&path);

    let path = write_temp("broken", "{ not json");
    assert!(LiveConfig::from_file(&path).is_err());
    let _ = std::fs::remove_file(&path);

    assert!(LiveConfig::from_file(Path::new("/nonexistent/nvr-live.json")).is_err());
}
