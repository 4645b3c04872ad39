use super::{apply_env_overrides, apply_file_overrides, load_settings_from, Settings};

use std::{
    collections::HashMap,
    env, fs,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn defaults_are_valid() {
    let settings = Settings::default();
    settings.validate().expect("defaults validate");
    assert_eq!(settings.page_limit, 50);
    assert_eq!(settings.store_capacity, 2000);
    assert_eq!(settings.refresh_interval(), Duration::from_millis(2000));
}

#[test]
fn file_values_override_defaults() {
    let mut settings = Settings::default();
    apply_file_overrides(
        &mut settings,
        r#"
server_url = "https://events.internal:9443"
page_limit = 100
refresh_interval_ms = "5000"
store_capacity = 500
"#,
    );
    assert_eq!(settings.server_url, "https://events.internal:9443");
    assert_eq!(settings.page_limit, 100);
    assert_eq!(settings.refresh_interval_ms, 5000);
    assert_eq!(settings.store_capacity, 500);
}

#[test]
fn malformed_file_is_ignored() {
    let mut settings = Settings::default();
    apply_file_overrides(&mut settings, "this is = = not toml");
    assert_eq!(settings, Settings::default());
}

#[test]
fn env_overrides_win_and_bad_numbers_are_ignored() {
    let mut settings = Settings::default();
    apply_env_overrides(
        &mut settings,
        env_from(&[
            ("EVENT_SERVER_URL", "http://a:1"),
            ("APP__SERVER_URL", "http://b:2"),
            ("APP__PAGE_LIMIT", "25"),
            ("APP__REFRESH_INTERVAL_MS", "soon"),
        ]),
    );
    assert_eq!(settings.server_url, "http://b:2");
    assert_eq!(settings.page_limit, 25);
    assert_eq!(settings.refresh_interval_ms, 2000);
}

#[test]
fn validate_rejects_bad_urls_and_zero_limit() {
    let mut settings = Settings {
        server_url: "ftp://example.com".into(),
        ..Settings::default()
    };
    assert!(settings.validate().is_err());

    settings.server_url = "nonsense".into();
    assert!(settings.validate().is_err());

    settings.server_url = "http://127.0.0.1:8080".into();
    settings.page_limit = 0;
    assert!(settings.validate().is_err());
}

#[test]
fn loads_settings_from_explicit_path() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = env::temp_dir().join(format!("event_viewer_config_test_{suffix}"));
    fs::create_dir_all(&temp_root).expect("temp root");
    let path = temp_root.join("viewer.toml");
    fs::write(&path, "page_limit = 10\n").expect("write settings");

    let settings = load_settings_from(&path).expect("load");
    assert_eq!(settings.page_limit, 10);

    fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn missing_settings_file_is_an_error() {
    let err = load_settings_from(std::path::Path::new("/definitely/not/here.toml"))
        .expect_err("must fail");
    assert!(err.to_string().contains("failed to read settings file"));
}
