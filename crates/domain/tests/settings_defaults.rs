use mc_domain::Settings;

#[test]
fn default_connection_targets_localhost() {
    let settings = Settings::default();
    assert_eq!(settings.connection_string, "mongodb://localhost:27017");
    assert_eq!(settings.default_database, "configs");
    assert_eq!(settings.default_language, "en");
}

#[test]
fn default_backoff_window() {
    let settings = Settings::default();
    assert_eq!(settings.change_stream_backoff_start_millis, 1_000);
    assert_eq!(settings.change_stream_backoff_max_millis, 60_000);
    assert_eq!(settings.change_stream_max_consecutive_failures, 10);
}

#[test]
fn partial_toml_keeps_remaining_defaults() {
    let toml_str = r#"
connection_string = "mongodb://db.internal:27017/?replicaSet=rs0"
default_language = "pl"
cache_max_size = 512
"#;
    let settings: Settings = toml::from_str(toml_str).unwrap();
    assert_eq!(
        settings.connection_string,
        "mongodb://db.internal:27017/?replicaSet=rs0"
    );
    assert_eq!(settings.default_language, "pl");
    assert_eq!(settings.cache_max_size, 512);
    // Untouched fields fall back.
    assert_eq!(settings.messages_collection, "messages");
    assert!(settings.cache_record_stats);
}

#[test]
fn idle_expiry_is_disabled_by_default() {
    let settings = Settings::default();
    assert_eq!(settings.cache_idle_seconds, 0);
}
