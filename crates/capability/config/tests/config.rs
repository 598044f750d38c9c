use domophone_config::{AppConfig, ConfigError};

// 环境变量为进程级共享状态，全部断言放在同一个测试内顺序执行。
#[test]
fn load_config_from_env() {
    let config = AppConfig::from_env().expect("defaults");
    assert_eq!(config.http_addr, "127.0.0.1:8080");
    assert!(config.database_url.is_none());
    assert_eq!(config.mqtt_port, 1883);
    assert_eq!(config.mqtt_qos, 1);
    assert!(config.mqtt_client_id.starts_with("domophone-core-"));
    assert_eq!(config.topic_prefix, "");
    assert_eq!(config.command_timeout_seconds, 10);
    assert_eq!(config.persist_max_retries, 3);
    assert_eq!(config.offline_grace_seconds, 120);
    assert_eq!(config.dedup_cache_size, 10_000);

    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("DOMOPHONE_HTTP_ADDR", "127.0.0.1:8081");
        std::env::set_var("DOMOPHONE_DATABASE_URL", "postgresql://localhost/domophone");
        std::env::set_var("DOMOPHONE_TOPIC_PREFIX", "fleet");
        std::env::set_var("DOMOPHONE_COMMAND_TIMEOUT_SECONDS", "3");
        std::env::set_var("DOMOPHONE_MQTT_CLIENT_ID", "core-1");
    }
    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.http_addr, "127.0.0.1:8081");
    assert_eq!(
        config.database_url.as_deref(),
        Some("postgresql://localhost/domophone")
    );
    assert_eq!(config.topic_prefix, "fleet");
    assert_eq!(config.command_timeout().as_secs(), 3);
    assert_eq!(config.mqtt_client_id, "core-1");

    unsafe {
        std::env::set_var("DOMOPHONE_COMMAND_TIMEOUT_SECONDS", "0");
    }
    let err = AppConfig::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(key, _) if key == "DOMOPHONE_COMMAND_TIMEOUT_SECONDS"));

    unsafe {
        std::env::set_var("DOMOPHONE_COMMAND_TIMEOUT_SECONDS", "10");
        std::env::set_var("DOMOPHONE_MQTT_QOS", "3");
    }
    assert!(AppConfig::from_env().is_err());
    unsafe {
        std::env::remove_var("DOMOPHONE_MQTT_QOS");
    }
}
