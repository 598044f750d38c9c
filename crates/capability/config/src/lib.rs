//! 应用运行配置加载。

use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: String,
    /// 未配置时使用内存持久化。
    pub database_url: Option<String>,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_qos: u8,
    pub topic_prefix: String,
    pub command_timeout_seconds: u64,
    /// 总线发布重试（不是命令重试）。
    pub dispatch_max_retries: u64,
    pub dispatch_backoff_ms: u64,
    pub persist_max_retries: u64,
    pub persist_backoff_ms: u64,
    pub offline_grace_seconds: u64,
    pub presence_check_seconds: u64,
    pub flush_interval_seconds: u64,
    pub command_retention_seconds: u64,
    pub dedup_cache_size: usize,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_addr =
            env::var("DOMOPHONE_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let database_url = read_optional("DOMOPHONE_DATABASE_URL");
        let mqtt_host =
            env::var("DOMOPHONE_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("DOMOPHONE_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("DOMOPHONE_MQTT_USERNAME");
        let mqtt_password = read_optional("DOMOPHONE_MQTT_PASSWORD");
        let mqtt_client_id = read_optional("DOMOPHONE_MQTT_CLIENT_ID")
            .unwrap_or_else(|| format!("domophone-core-{}", uuid::Uuid::new_v4()));
        let mqtt_qos = read_u8_with_default("DOMOPHONE_MQTT_QOS", 1)?;
        if mqtt_qos > 2 {
            return Err(ConfigError::Invalid(
                "DOMOPHONE_MQTT_QOS".to_string(),
                mqtt_qos.to_string(),
            ));
        }
        let topic_prefix = env::var("DOMOPHONE_TOPIC_PREFIX").unwrap_or_default();
        let command_timeout_seconds =
            read_positive_u64_with_default("DOMOPHONE_COMMAND_TIMEOUT_SECONDS", 10)?;
        let dispatch_max_retries = read_u64_with_default("DOMOPHONE_DISPATCH_MAX_RETRIES", 2)?;
        let dispatch_backoff_ms = read_u64_with_default("DOMOPHONE_DISPATCH_BACKOFF_MS", 200)?;
        let persist_max_retries = read_u64_with_default("DOMOPHONE_PERSIST_MAX_RETRIES", 3)?;
        let persist_backoff_ms = read_u64_with_default("DOMOPHONE_PERSIST_BACKOFF_MS", 100)?;
        let offline_grace_seconds =
            read_u64_with_default("DOMOPHONE_OFFLINE_GRACE_SECONDS", 120)?;
        let presence_check_seconds =
            read_positive_u64_with_default("DOMOPHONE_PRESENCE_CHECK_SECONDS", 2)?;
        let flush_interval_seconds =
            read_positive_u64_with_default("DOMOPHONE_FLUSH_INTERVAL_SECONDS", 5)?;
        let command_retention_seconds =
            read_u64_with_default("DOMOPHONE_COMMAND_RETENTION_SECONDS", 600)?;
        let dedup_cache_size =
            read_positive_u64_with_default("DOMOPHONE_DEDUP_CACHE_SIZE", 10_000)? as usize;

        Ok(Self {
            http_addr,
            database_url,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_qos,
            topic_prefix,
            command_timeout_seconds,
            dispatch_max_retries,
            dispatch_backoff_ms,
            persist_max_retries,
            persist_backoff_ms,
            offline_grace_seconds,
            presence_check_seconds,
            flush_interval_seconds,
            command_retention_seconds,
            dedup_cache_size,
        })
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    pub fn offline_grace(&self) -> Duration {
        Duration::from_secs(self.offline_grace_seconds)
    }

    pub fn presence_check_interval(&self) -> Duration {
        Duration::from_secs(self.presence_check_seconds)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }

    pub fn command_retention(&self) -> Duration {
        Duration::from_secs(self.command_retention_seconds)
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

/// 周期、超时类配置不允许为 0。
fn read_positive_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = read_u64_with_default(key, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid(key.to_string(), "0".to_string()));
    }
    Ok(value)
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
