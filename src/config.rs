use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::MESSAGES_QUEUE;
use crate::infra::presence_tracker::PresenceConfig;

/// 在线判定窗口上限（一年）
const MAX_STALE_AFTER_MINUTES: i64 = 365 * 24 * 60;

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 服务器监听地址
    pub host: String,
    /// HTTP 端口
    pub port: u16,
    /// 允许跨域的前端地址（携带凭证）
    pub cors_origin: String,
    /// JWT 密钥
    pub jwt_secret: String,
    /// 开发工具签发 token 的有效期（秒）
    pub token_ttl_secs: i64,
    /// 数据库连接字符串；未配置时使用内存存储
    pub database_url: Option<String>,
    /// 日志级别
    pub log_level: String,
    /// 消息代理配置
    pub broker: BrokerConfig,
    /// 在线状态配置
    pub presence: PresenceConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            cors_origin: "http://localhost:5173".to_string(),
            jwt_secret: "change-me-in-production".to_string(),
            token_ttl_secs: 86400,
            database_url: None,
            log_level: "info".to_string(),
            broker: BrokerConfig::default(),
            presence: PresenceConfig::default(),
        }
    }
}

/// 消息代理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// `amqp://` / `amqps://` 使用 RabbitMQ；`memory://` 使用进程内队列
    pub url: String,
    /// 工作队列名称
    pub queue: String,
    /// 发布确认超时（毫秒）
    pub publish_timeout_ms: u64,
    /// 本进程是否同时运行消费端
    pub consume: bool,
    /// 消费端 prefetch
    pub prefetch: u16,
    /// 消费端断线重连间隔（秒）
    pub reconnect_delay_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            queue: MESSAGES_QUEUE.to_string(),
            publish_timeout_ms: 5000,
            consume: true,
            prefetch: 32,
            reconnect_delay_secs: 5,
        }
    }
}

impl BrokerConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// 是否使用进程内队列
    pub fn is_local(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP 监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 从 TOML 配置文件加载
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content).context("解析 TOML 配置文件失败")?;
        Ok(toml_config.into())
    }

    /// 从环境变量合并配置
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(url) = env::var("RABBITMQ_URL") {
            self.broker.url = url;
        }
        if let Ok(origin) = env::var("CORS_ORIGIN") {
            self.cors_origin = origin;
        }
        if let Ok(port) = env::var("PORT") {
            self.port = port.parse().with_context(|| format!("PORT 不是有效端口: {}", port))?;
        }
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Ok(secret) = env::var("JWT_SECRET") {
            self.jwt_secret = secret;
        }
        if let Ok(host) = env::var("CHATFEED_HOST") {
            self.host = host;
        }
        if let Ok(queue) = env::var("CHATFEED_BROKER_QUEUE") {
            self.broker.queue = queue;
        }
        if let Ok(timeout) = env::var("CHATFEED_PUBLISH_TIMEOUT_MS") {
            self.broker.publish_timeout_ms = timeout
                .parse()
                .with_context(|| format!("CHATFEED_PUBLISH_TIMEOUT_MS 无效: {}", timeout))?;
        }
        if let Ok(consume) = env::var("CHATFEED_CONSUME") {
            self.broker.consume = consume
                .parse()
                .with_context(|| format!("CHATFEED_CONSUME 无效: {}", consume))?;
        }
        if let Ok(secs) = env::var("CHATFEED_PRESENCE_CLEANUP_INTERVAL_SECS") {
            self.presence.cleanup_interval_secs = secs
                .parse()
                .with_context(|| format!("CHATFEED_PRESENCE_CLEANUP_INTERVAL_SECS 无效: {}", secs))?;
        }
        if let Ok(minutes) = env::var("CHATFEED_PRESENCE_STALE_AFTER_MINUTES") {
            self.presence.stale_after_minutes = minutes
                .parse()
                .with_context(|| format!("CHATFEED_PRESENCE_STALE_AFTER_MINUTES 无效: {}", minutes))?;
        }
        Ok(())
    }

    /// 从命令行参数合并配置（最高优先级）
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(url) = &cli.broker_url {
            self.broker.url = url.clone();
        }
        if let Some(url) = &cli.database_url {
            self.database_url = Some(url.clone());
        }
        if let Some(origin) = &cli.cors_origin {
            self.cors_origin = origin.clone();
        }
        if let Some(secret) = &cli.jwt_secret {
            self.jwt_secret = secret.clone();
        }
        if let Some(level) = cli.get_log_level() {
            self.log_level = level;
        }
    }

    /// 基本校验
    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.is_empty() {
            bail!("jwt_secret 不能为空");
        }
        let scheme_ok = ["amqp://", "amqps://", "memory://"]
            .iter()
            .any(|scheme| self.broker.url.starts_with(scheme));
        if !scheme_ok {
            bail!("不支持的 broker.url: {}", self.broker.url);
        }
        if self.broker.queue.is_empty() {
            bail!("broker.queue 不能为空");
        }
        if self.broker.publish_timeout_ms == 0 {
            bail!("broker.publish_timeout_ms 必须大于 0");
        }
        if self.presence.stale_after_minutes <= 0
            || self.presence.stale_after_minutes > MAX_STALE_AFTER_MINUTES
        {
            bail!(
                "presence.stale_after_minutes 必须在 1..={} 之间",
                MAX_STALE_AFTER_MINUTES
            );
        }
        Ok(())
    }

    /// 加载配置
    ///
    /// 优先级：命令行 > 环境变量 > 配置文件 > 默认值
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = Self::new();

        if let Some(config_file) = &cli.config_file {
            if Path::new(config_file).exists() {
                info!("📄 从配置文件加载: {}", config_file);
                config = Self::from_toml_file(config_file)?;
            } else {
                tracing::warn!("⚠️ 配置文件不存在: {}", config_file);
            }
        } else if Path::new("config.toml").exists() {
            info!("📄 从默认配置文件加载: config.toml");
            config = Self::from_toml_file("config.toml")?;
        }

        config.merge_from_env()?;
        config.merge_from_cli(cli);
        config.validate()?;

        Ok(config)
    }
}

/// 启动早期使用的日志配置（只读 `[logging]` 段）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EarlyLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

/// 在完整配置加载之前读取 `[logging]` 段；文件缺失或格式错误时返回默认值
pub fn load_early_logging_config(config_file: Option<&str>) -> EarlyLoggingConfig {
    #[derive(Deserialize)]
    struct LoggingOnly {
        logging: Option<EarlyLoggingConfig>,
    }

    let path = config_file.unwrap_or("config.toml");
    fs::read_to_string(path)
        .ok()
        .and_then(|content| toml::from_str::<LoggingOnly>(&content).ok())
        .and_then(|parsed| parsed.logging)
        .unwrap_or_default()
}

/// TOML 配置文件结构（用于反序列化）
#[derive(Debug, Deserialize)]
struct TomlConfig {
    server: Option<TomlServerConfig>,
    broker: Option<TomlBrokerConfig>,
    presence: Option<TomlPresenceConfig>,
    logging: Option<EarlyLoggingConfig>,
}

#[derive(Debug, Deserialize)]
struct TomlServerConfig {
    host: Option<String>,
    port: Option<u16>,
    cors_origin: Option<String>,
    jwt_secret: Option<String>,
    token_ttl_secs: Option<i64>,
    database_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlBrokerConfig {
    url: Option<String>,
    queue: Option<String>,
    publish_timeout_ms: Option<u64>,
    consume: Option<bool>,
    prefetch: Option<u16>,
    reconnect_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlPresenceConfig {
    cleanup_interval_secs: Option<u64>,
    stale_after_minutes: Option<i64>,
}

impl From<TomlConfig> for ServerConfig {
    fn from(toml: TomlConfig) -> Self {
        let mut config = ServerConfig::default();

        if let Some(server) = toml.server {
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
            if let Some(origin) = server.cors_origin {
                config.cors_origin = origin;
            }
            if let Some(secret) = server.jwt_secret {
                config.jwt_secret = secret;
            }
            if let Some(ttl) = server.token_ttl_secs {
                config.token_ttl_secs = ttl;
            }
            if server.database_url.is_some() {
                config.database_url = server.database_url;
            }
        }

        if let Some(broker) = toml.broker {
            let defaults = BrokerConfig::default();
            config.broker = BrokerConfig {
                url: broker.url.unwrap_or(defaults.url),
                queue: broker.queue.unwrap_or(defaults.queue),
                publish_timeout_ms: broker.publish_timeout_ms.unwrap_or(defaults.publish_timeout_ms),
                consume: broker.consume.unwrap_or(defaults.consume),
                prefetch: broker.prefetch.unwrap_or(defaults.prefetch),
                reconnect_delay_secs: broker
                    .reconnect_delay_secs
                    .unwrap_or(defaults.reconnect_delay_secs),
            };
        }

        if let Some(presence) = toml.presence {
            let defaults = PresenceConfig::default();
            config.presence = PresenceConfig {
                cleanup_interval_secs: presence
                    .cleanup_interval_secs
                    .unwrap_or(defaults.cleanup_interval_secs),
                stale_after_minutes: presence
                    .stale_after_minutes
                    .unwrap_or(defaults.stale_after_minutes),
            };
        }

        if let Some(level) = toml.logging.and_then(|l| l.level) {
            config.log_level = level;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3001);
        assert_eq!(config.cors_origin, "http://localhost:5173");
        assert_eq!(config.broker.url, "amqp://localhost:5672");
        assert_eq!(config.broker.queue, "messages_queue");
        assert_eq!(config.broker.publish_timeout(), Duration::from_secs(5));
        assert_eq!(config.presence.cleanup_interval_secs, 600);
        assert_eq!(config.presence.stale_after_minutes, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            [server]
            port = 4000

            [broker]
            url = "memory://"
            publish_timeout_ms = 250

            [presence]
            stale_after_minutes = 5

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 4000);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.broker.is_local());
        assert_eq!(config.broker.publish_timeout_ms, 250);
        assert_eq!(config.broker.queue, "messages_queue");
        assert_eq!(config.presence.stale_after_minutes, 5);
        assert_eq!(config.presence.cleanup_interval_secs, 600);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_validation_rejects_unknown_scheme() {
        let mut config = ServerConfig::default();
        config.broker.url = "kafka://localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bounds_stale_window() {
        let mut config = ServerConfig::default();
        config.presence.stale_after_minutes = i64::MAX / 2;
        assert!(config.validate().is_err());

        config.presence.stale_after_minutes = 0;
        assert!(config.validate().is_err());

        config.presence.stale_after_minutes = MAX_STALE_AFTER_MINUTES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_early_logging_config_missing_file() {
        let early = load_early_logging_config(Some("/nonexistent/chatfeed.toml"));
        assert!(early.level.is_none());
        assert!(early.file.is_none());
    }
}
