// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 后端 API 配置
    #[serde(default)]
    pub api: ApiConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 未读消息通知配置
    #[serde(default)]
    pub notification: NotificationConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

/// 后端 API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API 根地址，如 `https://api.example.com`
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer 令牌（由登录上下文提供）
    #[serde(default)]
    pub auth_token: Option<String>,
    /// 单次请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 同时上传的文件数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 单文件 PUT 最大尝试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 指数退避基础延迟（毫秒）
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 单文件最大大小（字节，默认 10MB）
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// 允许的 MIME 类型
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
    /// 预签名 URL 获取失败时是否回退为直传
    #[serde(default)]
    pub fallback_to_direct: bool,
    /// 默认存储目录
    #[serde(default = "default_folder")]
    pub default_folder: String,
}

fn default_concurrency() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_allowed_types() -> Vec<String> {
    [
        "image/jpeg",
        "image/png",
        "image/gif",
        "image/webp",
        "application/pdf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_folder() -> String {
    "uploads".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_file_size: default_max_file_size(),
            allowed_types: default_allowed_types(),
            fallback_to_direct: false,
            default_folder: default_folder(),
        }
    }
}

/// 未读消息通知配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// 实时连接地址（WebSocket）
    #[serde(default = "default_socket_url")]
    pub socket_url: String,
    /// 未读数轮询间隔（毫秒）
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 建立实时连接的超时（毫秒），超时后仅使用轮询
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_socket_url() -> String {
    "ws://127.0.0.1:5000/ws".to_string()
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            socket_url: default_socket_url(),
            poll_interval_ms: default_poll_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl NotificationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载配置，失败时使用默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }

    /// 校验数值配置
    pub fn validate(&self) -> Result<()> {
        if self.upload.concurrency == 0 {
            anyhow::bail!("upload.concurrency 必须 >= 1");
        }
        if self.upload.max_retries == 0 {
            anyhow::bail!("upload.max_retries 必须 >= 1");
        }
        if self.notification.poll_interval_ms == 0 {
            anyhow::bail!("notification.poll_interval_ms 必须 > 0");
        }
        if self.notification.connect_timeout_ms == 0 {
            anyhow::bail!("notification.connect_timeout_ms 必须 > 0");
        }
        if self.api.base_url.trim().is_empty() {
            anyhow::bail!("api.base_url 不能为空");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.upload.concurrency, 3);
        assert_eq!(config.upload.max_retries, 3);
        assert_eq!(config.upload.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.notification.poll_interval(), Duration::from_millis(3000));
        assert_eq!(config.notification.connect_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut config = AppConfig::default();
        config.upload.concurrency = 5;
        config.api.auth_token = Some("token-1".to_string());
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.upload.concurrency, 5);
        assert_eq!(loaded.api.auth_token.as_deref(), Some("token-1"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [upload]
            concurrency = 2

            [notification]
            poll_interval_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.upload.concurrency, 2);
        assert_eq!(config.upload.max_retries, 3);
        assert_eq!(config.notification.poll_interval_ms, 500);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.upload.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let config = AppConfig::load_or_default(path.to_str().unwrap()).await;
        assert_eq!(config.upload.concurrency, 3);
    }
}
