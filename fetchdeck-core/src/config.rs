use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// 覆盖 `api_url` 的环境变量
pub const API_URL_ENV: &str = "API_URL";

/// 客户端配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 下载服务的基础地址，三个接口都以它为前缀
    pub api_url: String,
    /// 状态轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 保存产物后自动重置会话的延迟（毫秒）
    pub reset_delay_ms: u64,
    /// 单次请求超时（秒）
    pub timeout: u64,
    /// 用户代理
    pub user_agent: String,
    /// 产物保存目录
    pub download_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".to_string(),
            poll_interval_ms: 1000,
            reset_delay_ms: 5000,
            timeout: 30,
            user_agent: concat!("FetchDeck/", env!("CARGO_PKG_VERSION")).to_string(),
            download_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// 从文件加载配置，文件不存在时返回默认配置
    pub async fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs_err::tokio::read_to_string(path).await?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// 保存配置到文件
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs_err::tokio::write(path, content).await?;
        Ok(())
    }

    /// 应用环境变量覆盖
    pub fn with_env(self) -> Self {
        self.with_api_url_override(std::env::var(API_URL_ENV).ok())
    }

    fn with_api_url_override(mut self, value: Option<String>) -> Self {
        if let Some(url) = value.map(|v| v.trim().to_string())
            && !url.is_empty()
        {
            self.api_url = url;
        }
        self
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            anyhow::bail!("api_url must not be empty");
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            anyhow::bail!("api_url must be an http(s) URL, got {}", self.api_url);
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }
        if self.timeout == 0 {
            anyhow::bail!("timeout must be greater than 0");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }
}
