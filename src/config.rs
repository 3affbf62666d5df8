//! 客户端配置
//!
//! 读取优先级（先找到的生效）：
//! 1. 配置文件 `~/.config/property-notify/config.json`
//! 2. 环境变量 `PNOTIFY_API_URL` / `PNOTIFY_WS_URL` / `PNOTIFY_TOKEN` / `PNOTIFY_SESSION_INTERVAL`
//! 3. 默认值

use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::push::ReconnectPolicy;

/// 默认 REST 地址
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// 默认推送地址
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8000";

/// 默认会话检查间隔（秒）- 每分钟一次
pub const DEFAULT_SESSION_CHECK_SECS: u64 = 60;

/// 默认请求超时（秒）
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const NOTIFICATIONS_PATH: &str = "notifications/notification/";
const IDENTITY_PATH: &str = "api/auth/profile/";
const PUSH_PATH: &str = "ws/notifications/";

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST 基础地址
    pub api_base_url: String,
    /// 推送通道基础地址
    pub ws_base_url: String,
    /// 会话凭证
    pub token: Option<String>,
    /// 会话检查间隔（秒）
    pub session_check_interval_secs: u64,
    /// 启动时立即检查一次会话
    pub session_check_on_start: bool,
    /// 请求超时（秒）
    pub request_timeout_secs: u64,
    /// 推送通道重连策略
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            ws_base_url: DEFAULT_WS_URL.to_string(),
            token: None,
            session_check_interval_secs: DEFAULT_SESSION_CHECK_SECS,
            session_check_on_start: true,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// 配置来源（文件或环境变量），未设置的字段为 None
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    api_url: Option<String>,
    ws_url: Option<String>,
    token: Option<String>,
    session_check_interval_secs: Option<u64>,
    session_check_on_start: Option<bool>,
    request_timeout_secs: Option<u64>,
    reconnect: Option<ReconnectPolicy>,
}

impl PartialConfig {
    fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            api_url: lookup("PNOTIFY_API_URL"),
            ws_url: lookup("PNOTIFY_WS_URL"),
            token: lookup("PNOTIFY_TOKEN"),
            session_check_interval_secs: lookup("PNOTIFY_SESSION_INTERVAL")
                .and_then(|v| v.trim().parse().ok()),
            session_check_on_start: None,
            request_timeout_secs: None,
            reconnect: None,
        }
    }

    /// 用 `other` 填补本来源缺失的字段
    fn or(self, other: PartialConfig) -> Self {
        Self {
            api_url: non_empty(self.api_url).or(non_empty(other.api_url)),
            ws_url: non_empty(self.ws_url).or(non_empty(other.ws_url)),
            token: non_empty(self.token).or(non_empty(other.token)),
            session_check_interval_secs: self
                .session_check_interval_secs
                .or(other.session_check_interval_secs),
            session_check_on_start: self.session_check_on_start.or(other.session_check_on_start),
            request_timeout_secs: self.request_timeout_secs.or(other.request_timeout_secs),
            reconnect: self.reconnect.or(other.reconnect),
        }
    }

    fn resolve(self) -> ClientConfig {
        let defaults = ClientConfig::default();
        ClientConfig {
            api_base_url: non_empty(self.api_url).unwrap_or(defaults.api_base_url),
            ws_base_url: non_empty(self.ws_url).unwrap_or(defaults.ws_base_url),
            token: non_empty(self.token),
            session_check_interval_secs: self
                .session_check_interval_secs
                .unwrap_or(defaults.session_check_interval_secs),
            session_check_on_start: self
                .session_check_on_start
                .unwrap_or(defaults.session_check_on_start),
            request_timeout_secs: self
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            reconnect: self.reconnect.unwrap_or(defaults.reconnect),
        }
    }
}

impl ClientConfig {
    /// 配置文件路径
    pub fn path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("property-notify")
            .join("config.json")
    }

    /// 从配置文件与环境变量自动加载
    pub fn auto_load() -> Result<Self> {
        Self::load(&Self::path(), |name| std::env::var(name).ok())
    }

    /// 从指定 JSON 文件加载，缺失字段使用默认值
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::read_file(path)?.resolve())
    }

    fn load(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = if path.exists() {
            debug!(path = %path.display(), "Loading config file");
            Self::read_file(path)?
        } else {
            PartialConfig::default()
        };
        Ok(file.or(PartialConfig::from_env(lookup)).resolve())
    }

    fn read_file(path: &Path) -> Result<PartialConfig> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// 会话检查间隔（至少 1 秒）
    pub fn session_check_interval(&self) -> Duration {
        Duration::from_secs(self.session_check_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 通知列表地址
    pub fn notifications_url(&self) -> Result<Url> {
        self.api_url(NOTIFICATIONS_PATH)
    }

    /// 标记已读地址
    pub fn mark_read_url(&self, id: i64) -> Result<Url> {
        self.api_url(&format!("{}{}/mark_read/", NOTIFICATIONS_PATH, id))
    }

    /// 服务端未读数地址
    pub fn unread_count_url(&self) -> Result<Url> {
        self.api_url(&format!("{}unread_count/", NOTIFICATIONS_PATH))
    }

    /// 身份确认地址（会话检查用）
    pub fn identity_url(&self) -> Result<Url> {
        self.api_url(IDENTITY_PATH)
    }

    /// 推送通道地址，凭证放在查询参数中
    pub fn push_url(&self, token: &str) -> Result<Url> {
        let mut url = join(&self.ws_base_url, PUSH_PATH)?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        join(&self.api_base_url, path)
    }
}

fn join(base: &str, path: &str) -> Result<Url> {
    let base = format!("{}/", base.trim_end_matches('/'));
    let base = Url::parse(&base).map_err(|e| anyhow!("Invalid base URL {}: {}", base, e))?;
    base.join(path)
        .map_err(|e| anyhow!("Cannot build URL for {}: {}", path, e))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
