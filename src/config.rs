use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::domain::entity::{KeyType, RateLimitConfig};
use crate::keys;
use crate::rate_limiter::{OutagePolicy, RateLimitPolicies};
use crate::token_manager::{TokenSettings, DEFAULT_ACCESS_TTL_SECONDS, DEFAULT_REFRESH_TTL_SECONDS};

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub token: Option<TokenConfig>,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut cfg = Self::from_yaml(&content)?;
        cfg.apply_env_overrides(std::env::var("REDIS_URL").ok());
        Ok(cfg)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 環境変数 REDIS_URL が設定されていれば Redis 接続先を上書きする。
    fn apply_env_overrides(&mut self, redis_url: Option<String>) {
        if let Some(url) = redis_url.filter(|u| !u.is_empty()) {
            match self.redis.as_mut() {
                Some(redis) => redis.url = url,
                None => {
                    self.redis = Some(RedisConfig {
                        url,
                        ..RedisConfig::default()
                    });
                }
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.session.ttl_seconds == 0 {
            anyhow::bail!("session.ttl_seconds must be positive");
        }
        if let Some(token) = &self.token {
            if token.access_ttl_seconds <= 0 || token.refresh_ttl_seconds <= 0 {
                anyhow::bail!("token ttl must be positive");
            }
        }
        for (endpoint, policy) in &self.rate_limit.policies {
            if policy.limit == 0 || policy.window_seconds == 0 {
                anyhow::bail!("rate_limit.policies.{endpoint}: limit and window_seconds must be positive");
            }
            if !keys::is_key_segment(endpoint) || !keys::is_key_segment(policy.key_type.as_str()) {
                anyhow::bail!("rate_limit.policies.{endpoint}: endpoint and key_type must be non-empty and must not contain ':'");
            }
        }
        if self.reconcile.enabled && self.reconcile.interval_seconds == 0 {
            anyhow::bail!("reconcile.interval_seconds must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

/// RedisConfig は Redis 接続設定。
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl RedisConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_connect_timeout_seconds() -> u64 {
    5
}

fn default_command_timeout_ms() -> u64 {
    500
}

/// SessionConfig はセッションの寿命と上限。
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl_seconds(),
            max_sessions_per_user: default_max_sessions_per_user(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

fn default_session_ttl_seconds() -> u64 {
    604_800
}

fn default_max_sessions_per_user() -> usize {
    10
}

/// TokenConfig はトークン発行設定。`signing_secret` はログに出力されない。
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_issuer")]
    pub issuer: String,
    pub signing_secret: SecretString,
    #[serde(default = "default_access_ttl_seconds")]
    pub access_ttl_seconds: i64,
    #[serde(default = "default_refresh_ttl_seconds")]
    pub refresh_ttl_seconds: i64,
}

impl TokenConfig {
    pub fn settings(&self) -> TokenSettings {
        TokenSettings {
            issuer: self.issuer.clone(),
            access_ttl: chrono::Duration::seconds(self.access_ttl_seconds),
            refresh_ttl: chrono::Duration::seconds(self.refresh_ttl_seconds),
        }
    }
}

fn default_issuer() -> String {
    "k1s0-auth-session".to_string()
}

fn default_access_ttl_seconds() -> i64 {
    DEFAULT_ACCESS_TTL_SECONDS
}

fn default_refresh_ttl_seconds() -> i64 {
    DEFAULT_REFRESH_TTL_SECONDS
}

/// RateLimitSection はレートリミットのポリシーと障害時の挙動。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimitSection {
    #[serde(default)]
    pub outage_policy: OutagePolicy,
    /// 既定ポリシーへの追加・上書き。
    #[serde(default)]
    pub policies: HashMap<String, PolicyConfig>,
}

impl RateLimitSection {
    /// 既定の 5 ポリシーに設定ファイルの内容を重ねたテーブルを返す。
    pub fn policy_table(&self) -> RateLimitPolicies {
        let mut table = RateLimitPolicies::default();
        for (endpoint, policy) in &self.policies {
            table.insert(RateLimitConfig::new(
                endpoint.clone(),
                policy.key_type.clone(),
                policy.limit,
                Duration::from_secs(policy.window_seconds),
            ));
        }
        table
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    pub limit: u64,
    pub window_seconds: u64,
    #[serde(default = "default_key_type")]
    pub key_type: KeyType,
}

fn default_key_type() -> KeyType {
    KeyType::User
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_reconcile_enabled")]
    pub enabled: bool,
    #[serde(default = "default_reconcile_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconcile_enabled(),
            interval_seconds: default_reconcile_interval_seconds(),
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

fn default_reconcile_enabled() -> bool {
    true
}

fn default_reconcile_interval_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" の場合はプレーンテキスト、それ以外は JSON。
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}
