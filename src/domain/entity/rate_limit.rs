use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// KeyType はレートリミットの識別子種別。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum KeyType {
    Ip,
    User,
    Device,
    ApiKey,
    Custom(String),
}

impl KeyType {
    pub fn as_str(&self) -> &str {
        match self {
            KeyType::Ip => "ip",
            KeyType::User => "user",
            KeyType::Device => "device",
            KeyType::ApiKey => "api_key",
            KeyType::Custom(s) => s.as_str(),
        }
    }
}

impl From<&str> for KeyType {
    fn from(s: &str) -> Self {
        match s {
            "ip" => KeyType::Ip,
            "user" => KeyType::User,
            "device" => KeyType::Device,
            "api_key" => KeyType::ApiKey,
            other => KeyType::Custom(other.to_string()),
        }
    }
}

impl From<String> for KeyType {
    fn from(s: String) -> Self {
        KeyType::from(s.as_str())
    }
}

impl From<KeyType> for String {
    fn from(key_type: KeyType) -> Self {
        key_type.as_str().to_string()
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// RateLimitConfig は 1 エンドポイント分のスライディングウィンドウ設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub limit: u64,
    pub window: Duration,
    pub key_type: KeyType,
    pub endpoint: String,
}

impl RateLimitConfig {
    pub fn new(endpoint: impl Into<String>, key_type: KeyType, limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            key_type,
            endpoint: endpoint.into(),
        }
    }

    /// 同じ上限・ウィンドウで識別子種別だけを差し替える。
    pub fn for_key_type(&self, key_type: KeyType) -> Self {
        Self {
            key_type,
            ..self.clone()
        }
    }

    /// ログイン・トークン発行などの認証系: 5 回/分
    pub fn auth() -> Self {
        Self::new("auth", KeyType::Ip, 5, Duration::from_secs(60))
    }

    /// メディアアップロード: 10 回/時
    pub fn media_upload() -> Self {
        Self::new("media_upload", KeyType::User, 10, Duration::from_secs(3600))
    }

    /// メッセージ送信: 60 回/分
    pub fn messaging() -> Self {
        Self::new("messaging", KeyType::User, 60, Duration::from_secs(60))
    }

    /// マッチング: 100 回/時
    pub fn matching() -> Self {
        Self::new("matching", KeyType::User, 100, Duration::from_secs(3600))
    }

    /// 汎用 API: 1000 回/時
    pub fn api() -> Self {
        Self::new("api", KeyType::User, 1000, Duration::from_secs(3600))
    }
}

/// RateLimitDecision はレートリミット判定の結果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    pub limit: u64,
    pub window: Duration,
    /// ウィンドウ内の最古マーカーが抜けて枠が 1 つ空く時刻。
    pub reset_time: DateTime<Utc>,
    /// 拒否時のみ設定する再試行までの待ち時間。
    pub retry_after: Option<Duration>,
    /// ストア障害時に fail-open で許可した判定であれば true。
    pub degraded: bool,
}

impl RateLimitDecision {
    pub fn allowed(remaining: u64, limit: u64, window: Duration, reset_time: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining,
            limit,
            window,
            reset_time,
            retry_after: None,
            degraded: false,
        }
    }

    pub fn denied(limit: u64, window: Duration, reset_time: DateTime<Utc>, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            limit,
            window,
            reset_time,
            retry_after: Some(retry_after),
            degraded: false,
        }
    }

    /// 再試行までの秒数（切り上げ）。
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after
            .map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0))
    }

    /// HTTP レスポンスに付与するヘッダーの組を返す。
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_time.timestamp().to_string()),
        ];
        if let Some(secs) = self.retry_after_secs() {
            headers.push(("Retry-After", secs.to_string()));
        }
        headers
    }
}
