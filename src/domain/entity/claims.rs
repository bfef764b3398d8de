use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// TokenType はトークン種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// TokenClaims はアクセストークン・リフレッシュトークン共通の Claims。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// ユーザー ID
    pub sub: String,
    /// トークン ID（失効リストのキー）
    pub jti: String,
    /// 紐づくセッション ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// 紐づくデバイス ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    pub typ: TokenType,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl TokenClaims {
    /// 新しい jti を採番して Claims を生成する。
    pub fn new(
        user_id: &str,
        session_id: Option<&str>,
        device_id: Option<&str>,
        typ: TokenType,
        issuer: &str,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            sid: session_id.map(str::to_string),
            did: device_id.map(str::to_string),
            typ,
            iss: issuer.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_refresh(&self) -> bool {
        self.typ == TokenType::Refresh
    }
}

/// TokenPair はログイン・ローテーション時に返すトークンの組。
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}
