use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// DeviceInfo はログイン元デバイスの識別情報。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub browser: String,
}

/// Session は 1 回のログイン（1 デバイス）を表すサーバー側のレコード。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub device_id: String,
    #[serde(default)]
    pub device_info: DeviceInfo,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Session {
    pub fn new(request: CreateSessionRequest, id: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: request.user_id,
            device_id: request.device_id,
            device_info: request.device_info,
            ip_address: request.ip_address,
            user_agent: request.user_agent,
            created_at: now,
            last_activity_at: now,
            expires_at: now + ttl,
            is_active: true,
        }
    }

    /// 有効かつ期限内であれば true。
    pub fn is_alive(&self) -> bool {
        self.is_active && !self.is_expired()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// 最終アクティビティを更新し、期限を now + ttl へ延長する。
    pub fn touch(&mut self, ttl: Duration) {
        let now = Utc::now();
        self.last_activity_at = now;
        self.expires_at = now + ttl;
    }
}

/// CreateSessionRequest はセッション作成時の入力。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub device_id: String,
    #[serde(default)]
    pub device_info: DeviceInfo,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub user_agent: String,
}

impl CreateSessionRequest {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn with_device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = device_info;
        self
    }

    pub fn with_client(mut self, ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip_address = ip_address.into();
        self.user_agent = user_agent.into();
        self
    }
}
