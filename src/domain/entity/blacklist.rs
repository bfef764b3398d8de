use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// BlacklistEntry は失効させたトークンの記録。
///
/// `expires_at` はトークン自身の有効期限と一致させ、無期限の記録は作らない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub token_identifier: String,
    pub reason: String,
    pub blacklisted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BlacklistEntry {
    pub fn new(token_identifier: &str, reason: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            token_identifier: token_identifier.to_string(),
            reason: reason.to_string(),
            blacklisted_at: Utc::now(),
            expires_at,
        }
    }

    /// ストア側 TTL。トークンが既に期限切れなら None。
    pub fn ttl(&self) -> Option<std::time::Duration> {
        let remaining = (self.expires_at - Utc::now()).num_milliseconds();
        u64::try_from(remaining)
            .ok()
            .filter(|ms| *ms > 0)
            .map(std::time::Duration::from_millis)
    }
}
