use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::entity::BlacklistEntry;
use crate::error::AuthSessionError;
use crate::keys;
use crate::store::SharedStore;

/// TokenBlacklist は失効させたトークン ID を、トークン自身の有効期限まで保持する。
///
/// 記録は 2 か所に置く。
///   - `blacklist:token:<id>`: 理由と期限を持つ JSON（TTL 付き）
///   - `blacklist:global`: スコアを期限（ミリ秒）とするソートセット。
///     TTL は最も遅いメンバーの期限に合わせ、追加のたびに期限切れメンバーを除く
///
/// `contains` はどちらか一方に有効な記録があれば true を返す。
pub struct TokenBlacklist {
    store: Arc<dyn SharedStore>,
}

impl TokenBlacklist {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// トークン ID を失効リストへ追加する。
    ///
    /// 個別記録を新たに作成した場合 true、既に記録があった場合 false を返す。
    /// 既に期限切れのトークンは記録せず false を返す。
    pub async fn add(
        &self,
        token_id: &str,
        reason: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, AuthSessionError> {
        validate_token_id(token_id)?;
        let entry = BlacklistEntry::new(token_id, reason, expires_at);
        let Some(ttl) = entry.ttl() else {
            tracing::debug!(token_id = %token_id, "token already expired; not blacklisted");
            return Ok(false);
        };

        let payload = serde_json::to_string(&entry)
            .map_err(|e| AuthSessionError::Internal(format!("serialization error: {e}")))?;
        let inserted = self
            .store
            .set_nx_ex(&keys::blacklist_token_key(token_id), &payload, ttl)
            .await?;
        self.store
            .zadd(keys::BLACKLIST_GLOBAL, token_id, expires_at.timestamp_millis() as f64)
            .await?;
        // 集合全体の TTL は最も遅い期限まで延ばし、期限切れメンバーはここで落とす
        self.store.extend_ttl(keys::BLACKLIST_GLOBAL, ttl).await?;
        self.prune_global().await?;

        tracing::debug!(token_id = %token_id, reason = %reason, inserted, "token blacklisted");
        Ok(inserted)
    }

    pub async fn contains(&self, token_id: &str) -> Result<bool, AuthSessionError> {
        validate_token_id(token_id)?;
        let now_ms = Utc::now().timestamp_millis() as f64;
        if let Some(expires_ms) = self.store.zscore(keys::BLACKLIST_GLOBAL, token_id).await? {
            if expires_ms > now_ms {
                return Ok(true);
            }
        }
        Ok(self.store.exists(&keys::blacklist_token_key(token_id)).await?)
    }

    /// 失効記録を取り除く。存在しない場合も成功する。
    pub async fn remove(&self, token_id: &str) -> Result<(), AuthSessionError> {
        validate_token_id(token_id)?;
        self.store.del(&keys::blacklist_token_key(token_id)).await?;
        self.store.zrem(keys::BLACKLIST_GLOBAL, token_id).await?;
        tracing::debug!(token_id = %token_id, "token removed from blacklist");
        Ok(())
    }

    pub async fn get_entry(&self, token_id: &str) -> Result<Option<BlacklistEntry>, AuthSessionError> {
        validate_token_id(token_id)?;
        let Some(raw) = self.store.get(&keys::blacklist_token_key(token_id)).await? else {
            return Ok(None);
        };
        let entry = serde_json::from_str(&raw)
            .map_err(|e| AuthSessionError::Internal(format!("corrupt blacklist entry {token_id}: {e}")))?;
        Ok(Some(entry))
    }

    /// 期限切れのメンバーを `blacklist:global` から取り除き、件数を返す。
    pub async fn prune_global(&self) -> Result<u64, AuthSessionError> {
        let now_ms = Utc::now().timestamp_millis() as f64;
        Ok(self
            .store
            .zrem_range_by_score(keys::BLACKLIST_GLOBAL, now_ms)
            .await?)
    }
}

fn validate_token_id(token_id: &str) -> Result<(), AuthSessionError> {
    if token_id.is_empty() {
        return Err(AuthSessionError::InvalidArgument("token_id is required".to_string()));
    }
    Ok(())
}
