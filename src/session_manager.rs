use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::entity::{CreateSessionRequest, Session};
use crate::error::AuthSessionError;
use crate::keys;
use crate::presence::{NoopPresenceNotifier, PresenceNotifier};
use crate::store::SharedStore;

/// セッションの既定寿命（7 日）。
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
pub const DEFAULT_MAX_SESSIONS_PER_USER: usize = 10;

/// SessionManager はセッションのライフサイクルとユーザー別セッション索引を管理する。
///
/// 状態はすべて共有ストアに置き、インスタンス間で共有する。
/// 索引に残った古いエントリは読み取り時に取り除く。
pub struct SessionManager {
    store: Arc<dyn SharedStore>,
    presence: Arc<dyn PresenceNotifier>,
    session_ttl: Duration,
    max_sessions_per_user: usize,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SharedStore>, session_ttl: Duration, max_sessions_per_user: usize) -> Self {
        Self {
            store,
            presence: Arc::new(NoopPresenceNotifier),
            session_ttl,
            max_sessions_per_user,
        }
    }

    /// オンライン状態の通知先を差し替える。
    pub fn with_presence(mut self, presence: Arc<dyn PresenceNotifier>) -> Self {
        self.presence = presence;
        self
    }

    /// セッションを作成し、ユーザー索引へ登録する。
    ///
    /// 有効セッション数が上限を超えた場合は作成日時の古いものから退去させる。
    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<Session, AuthSessionError> {
        if request.user_id.is_empty() {
            return Err(AuthSessionError::InvalidArgument("user_id is required".to_string()));
        }
        if request.device_id.is_empty() {
            return Err(AuthSessionError::InvalidArgument("device_id is required".to_string()));
        }

        let ttl = chrono::Duration::from_std(self.session_ttl)
            .map_err(|e| AuthSessionError::Internal(format!("invalid session ttl: {e}")))?;
        let session = Session::new(request, Uuid::new_v4().to_string(), ttl);

        let payload = serde_json::to_string(&session)
            .map_err(|e| AuthSessionError::Internal(format!("serialization error: {e}")))?;
        self.store
            .set_ex(&keys::session_key(&session.id), &payload, self.session_ttl)
            .await?;

        let index_key = keys::user_sessions_key(&session.user_id);
        self.store.sadd(&index_key, &session.id).await?;
        self.store.expire(&index_key, self.session_ttl).await?;

        tracing::debug!(
            session_id = %session.id,
            user_id = %session.user_id,
            device_id = %session.device_id,
            "session created"
        );

        self.evict_over_limit(&session).await?;
        self.notify_started(&session).await;

        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session, AuthSessionError> {
        if session_id.is_empty() {
            return Err(AuthSessionError::InvalidArgument("session_id is required".to_string()));
        }
        self.load(session_id)
            .await?
            .ok_or_else(|| AuthSessionError::NotFound(format!("session not found: {session_id}")))
    }

    /// 最終アクティビティを更新し、TTL を張り直す（スライディング有効期限）。
    ///
    /// 同時更新は後勝ち。並行して削除されたセッションは復活させない。
    pub async fn update_activity(&self, session_id: &str) -> Result<Session, AuthSessionError> {
        let mut session = self.get_session(session_id).await?;
        if !session.is_alive() {
            return Err(AuthSessionError::SessionInactive(session_id.to_string()));
        }

        let ttl = chrono::Duration::from_std(self.session_ttl)
            .map_err(|e| AuthSessionError::Internal(format!("invalid session ttl: {e}")))?;
        session.touch(ttl);

        let payload = serde_json::to_string(&session)
            .map_err(|e| AuthSessionError::Internal(format!("serialization error: {e}")))?;
        let written = self
            .store
            .set_xx_ex(&keys::session_key(session_id), &payload, self.session_ttl)
            .await?;
        if !written {
            return Err(AuthSessionError::NotFound(format!("session not found: {session_id}")));
        }
        self.store
            .expire(&keys::user_sessions_key(&session.user_id), self.session_ttl)
            .await?;

        tracing::debug!(session_id = %session_id, "session activity updated");
        Ok(session)
    }

    /// セッションを削除し索引から外す。存在しない場合も成功する。
    pub async fn invalidate_session(&self, session_id: &str) -> Result<(), AuthSessionError> {
        if session_id.is_empty() {
            return Err(AuthSessionError::InvalidArgument("session_id is required".to_string()));
        }
        let Some(session) = self.load(session_id).await? else {
            tracing::debug!(session_id = %session_id, "session already gone");
            return Ok(());
        };

        self.store.del(&keys::session_key(session_id)).await?;
        self.store
            .srem(&keys::user_sessions_key(&session.user_id), session_id)
            .await?;

        tracing::debug!(session_id = %session_id, user_id = %session.user_id, "session invalidated");
        self.notify_ended(&session.user_id, session_id).await;
        Ok(())
    }

    /// ユーザーの全セッションを無効化し、削除したセッション数を返す。
    ///
    /// 索引はメンバー単位で取り除くため、並行して作成されたセッションは索引に残る。
    pub async fn invalidate_all_user_sessions(&self, user_id: &str) -> Result<u32, AuthSessionError> {
        if user_id.is_empty() {
            return Err(AuthSessionError::InvalidArgument("user_id is required".to_string()));
        }
        let index_key = keys::user_sessions_key(user_id);
        let members = self.store.smembers(&index_key).await?;

        let mut count = 0u32;
        for session_id in &members {
            if self.store.del(&keys::session_key(session_id)).await? {
                count += 1;
                self.notify_ended(user_id, session_id).await;
            }
            self.store.srem(&index_key, session_id).await?;
        }

        tracing::info!(user_id = %user_id, count, "all user sessions invalidated");
        Ok(count)
    }

    /// ユーザーの有効なセッションを作成日時の昇順で返す。
    pub async fn get_user_sessions(&self, user_id: &str) -> Result<Vec<Session>, AuthSessionError> {
        if user_id.is_empty() {
            return Err(AuthSessionError::InvalidArgument("user_id is required".to_string()));
        }
        let index_key = keys::user_sessions_key(user_id);
        let members = self.store.smembers(&index_key).await?;

        let mut sessions = Vec::with_capacity(members.len());
        for session_id in members {
            match self.load(&session_id).await? {
                Some(session) if session.is_alive() => sessions.push(session),
                Some(_) => {}
                None => {
                    tracing::warn!(
                        user_id = %user_id,
                        session_id = %session_id,
                        "removing stale session index entry"
                    );
                    self.store.srem(&index_key, &session_id).await?;
                }
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    pub async fn is_user_online(&self, user_id: &str) -> Result<bool, AuthSessionError> {
        if user_id.is_empty() {
            return Err(AuthSessionError::InvalidArgument("user_id is required".to_string()));
        }
        if self.store.scard(&keys::user_sessions_key(user_id)).await? == 0 {
            return Ok(false);
        }
        Ok(!self.get_user_sessions(user_id).await?.is_empty())
    }

    /// 有効なセッションを 1 つ以上持つユーザー ID の一覧。
    pub async fn get_online_users(&self) -> Result<Vec<String>, AuthSessionError> {
        let index_keys = self.store.scan_keys(keys::USER_SESSIONS_PREFIX).await?;
        let mut users = Vec::new();
        for key in &index_keys {
            let Some(user_id) = keys::user_id_from_index_key(key) else {
                continue;
            };
            if self.is_user_online(user_id).await? {
                users.push(user_id.to_string());
            }
        }
        users.sort();
        Ok(users)
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, AuthSessionError> {
        let Some(raw) = self.store.get(&keys::session_key(session_id)).await? else {
            return Ok(None);
        };
        let session = serde_json::from_str(&raw)
            .map_err(|e| AuthSessionError::Internal(format!("corrupt session record {session_id}: {e}")))?;
        Ok(Some(session))
    }

    async fn evict_over_limit(&self, current: &Session) -> Result<(), AuthSessionError> {
        if self.max_sessions_per_user == 0 {
            return Ok(());
        }
        let sessions = self.get_user_sessions(&current.user_id).await?;
        if sessions.len() <= self.max_sessions_per_user {
            return Ok(());
        }

        let excess = sessions.len() - self.max_sessions_per_user;
        for oldest in sessions.iter().filter(|s| s.id != current.id).take(excess) {
            tracing::info!(
                user_id = %current.user_id,
                session_id = %oldest.id,
                max_sessions = self.max_sessions_per_user,
                "evicting oldest session"
            );
            self.invalidate_session(&oldest.id).await?;
        }
        Ok(())
    }

    async fn notify_started(&self, session: &Session) {
        if let Err(e) = self.presence.session_started(&session.user_id, &session.id).await {
            tracing::warn!(error = %e, session_id = %session.id, "failed to publish session started");
        }
    }

    async fn notify_ended(&self, user_id: &str, session_id: &str) {
        if let Err(e) = self.presence.session_ended(user_id, session_id).await {
            tracing::warn!(error = %e, session_id = %session_id, "failed to publish session ended");
        }
    }
}
