use std::sync::Arc;

use crate::domain::entity::{Session, TokenClaims, TokenPair, TokenType};
use crate::error::AuthSessionError;
use crate::issuer::CredentialIssuer;
use crate::session_manager::SessionManager;
use crate::token_blacklist::TokenBlacklist;

/// アクセストークンの既定寿命（15 分）。
pub const DEFAULT_ACCESS_TTL_SECONDS: i64 = 900;
/// リフレッシュトークンの既定寿命（7 日）。
pub const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 3600;

/// TokenSettings はトークン発行時のパラメータ。
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub issuer: String,
    pub access_ttl: chrono::Duration,
    pub refresh_ttl: chrono::Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            issuer: "k1s0-auth-session".to_string(),
            access_ttl: chrono::Duration::seconds(DEFAULT_ACCESS_TTL_SECONDS),
            refresh_ttl: chrono::Duration::seconds(DEFAULT_REFRESH_TTL_SECONDS),
        }
    }
}

/// TokenManager はセッションと失効リストを組み合わせ、
/// リフレッシュトークンのローテーション・一括無効化・セッション連動の検証を行う。
///
/// リフレッシュトークンは ISSUED から ROTATED / BLACKLISTED / 期限切れのいずれかへ
/// 一方向にしか遷移しない。
pub struct TokenManager {
    sessions: Arc<SessionManager>,
    blacklist: Arc<TokenBlacklist>,
    issuer: Arc<dyn CredentialIssuer>,
    settings: TokenSettings,
}

impl TokenManager {
    pub fn new(
        sessions: Arc<SessionManager>,
        blacklist: Arc<TokenBlacklist>,
        issuer: Arc<dyn CredentialIssuer>,
        settings: TokenSettings,
    ) -> Self {
        Self {
            sessions,
            blacklist,
            issuer,
            settings,
        }
    }

    /// ログイン直後のセッションに対してアクセス・リフレッシュトークンの組を発行する。
    pub fn issue_token_pair(&self, session: &Session) -> Result<TokenPair, AuthSessionError> {
        if !session.is_alive() {
            return Err(AuthSessionError::SessionInactive(session.id.clone()));
        }
        let access = TokenClaims::new(
            &session.user_id,
            Some(session.id.as_str()),
            Some(session.device_id.as_str()),
            TokenType::Access,
            &self.settings.issuer,
            self.settings.access_ttl,
        );
        let refresh = TokenClaims::new(
            &session.user_id,
            Some(session.id.as_str()),
            Some(session.device_id.as_str()),
            TokenType::Refresh,
            &self.settings.issuer,
            self.settings.refresh_ttl,
        );

        Ok(TokenPair {
            access_token: self.issuer.sign(&access)?,
            refresh_token: self.issuer.sign(&refresh)?,
            access_expires_at: access.expires_at(),
            refresh_expires_at: refresh.expires_at(),
        })
    }

    /// リフレッシュトークンを 1 回限りで新しいトークンの組へ交換する。
    ///
    /// 旧トークンの失効記録は新トークンを返す前に書き込む。記録の作成に成功した
    /// 呼び出しだけが新トークンを受け取り、書き込みに失敗した場合は交換しない。
    pub async fn rotate_refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AuthSessionError> {
        let claims = self.issuer.verify(refresh_token)?;
        if !claims.is_refresh() {
            return Err(AuthSessionError::InvalidCredential("not a refresh token".to_string()));
        }
        let session_id = bound_session(&claims)?;

        let claimed = self
            .blacklist
            .add(&claims.jti, "rotated", claims.expires_at())
            .await?;
        if !claimed {
            tracing::warn!(
                user_id = %claims.sub,
                token_id = %claims.jti,
                "refresh token reuse rejected"
            );
            return Err(AuthSessionError::TokenRevoked(claims.jti.clone()));
        }

        // 所有者と有効性を確かめてから TTL を延ばす
        let current = self
            .sessions
            .get_session(session_id)
            .await
            .map_err(|e| inactive_on_missing(e, session_id))?;
        if !current.is_alive() {
            return Err(AuthSessionError::SessionInactive(session_id.to_string()));
        }
        if current.user_id != claims.sub {
            return Err(AuthSessionError::InvalidCredential(
                "token subject does not match session".to_string(),
            ));
        }
        let session = self
            .sessions
            .update_activity(session_id)
            .await
            .map_err(|e| inactive_on_missing(e, session_id))?;

        let pair = self.issue_token_pair(&session)?;
        tracing::debug!(session_id = %session.id, user_id = %session.user_id, "refresh token rotated");
        Ok(pair)
    }

    /// 資格情報を検証し、失効していないこと・紐づくセッションが有効であることを確認する。
    pub async fn validate_with_session(&self, credential: &str) -> Result<TokenClaims, AuthSessionError> {
        let claims = self.issuer.verify(credential)?;
        if self.blacklist.contains(&claims.jti).await? {
            return Err(AuthSessionError::TokenRevoked(claims.jti));
        }

        let session_id = bound_session(&claims)?;
        let session = self
            .sessions
            .get_session(session_id)
            .await
            .map_err(|e| inactive_on_missing(e, session_id))?;
        if !session.is_alive() {
            return Err(AuthSessionError::SessionInactive(session_id.to_string()));
        }
        if session.user_id != claims.sub {
            return Err(AuthSessionError::InvalidCredential(
                "token subject does not match session".to_string(),
            ));
        }
        Ok(claims)
    }

    /// ユーザーの全トークンを無効化する。
    ///
    /// トークン個別には失効させず、全セッションを削除してセッション連動の検証で弾く。
    pub async fn invalidate_user_tokens(&self, user_id: &str) -> Result<u32, AuthSessionError> {
        let count = self.sessions.invalidate_all_user_sessions(user_id).await?;
        tracing::info!(user_id = %user_id, sessions = count, "user tokens invalidated");
        Ok(count)
    }

    /// 資格情報を自身の有効期限まで失効させる（強制失効）。
    pub async fn revoke_token(&self, credential: &str, reason: &str) -> Result<(), AuthSessionError> {
        let claims = self.issuer.verify(credential)?;
        self.blacklist
            .add(&claims.jti, reason, claims.expires_at())
            .await?;
        tracing::info!(user_id = %claims.sub, token_id = %claims.jti, reason = %reason, "token revoked");
        Ok(())
    }

    /// 資格情報を失効させ、紐づくセッションを削除する。
    pub async fn logout(&self, credential: &str) -> Result<(), AuthSessionError> {
        let claims = self.issuer.verify(credential)?;
        self.blacklist
            .add(&claims.jti, "logout", claims.expires_at())
            .await?;
        if let Some(session_id) = claims.sid.as_deref() {
            self.sessions.invalidate_session(session_id).await?;
        }
        tracing::debug!(user_id = %claims.sub, "logged out");
        Ok(())
    }
}

fn bound_session(claims: &TokenClaims) -> Result<&str, AuthSessionError> {
    claims
        .sid
        .as_deref()
        .filter(|sid| !sid.is_empty())
        .ok_or_else(|| AuthSessionError::InvalidCredential("credential is not bound to a session".to_string()))
}

fn inactive_on_missing(err: AuthSessionError, session_id: &str) -> AuthSessionError {
    if err.is_not_found() {
        AuthSessionError::SessionInactive(session_id.to_string())
    } else {
        err
    }
}
