use std::time::Duration;

use thiserror::Error;

/// StoreError は共有 TTL ストアとの通信で発生するエラー。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store command timed out after {0:?}")]
    Timeout(Duration),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),
}

/// AuthSessionError はセッション・トークン・レートリミット各コンポーネントが返すエラー。
#[derive(Debug, Error)]
pub enum AuthSessionError {
    /// 対象が存在しない。想定内のエラーであり error レベルでは記録しない。
    #[error("not found: {0}")]
    NotFound(String),
    /// 資格情報は構造上有効だが、紐づくセッションが失効している。
    #[error("session inactive: {0}")]
    SessionInactive(String),
    #[error("token revoked: {0}")]
    TokenRevoked(String),
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    /// ストアへ問い合わせる前に拒否された入力。
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthSessionError {
    /// 認証失敗として利用者に返すべきエラーかどうか。
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::SessionInactive(_) | Self::TokenRevoked(_) | Self::InvalidCredential(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// 利用者向けメッセージ。認証失敗は原因を区別せず同一の文言にする。
    pub fn public_message(&self) -> &'static str {
        match self {
            e if e.is_auth_failure() => "unauthorized",
            Self::NotFound(_) => "not found",
            Self::InvalidArgument(_) => "invalid request",
            Self::StoreUnavailable(_) => "service unavailable",
            _ => "internal error",
        }
    }
}

impl From<StoreError> for AuthSessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(e) => Self::Internal(format!("serialization error: {e}")),
            other => Self::StoreUnavailable(other.to_string()),
        }
    }
}
