//! 共有ストア上のキー設計。
//!
//!   - `session:<id>`: セッション JSON
//!   - `user-sessions:<user_id>`: ユーザーに紐づくセッション ID の SET
//!   - `blacklist:token:<id>`: 失効トークンの記録 JSON
//!   - `blacklist:global`: 失効トークン ID のソートセット（スコア = 失効記録の期限ミリ秒）
//!   - `rate:<key_type>:<endpoint>:<identifier>`: レートリミットのマーカー
//!
//! `key_type` と `endpoint` は `:` を含まないこと。identifier は末尾なので `:` を含んでよい（IPv6 など）。

pub const SESSION_PREFIX: &str = "session:";
pub const USER_SESSIONS_PREFIX: &str = "user-sessions:";
pub const BLACKLIST_TOKEN_PREFIX: &str = "blacklist:token:";
pub const BLACKLIST_GLOBAL: &str = "blacklist:global";
pub const RATE_PREFIX: &str = "rate:";

pub fn session_key(session_id: &str) -> String {
    format!("{SESSION_PREFIX}{session_id}")
}

pub fn user_sessions_key(user_id: &str) -> String {
    format!("{USER_SESSIONS_PREFIX}{user_id}")
}

/// `user-sessions:<user_id>` からユーザー ID を取り出す。
pub fn user_id_from_index_key(key: &str) -> Option<&str> {
    key.strip_prefix(USER_SESSIONS_PREFIX)
        .filter(|user_id| !user_id.is_empty())
}

pub fn blacklist_token_key(token_id: &str) -> String {
    format!("{BLACKLIST_TOKEN_PREFIX}{token_id}")
}

/// キーの中間要素として使えるか（空でなく区切り文字を含まない）。
pub fn is_key_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(':')
}

pub fn rate_key(key_type: &str, endpoint: &str, identifier: &str) -> String {
    format!("{RATE_PREFIX}{key_type}:{endpoint}:{identifier}")
}
