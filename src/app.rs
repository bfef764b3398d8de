use std::sync::Arc;

use crate::config::Config;
use crate::issuer::JwtCredentialIssuer;
use crate::rate_limiter::{DistributedRateLimiter, RateLimiter};
use crate::session_manager::SessionManager;
use crate::store::SharedStore;
use crate::token_blacklist::TokenBlacklist;
use crate::token_manager::TokenManager;

/// AppState は設定から組み立てたコンポーネント一式。
///
/// いずれも同じ共有ストアのクライアントであり、複数インスタンスで同じ状態を参照する。
/// `token` セクションが無い場合はトークン発行を無効とし、`tokens` は None になる。
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub blacklist: Arc<TokenBlacklist>,
    pub tokens: Option<Arc<TokenManager>>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn from_config(cfg: &Config, store: Arc<dyn SharedStore>) -> Self {
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            cfg.session.ttl(),
            cfg.session.max_sessions_per_user,
        ));
        let blacklist = Arc::new(TokenBlacklist::new(store.clone()));

        let tokens = cfg.token.as_ref().map(|token_cfg| {
            let issuer = Arc::new(JwtCredentialIssuer::new(&token_cfg.signing_secret, &token_cfg.issuer));
            Arc::new(TokenManager::new(
                sessions.clone(),
                blacklist.clone(),
                issuer,
                token_cfg.settings(),
            ))
        });

        let rate_limiter = Arc::new(RateLimiter::new(
            DistributedRateLimiter::new(store),
            cfg.rate_limit.policy_table(),
            cfg.rate_limit.outage_policy,
        ));

        Self {
            sessions,
            blacklist,
            tokens,
            rate_limiter,
        }
    }

    pub fn tokens_enabled(&self) -> bool {
        self.tokens.is_some()
    }
}
