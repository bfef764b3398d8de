//! 複数インスタンスで共有する TTL ストア上に、セッション管理・トークン失効・
//! スライディングウィンドウ方式のレートリミットを実装する。

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod issuer;
pub mod keys;
pub mod logging;
pub mod presence;
pub mod rate_limiter;
pub mod reconcile;
pub mod session_manager;
pub mod store;
pub mod token_blacklist;
pub mod token_manager;

pub use domain::entity::{
    BlacklistEntry, CreateSessionRequest, DeviceInfo, KeyType, RateLimitConfig, RateLimitDecision,
    Session, TokenClaims, TokenPair, TokenType,
};
pub use app::AppState;
pub use error::{AuthSessionError, StoreError};
pub use issuer::{CredentialIssuer, JwtCredentialIssuer};
pub use presence::{NoopPresenceNotifier, PresenceNotifier};
pub use rate_limiter::{
    Clock, DistributedRateLimiter, ManualClock, OutagePolicy, RateLimitPolicies, RateLimiter,
    SystemClock,
};
pub use reconcile::{ReconcileReport, Reconciler};
pub use session_manager::SessionManager;
pub use store::{InMemoryStore, SharedStore};
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use token_blacklist::TokenBlacklist;
pub use token_manager::{TokenManager, TokenSettings};
