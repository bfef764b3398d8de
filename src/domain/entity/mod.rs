pub mod blacklist;
pub mod claims;
pub mod rate_limit;
pub mod session;

pub use blacklist::BlacklistEntry;
pub use claims::{TokenClaims, TokenPair, TokenType};
pub use rate_limit::{KeyType, RateLimitConfig, RateLimitDecision};
pub use session::{CreateSessionRequest, DeviceInfo, Session};
