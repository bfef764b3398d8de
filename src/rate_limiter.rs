use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entity::{KeyType, RateLimitConfig, RateLimitDecision};
use crate::error::AuthSessionError;
use crate::keys;
use crate::store::{window_millis, SharedStore};

/// Clock はレートリミット判定に使う現在時刻の供給元。
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// ManualClock は明示的に進める時計（テスト用）。
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now_ms: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.now_ms.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        millis_to_datetime(self.now_ms.load(Ordering::SeqCst))
    }
}

/// ストア障害で拒否したときに返す再試行までの秒数。
const DEGRADED_RETRY_SECS: u64 = 1;

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn millis_to_duration(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

fn validate(config: &RateLimitConfig, identifier: &str) -> Result<(), AuthSessionError> {
    if identifier.is_empty() {
        return Err(AuthSessionError::InvalidArgument("identifier is required".to_string()));
    }
    if config.endpoint.is_empty() {
        return Err(AuthSessionError::InvalidArgument("endpoint is required".to_string()));
    }
    if !keys::is_key_segment(&config.endpoint) {
        return Err(AuthSessionError::InvalidArgument(format!(
            "endpoint must not contain ':': {}",
            config.endpoint
        )));
    }
    if !keys::is_key_segment(config.key_type.as_str()) {
        return Err(AuthSessionError::InvalidArgument(format!(
            "key type must be non-empty and must not contain ':': {}",
            config.key_type
        )));
    }
    if config.limit == 0 {
        return Err(AuthSessionError::InvalidArgument("limit must be positive".to_string()));
    }
    if config.window.is_zero() {
        return Err(AuthSessionError::InvalidArgument("window must be positive".to_string()));
    }
    Ok(())
}

/// DistributedRateLimiter は共有ストア上のスライディングウィンドウログで判定する。
///
/// 古いマーカーの削除・件数確認・挿入はストア側で 1 つのアトミックな操作として実行するため、
/// 複数インスタンスから同時に呼ばれても上限を超えて許可しない。ストア障害は常にエラーとして返す。
pub struct DistributedRateLimiter {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
}

impl DistributedRateLimiter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn check(
        &self,
        config: &RateLimitConfig,
        identifier: &str,
    ) -> Result<RateLimitDecision, AuthSessionError> {
        validate(config, identifier)?;
        let key = keys::rate_key(config.key_type.as_str(), &config.endpoint, identifier);
        let now_ms = self.clock.now().timestamp_millis();
        let window_ms = window_millis(config.window);

        let outcome = self
            .store
            .sliding_window_hit(&key, config.limit, config.window, now_ms)
            .await?;

        let reset_ms = outcome.oldest_ms.unwrap_or(now_ms) + window_ms;
        let decision = if outcome.allowed {
            let remaining = config.limit.saturating_sub(outcome.count + 1);
            RateLimitDecision::allowed(remaining, config.limit, config.window, millis_to_datetime(reset_ms))
        } else {
            let retry_after = millis_to_duration(reset_ms - now_ms);
            tracing::debug!(
                key = %key,
                limit = config.limit,
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "rate limit exceeded"
            );
            RateLimitDecision::denied(config.limit, config.window, millis_to_datetime(reset_ms), retry_after)
        };
        Ok(decision)
    }

    /// マーカーを挿入せずに現在の使用状況を返す。キーが無ければ全枠が空いている。
    pub async fn status(
        &self,
        config: &RateLimitConfig,
        identifier: &str,
    ) -> Result<RateLimitDecision, AuthSessionError> {
        validate(config, identifier)?;
        let key = keys::rate_key(config.key_type.as_str(), &config.endpoint, identifier);
        let now_ms = self.clock.now().timestamp_millis();

        let snapshot = self
            .store
            .sliding_window_peek(&key, config.window, now_ms)
            .await?;

        let reset_ms = snapshot
            .oldest_ms
            .map_or(now_ms, |oldest| oldest + window_millis(config.window));
        let reset_time = millis_to_datetime(reset_ms);
        if snapshot.count < config.limit {
            Ok(RateLimitDecision::allowed(
                config.limit - snapshot.count,
                config.limit,
                config.window,
                reset_time,
            ))
        } else {
            Ok(RateLimitDecision::denied(
                config.limit,
                config.window,
                reset_time,
                millis_to_duration(reset_ms - now_ms),
            ))
        }
    }

    /// 識別子のウィンドウを消去する。
    pub async fn reset(&self, config: &RateLimitConfig, identifier: &str) -> Result<(), AuthSessionError> {
        validate(config, identifier)?;
        let key = keys::rate_key(config.key_type.as_str(), &config.endpoint, identifier);
        self.store.del(&key).await?;
        tracing::info!(key = %key, "rate limit reset");
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// OutagePolicy はストア障害時に `RateLimiter::admit` が取る挙動。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutagePolicy {
    /// 障害中は拒否する。
    #[default]
    FailClosed,
    /// 障害中は許可し、判定に degraded を付ける。
    FailOpen,
}

/// RateLimitPolicies はエンドポイント名からレートリミット設定を引くテーブル。
///
/// 未登録のエンドポイントは `api` の設定を使う。
#[derive(Debug, Clone)]
pub struct RateLimitPolicies {
    policies: HashMap<String, RateLimitConfig>,
}

impl RateLimitPolicies {
    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    pub fn insert(&mut self, config: RateLimitConfig) {
        self.policies.insert(config.endpoint.clone(), config);
    }

    pub fn get(&self, endpoint: &str) -> RateLimitConfig {
        self.policies
            .get(endpoint)
            .or_else(|| self.policies.get("api"))
            .cloned()
            .unwrap_or_else(RateLimitConfig::api)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for RateLimitPolicies {
    fn default() -> Self {
        let mut policies = Self::empty();
        for config in [
            RateLimitConfig::auth(),
            RateLimitConfig::media_upload(),
            RateLimitConfig::messaging(),
            RateLimitConfig::matching(),
            RateLimitConfig::api(),
        ] {
            policies.insert(config);
        }
        policies
    }
}

/// RateLimiter はポリシーテーブルと障害時ポリシーを持つフロント。
pub struct RateLimiter {
    engine: DistributedRateLimiter,
    policies: RateLimitPolicies,
    outage_policy: OutagePolicy,
}

impl RateLimiter {
    pub fn new(engine: DistributedRateLimiter, policies: RateLimitPolicies, outage_policy: OutagePolicy) -> Self {
        Self {
            engine,
            policies,
            outage_policy,
        }
    }

    pub fn policies(&self) -> &RateLimitPolicies {
        &self.policies
    }

    pub async fn check(
        &self,
        config: &RateLimitConfig,
        identifier: &str,
    ) -> Result<RateLimitDecision, AuthSessionError> {
        self.engine.check(config, identifier).await
    }

    pub async fn status(
        &self,
        config: &RateLimitConfig,
        identifier: &str,
    ) -> Result<RateLimitDecision, AuthSessionError> {
        self.engine.status(config, identifier).await
    }

    pub async fn reset(&self, config: &RateLimitConfig, identifier: &str) -> Result<(), AuthSessionError> {
        self.engine.reset(config, identifier).await
    }

    pub async fn check_endpoint(&self, endpoint: &str, identifier: &str) -> Result<RateLimitDecision, AuthSessionError> {
        self.engine.check(&self.policies.get(endpoint), identifier).await
    }

    pub async fn status_endpoint(&self, endpoint: &str, identifier: &str) -> Result<RateLimitDecision, AuthSessionError> {
        self.engine.status(&self.policies.get(endpoint), identifier).await
    }

    pub async fn reset_endpoint(&self, endpoint: &str, identifier: &str) -> Result<(), AuthSessionError> {
        self.engine.reset(&self.policies.get(endpoint), identifier).await
    }

    /// エンドポイントのポリシーで判定し、ストア障害時は OutagePolicy に従う。
    ///
    /// 入力不正など障害以外のエラーはそのまま返す。
    pub async fn admit(
        &self,
        endpoint: &str,
        key_type: KeyType,
        identifier: &str,
    ) -> Result<RateLimitDecision, AuthSessionError> {
        let config = self.policies.get(endpoint).for_key_type(key_type);
        match self.engine.check(&config, identifier).await {
            Err(AuthSessionError::StoreUnavailable(reason)) => {
                let now = self.engine.now();
                let mut decision = match self.outage_policy {
                    OutagePolicy::FailOpen => {
                        tracing::warn!(endpoint = %config.endpoint, reason = %reason, "rate limit store unavailable; admitting");
                        let reset_time = now
                            + chrono::Duration::from_std(config.window).unwrap_or(chrono::Duration::zero());
                        RateLimitDecision::allowed(config.limit, config.limit, config.window, reset_time)
                    }
                    OutagePolicy::FailClosed => {
                        tracing::warn!(endpoint = %config.endpoint, reason = %reason, "rate limit store unavailable; rejecting");
                        // Retry-After と X-RateLimit-Reset が同じ時刻を指すようにする
                        let reset_time = now + chrono::Duration::seconds(DEGRADED_RETRY_SECS as i64);
                        RateLimitDecision::denied(
                            config.limit,
                            config.window,
                            reset_time,
                            Duration::from_secs(DEGRADED_RETRY_SECS),
                        )
                    }
                };
                decision.degraded = true;
                Ok(decision)
            }
            other => other,
        }
    }
}
