pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// SlidingWindowOutcome はスライディングウィンドウ判定（挿入あり）の結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowOutcome {
    pub allowed: bool,
    /// 判定前にウィンドウ内に残っていたマーカー数。
    pub count: u64,
    /// 判定後のウィンドウ内で最も古いマーカーの時刻（Unix epoch ミリ秒）。
    pub oldest_ms: Option<i64>,
}

/// SlidingWindowSnapshot はマーカーを挿入しない読み取り専用の使用状況。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowSnapshot {
    pub count: u64,
    pub oldest_ms: Option<i64>,
}

/// SharedStore は全インスタンスから共有される TTL 付きキーバリューストア。
///
/// 各コンポーネントはこのトレイトのステートレスなクライアントであり、
/// 可変状態はすべてストア側に置く。1 回の呼び出しは 1 キーに対してアトミックである。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// キーが存在しない場合のみ書き込む。書き込んだ場合 true を返す。
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// キーが存在する場合のみ上書きする。書き込んだ場合 true を返す。
    async fn set_xx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// TTL を再設定する。キーが存在しない場合 false を返す。
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// 残り TTL が ttl より短い（または無期限の）場合だけ TTL を ttl に延ばす。
    /// キーが存在しない場合 false を返す。
    async fn extend_ttl(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn scard(&self, key: &str) -> Result<u64, StoreError>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError>;

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// スコアが max 以下のメンバーを削除し、削除件数を返す。
    async fn zrem_range_by_score(&self, key: &str, max: f64) -> Result<u64, StoreError>;

    /// 指定プレフィックスで始まるキーを列挙する。
    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// 古いマーカーの削除・件数確認・挿入を 1 つのアトミックな操作として実行する。
    async fn sliding_window_hit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        now_ms: i64,
    ) -> Result<SlidingWindowOutcome, StoreError>;

    /// マーカーを挿入せずにウィンドウ内の件数と最古マーカーを返す。
    async fn sliding_window_peek(
        &self,
        key: &str,
        window: Duration,
        now_ms: i64,
    ) -> Result<SlidingWindowSnapshot, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// ウィンドウ長をミリ秒に変換する。0 は 1 ミリ秒に切り上げる。
pub(crate) fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1)
}
