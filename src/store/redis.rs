use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, RedisResult, Script};

use super::{window_millis, SharedStore, SlidingWindowOutcome, SlidingWindowSnapshot};
use crate::error::StoreError;

/// SLIDING_WINDOW_HIT_SCRIPT はスライディングウィンドウログを 1 回のスクリプト実行で判定する。
///
/// KEYS[1]: ソートセットキー
/// ARGV[1]: 最大リクエスト数 (limit)
/// ARGV[2]: ウィンドウ長（ミリ秒）
/// ARGV[3]: 現在時刻（Unix epoch ミリ秒）
/// ARGV[4]: マーカーのメンバー名（インスタンス間で一意）
///
/// Returns: {allowed (0/1), count, oldest (-1 は空)}
const SLIDING_WINDOW_HIT_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)

local count = redis.call('ZCARD', key)

local allowed = 0
if count < limit then
    redis.call('ZADD', key, now, member)
    redis.call('PEXPIRE', key, window)
    allowed = 1
end

local oldest = -1
local first = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if first[2] then
    oldest = tonumber(first[2])
end

return {allowed, count, oldest}
"#;

/// SLIDING_WINDOW_PEEK_SCRIPT はマーカーを挿入せずにウィンドウ内の件数と最古マーカーを返す。
///
/// KEYS[1]: ソートセットキー
/// ARGV[1]: ウィンドウ長（ミリ秒）
/// ARGV[2]: 現在時刻（Unix epoch ミリ秒）
const SLIDING_WINDOW_PEEK_SCRIPT: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local window_start = '(' .. tostring(now - window)

local count = redis.call('ZCOUNT', key, window_start, '+inf')

local oldest = -1
local first = redis.call('ZRANGEBYSCORE', key, window_start, '+inf', 'WITHSCORES', 'LIMIT', 0, 1)
if first[2] then
    oldest = tonumber(first[2])
end

return {count, oldest}
"#;

/// EXTEND_TTL_SCRIPT は残り TTL が指定値より短い場合だけ PEXPIRE する。
///
/// KEYS[1]: 対象キー
/// ARGV[1]: TTL（ミリ秒）
///
/// Returns: 0 はキーなし、1 はキーあり
const EXTEND_TTL_SCRIPT: &str = r#"
local ttl = tonumber(ARGV[1])
local current = redis.call('PTTL', KEYS[1])
if current == -2 then
    return 0
end
if current == -1 or current < ttl then
    redis.call('PEXPIRE', KEYS[1], ttl)
end
return 1
"#;

const SCAN_COUNT: usize = 200;

/// RedisStore は Redis ベースの SharedStore 実装。
///
/// 全コマンドに `command_timeout` の期限を設ける。Lua スクリプトはサーバー側で
/// アトミックに実行されるため、タイムアウトした呼び出しは全適用か未適用のどちらかになる。
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    command_timeout: Duration,
    hit_script: Script,
    peek_script: Script,
    extend_script: Script,
}

impl RedisStore {
    /// Redis URL から接続を確立して RedisStore を生成する。
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `connect_timeout` - 初回接続の期限
    /// * `command_timeout` - 各コマンドの期限
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(map_redis_error)?;
        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(connect_timeout))?
            .map_err(map_redis_error)?;
        Ok(Self::from_connection(conn, command_timeout))
    }

    /// 既存の ConnectionManager から RedisStore を生成する。
    pub fn from_connection(conn: ConnectionManager, command_timeout: Duration) -> Self {
        Self {
            conn,
            command_timeout,
            hit_script: Script::new(SLIDING_WINDOW_HIT_SCRIPT),
            peek_script: Script::new(SLIDING_WINDOW_PEEK_SCRIPT),
            extend_script: Script::new(EXTEND_TTL_SCRIPT),
        }
    }

    async fn run<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => result.map_err(map_redis_error),
            Err(_) => Err(StoreError::Timeout(self.command_timeout)),
        }
    }
}

fn map_redis_error(err: RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn score_to_ms(score: i64) -> Option<i64> {
    (score >= 0).then_some(score)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.run(conn.get::<_, Option<String>>(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.run(conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl)))
            .await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        // Atomic SET key value NX PX milliseconds
        let result: Option<String> = self
            .run(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(result.is_some())
    }

    async fn set_xx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let result: Option<String> = self
            .run(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("XX")
                    .arg("PX")
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(result.is_some())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = self.run(conn.del(key)).await?;
        Ok(count > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        self.run(conn.exists::<_, bool>(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let millis = i64::try_from(ttl_millis(ttl)).unwrap_or(i64::MAX);
        self.run(conn.pexpire::<_, bool>(key, millis)).await
    }

    async fn extend_ttl(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let present: i64 = self
            .run(
                self.extend_script
                    .key(key)
                    .arg(ttl_millis(ttl))
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(present == 1)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let added: i64 = self.run(conn.sadd(key, member)).await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self.run(conn.srem(key, member)).await?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.run(conn.smembers::<_, Vec<String>>(key)).await
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        self.run(conn.scard::<_, u64>(key)).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = self.run(conn.zadd(key, member, score)).await?;
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        let mut conn = self.conn.clone();
        self.run(conn.zscore::<_, _, Option<f64>>(key, member)).await
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self.run(conn.zrem(key, member)).await?;
        Ok(removed > 0)
    }

    async fn zrem_range_by_score(&self, key: &str, max: f64) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        self.run(conn.zrembyscore::<_, _, _, u64>(key, "-inf", max))
            .await
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .run(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async(&mut conn),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN は同じキーを複数回返すことがある
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn sliding_window_hit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        now_ms: i64,
    ) -> Result<SlidingWindowOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let member = format!("{now_ms}:{}", uuid::Uuid::new_v4());
        let result: Vec<i64> = self
            .run(
                self.hit_script
                    .key(key)
                    .arg(limit)
                    .arg(window_millis(window))
                    .arg(now_ms)
                    .arg(member)
                    .invoke_async(&mut conn),
            )
            .await?;

        if result.len() < 3 {
            return Err(StoreError::UnexpectedReply(
                "unexpected Lua script result".to_string(),
            ));
        }

        Ok(SlidingWindowOutcome {
            allowed: result[0] == 1,
            count: u64::try_from(result[1]).unwrap_or(0),
            oldest_ms: score_to_ms(result[2]),
        })
    }

    async fn sliding_window_peek(
        &self,
        key: &str,
        window: Duration,
        now_ms: i64,
    ) -> Result<SlidingWindowSnapshot, StoreError> {
        let mut conn = self.conn.clone();
        let result: Vec<i64> = self
            .run(
                self.peek_script
                    .key(key)
                    .arg(window_millis(window))
                    .arg(now_ms)
                    .invoke_async(&mut conn),
            )
            .await?;

        if result.len() < 2 {
            return Err(StoreError::UnexpectedReply(
                "unexpected Lua script result".to_string(),
            ));
        }

        Ok(SlidingWindowSnapshot {
            count: u64::try_from(result[0]).unwrap_or(0),
            oldest_ms: score_to_ms(result[1]),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = self.run(redis::cmd("PING").query_async(&mut conn)).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::UnexpectedReply(pong))
        }
    }
}
