use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{window_millis, SharedStore, SlidingWindowOutcome, SlidingWindowSnapshot};
use crate::error::StoreError;

enum Value {
    Str(String),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| exp <= Instant::now())
    }
}

/// InMemoryStore はプロセス内で完結する SharedStore 実装。
///
/// 全操作を単一の Mutex の下で実行するため、各呼び出しはアトミックになる。
/// 期限切れキーはアクセス時に削除する。テストと単一インスタンス構成向け。
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 期限切れでないキーの件数を返す。テスト用ヘルパー。
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|e| !e.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(Entry::is_expired) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::UnexpectedReply(format!(
        "WRONGTYPE operation against a key holding the wrong kind of value: {key}"
    ))
}

fn set_of<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Result<Option<&'a mut HashSet<String>>, StoreError> {
    match live(entries, key) {
        Some(Entry {
            value: Value::Set(set),
            ..
        }) => Ok(Some(set)),
        Some(_) => Err(wrong_type(key)),
        None => Ok(None),
    }
}

fn zset_of<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Result<Option<&'a mut HashMap<String, f64>>, StoreError> {
    match live(entries, key) {
        Some(Entry {
            value: Value::ZSet(zset),
            ..
        }) => Ok(Some(zset)),
        Some(_) => Err(wrong_type(key)),
        None => Ok(None),
    }
}

fn oldest_score(zset: &HashMap<String, f64>) -> Option<i64> {
    zset.values()
        .copied()
        .reduce(f64::min)
        .map(|score| score as i64)
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        if live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn set_xx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = live(&mut entries, key) else {
            return Ok(false);
        };
        entry.value = Value::Str(value.to_string());
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).is_some_and(|e| !e.is_expired()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        Ok(live(&mut entries, key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn extend_ttl(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = live(&mut entries, key) else {
            return Ok(false);
        };
        let target = Instant::now() + ttl;
        if !entry.expires_at.is_some_and(|at| at >= target) {
            entry.expires_at = Some(target);
        }
        Ok(true)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        if let Some(set) = set_of(&mut entries, key)? {
            return Ok(set.insert(member.to_string()));
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Set(HashSet::from([member.to_string()])),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let Some(set) = set_of(&mut entries, key)? else {
            return Ok(false);
        };
        let removed = set.remove(member);
        // 空になった集合はキーごと消える（Redis と同じ挙動）
        if set.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        Ok(set_of(&mut entries, key)?
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().await;
        Ok(set_of(&mut entries, key)?.map_or(0, |set| set.len() as u64))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if let Some(zset) = zset_of(&mut entries, key)? {
            zset.insert(member.to_string(), score);
            return Ok(());
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::ZSet(HashMap::from([(member.to_string(), score)])),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        let mut entries = self.entries.lock().await;
        Ok(zset_of(&mut entries, key)?.and_then(|zset| zset.get(member).copied()))
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let Some(zset) = zset_of(&mut entries, key)? else {
            return Ok(false);
        };
        let removed = zset.remove(member).is_some();
        if zset.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn zrem_range_by_score(&self, key: &str, max: f64) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().await;
        let Some(zset) = zset_of(&mut entries, key)? else {
            return Ok(0);
        };
        let before = zset.len();
        zset.retain(|_, score| *score > max);
        let removed = (before - zset.len()) as u64;
        if zset.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| !e.is_expired());
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn sliding_window_hit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        now_ms: i64,
    ) -> Result<SlidingWindowOutcome, StoreError> {
        let mut entries = self.entries.lock().await;
        let window_start = (now_ms - window_millis(window)) as f64;

        if zset_of(&mut entries, key)?.is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::ZSet(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        let zset = zset_of(&mut entries, key)?
            .ok_or_else(|| StoreError::UnexpectedReply(format!("missing window: {key}")))?;
        zset.retain(|_, score| *score > window_start);

        let count = zset.len() as u64;
        let allowed = count < limit;
        if allowed {
            zset.insert(format!("{now_ms}:{}", Uuid::new_v4()), now_ms as f64);
        }
        let oldest_ms = oldest_score(zset);

        if zset.is_empty() {
            entries.remove(key);
        } else if allowed {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(Instant::now() + window);
            }
        }

        Ok(SlidingWindowOutcome {
            allowed,
            count,
            oldest_ms,
        })
    }

    async fn sliding_window_peek(
        &self,
        key: &str,
        window: Duration,
        now_ms: i64,
    ) -> Result<SlidingWindowSnapshot, StoreError> {
        let mut entries = self.entries.lock().await;
        let window_start = (now_ms - window_millis(window)) as f64;
        let Some(zset) = zset_of(&mut entries, key)? else {
            return Ok(SlidingWindowSnapshot {
                count: 0,
                oldest_ms: None,
            });
        };
        let live_scores: Vec<f64> = zset
            .values()
            .copied()
            .filter(|score| *score > window_start)
            .collect();
        Ok(SlidingWindowSnapshot {
            count: live_scores.len() as u64,
            oldest_ms: live_scores.into_iter().reduce(f64::min).map(|s| s as i64),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_and_delete() {
        let store = InMemoryStore::new();
        store.set_ex("k1", "v1", Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), Some("v1".to_string()));
        assert!(store.del("k1").await.unwrap());
        assert!(!store.del("k1").await.unwrap());
        assert_eq!(store.get("k1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_ex_expires() {
        let store = InMemoryStore::new();
        store.set_ex("k1", "v1", Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.exists("k1").await.unwrap());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.exists("k1").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_rearms_ttl() {
        let store = InMemoryStore::new();
        store.set_ex("k1", "v1", Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.expire("k1", Duration::from_secs(5)).await.unwrap());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.exists("k1").await.unwrap());
        assert!(!store.expire("missing", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_nx_ex_only_first_writer_wins() {
        let store = InMemoryStore::new();
        assert!(store.set_nx_ex("k1", "a", Duration::from_secs(10)).await.unwrap());
        assert!(!store.set_nx_ex("k1", "b", Duration::from_secs(10)).await.unwrap());
        assert_eq!(store.get("k1").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_set_xx_ex_requires_existing_key() {
        let store = InMemoryStore::new();
        assert!(!store.set_xx_ex("k1", "a", Duration::from_secs(10)).await.unwrap());
        assert!(!store.exists("k1").await.unwrap());
        store.set_ex("k1", "a", Duration::from_secs(10)).await.unwrap();
        assert!(store.set_xx_ex("k1", "b", Duration::from_secs(10)).await.unwrap());
        assert_eq!(store.get("k1").await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_ttl_never_shortens() {
        let store = InMemoryStore::new();
        assert!(!store.extend_ttl("z", Duration::from_secs(10)).await.unwrap());

        store.zadd("z", "a", 1.0).await.unwrap();
        assert!(store.extend_ttl("z", Duration::from_secs(60)).await.unwrap());
        assert!(store.extend_ttl("z", Duration::from_secs(5)).await.unwrap());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.exists("z").await.unwrap());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!store.exists("z").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_membership() {
        let store = InMemoryStore::new();
        assert!(store.sadd("s", "a").await.unwrap());
        assert!(!store.sadd("s", "a").await.unwrap());
        assert!(store.sadd("s", "b").await.unwrap());
        assert_eq!(store.scard("s").await.unwrap(), 2);

        let mut members = store.smembers("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);

        assert!(store.srem("s", "a").await.unwrap());
        assert!(store.srem("s", "b").await.unwrap());
        assert!(!store.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let store = InMemoryStore::new();
        store.set_ex("k1", "v1", Duration::from_secs(10)).await.unwrap();
        let result = store.sadd("k1", "m").await;
        assert!(matches!(result, Err(StoreError::UnexpectedReply(_))));
    }

    #[tokio::test]
    async fn test_zset_range_removal() {
        let store = InMemoryStore::new();
        store.zadd("z", "a", 10.0).await.unwrap();
        store.zadd("z", "b", 20.0).await.unwrap();
        store.zadd("z", "c", 30.0).await.unwrap();

        assert_eq!(store.zrem_range_by_score("z", 20.0).await.unwrap(), 2);
        assert_eq!(store.zscore("z", "a").await.unwrap(), None);
        assert_eq!(store.zscore("z", "c").await.unwrap(), Some(30.0));
        assert!(store.zrem("z", "c").await.unwrap());
        assert!(!store.exists("z").await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_keys_by_prefix() {
        let store = InMemoryStore::new();
        store.sadd("user-sessions:u1", "s1").await.unwrap();
        store.sadd("user-sessions:u2", "s2").await.unwrap();
        store.set_ex("session:s1", "{}", Duration::from_secs(10)).await.unwrap();

        let mut keys = store.scan_keys("user-sessions:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["user-sessions:u1", "user-sessions:u2"]);
    }

    #[tokio::test]
    async fn test_sliding_window_hit_prunes_and_limits() {
        let store = InMemoryStore::new();
        let window = Duration::from_secs(60);

        for (i, now) in [0_i64, 1_000, 2_000].into_iter().enumerate() {
            let outcome = store.sliding_window_hit("w", 3, window, now).await.unwrap();
            assert!(outcome.allowed);
            assert_eq!(outcome.count, i as u64);
            assert_eq!(outcome.oldest_ms, Some(0));
        }

        let rejected = store.sliding_window_hit("w", 3, window, 3_000).await.unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.count, 3);

        // t=60s で t=0 のマーカーがウィンドウ外になる
        let outcome = store.sliding_window_hit("w", 3, window, 60_000).await.unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.oldest_ms, Some(1_000));
    }

    #[tokio::test]
    async fn test_sliding_window_peek_does_not_insert() {
        let store = InMemoryStore::new();
        let window = Duration::from_secs(60);

        let empty = store.sliding_window_peek("w", window, 0).await.unwrap();
        assert_eq!(empty.count, 0);
        assert_eq!(empty.oldest_ms, None);

        store.sliding_window_hit("w", 5, window, 1_000).await.unwrap();
        let snapshot = store.sliding_window_peek("w", window, 2_000).await.unwrap();
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.oldest_ms, Some(1_000));

        let again = store.sliding_window_peek("w", window, 2_000).await.unwrap();
        assert_eq!(again.count, 1);
    }

    #[tokio::test]
    async fn test_rejected_hit_on_empty_window_leaves_no_key() {
        let store = InMemoryStore::new();
        let outcome = store
            .sliding_window_hit("w", 0, Duration::from_secs(60), 0)
            .await
            .unwrap();
        assert!(!outcome.allowed);
        assert!(!store.exists("w").await.unwrap());
    }
}
