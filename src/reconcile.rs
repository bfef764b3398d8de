use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::AuthSessionError;
use crate::keys;
use crate::store::SharedStore;
use crate::token_blacklist::TokenBlacklist;

/// ReconcileReport は 1 回の整合処理の結果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub indexes_scanned: u64,
    pub stale_entries_removed: u64,
    pub blacklist_pruned: u64,
}

/// Reconciler はユーザー別セッション索引と失効リストの定期整合を行う。
///
/// 通常のトラフィックと並行して動かしてよい。索引からはメンバー単位でのみ取り除く。
pub struct Reconciler {
    store: Arc<dyn SharedStore>,
    blacklist: TokenBlacklist,
}

impl Reconciler {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            blacklist: TokenBlacklist::new(store.clone()),
            store,
        }
    }

    pub async fn run_once(&self) -> Result<ReconcileReport, AuthSessionError> {
        let mut report = ReconcileReport::default();

        for index_key in self.store.scan_keys(keys::USER_SESSIONS_PREFIX).await? {
            report.indexes_scanned += 1;
            for session_id in self.store.smembers(&index_key).await? {
                if self.store.exists(&keys::session_key(&session_id)).await? {
                    continue;
                }
                if self.store.srem(&index_key, &session_id).await? {
                    report.stale_entries_removed += 1;
                }
            }
        }

        report.blacklist_pruned = self.blacklist.prune_global().await?;

        tracing::debug!(
            indexes_scanned = report.indexes_scanned,
            stale_entries_removed = report.stale_entries_removed,
            blacklist_pruned = report.blacklist_pruned,
            "reconcile pass finished"
        );
        Ok(report)
    }

    /// shutdown が true になるまで `interval` ごとに `run_once` を実行する。
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::warn!(error = %e, "reconcile pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("reconciler stopped");
    }
}
