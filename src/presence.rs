use async_trait::async_trait;

/// PresenceNotifier はセッションの開始・終了をオンライン状態の配信先へ通知するトレイト。
///
/// 通知はベストエフォートで、失敗してもセッション操作の結果には影響しない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresenceNotifier: Send + Sync {
    async fn session_started(&self, user_id: &str, session_id: &str) -> anyhow::Result<()>;
    async fn session_ended(&self, user_id: &str, session_id: &str) -> anyhow::Result<()>;
}

/// NoopPresenceNotifier は通知を行わない実装（フォールバック用）。
pub struct NoopPresenceNotifier;

#[async_trait]
impl PresenceNotifier for NoopPresenceNotifier {
    async fn session_started(&self, _user_id: &str, _session_id: &str) -> anyhow::Result<()> {
        tracing::debug!("noop: session started notification skipped");
        Ok(())
    }

    async fn session_ended(&self, _user_id: &str, _session_id: &str) -> anyhow::Result<()> {
        tracing::debug!("noop: session ended notification skipped");
        Ok(())
    }
}
