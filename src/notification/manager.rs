//! 全局未读通知管理器
//!
//! 进程内只维护一个实时连接，绑定当前激活的资料（用户或企业）。
//! 未读数从不直接通过推送得到，而是每次都拉取完整会话列表后求和：
//! - 初始化时立即拉取一次
//! - 收到 `private_message` 推送时拉取
//! - 每隔 `poll_interval`（默认 3000ms）兜底轮询
//!
//! ## 状态机
//! `Uninitialized ⇄ Active(profile)`
//! - 同一资料重复初始化：只替换回调
//! - 切换资料：先按顺序拆除旧会话（停止任务、关闭连接），再连接新资料
//! - `cleanup()`：幂等，回到 `Uninitialized`，未读数归零
//!
//! 建立连接在会话任务中进行，不持有会话锁；连接挂起或失败时轮询照常运行

use crate::api::{ApiClient, ProfileType};
use crate::config::NotificationConfig;
use crate::notification::{
    total_unread, ConversationSource, RealtimeConnection, RealtimeTransport, WsTransport,
    EVENT_PRIVATE_MESSAGE, EVENT_USER_CONNECTED,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 默认轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// 默认连接超时
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 未读数变化回调
pub type UnreadCountCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// 当前激活的资料
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveProfile {
    pub profile_id: String,
    pub profile_type: ProfileType,
}

impl ActiveProfile {
    pub fn new(profile_id: impl Into<String>, profile_type: ProfileType) -> Self {
        Self {
            profile_id: profile_id.into(),
            profile_type,
        }
    }
}

/// 拉取并发布未读数（初始化、推送、轮询共用）
#[derive(Clone)]
struct Reconciler {
    session_id: String,
    profile: ActiveProfile,
    conversations: Arc<dyn ConversationSource>,
    token: CancellationToken,
    count_tx: Arc<watch::Sender<u64>>,
    callback: Arc<RwLock<Option<UnreadCountCallback>>>,
}

impl Reconciler {
    /// 拉取失败时保留旧值；会话已拆除时不发布
    async fn reconcile(&self) -> Option<u64> {
        let result = self
            .conversations
            .profile_conversations(&self.profile.profile_id, self.profile.profile_type)
            .await;

        match result {
            Ok(list) => {
                let total = total_unread(&list);
                debug!(
                    "[会话 {}] 会话数 {}, 未读 {}",
                    self.session_id,
                    list.len(),
                    total
                );
                self.publish(total).then_some(total)
            }
            Err(e) => {
                warn!(
                    "[会话 {}] 获取会话列表失败，保留旧的未读数: profile={}, 错误: {}",
                    self.session_id, self.profile.profile_id, e
                );
                None
            }
        }
    }

    /// 检查与发布都在回调读锁内完成，拆除方取写锁前先取消令牌。
    /// 回调在读锁内执行，回调中不得再调用管理器
    fn publish(&self, count: u64) -> bool {
        let callback = self.callback.read();
        if self.token.is_cancelled() {
            debug!("[会话 {}] 已拆除，丢弃拉取结果", self.session_id);
            return false;
        }
        self.count_tx.send_replace(count);
        if let Some(cb) = callback.as_ref() {
            cb(count);
        }
        true
    }
}

struct ActiveSession {
    reconciler: Reconciler,
    tasks: JoinSet<()>,
}

/// 未读通知管理器
pub struct NotificationManager {
    transport: Arc<dyn RealtimeTransport>,
    conversations: Arc<dyn ConversationSource>,
    poll_interval: Duration,
    connect_timeout: Duration,
    session: Mutex<Option<ActiveSession>>,
    count_tx: Arc<watch::Sender<u64>>,
    callback: Arc<RwLock<Option<UnreadCountCallback>>>,
}

impl NotificationManager {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        conversations: Arc<dyn ConversationSource>,
        poll_interval: Duration,
    ) -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            transport,
            conversations,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session: Mutex::new(None),
            count_tx: Arc::new(count_tx),
            callback: Arc::new(RwLock::new(None)),
        }
    }

    /// 使用 WebSocket 和 REST 客户端创建
    pub fn from_config(config: &NotificationConfig, api: Arc<ApiClient>) -> Self {
        Self::new(
            Arc::new(WsTransport::new(config.socket_url.clone())),
            api,
            config.poll_interval(),
        )
        .with_connect_timeout(config.connect_timeout())
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// 绑定资料并开始跟踪未读数
    pub async fn initialize(
        &self,
        profile_id: impl Into<String>,
        profile_type: ProfileType,
        callback: UnreadCountCallback,
    ) {
        let profile = ActiveProfile::new(profile_id, profile_type);
        let mut session = self.session.lock().await;

        if let Some(active) = session.as_ref() {
            if active.reconciler.profile.profile_id == profile.profile_id {
                debug!("资料 {} 已初始化，仅替换回调", profile.profile_id);
                *self.callback.write() = Some(callback);
                return;
            }
        }

        if let Some(old) = session.take() {
            info!(
                "切换资料: {} -> {}",
                old.reconciler.profile.profile_id, profile.profile_id
            );
            Self::teardown(old).await;
        }

        self.reset(Some(callback));

        let reconciler = Reconciler {
            session_id: Uuid::new_v4().to_string(),
            profile: profile.clone(),
            conversations: self.conversations.clone(),
            token: CancellationToken::new(),
            count_tx: self.count_tx.clone(),
            callback: self.callback.clone(),
        };
        let mut tasks = JoinSet::new();
        tasks.spawn(poll_loop(reconciler.clone(), self.poll_interval));
        tasks.spawn(connect_and_listen(
            self.transport.clone(),
            self.connect_timeout,
            reconciler.clone(),
        ));

        info!(
            "[会话 {}] 通知管理器已初始化: profile={}, type={}, 轮询间隔={:?}",
            reconciler.session_id, profile.profile_id, profile.profile_type, self.poll_interval
        );
        *session = Some(ActiveSession { reconciler, tasks });
    }

    /// 拆除当前会话（幂等）
    pub async fn cleanup(&self) {
        let mut session = self.session.lock().await;
        match session.take() {
            Some(old) => {
                info!(
                    "[会话 {}] 清理通知管理器: profile={}",
                    old.reconciler.session_id, old.reconciler.profile.profile_id
                );
                Self::teardown(old).await;
            }
            None => debug!("通知管理器未初始化，无需清理"),
        }
        self.reset(None);
    }

    /// 替换回调并把未读数归零（在回调写锁内完成，旧会话的发布不会覆盖）
    fn reset(&self, callback: Option<UnreadCountCallback>) {
        let mut slot = self.callback.write();
        *slot = callback;
        self.count_tx.send_replace(0);
    }

    /// 激活资料变化（None 表示登出）
    pub async fn sync_profile(&self, profile: Option<ActiveProfile>, callback: UnreadCountCallback) {
        match profile {
            Some(p) => self.initialize(p.profile_id, p.profile_type, callback).await,
            None => self.cleanup().await,
        }
    }

    /// 立即拉取一次，返回最新未读数（未初始化或拉取失败时为 None）
    pub async fn refresh(&self) -> Option<u64> {
        let reconciler = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.reconciler.clone())?;
        reconciler.reconcile().await
    }

    /// 订阅未读数变化
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.count_tx.subscribe()
    }

    /// 当前未读数
    pub fn unread_count(&self) -> u64 {
        *self.count_tx.borrow()
    }

    /// 当前激活的资料
    pub async fn active_profile(&self) -> Option<ActiveProfile> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.reconciler.profile.clone())
    }

    /// 停止轮询和事件监听，等待连接关闭
    async fn teardown(mut old: ActiveSession) {
        old.reconciler.token.cancel();
        while let Some(result) = old.tasks.join_next().await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    warn!("通知任务异常退出: {}", e);
                }
            }
        }
    }
}

/// 建立实时连接并上线，随后监听推送；会话拆除时放弃连接
async fn connect_and_listen(
    transport: Arc<dyn RealtimeTransport>,
    connect_timeout: Duration,
    reconciler: Reconciler,
) {
    let connected = tokio::select! {
        biased;
        _ = reconciler.token.cancelled() => {
            debug!("[会话 {}] 连接尚未建立，会话已拆除", reconciler.session_id);
            return;
        }
        result = tokio::time::timeout(connect_timeout, transport.connect()) => result,
    };

    let conn = match connected {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => {
            warn!("[会话 {}] 实时连接失败，仅使用轮询: {}", reconciler.session_id, e);
            return;
        }
        Err(_) => {
            warn!(
                "[会话 {}] 实时连接超时 ({:?})，仅使用轮询",
                reconciler.session_id, connect_timeout
            );
            return;
        }
    };

    let profile = &reconciler.profile;
    let announce = serde_json::json!([profile.profile_id, profile.profile_type.as_str()]);
    if let Err(e) = conn.emit(EVENT_USER_CONNECTED, announce) {
        warn!("[会话 {}] 发送上线通知失败: {}", reconciler.session_id, e);
    }
    listen_events(conn, reconciler).await;
}

/// 监听推送事件，`private_message` 触发一次拉取
async fn listen_events(mut conn: RealtimeConnection, reconciler: Reconciler) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = reconciler.token.cancelled() => break,
            frame = conn.next_frame() => frame,
        };

        match frame {
            Some(frame) if frame.event == EVENT_PRIVATE_MESSAGE => {
                debug!("[会话 {}] 收到私信推送", reconciler.session_id);
                tokio::select! {
                    biased;
                    _ = reconciler.token.cancelled() => break,
                    _ = reconciler.reconcile() => {}
                }
            }
            Some(frame) => debug!("忽略事件: {}", frame.event),
            None => {
                warn!(
                    "[会话 {}] 实时连接已断开，继续轮询",
                    reconciler.session_id
                );
                break;
            }
        }
    }
    conn.close();
}

/// 定时拉取，第一次 tick 立即触发
async fn poll_loop(reconciler: Reconciler, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = reconciler.token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            _ = reconciler.token.cancelled() => break,
            _ = reconciler.reconcile() => {}
        }
    }
    debug!("[会话 {}] 轮询已停止", reconciler.session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, Conversation};
    use crate::notification::{RealtimeFrame, RemoteEnd, TransportError};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeTransport {
        fail: bool,
        connects: AtomicUsize,
        remotes: SyncMutex<Vec<RemoteEnd>>,
        /// 每次连接时，之前的连接是否都已关闭
        previous_closed: SyncMutex<Vec<bool>>,
    }

    #[async_trait]
    impl RealtimeTransport for FakeTransport {
        async fn connect(&self) -> Result<RealtimeConnection, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransportError::Connect("refused".to_string()));
            }
            let (conn, remote) = RealtimeConnection::channel();
            let mut remotes = self.remotes.lock();
            self.previous_closed
                .lock()
                .push(remotes.iter().all(|r| r.shutdown.is_cancelled()));
            remotes.push(remote);
            Ok(conn)
        }
    }

    impl FakeTransport {
        fn push(&self, index: usize, event: &str) {
            self.remotes.lock()[index]
                .incoming
                .send(RealtimeFrame::new(event, json!({})))
                .unwrap();
        }

        fn sent_frames(&self, index: usize) -> Vec<RealtimeFrame> {
            let mut remotes = self.remotes.lock();
            let mut frames = Vec::new();
            while let Ok(frame) = remotes[index].outgoing.try_recv() {
                frames.push(frame);
            }
            frames
        }
    }

    #[derive(Default)]
    struct FakeSource {
        unread: SyncMutex<HashMap<String, Vec<u64>>>,
        fail: AtomicBool,
        calls: SyncMutex<Vec<String>>,
        /// 为 true 时拉取挂起，直到 `release` 被通知
        hold: AtomicBool,
        release: Notify,
    }

    impl FakeSource {
        fn set(&self, profile_id: &str, counts: &[u64]) {
            self.unread
                .lock()
                .insert(profile_id.to_string(), counts.to_vec());
        }
    }

    #[async_trait]
    impl ConversationSource for FakeSource {
        async fn profile_conversations(
            &self,
            profile_id: &str,
            _profile_type: ProfileType,
        ) -> Result<Vec<Conversation>, ApiError> {
            self.calls.lock().push(profile_id.to_string());
            if self.hold.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::Timeout);
            }
            Ok(self
                .unread
                .lock()
                .get(profile_id)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(i, n)| Conversation {
                    id: Some(format!("c-{}", i)),
                    unread_count: n,
                })
                .collect())
        }
    }

    struct Harness {
        transport: Arc<FakeTransport>,
        source: Arc<FakeSource>,
        manager: NotificationManager,
    }

    fn harness(transport: FakeTransport, poll_interval: Duration) -> Harness {
        let transport = Arc::new(transport);
        let source = Arc::new(FakeSource::default());
        let manager = NotificationManager::new(transport.clone(), source.clone(), poll_interval);
        Harness {
            transport,
            source,
            manager,
        }
    }

    fn recorder() -> (UnreadCountCallback, Arc<SyncMutex<Vec<u64>>>) {
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |n| sink.lock().push(n)), seen)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_announces_and_sums_unread() {
        let h = harness(FakeTransport::default(), DEFAULT_POLL_INTERVAL);
        h.source.set("p-1", &[3, 0, 4]);
        let (cb, seen) = recorder();

        h.manager.initialize("p-1", ProfileType::User, cb).await;
        settle().await;

        assert_eq!(h.manager.unread_count(), 7);
        assert_eq!(seen.lock().as_slice(), [7]);

        let frames = h.transport.sent_frames(0);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, EVENT_USER_CONNECTED);
        assert_eq!(frames[0].data, json!(["p-1", "user"]));
        assert_eq!(
            h.manager.active_profile().await,
            Some(ActiveProfile::new("p-1", ProfileType::User))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinitialize_same_profile_swaps_callback() {
        let h = harness(FakeTransport::default(), DEFAULT_POLL_INTERVAL);
        h.source.set("p-1", &[7]);
        let (cb1, seen1) = recorder();
        let (cb2, seen2) = recorder();

        h.manager.initialize("p-1", ProfileType::User, cb1).await;
        settle().await;
        h.manager.initialize("p-1", ProfileType::User, cb2).await;

        h.source.set("p-1", &[1]);
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;

        assert_eq!(h.transport.connects.load(Ordering::SeqCst), 1);
        assert_eq!(seen1.lock().as_slice(), [7]);
        assert_eq!(seen2.lock().last(), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_then_new_profile_polls_only_new() {
        let h = harness(FakeTransport::default(), DEFAULT_POLL_INTERVAL);
        h.source.set("a", &[2]);
        h.source.set("b", &[5]);
        let (cb, _) = recorder();

        h.manager.initialize("a", ProfileType::User, cb.clone()).await;
        settle().await;
        h.manager.cleanup().await;
        assert_eq!(h.manager.unread_count(), 0);
        assert_eq!(h.manager.active_profile().await, None);

        let calls_before = h.source.calls.lock().len();
        h.manager.initialize("b", ProfileType::Company, cb).await;
        tokio::time::sleep(Duration::from_millis(3100)).await;

        let calls = h.source.calls.lock();
        assert!(calls.len() >= calls_before + 2);
        assert!(calls[calls_before..].iter().all(|p| p == "b"));
        assert_eq!(h.manager.unread_count(), 5);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let h = harness(FakeTransport::default(), DEFAULT_POLL_INTERVAL);
        h.manager.cleanup().await;
        h.manager.cleanup().await;
        assert_eq!(h.manager.unread_count(), 0);
        assert_eq!(h.transport.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_keeps_stale_count() {
        let h = harness(FakeTransport::default(), DEFAULT_POLL_INTERVAL);
        h.source.set("p-1", &[3, 4]);
        let (cb, seen) = recorder();

        h.manager.initialize("p-1", ProfileType::User, cb).await;
        settle().await;
        assert_eq!(h.manager.unread_count(), 7);

        h.source.fail.store(true, Ordering::SeqCst);
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 2).await;

        assert_eq!(h.manager.unread_count(), 7);
        assert_eq!(seen.lock().as_slice(), [7]);
        assert_eq!(h.manager.refresh().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_event_triggers_reconcile() {
        let h = harness(FakeTransport::default(), Duration::from_secs(600));
        h.source.set("p-1", &[1]);
        let (cb, _) = recorder();

        h.manager.initialize("p-1", ProfileType::User, cb).await;
        settle().await;
        assert_eq!(h.manager.unread_count(), 1);

        h.source.set("p-1", &[1, 8]);
        h.transport.push(0, "typing");
        settle().await;
        assert_eq!(h.manager.unread_count(), 1);

        h.transport.push(0, EVENT_PRIVATE_MESSAGE);
        settle().await;
        assert_eq!(h.manager.unread_count(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_switch_closes_old_connection_first() {
        let h = harness(FakeTransport::default(), DEFAULT_POLL_INTERVAL);
        let (cb, _) = recorder();

        h.manager.initialize("a", ProfileType::User, cb.clone()).await;
        settle().await;
        h.manager.initialize("b", ProfileType::Company, cb).await;
        settle().await;

        assert_eq!(h.transport.connects.load(Ordering::SeqCst), 2);
        assert_eq!(h.transport.previous_closed.lock().as_slice(), [true, true]);

        let frames = h.transport.sent_frames(1);
        assert_eq!(frames[0].data, json!(["b", "company"]));
        assert_eq!(
            h.manager.active_profile().await.map(|p| p.profile_id),
            Some("b".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_still_polls() {
        let h = harness(
            FakeTransport {
                fail: true,
                ..Default::default()
            },
            DEFAULT_POLL_INTERVAL,
        );
        h.source.set("p-1", &[2, 2]);
        let (cb, _) = recorder();

        h.manager.initialize("p-1", ProfileType::User, cb).await;
        settle().await;
        assert_eq!(h.manager.unread_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_and_sync_profile() {
        let h = harness(FakeTransport::default(), DEFAULT_POLL_INTERVAL);
        h.source.set("p-1", &[6]);
        let (cb, _) = recorder();
        let mut rx = h.manager.subscribe();

        h.manager
            .sync_profile(Some(ActiveProfile::new("p-1", ProfileType::User)), cb.clone())
            .await;
        while *rx.borrow_and_update() != 6 {
            rx.changed().await.unwrap();
        }
        settle().await;

        h.source.set("p-1", &[6, 1]);
        assert_eq!(h.manager.refresh().await, Some(7));

        h.manager.sync_profile(None, cb).await;
        assert_eq!(h.manager.unread_count(), 0);
        assert_eq!(h.manager.active_profile().await, None);
        assert!(h.transport.remotes.lock()[0].shutdown.is_cancelled());
    }

    /// 连接永不返回的传输
    struct HangingTransport;

    #[async_trait]
    impl RealtimeTransport for HangingTransport {
        async fn connect(&self) -> Result<RealtimeConnection, TransportError> {
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_connect_does_not_block_polling_or_cleanup() {
        let source = Arc::new(FakeSource::default());
        source.set("p-1", &[2, 0, 5]);
        let manager = NotificationManager::new(
            Arc::new(HangingTransport),
            source.clone(),
            DEFAULT_POLL_INTERVAL,
        )
        .with_connect_timeout(Duration::from_secs(3600));
        let (cb, seen) = recorder();

        tokio::time::timeout(
            Duration::from_secs(1),
            manager.initialize("p-1", ProfileType::User, cb),
        )
        .await
        .expect("initialize waited for the connection");
        settle().await;

        assert_eq!(manager.unread_count(), 7);
        assert_eq!(seen.lock().as_slice(), [7]);

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        assert!(source.calls.lock().len() >= 2);

        tokio::time::timeout(Duration::from_secs(1), manager.cleanup())
            .await
            .expect("cleanup waited for the connection");
        assert_eq!(manager.unread_count(), 0);
        assert_eq!(manager.active_profile().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_falls_back_to_polling() {
        let source = Arc::new(FakeSource::default());
        source.set("p-1", &[1]);
        let manager = NotificationManager::new(
            Arc::new(HangingTransport),
            source.clone(),
            DEFAULT_POLL_INTERVAL,
        )
        .with_connect_timeout(Duration::from_millis(500));
        let (cb, _) = recorder();

        manager.initialize("p-1", ProfileType::User, cb).await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        source.set("p-1", &[1, 3]);
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(manager.unread_count(), 4);
        manager.cleanup().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_finishing_after_cleanup_does_not_publish() {
        let h = Arc::new(harness(FakeTransport::default(), DEFAULT_POLL_INTERVAL));
        h.source.set("p-1", &[7]);
        let (cb, seen) = recorder();

        h.manager.initialize("p-1", ProfileType::User, cb).await;
        settle().await;
        assert_eq!(h.manager.unread_count(), 7);

        h.source.hold.store(true, Ordering::SeqCst);
        h.source.set("p-1", &[9]);
        let pending = {
            let h = h.clone();
            tokio::spawn(async move { h.manager.refresh().await })
        };
        settle().await;

        h.manager.cleanup().await;
        h.source.release.notify_one();

        assert_eq!(pending.await.unwrap(), None);
        assert_eq!(h.manager.unread_count(), 0);
        assert_eq!(seen.lock().as_slice(), [7]);
    }
}
