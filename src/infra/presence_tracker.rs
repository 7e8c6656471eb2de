use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::infra::live_feed::{topics, FeedPayload, FeedPublisher};
use crate::infra::metrics;
use crate::model::UserId;

/// 时间来源（测试中可替换为手动时钟）
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 在线用户条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: UserId,
    pub last_connection: DateTime<Utc>,
}

/// 在线用户全量快照（每次变化整体替换，从不发送增量）
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OnlineUsersSnapshot {
    pub online: Vec<OnlineUser>,
}

impl OnlineUsersSnapshot {
    pub fn contains(&self, user_id: UserId) -> bool {
        self.online.iter().any(|u| u.user_id == user_id)
    }
}

/// 在线状态配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// 清理任务间隔（秒）
    pub cleanup_interval_secs: u64,
    /// 超过多少分钟未活跃视为掉线
    pub stale_after_minutes: i64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 600, // 10分钟
            stale_after_minutes: 30,
        }
    }
}

/// 在线状态跟踪器
///
/// 维护 user_id -> last_seen 映射；每次变更都把完整在线列表发布到
/// `onlineUsersUpdated` 主题。快照在持锁期间计算并发布，
/// 保证订阅者看到的快照顺序与变更顺序一致。
pub struct PresenceTracker {
    entries: Mutex<HashMap<UserId, DateTime<Utc>>>,
    feed: Arc<dyn FeedPublisher>,
    clock: Arc<dyn Clock>,
    config: PresenceConfig,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceTracker {
    pub fn new(feed: Arc<dyn FeedPublisher>, config: PresenceConfig) -> Self {
        Self::with_clock(feed, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        feed: Arc<dyn FeedPublisher>,
        config: PresenceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(
            "🔔 PresenceTracker initialized: cleanup_interval={}s, stale_after={}min",
            config.cleanup_interval_secs, config.stale_after_minutes
        );
        Self {
            entries: Mutex::new(HashMap::new()),
            feed,
            clock,
            config,
            cleanup_task: Mutex::new(None),
        }
    }

    /// 标记用户在线（新建或刷新时间戳），总是发布快照
    ///
    /// 返回记录的 last_seen。
    pub fn set_online(&self, user_id: UserId) -> DateTime<Utc> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        entries.insert(user_id, now);
        debug!("🟢 User {} is online", user_id);
        self.publish_snapshot(&entries);
        now
    }

    /// 标记用户离线；已离线时也会发布快照
    pub fn set_offline(&self, user_id: UserId) {
        let mut entries = self.entries.lock();
        if entries.remove(&user_id).is_some() {
            debug!("⚪ User {} is offline", user_id);
        }
        self.publish_snapshot(&entries);
    }

    /// 驱逐超过 `max_age_minutes` 未活跃的用户
    ///
    /// 只有实际驱逐了条目才发布快照。返回驱逐数量。
    pub fn cleanup_stale_connections(&self, max_age_minutes: i64) -> usize {
        // 窗口超出时间范围时没有条目会过期
        let Some(cutoff) = chrono::Duration::try_minutes(max_age_minutes)
            .and_then(|max_age| self.clock.now().checked_sub_signed(max_age))
        else {
            debug!("⏳ Stale window of {} minutes is out of range, nothing evicted", max_age_minutes);
            return 0;
        };
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, last_seen| *last_seen >= cutoff);
        let evicted = before - entries.len();

        if evicted > 0 {
            info!("🧹 Evicted {} stale online users", evicted);
            self.publish_snapshot(&entries);
        }
        evicted
    }

    /// 当前在线列表（按 user_id 排序）
    pub fn online_users(&self) -> OnlineUsersSnapshot {
        snapshot_of(&self.entries.lock())
    }

    pub fn is_user_online(&self, user_id: UserId) -> bool {
        self.entries.lock().contains_key(&user_id)
    }

    pub fn last_seen(&self, user_id: UserId) -> Option<DateTime<Utc>> {
        self.entries.lock().get(&user_id).copied()
    }

    pub fn online_count(&self) -> usize {
        self.entries.lock().len()
    }

    fn publish_snapshot(&self, entries: &HashMap<UserId, DateTime<Utc>>) {
        let snapshot = snapshot_of(entries);
        metrics::record_online_users(snapshot.online.len());
        self.feed.publish(
            topics::ONLINE_USERS_UPDATED,
            FeedPayload::OnlineUsersUpdated(snapshot),
        );
    }

    /// 启动周期清理任务（重复调用会替换旧任务）
    pub fn start(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_secs(self.config.cleanup_interval_secs.max(1));
        let max_age = self.config.stale_after_minutes;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // 第一次 tick 立即返回，跳过
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(tracker) = weak.upgrade() else {
                    break;
                };
                tracker.cleanup_stale_connections(max_age);
            }
        });

        if let Some(old) = self.cleanup_task.lock().replace(handle) {
            old.abort();
        }
        info!("⏱️ Presence cleanup task started (every {:?})", period);
    }

    /// 停止清理任务
    pub fn shutdown(&self) {
        if let Some(handle) = self.cleanup_task.lock().take() {
            handle.abort();
            info!("🛑 Presence cleanup task stopped");
        }
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_task.get_mut().take() {
            handle.abort();
        }
    }
}

fn snapshot_of(entries: &HashMap<UserId, DateTime<Utc>>) -> OnlineUsersSnapshot {
    let mut online: Vec<OnlineUser> = entries
        .iter()
        .map(|(user_id, last_seen)| OnlineUser {
            user_id: *user_id,
            last_connection: *last_seen,
        })
        .collect();
    online.sort_by_key(|u| u.user_id);
    OnlineUsersSnapshot { online }
}
