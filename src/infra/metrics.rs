//! Prometheus 指标：代理发布量、中继处理量、推送扇出、订阅数与在线人数
//!
//! 通过 `init()` 安装全局 Recorder，通过 HTTP GET `/metrics` 暴露抓取端点。
//! 未安装 Recorder 时（例如测试），所有记录调用都是空操作。

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标名称
const COUNTER_BROKER_PUBLISHED: &str = "chatfeed_broker_published_total";
const COUNTER_BROKER_FAILED: &str = "chatfeed_broker_publish_failed_total";
const COUNTER_RELAY_EVENTS: &str = "chatfeed_relay_events_total";
const COUNTER_RELAY_ERRORS: &str = "chatfeed_relay_handler_errors_total";
const COUNTER_FEED_PUBLISHED: &str = "chatfeed_feed_published_total";
const COUNTER_FEED_DROPPED: &str = "chatfeed_feed_dropped_total";
const GAUGE_SUBSCRIPTIONS: &str = "chatfeed_subscriptions_current";
const GAUGE_ONLINE_USERS: &str = "chatfeed_online_users_current";

/// 初始化 Prometheus 指标（安装全局 Recorder）。
/// 仅需在进程内调用一次；重复调用会返回 Err。
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    HANDLE
        .set(handle)
        .map_err(|_| "metrics already initialized")?;
    Ok(())
}

/// 是否已初始化
pub fn is_initialized() -> bool {
    HANDLE.get().is_some()
}

/// 渲染当前指标为 Prometheus 文本格式，供 GET /metrics 使用。
pub fn render_metrics() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// 记录一次代理发布结果。
pub fn record_broker_publish(pattern: &'static str, ok: bool) {
    if ok {
        metrics::counter!(COUNTER_BROKER_PUBLISHED, "pattern" => pattern).increment(1);
    } else {
        metrics::counter!(COUNTER_BROKER_FAILED, "pattern" => pattern).increment(1);
    }
}

/// 记录中继处理的事件数 +1。
pub fn record_relay_event(pattern: &'static str) {
    metrics::counter!(COUNTER_RELAY_EVENTS, "pattern" => pattern).increment(1);
}

/// 记录中继处理失败（被吞掉的错误）+1。
pub fn record_relay_error() {
    metrics::counter!(COUNTER_RELAY_ERRORS).increment(1);
}

/// 记录一次推送：送达数为 0 时计入丢弃。
pub fn record_feed_publish(topic_kind: &str, delivered: usize) {
    if delivered == 0 {
        metrics::counter!(COUNTER_FEED_DROPPED, "topic" => topic_kind.to_string()).increment(1);
    } else {
        metrics::counter!(COUNTER_FEED_PUBLISHED, "topic" => topic_kind.to_string())
            .increment(delivered as u64);
    }
}

/// 更新当前订阅数（Gauge）。
pub fn record_active_subscriptions(count: usize) {
    metrics::gauge!(GAUGE_SUBSCRIPTIONS).set(count as f64);
}

/// 更新当前在线人数（Gauge）。
pub fn record_online_users(count: usize) {
    metrics::gauge!(GAUGE_ONLINE_USERS).set(count as f64);
}
