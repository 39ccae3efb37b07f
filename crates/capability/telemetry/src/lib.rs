//! 追踪初始化与进程计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub commands_forwarded: u64,
    pub queries_forwarded: u64,
    pub answers_routed: u64,
    pub answers_dropped: u64,
    pub pushes_published: u64,
    pub dispatch_failures: u64,
    pub login_failures: u64,
    pub connect_attempts: u64,
    pub measurements_logged: u64,
    pub flush_success: u64,
    pub flush_failure: u64,
}

/// 基础指标。
pub struct TelemetryMetrics {
    commands_forwarded: AtomicU64,
    queries_forwarded: AtomicU64,
    answers_routed: AtomicU64,
    answers_dropped: AtomicU64,
    pushes_published: AtomicU64,
    dispatch_failures: AtomicU64,
    login_failures: AtomicU64,
    connect_attempts: AtomicU64,
    measurements_logged: AtomicU64,
    flush_success: AtomicU64,
    flush_failure: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            commands_forwarded: AtomicU64::new(0),
            queries_forwarded: AtomicU64::new(0),
            answers_routed: AtomicU64::new(0),
            answers_dropped: AtomicU64::new(0),
            pushes_published: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            login_failures: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            measurements_logged: AtomicU64::new(0),
            flush_success: AtomicU64::new(0),
            flush_failure: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_forwarded: self.commands_forwarded.load(Ordering::Relaxed),
            queries_forwarded: self.queries_forwarded.load(Ordering::Relaxed),
            answers_routed: self.answers_routed.load(Ordering::Relaxed),
            answers_dropped: self.answers_dropped.load(Ordering::Relaxed),
            pushes_published: self.pushes_published.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            login_failures: self.login_failures.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            measurements_logged: self.measurements_logged.load(Ordering::Relaxed),
            flush_success: self.flush_success.load(Ordering::Relaxed),
            flush_failure: self.flush_failure.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录 set/sub 命令转发次数。
pub fn record_command_forwarded() {
    metrics().commands_forwarded.fetch_add(1, Ordering::Relaxed);
}

/// 记录查询转发次数。
pub fn record_query_forwarded() {
    metrics().queries_forwarded.fetch_add(1, Ordering::Relaxed);
}

/// 记录应答成功路由回请求方次数。
pub fn record_answer_routed() {
    metrics().answers_routed.fetch_add(1, Ordering::Relaxed);
}

/// 记录应答到达时请求方已不在而被丢弃的次数。
pub fn record_answer_dropped() {
    metrics().answers_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录推送发布次数。
pub fn record_push_published() {
    metrics().pushes_published.fetch_add(1, Ordering::Relaxed);
}

/// 记录轮询分发失败次数。
pub fn record_dispatch_failure() {
    metrics().dispatch_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录握手登录失败次数。
pub fn record_login_failure() {
    metrics().login_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接建立周期次数（每次进入连接流程计一次）。
pub fn record_connect_attempt() {
    metrics().connect_attempts.fetch_add(1, Ordering::Relaxed);
}

/// 记录测点落库缓冲次数。
pub fn record_measurement_logged() {
    metrics().measurements_logged.fetch_add(1, Ordering::Relaxed);
}

/// 记录批量提交成功次数。
pub fn record_flush_success() {
    metrics().flush_success.fetch_add(1, Ordering::Relaxed);
}

/// 记录批量提交失败次数。
pub fn record_flush_failure() {
    metrics().flush_failure.fetch_add(1, Ordering::Relaxed);
}
