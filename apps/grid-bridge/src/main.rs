//! 桥接守护进程：把命令端口上的仿真控制命令中继到远端仿真代理。
//!
//! 启动顺序：.env → 配置 → 日志 → 中继/通知桥 → 工作器 → 设备代理 →
//! 命令前端。停机由 SIGINT/SIGTERM 触发，两阶段销毁设备代理后做最后
//! 一次批量提交。

mod command;
mod ports;

use domain::Measurement;
use grid_agent::{AgentLinkConfig, ConnectionManager, StaticDiscovery};
use grid_config::AppConfig;
use grid_device::{DeviceProxy, DeviceProxyConfig, PublishPort, ReplyPort};
use grid_relay::{BridgeConfig, NotificationBridge, RelayChannel, RelayConfig};
use grid_storage::{InMemoryMeasurementLog, MeasurementLog, PgMeasurementLog};
use grid_telemetry::{init_tracing, record_flush_failure, record_flush_success};
use grid_worker::{Worker, WorkerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    // 内部通道：显式命名配置，无全局端点
    let (proxy_ep, worker_ep) = RelayChannel::pair(&RelayConfig {
        name: "gla-relay".to_string(),
        capacity: config.relay_capacity,
    });
    let (bridge_tx, bridge_rx) = NotificationBridge::pair(&BridgeConfig {
        name: "gla-data".to_string(),
        capacity: config.relay_capacity,
    });

    // 发现 + 连接管理：候选端点来自配置，回退主机/端口显式给定
    let discovery = match &config.agent_endpoints {
        Some(list) => StaticDiscovery::from_list(list)?,
        None => StaticDiscovery::default(),
    };
    let client_name = config
        .client_name
        .clone()
        .unwrap_or_else(|| format!("GLA-{}", uuid::Uuid::new_v4().simple()));
    let manager = ConnectionManager::new(
        AgentLinkConfig {
            service_name: config.service_name.clone(),
            fallback_host: config.fallback_host.clone(),
            fallback_port: config.fallback_port,
            client_name,
            retry_interval_ms: config.retry_interval_ms,
        },
        Arc::new(discovery),
        bridge_tx,
    );

    // 工作器：活连接的唯一归属者
    let handle = Worker::spawn(
        WorkerConfig {
            poll_timeout_ms: config.poll_timeout_ms,
            reconnect: config.reconnect,
        },
        Arc::new(manager),
        worker_ep,
        bridge_rx,
    );

    // 落库：配置了数据库即 Postgres，否则内存占位
    let log: Arc<dyn MeasurementLog> = match &config.database_url {
        Some(url) => Arc::new(PgMeasurementLog::connect(url).await?),
        None => Arc::new(InMemoryMeasurementLog::new()),
    };

    let (measurements_tx, _) = broadcast::channel::<Measurement>(256);
    let reply_port = ports::ConnectionReplyPort::new();
    let publish_port =
        ports::BroadcastPublishPort::new(measurements_tx.clone(), Arc::clone(&log));

    let mut proxy = DeviceProxy::new(
        DeviceProxyConfig::default(),
        proxy_ep,
        handle,
        Arc::new(reply_port.clone()) as Arc<dyn ReplyPort>,
        Arc::new(publish_port) as Arc<dyn PublishPort>,
    );
    proxy.activate().await?;
    let proxy = Arc::new(Mutex::new(proxy));

    // 周期批量提交
    let flusher = tokio::spawn(flush_loop(Arc::clone(&log), config.flush_interval_ms));

    // 命令前端
    let listener = TcpListener::bind(&config.command_addr).await?;
    info!(target: "grid.bridge", addr = %config.command_addr, "command_port_listening");
    let server = tokio::spawn(command::serve(
        listener,
        Arc::clone(&proxy),
        reply_port,
        measurements_tx,
    ));

    shutdown_signal().await;
    info!(target: "grid.bridge", "shutdown_requested");

    server.abort();
    flusher.abort();
    proxy.lock().await.destroy().await?;

    // 最后一次提交，清空缓冲
    match log.flush().await {
        Ok(count) => info!(target: "grid.bridge", count, "final_flush"),
        Err(e) => warn!(target: "grid.bridge", error = %e, "final_flush_failed"),
    }

    let counters = grid_telemetry::metrics().snapshot();
    info!(
        target: "grid.bridge",
        commands = counters.commands_forwarded,
        queries = counters.queries_forwarded,
        answers_routed = counters.answers_routed,
        answers_dropped = counters.answers_dropped,
        pushes = counters.pushes_published,
        dispatch_failures = counters.dispatch_failures,
        "bridge_exited"
    );
    Ok(())
}

async fn flush_loop(log: Arc<dyn MeasurementLog>, interval_ms: u64) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    loop {
        ticker.tick().await;
        match log.flush().await {
            Ok(0) => {}
            Ok(count) => {
                record_flush_success();
                debug!(target: "grid.bridge", count, "measurements_flushed");
            }
            Err(e) => {
                // 失败的批次已被丢弃，缓冲不会无限增长
                record_flush_failure();
                warn!(target: "grid.bridge", error = %e, "flush_failed");
            }
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(target: "grid.bridge", error = %e, "sigterm_handler_unavailable");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
