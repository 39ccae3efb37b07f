//! 设备代理：命令复用与应答路由。
//!
//! 对外两张面：同步请求/应答面（set/sub/qry）与推送面（测量值，无
//! 确认）。set/sub 在本地递交中继后立即确认，不等远端完成；确认
//! 延迟与 RPC 往返解耦是有意设计。qry 捕获请求方身份作关联 ID，
//! 应答到达时按身份路由回原请求方，与其他并发应答的到达顺序无关。

use domain::{AttributeSpec, CorrelationId, Measurement, QueryReply, SetPoint};
use grid_relay::{ProxyEndpoint, RelayEnvelope, RelayReceiver, RelaySender};
use grid_telemetry::{
    record_answer_dropped, record_answer_routed, record_command_forwarded, record_push_published,
    record_query_forwarded,
};
use grid_worker::{WorkerHandle, WorkerId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 端口错误。
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// 捕获身份已不存在（请求方断开）
    #[error("unknown reply identity: {0}")]
    UnknownIdentity(String),
    #[error("port closed: {0}")]
    Closed(String),
}

/// 应答端口：把应答定址到某个捕获身份。
///
/// 由宿主应用提供；核心只要求“请求时捕获不透明身份、事后按身份回
/// 送”这一对原语。
#[async_trait::async_trait]
pub trait ReplyPort: Send + Sync {
    async fn reply(&self, id: CorrelationId, reply: QueryReply) -> Result<(), PortError>;
}

/// 发布端口：单向推送，无确认。
#[async_trait::async_trait]
pub trait PublishPort: Send + Sync {
    async fn publish(&self, measurement: Measurement) -> Result<(), PortError>;
}

/// 设备代理错误。
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// 激活期间的一次性搭桥失败：中止激活并同步上报
    #[error("activation failed: {0}")]
    Activation(String),
    #[error("device proxy not running")]
    NotRunning,
    #[error("relay channel closed: {0}")]
    Relay(String),
    #[error("worker shutdown failed: {0}")]
    Shutdown(String),
}

/// 设备代理配置。
#[derive(Debug, Clone)]
pub struct DeviceProxyConfig {
    /// 等待工作器就绪信号的上限（毫秒）
    pub activation_timeout_ms: u64,
}

impl Default for DeviceProxyConfig {
    fn default() -> Self {
        Self {
            activation_timeout_ms: 5000,
        }
    }
}

/// 设备代理：持有一个工作器，复用命令、解复用应答与推送。
pub struct DeviceProxy {
    config: DeviceProxyConfig,
    sender: RelaySender,
    receiver: Option<RelayReceiver>,
    worker: Option<WorkerHandle>,
    demux: Option<JoinHandle<()>>,
    reply_port: Arc<dyn ReplyPort>,
    publish_port: Arc<dyn PublishPort>,
    routing_id: Option<WorkerId>,
    running: bool,
}

impl DeviceProxy {
    pub fn new(
        config: DeviceProxyConfig,
        endpoint: ProxyEndpoint,
        worker: WorkerHandle,
        reply_port: Arc<dyn ReplyPort>,
        publish_port: Arc<dyn PublishPort>,
    ) -> Self {
        let (sender, receiver) = endpoint.split();
        Self {
            config,
            sender,
            receiver: Some(receiver),
            worker: Some(worker),
            demux: None,
            reply_port,
            publish_port,
            routing_id: None,
            running: false,
        }
    }

    /// 激活：等工作器就绪信号、记下路由标识、激活工作器、
    /// 启动解复用循环。
    pub async fn activate(&mut self) -> Result<(), DeviceError> {
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| DeviceError::Activation("already activated".to_string()))?;
        let worker = self
            .worker
            .as_mut()
            .ok_or_else(|| DeviceError::Activation("worker already destroyed".to_string()))?;

        let timeout = Duration::from_millis(self.config.activation_timeout_ms);
        let id = worker
            .wait_ready(timeout)
            .await
            .map_err(|e| DeviceError::Activation(e.to_string()))?;
        self.routing_id = Some(id);
        worker.activate();

        self.demux = Some(tokio::spawn(demux_loop(
            receiver,
            Arc::clone(&self.reply_port),
            Arc::clone(&self.publish_port),
        )));
        self.running = true;
        info!(target: "grid.device", worker_id = %id, "device_proxy_running");
        Ok(())
    }

    /// 每工作器稳定的中继路由标识。
    pub fn routing_id(&self) -> Option<WorkerId> {
        self.routing_id
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// 写命令：本地递交即确认，不等远端完成。
    pub async fn handle_set(&self, points: Vec<SetPoint>) -> Result<(), DeviceError> {
        self.ensure_running()?;
        self.forward(RelayEnvelope::Set(points)).await?;
        record_command_forwarded();
        Ok(())
    }

    /// 订阅命令：本地递交即确认。
    pub async fn handle_subscribe(&self, specs: Vec<AttributeSpec>) -> Result<(), DeviceError> {
        self.ensure_running()?;
        self.forward(RelayEnvelope::Subscribe(specs)).await?;
        record_command_forwarded();
        Ok(())
    }

    /// 查询命令：用捕获的请求方身份作关联 ID，不同步返回应答。
    pub async fn handle_query(
        &self,
        id: CorrelationId,
        specs: Vec<AttributeSpec>,
    ) -> Result<(), DeviceError> {
        self.ensure_running()?;
        self.forward(RelayEnvelope::Query { id, specs }).await?;
        record_query_forwarded();
        Ok(())
    }

    /// 两阶段销毁：去激活 → 终止 → 阻塞到工作器任务完全退出，
    /// 保证没有在途中继消息活过销毁。
    pub async fn destroy(&mut self) -> Result<(), DeviceError> {
        self.running = false;
        if let Some(worker) = self.worker.take() {
            worker.deactivate();
            worker.terminate();
            worker
                .join()
                .await
                .map_err(|e| DeviceError::Shutdown(e.to_string()))?;
        }
        // 工作器退出后中继发送端随之丢弃，解复用循环自然收尾
        if let Some(demux) = self.demux.take() {
            let _ = demux.await;
        }
        info!(target: "grid.device", "device_proxy_destroyed");
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), DeviceError> {
        if self.running { Ok(()) } else { Err(DeviceError::NotRunning) }
    }

    async fn forward(&self, envelope: RelayEnvelope) -> Result<(), DeviceError> {
        self.sender
            .send(envelope)
            .await
            .map_err(|e| DeviceError::Relay(e.to_string()))
    }
}

/// 解复用循环：应答按捕获身份回送，推送上发布面。
///
/// 应答到达时请求方已不在：丢弃并计数，绝不致命，也绝不改道。
async fn demux_loop(
    mut receiver: RelayReceiver,
    reply_port: Arc<dyn ReplyPort>,
    publish_port: Arc<dyn PublishPort>,
) {
    while let Some(envelope) = receiver.recv().await {
        match envelope {
            RelayEnvelope::Answer { id, reply } => match reply_port.reply(id, reply).await {
                Ok(()) => record_answer_routed(),
                Err(e) => {
                    record_answer_dropped();
                    warn!(target: "grid.device", id = %id, error = %e, "answer_dropped");
                }
            },
            RelayEnvelope::Push(measurement) => {
                match publish_port.publish(measurement).await {
                    Ok(()) => record_push_published(),
                    Err(e) => warn!(target: "grid.device", error = %e, "push_publish_failed"),
                }
            }
            other => {
                // 命令标签不可能出现在解复用方向：编程缺陷，不当作输入
                error!(target: "grid.device", tag = other.tag(), "unexpected_envelope_tag");
            }
        }
    }
    info!(target: "grid.device", "demux_loop_ended");
}
