//! 连接归属工作器：轮询分发循环。
//!
//! 工作器是活连接的唯一归属者。全部外部交互走消息：设备代理经中继
//! 通道送入命令，传输层后台上下文经通知桥送入推送。激活与终止是
//! 电平触发标志，每次循环迭代检查一次，不是边沿中断；对终止请求的
//! 最坏反应延迟为一个轮询超时加上在途 RPC 调用的完成时间。

use domain::ConnectionState;
use grid_agent::{AgentError, AgentRpc, Connector};
use grid_relay::{BridgeReceiver, RelayEnvelope, RelayError, WorkerEndpoint};
use grid_telemetry::{record_connect_attempt, record_dispatch_failure, record_login_failure};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// 工作器的中继路由标识，就绪时交给设备代理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(Uuid);

impl WorkerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 工作器句柄错误。
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker not ready: {0}")]
    NotReady(String),
    #[error("worker task join failed: {0}")]
    Join(String),
}

/// 单次分发的失败原因。
#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    /// 本边界不可能出现的信封标签：编程缺陷
    #[error("unexpected inbound tag: {0}")]
    Defect(&'static str),
}

/// 工作器配置。
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// 轮询有界等待（毫秒）
    pub poll_timeout_ms: u64,
    /// 连接丢失后是否重连
    pub reconnect: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
            reconnect: false,
        }
    }
}

/// 工作器任务的外部句柄。
pub struct WorkerHandle {
    id: WorkerId,
    active: watch::Sender<bool>,
    terminated: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    ready: Option<oneshot::Receiver<WorkerId>>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// 等待工作器进入循环并交回路由标识。
    ///
    /// 就绪是一次性信号，不做固定间隔轮询；超时或工作器提前退出都
    /// 使激活失败并同步上报。
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<WorkerId, WorkerError> {
        let rx = self
            .ready
            .take()
            .ok_or_else(|| WorkerError::NotReady("readiness already consumed".to_string()))?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(_)) => Err(WorkerError::NotReady(
                "worker exited before ready".to_string(),
            )),
            Err(_) => Err(WorkerError::NotReady(format!(
                "no ready signal within {timeout:?}"
            ))),
        }
    }

    pub fn activate(&self) {
        let _ = self.active.send(true);
    }

    pub fn deactivate(&self) {
        let _ = self.active.send(false);
    }

    pub fn terminate(&self) {
        let _ = self.terminated.send(true);
    }

    /// 当前连接状态快照。
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// 连接状态观察端，供调用方等待状态变迁。
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// 等待工作器任务完全退出。
    pub async fn join(self) -> Result<(), WorkerError> {
        self.task.await.map_err(|e| WorkerError::Join(e.to_string()))
    }
}

/// 工作器：长活任务，组合连接管理、通知桥与中继通道。
pub struct Worker {
    config: WorkerConfig,
    connector: Arc<dyn Connector>,
    endpoint: WorkerEndpoint,
    bridge: BridgeReceiver,
    active: watch::Receiver<bool>,
    terminated: watch::Receiver<bool>,
    state: watch::Sender<ConnectionState>,
    ready: Option<oneshot::Sender<WorkerId>>,
    id: WorkerId,
}

/// 一次轮询迭代里就绪的输入。
enum PollInput {
    Envelope(Option<RelayEnvelope>),
    Push(Option<domain::Measurement>),
    Idle,
}

impl Worker {
    /// 启动工作器任务并返回句柄。
    pub fn spawn(
        config: WorkerConfig,
        connector: Arc<dyn Connector>,
        endpoint: WorkerEndpoint,
        bridge: BridgeReceiver,
    ) -> WorkerHandle {
        let (active_tx, active_rx) = watch::channel(false);
        let (terminated_tx, terminated_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (ready_tx, ready_rx) = oneshot::channel();
        let id = WorkerId::new();

        let worker = Worker {
            config,
            connector,
            endpoint,
            bridge,
            active: active_rx,
            terminated: terminated_rx,
            state: state_tx,
            ready: Some(ready_tx),
            id,
        };
        let task = tokio::spawn(worker.run());

        WorkerHandle {
            id,
            active: active_tx,
            terminated: terminated_tx,
            state: state_rx,
            ready: Some(ready_rx),
            task,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn is_terminated(&self) -> bool {
        *self.terminated.borrow()
    }

    async fn run(mut self) {
        // 循环已进入：交回路由标识，设备代理据此完成激活
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(self.id);
        }
        info!(target: "grid.worker", worker_id = %self.id, "worker_started");

        loop {
            // 等待激活；终止随时优先
            let activated = tokio::select! {
                res = self.active.wait_for(|on| *on) => res.is_ok(),
                _ = self.terminated.wait_for(|t| *t) => false,
            };
            if !activated || self.is_terminated() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            record_connect_attempt();
            let conn = tokio::select! {
                res = self.connector.connect(true) => match res {
                    Ok(conn) => Some(conn),
                    Err(e) => {
                        // 登录失败不消耗重连周期，由下方策略重估
                        record_login_failure();
                        warn!(target: "grid.worker", error = %e, "login_failed");
                        None
                    }
                },
                _ = self.terminated.wait_for(|t| *t) => break,
            };

            if let Some(conn) = conn {
                self.set_state(ConnectionState::Running);
                info!(target: "grid.worker", "worker_running");
                self.poll_until_failure(conn.as_ref()).await;
                // conn 在此离开作用域：任何退出路径都释放连接
            }

            if self.is_terminated() {
                break;
            }
            if self.config.reconnect {
                info!(target: "grid.worker", "connection_lost_retrying");
                continue;
            }
            break;
        }

        let final_state = if self.is_terminated() {
            ConnectionState::Terminated
        } else {
            ConnectionState::Stopped
        };
        self.set_state(final_state);
        info!(target: "grid.worker", worker_id = %self.id, state = ?final_state, "worker_exited");
    }

    /// 内层轮询循环：阻塞在两个输入源的就绪上，有界等待。
    ///
    /// 每次迭代各来源最多处理一条消息，不整批排空。任何分发失败只
    /// 中止本内层循环，由外层重估重连策略。
    async fn poll_until_failure(&mut self, conn: &dyn AgentRpc) {
        let timeout = Duration::from_millis(self.config.poll_timeout_ms);
        loop {
            if self.is_terminated() {
                return;
            }
            // 连接丢失没有显式信号，靠下一次轮询观测缺席
            if !conn.is_open() {
                warn!(target: "grid.worker", "transport_gone");
                return;
            }

            let input = tokio::select! {
                envelope = self.endpoint.receiver.recv() => PollInput::Envelope(envelope),
                push = self.bridge.recv() => PollInput::Push(push),
                _ = tokio::time::sleep(timeout) => PollInput::Idle,
            };

            let step = match input {
                PollInput::Envelope(Some(envelope)) => {
                    self.dispatch_envelope(conn, envelope).await
                }
                PollInput::Envelope(None) => {
                    warn!(target: "grid.worker", "relay_peer_gone");
                    return;
                }
                PollInput::Push(Some(measurement)) => self.forward_push(measurement).await,
                PollInput::Push(None) => {
                    warn!(target: "grid.worker", "bridge_sender_gone");
                    return;
                }
                PollInput::Idle => Ok(()),
            };

            if let Err(e) = step {
                record_dispatch_failure();
                error!(target: "grid.worker", error = %e, "dispatch_failed");
                return;
            }
        }
    }

    async fn dispatch_envelope(
        &self,
        conn: &dyn AgentRpc,
        envelope: RelayEnvelope,
    ) -> Result<(), DispatchError> {
        match envelope {
            RelayEnvelope::Subscribe(specs) => {
                for spec in &specs {
                    conn.subscribe(spec).await?;
                }
                info!(target: "grid.worker", count = specs.len(), "subscriptions_registered");
                Ok(())
            }
            RelayEnvelope::Set(points) => {
                for point in &points {
                    conn.set(point).await?;
                }
                Ok(())
            }
            RelayEnvelope::Query { id, specs } => {
                // 批内按请求顺序逐点查询并立即回发应答
                for spec in &specs {
                    let reply = conn.query(spec).await?;
                    self.endpoint
                        .sender
                        .send(RelayEnvelope::Answer { id, reply })
                        .await?;
                }
                Ok(())
            }
            other @ (RelayEnvelope::Answer { .. } | RelayEnvelope::Push(_)) => {
                Err(DispatchError::Defect(other.tag()))
            }
        }
    }

    /// 通知桥消息原样上送中继，不做任何变换。
    async fn forward_push(&self, measurement: domain::Measurement) -> Result<(), DispatchError> {
        self.endpoint
            .sender
            .send(RelayEnvelope::Push(measurement))
            .await?;
        Ok(())
    }
}
