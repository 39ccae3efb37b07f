//! 代理链路 TCP 客户端实现。
//!
//! 按行分帧的 JSON：请求携带 `seq`，后台读取任务把回显 `seq` 的应答
//! 配对到挂起调用，把无 `seq` 的推送帧原样递交通知桥。套接字死亡时
//! 读取任务置 `open` 为假并使全部挂起调用失败；工作器在下次轮询时
//! 观测到缺席。

use crate::error::AgentError;
use crate::AgentRpc;
use agent_contract::{AgentOp, LoginAck, RequestFrame, ServerFrame, ValuePayload};
use async_trait::async_trait;
use domain::{AttributeSpec, Measurement, QueryReply, SetPoint};
use grid_relay::BridgeSender;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type CallResult = Result<serde_json::Value, AgentError>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CallResult>>>>;

struct CallState {
    writer: OwnedWriteHalf,
    next_seq: u64,
}

/// 代理链路客户端：一条已建立的传输连接。
pub struct AgentClient {
    peer: String,
    /// 独占调用锁，覆盖完整调用往返
    call_lock: Mutex<CallState>,
    pending: PendingMap,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl AgentClient {
    /// 建立到一个端点的传输连接并启动后台读取任务。
    pub async fn connect(
        host: &str,
        port: u16,
        bridge: BridgeSender,
    ) -> Result<Self, AgentError> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| AgentError::Connect(host.to_string(), port, e.to_string()))?;
        info!("connected to agent at {}", addr);

        let (read_half, writer) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let open = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&pending),
            Arc::clone(&open),
            bridge,
            addr.clone(),
        ));

        Ok(Self {
            peer: addr,
            call_lock: Mutex::new(CallState {
                writer,
                next_seq: 0,
            }),
            pending,
            open,
            reader,
        })
    }

    /// 发出一次调用并等待回显 `seq` 的应答。
    async fn call(&self, op: AgentOp) -> CallResult {
        let mut state = self.call_lock.lock().await;
        state.next_seq += 1;
        let seq = state.next_seq;

        let (tx, rx) = oneshot::channel();
        {
            // 与读取任务的收尾互斥：open 翻转与挂起表清空持同一把锁
            let mut pending = self.pending.lock().await;
            if !self.is_open() {
                return Err(AgentError::Transport(format!(
                    "connection to {} closed",
                    self.peer
                )));
            }
            pending.insert(seq, tx);
        }

        let frame = RequestFrame { seq, op };
        let mut line = serde_json::to_string(&frame)
            .map_err(|e| AgentError::Protocol(format!("encode request: {e}")))?;
        line.push('\n');
        if let Err(e) = state.writer.write_all(line.as_bytes()).await {
            self.pending.lock().await.remove(&seq);
            return Err(AgentError::Transport(e.to_string()));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Transport(format!(
                "connection to {} closed",
                self.peer
            ))),
        }
    }
}

impl Drop for AgentClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl AgentRpc for AgentClient {
    async fn login(&self, client: &str) -> Result<LoginAck, AgentError> {
        let result = self
            .call(AgentOp::Login {
                client: client.to_string(),
            })
            .await?;
        serde_json::from_value(result)
            .map_err(|e| AgentError::Protocol(format!("malformed login ack: {e}")))
    }

    async fn subscribe(&self, spec: &AttributeSpec) -> Result<(), AgentError> {
        self.call(AgentOp::Subscribe {
            object: spec.object.clone(),
            attribute: spec.attribute.clone(),
            unit: spec.unit.clone(),
        })
        .await?;
        Ok(())
    }

    async fn set(&self, point: &SetPoint) -> Result<(), AgentError> {
        self.call(AgentOp::Set {
            object: point.spec.object.clone(),
            attribute: point.spec.attribute.clone(),
            unit: point.spec.unit.clone(),
            value: point.value.clone(),
        })
        .await?;
        Ok(())
    }

    async fn query(&self, spec: &AttributeSpec) -> Result<QueryReply, AgentError> {
        let result = self
            .call(AgentOp::Query {
                object: spec.object.clone(),
                attribute: spec.attribute.clone(),
                unit: spec.unit.clone(),
            })
            .await?;
        let payload: ValuePayload = serde_json::from_value(result)
            .map_err(|e| AgentError::Protocol(format!("malformed query reply: {e}")))?;
        Ok(measurement_from(payload))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

fn measurement_from(payload: ValuePayload) -> Measurement {
    Measurement {
        object: payload.object,
        attribute: payload.attribute,
        value: payload.value,
        ts_ms: payload.ts_ms,
    }
}

/// 后台读取任务：运行在传输层自己的任务上下文中。
///
/// 只向挂起表和通知桥写，绝不触碰工作器状态。
async fn read_loop(
    read_half: OwnedReadHalf,
    pending: PendingMap,
    open: Arc<AtomicBool>,
    bridge: BridgeSender,
    peer: String,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<ServerFrame>(line) {
                    Ok(ServerFrame::Response(resp)) => {
                        let result = match (resp.result, resp.error) {
                            (Some(value), None) => Ok(value),
                            (None, Some(error)) => Err(AgentError::Rejected(error)),
                            _ => Err(AgentError::Protocol(
                                "response carries neither result nor error".to_string(),
                            )),
                        };
                        match pending.lock().await.remove(&resp.seq) {
                            Some(tx) => {
                                let _ = tx.send(result);
                            }
                            None => warn!(peer = %peer, seq = resp.seq, "response for unknown seq"),
                        }
                    }
                    Ok(ServerFrame::Push(frame)) => {
                        if bridge.send(measurement_from(frame.push)).await.is_err() {
                            debug!(peer = %peer, "bridge receiver gone, dropping push");
                        }
                    }
                    Err(e) => {
                        warn!(peer = %peer, error = %e, data = %line, "malformed frame from agent");
                    }
                }
            }
            Ok(None) => {
                info!("connection closed by agent at {}", peer);
                break;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "agent transport read failed");
                break;
            }
        }
    }

    let mut pending = pending.lock().await;
    open.store(false, Ordering::Release);
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(AgentError::Transport(format!(
            "connection to {peer} lost"
        ))));
    }
}
