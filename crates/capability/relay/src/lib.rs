//! 进程内中继原语。
//!
//! - `RelayChannel`：设备代理与工作器之间的双向信封通道。
//! - `NotificationBridge`：RPC 传输层后台回调上下文向工作器递送推送
//!   数据的单向通道，后台上下文绝不直接触碰工作器状态。
//!
//! 两者都从显式的命名配置构造，不存在全局端点。

use domain::{AttributeSpec, CorrelationId, Measurement, QueryReply, SetPoint};
use tokio::sync::mpsc;

/// 中继错误。
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// 对端端点已被丢弃。
    #[error("relay channel closed: {0}")]
    Closed(String),
}

/// 中继信封：闭合标签变体。
///
/// 两个方向共用同一闭合类型；每个消费方只接受对本边界合法的标签，
/// 非法标签按编程缺陷处理（记错误日志并中止本次迭代），绝不当作
/// 可恢复输入。
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEnvelope {
    /// 订阅一批测点的推送。
    Subscribe(Vec<AttributeSpec>),
    /// 写一批测点。
    Set(Vec<SetPoint>),
    /// 查询一批测点，应答按 `id` 路由回请求方。
    Query {
        id: CorrelationId,
        specs: Vec<AttributeSpec>,
    },
    /// 某次查询中单个测点的应答。
    Answer { id: CorrelationId, reply: QueryReply },
    /// 代理推送的数据，原样转发。
    Push(Measurement),
}

impl RelayEnvelope {
    /// 信封标签名，用于日志诊断。
    pub fn tag(&self) -> &'static str {
        match self {
            RelayEnvelope::Subscribe(_) => "subscribe",
            RelayEnvelope::Set(_) => "set",
            RelayEnvelope::Query { .. } => "query",
            RelayEnvelope::Answer { .. } => "answer",
            RelayEnvelope::Push(_) => "push",
        }
    }
}

/// 中继通道配置：显式命名 + 有界容量。
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// 通道标识，进入错误与日志
    pub name: String,
    /// 每个方向的信封容量
    pub capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: "relay".to_string(),
            capacity: 64,
        }
    }
}

/// 中继发送端（可克隆）。
#[derive(Debug, Clone)]
pub struct RelaySender {
    name: String,
    tx: mpsc::Sender<RelayEnvelope>,
}

impl RelaySender {
    /// 发送一只信封；通道满时等待（背压），绝不丢弃。
    pub async fn send(&self, envelope: RelayEnvelope) -> Result<(), RelayError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| RelayError::Closed(self.name.clone()))
    }
}

/// 中继接收端。
#[derive(Debug)]
pub struct RelayReceiver {
    rx: mpsc::Receiver<RelayEnvelope>,
}

impl RelayReceiver {
    /// 接收下一只信封；对端全部丢弃后返回 `None`。
    pub async fn recv(&mut self) -> Option<RelayEnvelope> {
        self.rx.recv().await
    }
}

/// 设备代理侧端点。
#[derive(Debug)]
pub struct ProxyEndpoint {
    pub sender: RelaySender,
    pub receiver: RelayReceiver,
}

impl ProxyEndpoint {
    /// 拆分为独立的发送/接收半端，供命令面与解复用循环分别持有。
    pub fn split(self) -> (RelaySender, RelayReceiver) {
        (self.sender, self.receiver)
    }
}

/// 工作器侧端点，由工作器循环独占消费。
#[derive(Debug)]
pub struct WorkerEndpoint {
    pub sender: RelaySender,
    pub receiver: RelayReceiver,
}

/// 双向中继通道。
pub struct RelayChannel;

impl RelayChannel {
    /// 由命名配置构造一对端点。
    pub fn pair(config: &RelayConfig) -> (ProxyEndpoint, WorkerEndpoint) {
        let (to_worker_tx, to_worker_rx) = mpsc::channel(config.capacity);
        let (to_proxy_tx, to_proxy_rx) = mpsc::channel(config.capacity);
        let proxy = ProxyEndpoint {
            sender: RelaySender {
                name: config.name.clone(),
                tx: to_worker_tx,
            },
            receiver: RelayReceiver { rx: to_proxy_rx },
        };
        let worker = WorkerEndpoint {
            sender: RelaySender {
                name: config.name.clone(),
                tx: to_proxy_tx,
            },
            receiver: RelayReceiver { rx: to_worker_rx },
        };
        (proxy, worker)
    }
}

/// 通知桥配置。
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub name: String,
    pub capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "bridge".to_string(),
            capacity: 64,
        }
    }
}

/// 通知桥发送端：交给传输层后台回调上下文持有（可克隆）。
#[derive(Debug, Clone)]
pub struct BridgeSender {
    name: String,
    tx: mpsc::Sender<Measurement>,
}

impl BridgeSender {
    /// 从后台回调上下文递交一条推送数据。
    pub async fn send(&self, measurement: Measurement) -> Result<(), RelayError> {
        self.tx
            .send(measurement)
            .await
            .map_err(|_| RelayError::Closed(self.name.clone()))
    }
}

/// 通知桥接收端，仅工作器循环消费。
#[derive(Debug)]
pub struct BridgeReceiver {
    rx: mpsc::Receiver<Measurement>,
}

impl BridgeReceiver {
    pub async fn recv(&mut self) -> Option<Measurement> {
        self.rx.recv().await
    }
}

/// 单向通知桥。
pub struct NotificationBridge;

impl NotificationBridge {
    /// 由命名配置构造发送/接收端。
    pub fn pair(config: &BridgeConfig) -> (BridgeSender, BridgeReceiver) {
        let (tx, rx) = mpsc::channel(config.capacity);
        (
            BridgeSender {
                name: config.name.clone(),
                tx,
            },
            BridgeReceiver { rx },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::AttributeSpec;

    #[tokio::test]
    async fn relay_pair_carries_envelopes_both_ways() {
        let (proxy, mut worker) = RelayChannel::pair(&RelayConfig::default());
        let spec = AttributeSpec::new("genA", "voltage", "V");
        proxy
            .sender
            .send(RelayEnvelope::Subscribe(vec![spec.clone()]))
            .await
            .expect("send");
        match worker.receiver.recv().await {
            Some(RelayEnvelope::Subscribe(specs)) => assert_eq!(specs, vec![spec]),
            other => panic!("unexpected envelope: {:?}", other),
        }

        let id = CorrelationId::capture();
        let reply = Measurement {
            object: "genA".to_string(),
            attribute: "voltage".to_string(),
            value: "123.4".to_string(),
            ts_ms: 1000,
        };
        worker
            .sender
            .send(RelayEnvelope::Answer {
                id,
                reply: reply.clone(),
            })
            .await
            .expect("send");
        let (_, mut proxy_rx) = proxy.split();
        match proxy_rx.recv().await {
            Some(RelayEnvelope::Answer { id: got, reply: r }) => {
                assert_eq!(got, id);
                assert_eq!(r, reply);
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_after_peer_dropped_reports_closed() {
        let (proxy, worker) = RelayChannel::pair(&RelayConfig {
            name: "relay-test".to_string(),
            capacity: 1,
        });
        drop(worker);
        let err = proxy
            .sender
            .send(RelayEnvelope::Set(Vec::new()))
            .await
            .expect_err("peer is gone");
        assert!(err.to_string().contains("relay-test"));
    }

    #[tokio::test]
    async fn bridge_is_one_way_and_clonable() {
        let (tx, mut rx) = NotificationBridge::pair(&BridgeConfig::default());
        let other = tx.clone();
        let m = Measurement {
            object: "sw1".to_string(),
            attribute: "status".to_string(),
            value: "OPEN".to_string(),
            ts_ms: 2000,
        };
        other.send(m.clone()).await.expect("send");
        assert_eq!(rx.recv().await, Some(m));
    }
}
