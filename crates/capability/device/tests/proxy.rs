use agent_contract::LoginAck;
use async_trait::async_trait;
use domain::{AttributeSpec, CorrelationId, Measurement, QueryReply, SetPoint};
use grid_agent::{AgentError, AgentRpc, Connector};
use grid_device::{
    DeviceError, DeviceProxy, DeviceProxyConfig, PortError, PublishPort, ReplyPort,
};
use grid_relay::{
    BridgeConfig, BridgeSender, NotificationBridge, RelayChannel, RelayConfig, RelayEnvelope,
    RelaySender,
};
use grid_worker::{Worker, WorkerConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// 代理连接桩：订阅/写成功，查询原样回显；set 可被脚本挂起。
struct StubRpc {
    hang_set: bool,
}

#[async_trait]
impl AgentRpc for StubRpc {
    async fn login(&self, _client: &str) -> Result<LoginAck, AgentError> {
        Ok(LoginAck {
            status: "ok".to_string(),
            session: "s-1".to_string(),
        })
    }

    async fn subscribe(&self, _spec: &AttributeSpec) -> Result<(), AgentError> {
        Ok(())
    }

    async fn set(&self, _point: &SetPoint) -> Result<(), AgentError> {
        if self.hang_set {
            // 模拟无限阻塞的远端调用
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn query(&self, spec: &AttributeSpec) -> Result<QueryReply, AgentError> {
        Ok(Measurement {
            object: spec.object.clone(),
            attribute: spec.attribute.clone(),
            value: "123.4".to_string(),
            ts_ms: 42,
        })
    }

    fn is_open(&self) -> bool {
        true
    }
}

struct StubConnector {
    hang_set: bool,
}

#[async_trait]
impl Connector for StubConnector {
    async fn connect(&self, _retry: bool) -> Result<Arc<dyn AgentRpc>, AgentError> {
        Ok(Arc::new(StubRpc {
            hang_set: self.hang_set,
        }))
    }
}

/// 按身份路由的应答端口桩：每个“请求方”注册自己的接收通道。
#[derive(Default)]
struct RoutingReplyPort {
    routes: Mutex<HashMap<CorrelationId, mpsc::UnboundedSender<QueryReply>>>,
}

impl RoutingReplyPort {
    fn register(&self, id: CorrelationId) -> mpsc::UnboundedReceiver<QueryReply> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.lock().expect("lock").insert(id, tx);
        rx
    }

    fn disconnect(&self, id: CorrelationId) {
        self.routes.lock().expect("lock").remove(&id);
    }
}

#[async_trait]
impl ReplyPort for RoutingReplyPort {
    async fn reply(&self, id: CorrelationId, reply: QueryReply) -> Result<(), PortError> {
        let routes = self.routes.lock().expect("lock");
        match routes.get(&id) {
            Some(tx) => tx
                .send(reply)
                .map_err(|_| PortError::Closed(id.to_string())),
            None => Err(PortError::UnknownIdentity(id.to_string())),
        }
    }
}

#[derive(Default)]
struct RecordingPublishPort {
    published: Mutex<Vec<Measurement>>,
}

impl RecordingPublishPort {
    fn published(&self) -> Vec<Measurement> {
        self.published.lock().expect("lock").clone()
    }
}

#[async_trait]
impl PublishPort for RecordingPublishPort {
    async fn publish(&self, measurement: Measurement) -> Result<(), PortError> {
        self.published.lock().expect("lock").push(measurement);
        Ok(())
    }
}

struct Fixture {
    proxy: DeviceProxy,
    reply_port: Arc<RoutingReplyPort>,
    publish_port: Arc<RecordingPublishPort>,
    /// 工作器侧发送端克隆：测试用来模拟乱序到达的中继消息
    injector: RelaySender,
    bridge_tx: BridgeSender,
}

fn fixture_with(hang_set: bool) -> Fixture {
    let (proxy_ep, worker_ep) = RelayChannel::pair(&RelayConfig::default());
    let injector = worker_ep.sender.clone();
    let (bridge_tx, bridge_rx) = NotificationBridge::pair(&BridgeConfig::default());
    let handle = Worker::spawn(
        WorkerConfig {
            poll_timeout_ms: 50,
            reconnect: false,
        },
        Arc::new(StubConnector { hang_set }),
        worker_ep,
        bridge_rx,
    );
    let reply_port = Arc::new(RoutingReplyPort::default());
    let publish_port = Arc::new(RecordingPublishPort::default());
    let proxy = DeviceProxy::new(
        DeviceProxyConfig::default(),
        proxy_ep,
        handle,
        Arc::clone(&reply_port) as Arc<dyn ReplyPort>,
        Arc::clone(&publish_port) as Arc<dyn PublishPort>,
    );
    Fixture {
        proxy,
        reply_port,
        publish_port,
        injector,
        bridge_tx,
    }
}

fn fixture() -> Fixture {
    fixture_with(false)
}

#[tokio::test]
async fn commands_are_rejected_before_activation() {
    let fx = fixture();
    let err = fx
        .proxy
        .handle_subscribe(vec![AttributeSpec::new("genA", "voltage", "V")])
        .await
        .expect_err("not yet running");
    assert!(matches!(err, DeviceError::NotRunning));
}

#[tokio::test]
async fn query_round_trip_routes_the_answer_to_the_captured_identity() {
    let mut fx = fixture();
    fx.proxy.activate().await.expect("activate");
    assert!(fx.proxy.is_running());
    assert!(fx.proxy.routing_id().is_some());

    let id = CorrelationId::capture();
    let mut inbox = fx.reply_port.register(id);
    fx.proxy
        .handle_query(id, vec![AttributeSpec::new("genA", "voltage", "V")])
        .await
        .expect("query");

    let reply = timeout(Duration::from_secs(2), inbox.recv())
        .await
        .expect("deadline")
        .expect("reply");
    assert_eq!(reply.object, "genA");
    assert_eq!(reply.attribute, "voltage");
    assert_eq!(reply.value, "123.4");
    assert_eq!(reply.ts_ms, 42);

    drop(fx.injector);
    fx.proxy.destroy().await.expect("destroy");
}

#[tokio::test]
async fn answers_arriving_out_of_order_are_routed_by_identity() {
    let mut fx = fixture();
    fx.proxy.activate().await.expect("activate");

    let first = CorrelationId::capture();
    let second = CorrelationId::capture();
    let mut first_inbox = fx.reply_port.register(first);
    let mut second_inbox = fx.reply_port.register(second);

    // 底层结果乱序完成：后发请求的应答先到达
    fx.injector
        .send(RelayEnvelope::Answer {
            id: second,
            reply: Measurement {
                object: "genB".to_string(),
                attribute: "current".to_string(),
                value: "2.0".to_string(),
                ts_ms: 2,
            },
        })
        .await
        .expect("inject");
    fx.injector
        .send(RelayEnvelope::Answer {
            id: first,
            reply: Measurement {
                object: "genA".to_string(),
                attribute: "voltage".to_string(),
                value: "1.0".to_string(),
                ts_ms: 1,
            },
        })
        .await
        .expect("inject");

    let second_reply = timeout(Duration::from_secs(2), second_inbox.recv())
        .await
        .expect("deadline")
        .expect("reply");
    let first_reply = timeout(Duration::from_secs(2), first_inbox.recv())
        .await
        .expect("deadline")
        .expect("reply");
    assert_eq!(second_reply.object, "genB");
    assert_eq!(first_reply.object, "genA");

    drop(fx.injector);
    fx.proxy.destroy().await.expect("destroy");
}

#[tokio::test]
async fn set_ack_does_not_wait_for_remote_completion() {
    let mut fx = fixture_with(true);
    fx.proxy.activate().await.expect("activate");

    // 远端 set 永不完成；本地递交必须立即确认
    timeout(
        Duration::from_millis(200),
        fx.proxy.handle_set(vec![SetPoint {
            spec: AttributeSpec::new("genA", "voltage", "V"),
            value: "240.0".to_string(),
        }]),
    )
    .await
    .expect("eager ack deadline")
    .expect("set");
    // 远端调用仍然挂着，销毁会被它拖住：此处只验证确认时延，不 join
}

#[tokio::test]
async fn pushes_are_published_without_acknowledgment() {
    let mut fx = fixture();
    fx.proxy.activate().await.expect("activate");

    let m = Measurement {
        object: "sw1".to_string(),
        attribute: "status".to_string(),
        value: "OPEN".to_string(),
        ts_ms: 77,
    };
    fx.bridge_tx.send(m.clone()).await.expect("bridge send");

    timeout(Duration::from_secs(2), async {
        loop {
            if fx.publish_port.published().contains(&m) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("publish deadline");

    drop(fx.injector);
    fx.proxy.destroy().await.expect("destroy");
}

#[tokio::test]
async fn answer_for_a_gone_caller_is_dropped_and_the_loop_survives() {
    let mut fx = fixture();
    fx.proxy.activate().await.expect("activate");

    let gone = CorrelationId::capture();
    fx.reply_port.register(gone);
    fx.reply_port.disconnect(gone);
    fx.injector
        .send(RelayEnvelope::Answer {
            id: gone,
            reply: Measurement {
                object: "genA".to_string(),
                attribute: "voltage".to_string(),
                value: "1.0".to_string(),
                ts_ms: 1,
            },
        })
        .await
        .expect("inject");

    // 丢弃绝不致命：随后的正常应答仍被路由
    let alive = CorrelationId::capture();
    let mut inbox = fx.reply_port.register(alive);
    fx.proxy
        .handle_query(alive, vec![AttributeSpec::new("genB", "current", "A")])
        .await
        .expect("query");
    let reply = timeout(Duration::from_secs(2), inbox.recv())
        .await
        .expect("deadline")
        .expect("reply");
    assert_eq!(reply.object, "genB");

    drop(fx.injector);
    fx.proxy.destroy().await.expect("destroy");
}

#[tokio::test]
async fn destroy_is_two_phase_and_joins_the_worker() {
    let mut fx = fixture();
    fx.proxy.activate().await.expect("activate");

    drop(fx.injector);
    timeout(Duration::from_secs(2), fx.proxy.destroy())
        .await
        .expect("destroy deadline")
        .expect("destroy");
    assert!(!fx.proxy.is_running());

    // 销毁后命令被拒绝
    let err = fx
        .proxy
        .handle_set(vec![SetPoint {
            spec: AttributeSpec::new("genA", "voltage", "V"),
            value: "0".to_string(),
        }])
        .await
        .expect_err("destroyed");
    assert!(matches!(err, DeviceError::NotRunning));
}

#[tokio::test]
async fn second_activation_is_rejected() {
    let mut fx = fixture();
    fx.proxy.activate().await.expect("activate");
    let err = fx.proxy.activate().await.expect_err("already activated");
    assert!(matches!(err, DeviceError::Activation(_)));
    drop(fx.injector);
    fx.proxy.destroy().await.expect("destroy");
}
