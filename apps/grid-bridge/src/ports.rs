//! 命令端口的应答路由与测量发布实现。

use async_trait::async_trait;
use domain::{AttributeSpec, CorrelationId, Measurement, QueryReply};
use grid_device::{PortError, PublishPort, ReplyPort};
use grid_storage::MeasurementLog;
use grid_telemetry::record_measurement_logged;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// 一个连接的出站线路：应答编码为按行分帧的 JSON。
pub type ReplyLine = mpsc::UnboundedSender<String>;

/// 按捕获身份把应答路由回原连接的端口。
///
/// 身份在 qry 递交时注册、连接断开时撤销；应答到达时身份已不存在
/// 即为请求方已离开，由设备代理按丢弃策略处置。
#[derive(Clone, Default)]
pub struct ConnectionReplyPort {
    routes: Arc<Mutex<HashMap<CorrelationId, ReplyLine>>>,
}

impl ConnectionReplyPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: CorrelationId, line: ReplyLine) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(id, line);
        }
    }

    pub fn forget(&self, id: CorrelationId) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.remove(&id);
        }
    }
}

#[async_trait]
impl ReplyPort for ConnectionReplyPort {
    async fn reply(&self, id: CorrelationId, reply: QueryReply) -> Result<(), PortError> {
        let line = serde_json::json!({
            "answer": {
                "object": reply.object,
                "attribute": reply.attribute,
                "value": reply.value,
                "tsMs": reply.ts_ms,
            }
        })
        .to_string();
        let routes = self
            .routes
            .lock()
            .map_err(|_| PortError::Closed("reply route table".to_string()))?;
        match routes.get(&id) {
            Some(tx) => tx.send(line).map_err(|_| PortError::Closed(id.to_string())),
            None => Err(PortError::UnknownIdentity(id.to_string())),
        }
    }
}

/// 推送面：广播给所有已连接客户端并送入落库缓冲，无确认。
pub struct BroadcastPublishPort {
    measurements: broadcast::Sender<Measurement>,
    log: Arc<dyn MeasurementLog>,
}

impl BroadcastPublishPort {
    pub fn new(measurements: broadcast::Sender<Measurement>, log: Arc<dyn MeasurementLog>) -> Self {
        Self { measurements, log }
    }
}

#[async_trait]
impl PublishPort for BroadcastPublishPort {
    async fn publish(&self, measurement: Measurement) -> Result<(), PortError> {
        // 没有订阅者不是错误：推送面无确认
        let _ = self.measurements.send(measurement.clone());

        // 代理未带时间戳的推送按到达时刻落库
        let ts_ms = if measurement.ts_ms > 0 {
            measurement.ts_ms
        } else {
            domain::now_epoch_ms()
        };
        let spec = AttributeSpec::new(measurement.object, measurement.attribute, "");
        match self.log.log(ts_ms, &spec, &measurement.value).await {
            Ok(()) => record_measurement_logged(),
            Err(e) => {
                // 落库是尽力而为的旁路，不反压推送面
                warn!(target: "grid.bridge", error = %e, "measurement_log_failed");
            }
        }
        Ok(())
    }
}
