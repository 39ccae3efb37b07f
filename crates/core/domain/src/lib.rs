pub mod data;

pub use data::{AttributeSpec, Measurement, QueryReply, SetPoint};

use uuid::Uuid;

/// 关联 ID：从原始请求方捕获的不透明身份。
///
/// 带外应答只按它路由回请求方，与其他并发应答的到达顺序无关。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// 捕获一个新的请求方身份。
    pub fn capture() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 工作器的连接状态，仅由工作器自身持有并变迁。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Running,
    Stopped,
    Terminated,
}

/// 获取当前时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
