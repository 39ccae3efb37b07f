//! 代理链路错误类型定义

/// 代理链路错误
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// 服务发现无可达候选
    #[error("discovery of {0} failed")]
    Discovery(String),

    /// 单个候选端点连接失败
    #[error("connect {0}:{1}: {2}")]
    Connect(String, u16, String),

    /// 握手应答形状非法或状态非肯定
    #[error("login failed: {0}")]
    Login(String),

    /// 代理对某次调用返回显式错误
    #[error("agent rejected call: {0}")]
    Rejected(String),

    /// 连接已断开
    #[error("transport error: {0}")]
    Transport(String),

    /// 应答形状不符合契约
    #[error("protocol violation: {0}")]
    Protocol(String),
}
