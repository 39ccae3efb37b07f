//! 仿真代理链路能力：发现、连接、登录与按序调用。

pub mod client;
pub mod discovery;
pub mod error;
pub mod manager;

pub use client::AgentClient;
pub use discovery::{Discovery, StaticDiscovery};
pub use error::AgentError;
pub use manager::{AgentLinkConfig, ConnectionManager};

use agent_contract::LoginAck;
use async_trait::async_trait;
use domain::{AttributeSpec, QueryReply, SetPoint};
use std::sync::Arc;

/// 代理 RPC 契约（按接口消费，传输细节由实现承担）。
///
/// 活连接只允许工作器一个任务触碰；实现内部再以互斥锁串行化调用，
/// 防御未来加入该路径的任何调用方。
#[async_trait]
pub trait AgentRpc: Send + Sync {
    /// 握手：呈报客户端名。推送回调句柄随连接隐含注册。
    async fn login(&self, client: &str) -> Result<LoginAck, AgentError>;

    /// 注册一个测点订阅。
    async fn subscribe(&self, spec: &AttributeSpec) -> Result<(), AgentError>;

    /// 写一个测点。
    async fn set(&self, point: &SetPoint) -> Result<(), AgentError>;

    /// 同步读一个测点。
    async fn query(&self, spec: &AttributeSpec) -> Result<QueryReply, AgentError>;

    /// 传输是否仍然存活。连接丢失不另行通知，由下次轮询观测缺席。
    fn is_open(&self) -> bool;
}

/// 产出可用连接的接缝：生产环境为 [`ConnectionManager`]，测试注入桩。
#[async_trait]
pub trait Connector: Send + Sync {
    /// 产出一条已登录的可用连接，或终态失败。
    ///
    /// `retry` 为 true 时对发现/连接失败以平坦间隔无限重试；
    /// 登录失败不消耗重试周期，立即上报，由调用方决定是否再来。
    async fn connect(&self, retry: bool) -> Result<Arc<dyn AgentRpc>, AgentError>;
}
