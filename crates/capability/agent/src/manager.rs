//! 连接管理：发现 → 逐候选连接 → 握手登录，平坦间隔重试。

use crate::client::AgentClient;
use crate::discovery::Discovery;
use crate::error::AgentError;
use crate::{AgentRpc, Connector};
use async_trait::async_trait;
use grid_relay::BridgeSender;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// 代理链路配置。
#[derive(Debug, Clone)]
pub struct AgentLinkConfig {
    /// 发现用的服务名
    pub service_name: String,
    /// 发现失败后的显式回退主机
    pub fallback_host: Option<String>,
    /// 回退端口
    pub fallback_port: Option<u16>,
    /// 握手呈报的客户端名
    pub client_name: String,
    /// 连接尝试之间的平坦间隔（毫秒）
    pub retry_interval_ms: u64,
}

impl Default for AgentLinkConfig {
    fn default() -> Self {
        Self {
            service_name: "GRIDLAB_AGENT".to_string(),
            fallback_host: None,
            fallback_port: None,
            client_name: "grid-bridge".to_string(),
            retry_interval_ms: 5000,
        }
    }
}

/// 连接管理器：产出一条已登录的可用连接或终态失败。
pub struct ConnectionManager {
    config: AgentLinkConfig,
    discovery: Arc<dyn Discovery>,
    bridge: BridgeSender,
}

impl ConnectionManager {
    pub fn new(
        config: AgentLinkConfig,
        discovery: Arc<dyn Discovery>,
        bridge: BridgeSender,
    ) -> Self {
        Self {
            config,
            discovery,
            bridge,
        }
    }

    /// 建立一条传输连接：先逐个候选，再回退主机，逐个失败只记日志。
    async fn open_transport(&self) -> Option<AgentClient> {
        match self.discovery.resolve(&self.config.service_name).await {
            Ok(candidates) => {
                for (host, port) in candidates {
                    match AgentClient::connect(&host, port, self.bridge.clone()).await {
                        Ok(client) => return Some(client),
                        Err(e) => {
                            error!("{}:{}: {}", host, port, e);
                        }
                    }
                }
            }
            Err(e) => {
                error!("{}", e);
            }
        }

        if let (Some(host), Some(port)) = (&self.config.fallback_host, self.config.fallback_port) {
            match AgentClient::connect(host, port, self.bridge.clone()).await {
                Ok(client) => return Some(client),
                Err(e) => {
                    error!("{}:{}: {}", host, port, e);
                }
            }
        }

        None
    }
}

#[async_trait]
impl Connector for ConnectionManager {
    async fn connect(&self, retry: bool) -> Result<Arc<dyn AgentRpc>, AgentError> {
        let interval = Duration::from_millis(self.config.retry_interval_ms);
        loop {
            let client = match self.open_transport().await {
                Some(client) => client,
                None => {
                    if !retry {
                        return Err(AgentError::Discovery(self.config.service_name.clone()));
                    }
                    warn!(
                        "no reachable candidate for {}, retrying in {:?}",
                        self.config.service_name, interval
                    );
                    sleep(interval).await;
                    continue;
                }
            };

            // 登录失败不消耗重试周期：直接上报，由调用方决定是否再来
            return match client.login(&self.config.client_name).await {
                Ok(ack) if ack.accepted() => {
                    info!(
                        client = %self.config.client_name,
                        session = %ack.session,
                        "login accepted"
                    );
                    Ok(Arc::new(client))
                }
                Ok(ack) => Err(AgentError::Login(format!(
                    "agent answered status {:?}",
                    ack.status
                ))),
                Err(e) => Err(AgentError::Login(e.to_string())),
            };
        }
    }
}
