//! 服务发现接口与静态实现。

use crate::error::AgentError;
use async_trait::async_trait;

/// 服务发现：把服务名解析为候选端点列表。
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn resolve(&self, service: &str) -> Result<Vec<(String, u16)>, AgentError>;
}

/// 静态发现：候选端点来自显式配置。
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    entries: Vec<(String, u16)>,
}

impl StaticDiscovery {
    pub fn new(entries: Vec<(String, u16)>) -> Self {
        Self { entries }
    }

    /// 解析 "host:port,host:port" 形式的端点列表。
    pub fn from_list(list: &str) -> Result<Self, AgentError> {
        let mut entries = Vec::new();
        for entry in list.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (host, port) = entry
                .rsplit_once(':')
                .ok_or_else(|| AgentError::Protocol(format!("endpoint without port: {entry}")))?;
            let port = port
                .parse::<u16>()
                .map_err(|_| AgentError::Protocol(format!("invalid port in endpoint: {entry}")))?;
            entries.push((host.to_string(), port));
        }
        Ok(Self { entries })
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn resolve(&self, service: &str) -> Result<Vec<(String, u16)>, AgentError> {
        if self.entries.is_empty() {
            return Err(AgentError::Discovery(service.to_string()));
        }
        Ok(self.entries.clone())
    }
}
