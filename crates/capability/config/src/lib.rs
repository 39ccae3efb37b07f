//! 应用运行配置加载。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 命令端口监听地址
    pub command_addr: String,
    /// 发现用的代理服务名
    pub service_name: String,
    /// 静态候选端点列表（"host:port,host:port"）
    pub agent_endpoints: Option<String>,
    /// 发现失败后的回退主机
    pub fallback_host: Option<String>,
    /// 回退端口
    pub fallback_port: Option<u16>,
    /// 握手呈报的客户端名；缺省时由二进制派生
    pub client_name: Option<String>,
    /// 连接丢失后是否重连
    pub reconnect: bool,
    /// 工作器轮询超时（毫秒）
    pub poll_timeout_ms: u64,
    /// 连接尝试之间的平坦间隔（毫秒）
    pub retry_interval_ms: u64,
    /// 中继通道每方向容量
    pub relay_capacity: usize,
    /// Postgres 连接串；设置后启用落库
    pub database_url: Option<String>,
    /// 批量提交间隔（毫秒）
    pub flush_interval_ms: u64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let command_addr =
            env::var("GRID_COMMAND_ADDR").unwrap_or_else(|_| "127.0.0.1:4800".to_string());
        let service_name =
            env::var("GRID_SERVICE_NAME").unwrap_or_else(|_| "GRIDLAB_AGENT".to_string());
        let agent_endpoints = read_optional("GRID_AGENT_ENDPOINTS");
        let fallback_host = read_optional("GRID_FALLBACK_HOST");
        let fallback_port = read_optional_u16("GRID_FALLBACK_PORT")?;
        let client_name = read_optional("GRID_CLIENT_NAME");
        let reconnect = read_bool_with_default("GRID_AGENT_RECONNECT", false);
        let poll_timeout_ms = read_u64_with_default("GRID_POLL_TIMEOUT_MS", 1000)?;
        let retry_interval_ms = read_u64_with_default("GRID_RETRY_INTERVAL_MS", 5000)?;
        let relay_capacity = read_u64_with_default("GRID_RELAY_CAPACITY", 64)? as usize;
        let database_url = read_optional("GRID_DATABASE_URL");
        let flush_interval_ms = read_u64_with_default("GRID_FLUSH_INTERVAL_MS", 5000)?;

        Ok(Self {
            command_addr,
            service_name,
            agent_endpoints,
            fallback_host,
            fallback_port,
            client_name,
            reconnect,
            poll_timeout_ms,
            retry_interval_ms,
            relay_capacity,
            database_url,
            flush_interval_ms,
        })
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_optional_u16(key: &str) -> Result<Option<u16>, ConfigError> {
    match env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => value
            .parse::<u16>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        Err(_) => Ok(None),
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
