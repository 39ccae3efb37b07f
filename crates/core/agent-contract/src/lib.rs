//! 仿真代理 RPC 的线缆契约。
//!
//! 链路为按行分帧的 JSON：请求携带单调递增的 `seq`，应答回显同一
//! `seq`；代理主动推送的数据帧没有 `seq`，以 `push` 字段区分。

use serde::{Deserialize, Serialize};

/// 握手肯定哨兵：登录应答的 `status` 必须等于它。
pub const STATUS_OK: &str = "ok";

/// 请求帧：客户端 → 代理。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub seq: u64,
    pub op: AgentOp,
}

/// 请求操作，闭合变体，`op` 字段为标签。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum AgentOp {
    /// 握手：呈报客户端名，推送回调随本连接隐含注册。
    Login { client: String },
    /// 订阅一个测点的推送。
    Subscribe {
        object: String,
        attribute: String,
        unit: String,
    },
    /// 写一个测点。
    Set {
        object: String,
        attribute: String,
        unit: String,
        value: String,
    },
    /// 同步读一个测点。
    Query {
        object: String,
        attribute: String,
        unit: String,
    },
}

/// 应答帧：代理 → 客户端，`seq` 回显请求。
///
/// `result` 与 `error` 互斥；两者皆缺或皆在均为协议违例。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 登录应答体：两字段结果，第一字段为状态哨兵。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginAck {
    pub status: String,
    pub session: String,
}

impl LoginAck {
    /// 握手是否被代理接受。
    pub fn accepted(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// 查询应答与推送共用的测点值载荷。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValuePayload {
    pub object: String,
    pub attribute: String,
    pub value: String,
    pub ts_ms: i64,
}

/// 推送帧：代理 → 客户端，无 `seq`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushFrame {
    pub push: ValuePayload,
}

/// 代理发来的任意一帧：应答（带 `seq`）或推送（带 `push`）。
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Response(ResponseFrame),
    Push(PushFrame),
}
