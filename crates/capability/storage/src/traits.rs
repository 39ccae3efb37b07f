//! 落库接口定义。

use crate::encode::EncodedValue;
use crate::error::StorageError;
use domain::AttributeSpec;

/// 一条已编码、待提交的落库记录。
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub ts_ms: i64,
    pub object: String,
    pub attribute: String,
    pub encoded: EncodedValue,
}

/// 测点时序日志：`log` 缓冲一条记录，`flush` 提交整批。
#[async_trait::async_trait]
pub trait MeasurementLog: Send + Sync {
    /// 编码并缓冲一条记录；空值被忽略。
    async fn log(
        &self,
        ts_ms: i64,
        spec: &AttributeSpec,
        value: &str,
    ) -> Result<(), StorageError>;

    /// 提交缓冲的整批记录并清空缓冲，返回提交条数。
    ///
    /// 提交失败的批次不会回到缓冲区。
    async fn flush(&self) -> Result<usize, StorageError>;
}
