//! 落库内存实现
//!
//! 仅用于本地测试和占位。

use crate::encode::encode_value;
use crate::error::StorageError;
use crate::traits::{LogRecord, MeasurementLog};
use domain::AttributeSpec;
use std::sync::RwLock;

/// 内存测点日志
pub struct InMemoryMeasurementLog {
    buffered: RwLock<Vec<LogRecord>>,
    committed: RwLock<Vec<LogRecord>>,
}

impl InMemoryMeasurementLog {
    pub fn new() -> Self {
        Self {
            buffered: RwLock::new(Vec::new()),
            committed: RwLock::new(Vec::new()),
        }
    }

    /// 当前缓冲条数（用于测试）
    pub fn buffered_len(&self) -> usize {
        self.buffered.read().map(|v| v.len()).unwrap_or(0)
    }

    /// 已提交记录的快照（用于测试）
    pub fn committed(&self) -> Vec<LogRecord> {
        self.committed.read().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Default for InMemoryMeasurementLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MeasurementLog for InMemoryMeasurementLog {
    async fn log(
        &self,
        ts_ms: i64,
        spec: &AttributeSpec,
        value: &str,
    ) -> Result<(), StorageError> {
        if value.is_empty() {
            return Ok(());
        }
        let record = LogRecord {
            ts_ms,
            object: spec.object.clone(),
            attribute: spec.attribute.clone(),
            encoded: encode_value(value),
        };
        let mut buffered = self
            .buffered
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        buffered.push(record);
        Ok(())
    }

    async fn flush(&self) -> Result<usize, StorageError> {
        let batch = {
            let mut buffered = self
                .buffered
                .write()
                .map_err(|_| StorageError::new("lock failed"))?;
            std::mem::take(&mut *buffered)
        };
        let count = batch.len();
        let mut committed = self
            .committed
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        committed.extend(batch);
        Ok(count)
    }
}
