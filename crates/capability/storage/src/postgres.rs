//! Postgres 落库实现
//!
//! 一张 `measurement` 表承载全部编码变体，未命中的列置空：
//! (ts, object, attribute, value, mag, phi, state, state_text)。

use crate::connection::connect_pool;
use crate::encode::{EncodedValue, encode_value};
use crate::error::StorageError;
use crate::traits::{LogRecord, MeasurementLog};
use domain::AttributeSpec;
use sqlx::PgPool;
use std::sync::Mutex;

pub struct PgMeasurementLog {
    pool: PgPool,
    buffered: Mutex<Vec<LogRecord>>,
}

impl PgMeasurementLog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            buffered: Mutex::new(Vec::new()),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = connect_pool(database_url).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait::async_trait]
impl MeasurementLog for PgMeasurementLog {
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
            .lock()
            .map_err(|_| StorageError::new("lock failed"))?;
        buffered.push(record);
        Ok(())
    }

    async fn flush(&self) -> Result<usize, StorageError> {
        // 先取走整批再提交：失败的批次被丢弃，不回到缓冲区
        let batch = {
            let mut buffered = self
                .buffered
                .lock()
                .map_err(|_| StorageError::new("lock failed"))?;
            std::mem::take(&mut *buffered)
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for record in &batch {
            let (value, mag, phi, state, state_text) = match &record.encoded {
                EncodedValue::Value { value } => (Some(*value), None, None, None, None),
                EncodedValue::Complex { mag, phi } => (None, Some(*mag), Some(*phi), None, None),
                EncodedValue::State { code } => (None, None, None, Some(*code), None),
                EncodedValue::Text { state } => (None, None, None, None, Some(state.clone())),
            };
            sqlx::query(
                "insert into measurement (ts, object, attribute, value, mag, phi, state, state_text) \
                 values (to_timestamp($1 / 1000.0), $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(record.ts_ms as f64)
            .bind(&record.object)
            .bind(&record.attribute)
            .bind(value)
            .bind(mag)
            .bind(phi)
            .bind(state)
            .bind(state_text)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(batch.len())
    }
}
