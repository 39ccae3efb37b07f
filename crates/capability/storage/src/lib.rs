//! 时序落库能力：值编码 + 批量提交。
//!
//! `log` 只缓冲一条记录，`flush` 在一个事务内提交整批并清空缓冲。
//! 提交失败的批次被丢弃而不是留在缓冲里无限增长，由调用方计数上报。

pub mod connection;
pub mod encode;
pub mod error;
pub mod in_memory;
pub mod postgres;
pub mod traits;

pub use connection::connect_pool;
pub use encode::{EncodedValue, encode_value};
pub use error::StorageError;
pub use in_memory::InMemoryMeasurementLog;
pub use postgres::PgMeasurementLog;
pub use traits::{LogRecord, MeasurementLog};
