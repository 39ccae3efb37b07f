use domain::AttributeSpec;
use grid_storage::{EncodedValue, InMemoryMeasurementLog, MeasurementLog};

#[tokio::test]
async fn log_buffers_until_flush_commits_the_batch() {
    let log = InMemoryMeasurementLog::new();
    let volts = AttributeSpec::new("genA", "voltage", "V");
    let status = AttributeSpec::new("sw1", "status", "");

    log.log(1000, &volts, "123.4").await.expect("log");
    log.log(1001, &status, "OPEN").await.expect("log");
    assert_eq!(log.buffered_len(), 2);
    assert!(log.committed().is_empty());

    let committed = log.flush().await.expect("flush");
    assert_eq!(committed, 2);
    assert_eq!(log.buffered_len(), 0);

    let records = log.committed();
    assert_eq!(records[0].object, "genA");
    assert_eq!(records[0].encoded, EncodedValue::Value { value: 123.4 });
    assert_eq!(records[1].encoded, EncodedValue::State { code: 0 });
}

#[tokio::test]
async fn empty_values_are_ignored() {
    let log = InMemoryMeasurementLog::new();
    let spec = AttributeSpec::new("genA", "voltage", "V");
    log.log(1000, &spec, "").await.expect("log");
    assert_eq!(log.buffered_len(), 0);
}

#[tokio::test]
async fn flush_on_empty_buffer_commits_nothing() {
    let log = InMemoryMeasurementLog::new();
    assert_eq!(log.flush().await.expect("flush"), 0);
}
