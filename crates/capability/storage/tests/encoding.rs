use grid_storage::{EncodedValue, encode_value};

#[test]
fn floats_become_value_fields() {
    assert_eq!(encode_value("123.4"), EncodedValue::Value { value: 123.4 });
    assert_eq!(encode_value("-0.5"), EncodedValue::Value { value: -0.5 });
    assert_eq!(encode_value("1e3"), EncodedValue::Value { value: 1000.0 });
}

#[test]
fn complex_literals_become_mag_and_phase_in_degrees() {
    match encode_value("1+1i") {
        EncodedValue::Complex { mag, phi } => {
            assert!((mag - 2f64.sqrt()).abs() < 1e-9);
            assert!((phi - 45.0).abs() < 1e-9);
        }
        other => panic!("unexpected encoding: {:?}", other),
    }
    // 尾标记 j 同样被识别
    match encode_value("3-4j") {
        EncodedValue::Complex { mag, phi } => {
            assert!((mag - 5.0).abs() < 1e-9);
            assert!(phi < 0.0);
        }
        other => panic!("unexpected encoding: {:?}", other),
    }
}

#[test]
fn categorical_table_maps_open_and_closed() {
    assert_eq!(encode_value("OPEN"), EncodedValue::State { code: 0 });
    assert_eq!(encode_value("CLOSED"), EncodedValue::State { code: 1 });
}

#[test]
fn unknown_strings_are_stored_verbatim() {
    assert_eq!(
        encode_value("FAULT"),
        EncodedValue::Text {
            state: "FAULT".to_string()
        }
    );
    // 类别表区分大小写，未命中即原样
    assert_eq!(
        encode_value("open"),
        EncodedValue::Text {
            state: "open".to_string()
        }
    );
}
