use domain::{AttributeSpec, CorrelationId};

#[test]
fn attribute_spec_displays_object_dot_attribute() {
    let spec = AttributeSpec::new("genA", "voltage", "V");
    assert_eq!(spec.to_string(), "genA.voltage");
}

#[test]
fn correlation_ids_are_unique_per_capture() {
    let first = CorrelationId::capture();
    let second = CorrelationId::capture();
    assert_ne!(first, second);
}
