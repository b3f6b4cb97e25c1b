use jsonschema::JSONSchema;
use pipedash::envelope::EnvelopeSubmission;
use serde_json::json;

const FIXTURES: [&str; 4] = [
    include_str!("resources/envelope_pipeline.json"),
    include_str!("resources/envelope_status.json"),
    include_str!("resources/envelope_error.json"),
    include_str!("resources/envelope_reset.json"),
];

fn compiled_schema() -> JSONSchema {
    let schema = include_str!("../schemas/envelope.v1.json");
    let schema_json: serde_json::Value = serde_json::from_str(schema).unwrap();
    let schema_static: &'static serde_json::Value = Box::leak(Box::new(schema_json));
    JSONSchema::options().compile(schema_static).unwrap()
}

#[test]
fn pipeline_example_is_valid() {
    let compiled = compiled_schema();
    let instance: serde_json::Value =
        serde_json::from_str(include_str!("resources/envelope_pipeline.json")).unwrap();
    assert!(compiled.is_valid(&instance));
}

#[test]
fn status_example_is_valid() {
    let compiled = compiled_schema();
    let instance: serde_json::Value =
        serde_json::from_str(include_str!("resources/envelope_status.json")).unwrap();
    assert!(compiled.is_valid(&instance));
}

#[test]
fn error_example_is_valid() {
    let compiled = compiled_schema();
    let instance: serde_json::Value =
        serde_json::from_str(include_str!("resources/envelope_error.json")).unwrap();
    assert!(compiled.is_valid(&instance));
}

#[test]
fn reset_example_is_valid() {
    let compiled = compiled_schema();
    let instance: serde_json::Value =
        serde_json::from_str(include_str!("resources/envelope_reset.json")).unwrap();
    assert!(compiled.is_valid(&instance));
}

#[test]
fn unknown_type_is_rejected() {
    let compiled = compiled_schema();
    let mut invalid: serde_json::Value =
        serde_json::from_str(include_str!("resources/envelope_status.json")).unwrap();
    // Legacy tag no longer in the contract
    invalid["type"] = json!("delete");

    assert!(!compiled.is_valid(&invalid), "type enum should fail");
}

#[test]
fn missing_source_type_is_rejected() {
    let compiled = compiled_schema();
    let mut invalid: serde_json::Value =
        serde_json::from_str(include_str!("resources/envelope_status.json")).unwrap();
    invalid.as_object_mut().unwrap().remove("source_type");

    assert!(!compiled.is_valid(&invalid), "required list should fail");
}

#[test]
fn extra_field_is_rejected() {
    let compiled = compiled_schema();
    let mut invalid: serde_json::Value =
        serde_json::from_str(include_str!("resources/envelope_status.json")).unwrap();
    invalid["hover"] = json!("craft");

    assert!(!compiled.is_valid(&invalid), "additionalProperties should fail");
}

#[test]
fn status_without_payload_is_rejected() {
    let compiled = compiled_schema();
    let mut invalid: serde_json::Value =
        serde_json::from_str(include_str!("resources/envelope_status.json")).unwrap();
    invalid.as_object_mut().unwrap().remove("payload");

    assert!(!compiled.is_valid(&invalid), "payload is required outside reset");
}

#[test]
fn reset_with_payload_is_rejected() {
    let compiled = compiled_schema();
    let mut invalid: serde_json::Value =
        serde_json::from_str(include_str!("resources/envelope_reset.json")).unwrap();
    invalid["payload"] = json!({"stale": true});

    assert!(!compiled.is_valid(&invalid), "reset forbids a payload object");
}

#[test]
fn reset_with_null_payload_is_valid() {
    let compiled = compiled_schema();
    let mut instance: serde_json::Value =
        serde_json::from_str(include_str!("resources/envelope_reset.json")).unwrap();
    instance["payload"] = serde_json::Value::Null;

    assert!(compiled.is_valid(&instance));
}

#[test]
fn non_object_payload_is_rejected() {
    let compiled = compiled_schema();
    let mut invalid: serde_json::Value =
        serde_json::from_str(include_str!("resources/envelope_status.json")).unwrap();
    invalid["payload"] = json!("broken");

    assert!(!compiled.is_valid(&invalid), "payload must be an object");
}

/// The schema is the contract for non-Rust producers and the in-code checks
/// are the contract for this crate; they must not drift apart.
#[test]
fn schema_and_validation_agree() {
    let compiled = compiled_schema();

    let mut candidates: Vec<serde_json::Value> = FIXTURES
        .iter()
        .map(|raw| serde_json::from_str(raw).unwrap())
        .collect();

    // Broken variants of the status fixture
    let base: serde_json::Value =
        serde_json::from_str(include_str!("resources/envelope_status.json")).unwrap();
    let mutations: [fn(&mut serde_json::Value); 6] = [
        |doc| doc["type"] = json!("delete"),
        |doc| {
            doc.as_object_mut().unwrap().remove("uuid");
        },
        |doc| doc["name"] = json!(42),
        |doc| doc["hover"] = json!("craft"),
        |doc| {
            doc.as_object_mut().unwrap().remove("payload");
        },
        |doc| doc["payload"] = json!([1, 2, 3]),
    ];
    for mutate in mutations {
        let mut doc = base.clone();
        mutate(&mut doc);
        candidates.push(doc);
    }

    for candidate in candidates {
        let by_schema = compiled.is_valid(&candidate);
        let by_code = EnvelopeSubmission::from_value(candidate.clone())
            .and_then(EnvelopeSubmission::validate)
            .is_ok();
        assert_eq!(
            by_schema, by_code,
            "schema and validation disagree on {candidate}"
        );
    }
}
