//! The published JSON Schema contract for wire envelopes.
//!
//! Rust code validates through [`crate::envelope`]; the schema exists so
//! producers in other languages can check their output against the same
//! contract. Both must agree, which the schema tests pin down.

use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::Value;

pub const WIRE_SCHEMA_JSON: &str = include_str!("../schemas/envelope.v1.json");

static WIRE_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    let schema: Value =
        serde_json::from_str(WIRE_SCHEMA_JSON).expect("envelope.v1.json is not valid JSON");
    // compile() borrows the schema document for 'static
    let schema: &'static Value = Box::leak(Box::new(schema));
    JSONSchema::options()
        .compile(schema)
        .expect("envelope.v1.json is not a valid draft-07 schema")
});

/// The compiled wire contract.
pub fn wire_schema() -> &'static JSONSchema {
    &WIRE_SCHEMA
}

/// Collect schema violations for a candidate wire envelope, with their
/// instance paths. Empty means the document conforms.
pub fn check(instance: &Value) -> Vec<String> {
    check_with(wire_schema(), instance)
}

/// Same as [`check`], against a caller-supplied schema.
pub fn check_with(schema: &JSONSchema, instance: &Value) -> Vec<String> {
    match schema.validate(instance) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|error| format!("{} at {}", error, error.instance_path))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_accepts_status_envelope() {
        let doc = json!({
            "type": "status",
            "name": "posterize",
            "id": "77",
            "uuid": "abc",
            "source_type": "pipeline",
            "payload": {"msg": "fine"},
        });
        assert!(check(&doc).is_empty());
    }

    #[test]
    fn test_schema_accepts_reset_without_payload() {
        let doc = json!({
            "type": "reset",
            "name": "posterize",
            "id": "77",
            "uuid": "abc",
            "source_type": "pipeline",
        });
        assert!(check(&doc).is_empty());
    }

    #[test]
    fn test_schema_reports_violations_with_paths() {
        let doc = json!({
            "type": "delete",
            "name": "posterize",
            "id": "77",
            "uuid": "abc",
            "source_type": "pipeline",
            "payload": {},
        });
        let violations = check(&doc);
        assert!(!violations.is_empty());
        assert!(violations.iter().any(|v| v.contains("/type")));
    }
}
