//! Structural validation of a record against a [`Simplified`] schema.
//!
//! `spec.md` §4.3 step 2 asks for validation "against the simplified
//! schema". The only schemas ever in play here are ones `denest::schema`
//! itself derives from a stream's declared JSON-schema, so a full
//! JSON-Schema validator (format assertions, `pattern`, `enum`, numeric
//! bounds) would validate against constraints this pipeline never
//! expresses or checks elsewhere. This validator instead checks the three
//! things the rest of the pipeline actually depends on: object shape,
//! array-vs-scalar shape, and required-ness — matching `Simplified`'s own
//! three variants one for one.

use schema_types::Simplified;
use serde_json::Value;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("field {0:?} is required but missing")]
    MissingRequired(String),
    #[error("field {0:?}: expected object, found {1}")]
    NotObject(String, &'static str),
    #[error("field {0:?}: expected array, found {1}")]
    NotArray(String, &'static str),
    #[error("field {0:?}: null not allowed")]
    NullNotAllowed(String),
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validates `record` against `schema`, collecting every violation rather
/// than stopping at the first (the caller decides how many to tolerate
/// before the invalid-records threshold trips, spec.md §4.3).
pub fn validate(schema: &Simplified, record: &Value) -> Vec<Error> {
    let mut errors = Vec::new();
    walk("$", schema, record, &mut errors);
    errors
}

fn walk(path: &str, schema: &Simplified, value: &Value, errors: &mut Vec<Error>) {
    match schema {
        Simplified::Object {
            properties,
            required,
            nullable,
        } => {
            if matches!(value, Value::Null) {
                if !nullable {
                    errors.push(Error::NullNotAllowed(path.to_string()));
                }
                return;
            }
            let Value::Object(fields) = value else {
                errors.push(Error::NotObject(path.to_string(), kind_name(value)));
                return;
            };
            for key in required {
                if !fields.contains_key(key) {
                    errors.push(Error::MissingRequired(format!("{}.{}", path, key)));
                }
            }
            for (name, child_schema) in properties {
                if let Some(child_value) = fields.get(name) {
                    walk(&format!("{}.{}", path, name), child_schema, child_value, errors);
                }
            }
        }
        Simplified::Array { items, nullable } => {
            if matches!(value, Value::Null) {
                if !nullable {
                    errors.push(Error::NullNotAllowed(path.to_string()));
                }
                return;
            }
            let Value::Array(elements) = value else {
                errors.push(Error::NotArray(path.to_string(), kind_name(value)));
                return;
            };
            for (index, element) in elements.iter().enumerate() {
                walk(&format!("{}[{}]", path, index), items, element, errors);
            }
        }
        Simplified::Scalar { types, .. } => {
            if matches!(value, Value::Null) && !types.overlaps(schema_types::types::NULL) {
                errors.push(Error::NullNotAllowed(path.to_string()));
            }
            // Scalar type-family mismatches (e.g. a string where an integer
            // was declared) are tolerated: the backing store coerces on
            // write and the upsert schema's type-split machinery (spec.md
            // §4.5 rule 4) exists precisely to absorb this drift.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema_types::simplify::simplify;
    use serde_json::json;

    fn schema_for(value: Value) -> Simplified {
        simplify(&value, &value).unwrap()
    }

    #[test]
    fn missing_required_field_is_reported() {
        let schema = schema_for(json!({
            "type": "object",
            "required": ["id"],
            "properties": {"id": {"type": "integer"}},
        }));
        let errors = validate(&schema, &json!({}));
        assert_eq!(errors, vec![Error::MissingRequired("$.id".to_string())]);
    }

    #[test]
    fn valid_record_has_no_errors() {
        let schema = schema_for(json!({
            "type": "object",
            "required": ["id"],
            "properties": {"id": {"type": "integer"}, "tags": {"type": "array", "items": {"type": "string"}}},
        }));
        let errors = validate(&schema, &json!({"id": 1, "tags": ["a", "b"]}));
        assert!(errors.is_empty());
    }

    #[test]
    fn array_field_given_a_scalar_is_reported() {
        let schema = schema_for(json!({
            "type": "object",
            "properties": {"tags": {"type": "array", "items": {"type": "string"}}},
        }));
        let errors = validate(&schema, &json!({"tags": "not-an-array"}));
        assert_eq!(
            errors,
            vec![Error::NotArray("$.tags".to_string(), "string")]
        );
    }
}
