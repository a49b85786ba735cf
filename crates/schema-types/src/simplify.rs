//! `simplify(schema) -> schema'`: resolve `$ref`, collapse `allOf`, lift
//! nullability out of `oneOf`/`anyOf`, and normalize `type` to a list that
//! may contain `"null"`. Spec.md §4.1.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("$ref {0:?} does not resolve within the document")]
    UnresolvedRef(String),
    #[error("schema node has no usable `type`, `allOf`, `oneOf`, or `anyOf`")]
    Untyped,
}

/// A fully simplified schema node: object with known properties, array with
/// a known item schema, or scalar with a type set and optional format.
#[derive(Debug, Clone, PartialEq)]
pub enum Simplified {
    Object {
        properties: BTreeMap<String, Simplified>,
        required: Vec<String>,
        nullable: bool,
    },
    Array {
        items: Box<Simplified>,
        nullable: bool,
    },
    Scalar {
        types: crate::types::Types,
        format: Option<String>,
    },
}

impl Simplified {
    pub fn is_object(&self) -> bool {
        matches!(self, Simplified::Object { .. })
    }

    pub fn is_iterable(&self) -> bool {
        matches!(self, Simplified::Array { .. })
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            Simplified::Object { nullable, .. } => *nullable,
            Simplified::Array { nullable, .. } => *nullable,
            Simplified::Scalar { types, .. } => types.overlaps(crate::types::NULL),
        }
    }

    pub fn make_nullable(&self) -> Simplified {
        match self.clone() {
            Simplified::Object {
                properties,
                required,
                ..
            } => Simplified::Object {
                properties,
                required,
                nullable: true,
            },
            Simplified::Array { items, .. } => Simplified::Array {
                items,
                nullable: true,
            },
            Simplified::Scalar { types, format } => Simplified::Scalar {
                types: types | crate::types::NULL,
                format,
            },
        }
    }

    /// Narrow view used by `schema_types::dialect::SqlDialect` for scalar
    /// leaves; object/array nodes are handled by the `denest` crate instead.
    pub fn as_simple_schema(&self) -> Option<crate::dialect::SimpleSchema> {
        match self {
            Simplified::Scalar { types, format } => Some(crate::dialect::SimpleSchema {
                types: *types,
                format: format.clone(),
            }),
            _ => None,
        }
    }
}

/// Resolves `$ref` (document-local only — streamed tap schemas never
/// reference external documents), flattens `allOf` by merging member
/// properties and intersecting required-ness, and lifts nullability out of a
/// two-armed `oneOf`/`anyOf` where one arm is exactly `{"type": "null"}`.
pub fn simplify(root: &Value, node: &Value) -> Result<Simplified, Error> {
    let resolved = resolve_ref(root, node)?;
    let merged = merge_all_of(root, &resolved)?;
    let (node, extra_nullable) = lift_one_of_any_of(root, &merged)?;
    simplify_plain(root, &node, extra_nullable)
}

fn resolve_ref<'a>(root: &'a Value, node: &'a Value) -> Result<Value, Error> {
    let Some(r) = node.get("$ref").and_then(Value::as_str) else {
        return Ok(node.clone());
    };
    let pointer = r.strip_prefix('#').unwrap_or(r);
    let target = root
        .pointer(pointer)
        .ok_or_else(|| Error::UnresolvedRef(r.to_string()))?;
    resolve_ref(root, target)
}

fn merge_all_of(root: &Value, node: &Value) -> Result<Value, Error> {
    let Some(arms) = node.get("allOf").and_then(Value::as_array) else {
        return Ok(node.clone());
    };

    let mut merged = node.clone();
    if let Value::Object(obj) = &mut merged {
        obj.remove("allOf");
    }

    for arm in arms {
        let resolved = resolve_ref(root, arm)?;
        let resolved = merge_all_of(root, &resolved)?;
        merge_object_in_place(&mut merged, &resolved);
    }
    Ok(merged)
}

fn merge_object_in_place(into: &mut Value, from: &Value) {
    let (Value::Object(into), Value::Object(from)) = (into, from) else {
        return;
    };
    for (key, value) in from {
        match key.as_str() {
            "properties" => merge_properties(into, value),
            "required" => merge_required(into, value),
            _ => {
                into.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
}

fn merge_properties(into: &mut Map<String, Value>, from: &Value) {
    let Value::Object(from) = from else { return };
    let entry = into
        .entry("properties".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(existing) = entry {
        for (name, schema) in from {
            existing.entry(name.clone()).or_insert_with(|| schema.clone());
        }
    }
}

fn merge_required(into: &mut Map<String, Value>, from: &Value) {
    let Value::Array(from) = from else { return };
    let entry = into
        .entry("required".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(existing) = entry {
        for name in from {
            if !existing.contains(name) {
                existing.push(name.clone());
            }
        }
    }
}

/// Lifts nullability out of a two-armed `oneOf`/`anyOf` where one arm is
/// `{"type": "null"}`, returning the remaining arm plus whether nullability
/// was lifted. Any other `oneOf`/`anyOf` shape is left untouched — callers
/// still see the `oneOf` key and `simplify_plain` falls through to `Untyped`
/// unless `type` is also present, matching spec.md's narrow contract (only
/// the null-lifting idiom, not general union typing, is a goal here).
fn lift_one_of_any_of(root: &Value, node: &Value) -> Result<(Value, bool), Error> {
    for key in ["oneOf", "anyOf"] {
        let Some(arms) = node.get(key).and_then(Value::as_array) else {
            continue;
        };
        if arms.len() != 2 {
            continue;
        }
        let resolved: Vec<Value> = arms
            .iter()
            .map(|a| resolve_ref(root, a))
            .collect::<Result<_, _>>()?;
        let null_arm = resolved.iter().position(is_null_only_schema);
        if let Some(null_idx) = null_arm {
            let other = resolved[1 - null_idx].clone();
            let mut merged = node.clone();
            if let Value::Object(obj) = &mut merged {
                obj.remove(key);
            }
            merge_object_in_place(&mut merged, &other);
            return Ok((merged, true));
        }
    }
    Ok((node.clone(), false))
}

fn is_null_only_schema(v: &Value) -> bool {
    matches!(v.get("type"), Some(Value::String(t)) if t == "null")
}

fn simplify_plain(root: &Value, node: &Value, extra_nullable: bool) -> Result<Simplified, Error> {
    let types = type_set(node)?;
    let nullable = extra_nullable || types.overlaps(crate::types::NULL);

    if types.overlaps(crate::types::OBJECT) {
        let mut properties = BTreeMap::new();
        if let Some(props) = node.get("properties").and_then(Value::as_object) {
            for (name, child) in props {
                properties.insert(name.clone(), simplify(root, child)?);
            }
        }
        let required = node
            .get("required")
            .and_then(Value::as_array)
            .map(|r| {
                r.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        return Ok(Simplified::Object {
            properties,
            required,
            nullable,
        });
    }

    if types.overlaps(crate::types::ARRAY) {
        let items = match node.get("items") {
            Some(items_schema) => simplify(root, items_schema)?,
            None => Simplified::Scalar {
                types: crate::types::ANY,
                format: None,
            },
        };
        return Ok(Simplified::Array {
            items: Box::new(items),
            nullable,
        });
    }

    if types == crate::types::INVALID {
        return Err(Error::Untyped);
    }

    let format = node
        .get("format")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(Simplified::Scalar { types, format })
}

fn type_set(node: &Value) -> Result<crate::types::Types, Error> {
    match node.get("type") {
        Some(Value::String(t)) => Ok(crate::types::Types::for_type_name(t).unwrap_or(crate::types::INVALID)),
        Some(Value::Array(ts)) => Ok(ts
            .iter()
            .filter_map(Value::as_str)
            .collect::<crate::types::Types>()),
        _ if node.get("properties").is_some() => Ok(crate::types::OBJECT),
        _ if node.get("items").is_some() => Ok(crate::types::ARRAY),
        _ => Ok(crate::types::INVALID),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn simplify_lifts_nullable_any_of() {
        let schema = json!({
            "anyOf": [{"type": "string"}, {"type": "null"}]
        });
        let simplified = simplify(&schema, &schema).unwrap();
        assert!(simplified.is_nullable());
        match simplified {
            Simplified::Scalar { types, .. } => assert!(types.overlaps(crate::types::STRING)),
            other => panic!("expected scalar, got {:?}", other),
        }
    }

    #[test]
    fn simplify_merges_all_of_properties() {
        let schema = json!({
            "allOf": [
                {"type": "object", "properties": {"a": {"type": "integer"}}, "required": ["a"]},
                {"type": "object", "properties": {"b": {"type": "string"}}},
            ]
        });
        let simplified = simplify(&schema, &schema).unwrap();
        match simplified {
            Simplified::Object {
                properties,
                required,
                ..
            } => {
                assert_eq!(properties.len(), 2);
                assert_eq!(required, vec!["a".to_string()]);
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn simplify_resolves_ref() {
        let doc = json!({
            "definitions": {"id": {"type": "integer"}},
            "properties": {"user_id": {"$ref": "#/definitions/id"}},
        });
        let node = doc.pointer("/properties/user_id").unwrap();
        let simplified = simplify(&doc, node).unwrap();
        match simplified {
            Simplified::Scalar { types, .. } => assert!(types.overlaps(crate::types::INTEGER)),
            other => panic!("expected scalar, got {:?}", other),
        }
    }

    #[test]
    fn simplify_is_deterministic() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}},
                "age": {"type": ["integer", "null"]},
            }
        });
        let once = simplify(&schema, &schema).unwrap();
        let twice = simplify(&schema, &schema).unwrap();
        assert_eq!(once, twice);
    }
}
