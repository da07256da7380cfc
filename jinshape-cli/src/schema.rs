//! JSON-Schema (draft 4) rendering of inferred structures.

use jinshape_infer::{ScalarKind, Shape, Structure};
use serde_json::{json, Map, Value};

const DRAFT_4: &str = "http://json-schema.org/draft-04/schema#";

/// Schema document for the context of a template.
pub fn encode(structure: &Structure) -> Value {
    let mut schema = encode_structure(structure);
    if let Value::Object(object) = &mut schema {
        object.insert("$schema".to_string(), json!(DRAFT_4));
    }
    schema
}

fn encode_structure(structure: &Structure) -> Value {
    let mut schema = match &structure.shape {
        Shape::Unknown => json!({
            "anyOf": [
                {"type": "object"},
                {"type": "array"},
                {"type": "string"},
                {"type": "number"},
                {"type": "boolean"},
                {"type": "null"},
            ]
        }),
        Shape::Scalar(ScalarKind::Scalar) => json!({
            "anyOf": [
                {"type": "boolean"},
                {"type": "null"},
                {"type": "number"},
                {"type": "string"},
            ]
        }),
        Shape::Scalar(kind) => json!({ "type": kind.name() }),
        Shape::List(item) => json!({
            "type": "array",
            "items": encode_structure(item),
        }),
        Shape::Tuple(tuple) => match &tuple.items {
            Some(items) => json!({
                "type": "array",
                "items": items.iter().map(|item| encode_structure(item)).collect::<Vec<_>>(),
            }),
            None => json!({ "type": "array" }),
        },
        Shape::Dictionary(fields) => {
            let properties: Map<String, Value> = fields
                .iter()
                .map(|(name, field)| (name.clone(), encode_structure(field)))
                .collect();
            let required: Vec<&String> = fields
                .iter()
                .filter(|(_, field)| field.is_required())
                .map(|(name, _)| name)
                .collect();

            let mut object = json!({
                "type": "object",
                "properties": properties,
            });
            // draft 4 rejects an empty `required` array
            if !required.is_empty() {
                object["required"] = json!(required);
            }
            object
        }
    };

    if let Value::Object(object) = &mut schema {
        if let Some(label) = &structure.label {
            object.insert("title".to_string(), json!(label));
        }
        if let Some(value) = &structure.value {
            object.insert("default".to_string(), json!(value));
        }
    }
    schema
}
