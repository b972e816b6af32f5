//! Structural argument schemas for tools.
//!
//! A tool declares the shape of its arguments as an [`InputSchema`]. The
//! reasoning loop validates the model's `action_input` against it before the
//! tool is invoked, so tools never see arguments of the wrong shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// The accepted JSON kind of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Any => true,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
            FieldKind::Any => "any",
        }
    }
}

/// One named argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// Ordered list of the arguments a tool accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    pub fields: Vec<FieldSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required argument.
    pub fn required(mut self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        });
        self
    }

    /// Add an optional argument.
    pub fn optional(mut self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
        });
        self
    }

    /// Schema of a tool that takes one free-text question, the shape every
    /// composite (sub-agent) tool exposes.
    pub fn single_input(description: &str) -> Self {
        Self::new().required("input", FieldKind::String, description)
    }

    fn sole_required_string(&self) -> Option<&FieldSpec> {
        let mut required = self.fields.iter().filter(|f| f.required);
        match (required.next(), required.next()) {
            (Some(field), None) if field.kind == FieldKind::String => Some(field),
            _ => None,
        }
    }

    /// Validate (and lightly normalize) arguments.
    ///
    /// `null` is treated as an empty object. A bare string is accepted when the
    /// schema has exactly one required string field and is wrapped into it.
    /// Unknown keys are passed through untouched.
    pub fn validate(&self, args: &Value) -> Result<Value, String> {
        let object = match args {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            Value::String(s) => match self.sole_required_string() {
                Some(field) => {
                    let mut map = Map::new();
                    map.insert(field.name.clone(), Value::String(s.clone()));
                    map
                }
                None => return Err("expected a JSON object of named arguments".into()),
            },
            _ => return Err("expected a JSON object of named arguments".into()),
        };

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(format!("missing required argument '{}'", field.name));
                }
                Some(value) if !value.is_null() && !field.kind.accepts(value) => {
                    return Err(format!(
                        "argument '{}' must be of type {}",
                        field.name,
                        field.kind.as_str()
                    ));
                }
                _ => {}
            }
        }

        Ok(Value::Object(object))
    }

    /// Render as a JSON Schema object.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = Map::new();
            if field.kind != FieldKind::Any {
                prop.insert("type".into(), json!(field.kind.as_str()));
            }
            if !field.description.is_empty() {
                prop.insert("description".into(), json!(field.description));
            }
            properties.insert(field.name.clone(), Value::Object(prop));
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Compact argument description used in the planning prompt, e.g.
    /// `{"formula": {"type": "string", "description": "..."}}`.
    pub fn render_args(&self) -> String {
        self.to_json_schema()["properties"].to_string()
    }
}
