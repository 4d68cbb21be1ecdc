//! Typed field descriptors for action inputs and outputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primitive type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Byte,
    String,
    Date,
    Int,
    Long,
    Float,
    Double,
    Bool,
    Object,
    Array,
}

impl FieldType {
    /// True for the floating-point field types.
    #[must_use]
    pub const fn is_floating(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }
}

/// Schema of a single action input or output field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Field name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Field type
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Element schema when `field_type` is `Array`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,

    /// Nested field schemas when `field_type` is `Object`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Schema>,

    /// Permitted values, when constrained
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Value>,

    /// Default value applied when the field is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Whether the field must be supplied
    #[serde(default)]
    pub required: bool,
}

impl Schema {
    /// Create a minimal schema with a name and type.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            field_type,
            items: None,
            properties: Vec::new(),
            enum_values: None,
            default: None,
            required: false,
        }
    }

    /// Mark the field as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}
