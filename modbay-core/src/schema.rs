//! Author-defined settings schemas.
//!
//! A schema is an ordered list of named fields, each described by a tagged
//! [`FieldDescriptor`] variant. Tenant overrides are validated against the
//! schema before any merge so a bad override is rejected up front instead of
//! surfacing as a render-time surprise.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModuleError, Result};

/// One selectable option of a [`FieldDescriptor::Select`] field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// The shape of a single settings field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldDescriptor {
    /// Free-form text
    Text {
        #[serde(default)]
        placeholder: Option<String>,
        #[serde(default)]
        max_length: Option<usize>,
    },

    /// Numeric value with optional bounds
    Number {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },

    /// One value out of a fixed option list
    Select { options: Vec<SelectOption> },

    /// CSS color string (hex or named)
    Color,

    /// Boolean switch
    Toggle,
}

impl FieldDescriptor {
    /// Validate a single override value against this descriptor
    fn check(&self, name: &str, value: &Value) -> Result<()> {
        match self {
            FieldDescriptor::Text { max_length, .. } => {
                let s = value.as_str().ok_or_else(|| {
                    ModuleError::validation(format!("field '{name}' expects a string"))
                })?;
                if let Some(max) = max_length {
                    if s.chars().count() > *max {
                        return Err(ModuleError::validation(format!(
                            "field '{name}' exceeds max length {max}"
                        )));
                    }
                }
                Ok(())
            }
            FieldDescriptor::Number { min, max } => {
                let n = value.as_f64().ok_or_else(|| {
                    ModuleError::validation(format!("field '{name}' expects a number"))
                })?;
                if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                    return Err(ModuleError::validation(format!(
                        "field '{name}' is out of range"
                    )));
                }
                Ok(())
            }
            FieldDescriptor::Select { options } => {
                let s = value.as_str().ok_or_else(|| {
                    ModuleError::validation(format!("field '{name}' expects a string option"))
                })?;
                if !options.iter().any(|o| o.value == s) {
                    return Err(ModuleError::validation(format!(
                        "field '{name}' has no option '{s}'"
                    )));
                }
                Ok(())
            }
            FieldDescriptor::Color => {
                if value.as_str().is_none() {
                    return Err(ModuleError::validation(format!(
                        "field '{name}' expects a color string"
                    )));
                }
                Ok(())
            }
            FieldDescriptor::Toggle => {
                if !value.is_boolean() {
                    return Err(ModuleError::validation(format!(
                        "field '{name}' expects a boolean"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// A named field in a settings schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsField {
    pub name: String,
    pub label: String,
    #[serde(flatten)]
    pub descriptor: FieldDescriptor,
}

/// Ordered settings schema for a module
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsSchema {
    pub fields: Vec<SettingsField>,
}

impl SettingsSchema {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&SettingsField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate a tenant override mapping against this schema.
    ///
    /// Unknown keys and type mismatches are validation errors. An empty
    /// schema accepts any overrides — first-party bundled modules may not
    /// declare one.
    pub fn validate_overrides(&self, overrides: &Value) -> Result<()> {
        let map = match overrides {
            Value::Null => return Ok(()),
            Value::Object(map) => map,
            _ => {
                return Err(ModuleError::validation(
                    "settings overrides must be an object",
                ))
            }
        };

        if self.is_empty() {
            return Ok(());
        }

        for (key, value) in map {
            let field = self.field(key).ok_or_else(|| {
                ModuleError::validation(format!("unknown settings field '{key}'"))
            })?;
            field.descriptor.check(key, value)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_schema() -> SettingsSchema {
        serde_json::from_value(json!([
            {"name": "title", "label": "Title", "type": "text", "max_length": 10},
            {"name": "limit", "label": "Limit", "type": "number", "min": 1, "max": 50},
            {"name": "theme", "label": "Theme", "type": "select",
             "options": [{"value": "light", "label": "Light"}, {"value": "dark", "label": "Dark"}]},
            {"name": "accent", "label": "Accent", "type": "color"},
            {"name": "compact", "label": "Compact", "type": "toggle"}
        ]))
        .unwrap()
    }

    #[test]
    fn schema_roundtrips_and_keeps_order() {
        let schema = sample_schema();
        let names: Vec<_> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["title", "limit", "theme", "accent", "compact"]);

        let encoded = serde_json::to_string(&schema).unwrap();
        let decoded: SettingsSchema = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, schema);
    }

    #[test]
    fn valid_overrides_pass() {
        let schema = sample_schema();
        schema
            .validate_overrides(&json!({
                "title": "Points",
                "limit": 10,
                "theme": "dark",
                "accent": "#ff8800",
                "compact": true
            }))
            .unwrap();
    }

    #[test]
    fn unknown_key_is_rejected() {
        let schema = sample_schema();
        let err = schema
            .validate_overrides(&json!({"mystery": 1}))
            .unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn type_mismatches_are_rejected() {
        let schema = sample_schema();
        assert!(schema.validate_overrides(&json!({"limit": "ten"})).is_err());
        assert!(schema.validate_overrides(&json!({"compact": "yes"})).is_err());
        assert!(schema.validate_overrides(&json!({"theme": "sepia"})).is_err());
        assert!(schema
            .validate_overrides(&json!({"title": "way too long title"}))
            .is_err());
        assert!(schema.validate_overrides(&json!({"limit": 500})).is_err());
    }

    #[test]
    fn empty_schema_accepts_anything() {
        let schema = SettingsSchema::default();
        schema
            .validate_overrides(&json!({"whatever": [1, 2, 3]}))
            .unwrap();
    }
}
