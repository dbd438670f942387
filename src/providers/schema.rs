use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Url,
    Int,
    Bool,
    Array,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
}

/// Ordered declaration of the settings a provider accepts.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ConfigSchema {
    fields: Vec<FieldSpec>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &'static str, field_type: FieldType, description: &'static str) -> Self {
        self.fields.push(FieldSpec {
            name,
            field_type,
            required: true,
            default: None,
            description,
        });
        self
    }

    pub fn optional(
        mut self,
        name: &'static str,
        field_type: FieldType,
        default: Option<Value>,
        description: &'static str,
    ) -> Self {
        self.fields.push(FieldSpec {
            name,
            field_type,
            required: false,
            default,
            description,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Validate raw input: unknown keys are dropped, values are coerced to the
    /// declared type, and absent or uncoercible values fall back to defaults.
    pub fn sanitize(&self, raw: &Value) -> ProviderConfig {
        let mut values = BTreeMap::new();
        for spec in &self.fields {
            let coerced = raw
                .get(spec.name)
                .and_then(|v| coerce(spec.field_type, v))
                .or_else(|| spec.default.clone());
            if let Some(value) = coerced {
                values.insert(spec.name.to_string(), value);
            }
        }
        if let Some(obj) = raw.as_object() {
            for key in obj.keys() {
                if !self.fields.iter().any(|f| f.name == key) {
                    tracing::debug!("Dropping unknown provider setting '{key}'");
                }
            }
        }
        ProviderConfig(values)
    }

    /// Required fields that are absent or empty in `config`.
    pub fn missing_required(&self, config: &ProviderConfig) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.required && !config.has_value(f.name))
            .map(|f| f.name)
            .collect()
    }

    pub fn is_satisfied_by(&self, config: &ProviderConfig) -> bool {
        self.missing_required(config).is_empty()
    }
}

/// Sanitized provider settings, keyed by schema field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProviderConfig(BTreeMap<String, Value>);

impl ProviderConfig {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn has_value(&self, name: &str) -> bool {
        match self.0.get(name) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        }
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn u64(&self, name: &str) -> Option<u64> {
        self.0.get(name).and_then(Value::as_u64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    pub fn list(&self, name: &str) -> Vec<String> {
        self.0
            .get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn coerce(field_type: FieldType, value: &Value) -> Option<Value> {
    match field_type {
        FieldType::String => match value {
            Value::String(s) => Some(Value::String(s.trim().to_string())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        FieldType::Url => {
            let text = value.as_str()?.trim();
            let parsed = url::Url::parse(text).ok()?;
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                return None;
            }
            Some(Value::String(text.trim_end_matches('/').to_string()))
        }
        FieldType::Int => match value {
            Value::Number(n) => n.as_i64().map(Value::from),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        FieldType::Bool => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(Value::Bool(true)),
                "0" | "false" | "no" | "off" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        FieldType::Array => match value {
            Value::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .filter_map(|item| coerce(FieldType::String, item))
                    .filter(|item| item.as_str().is_some_and(|s| !s.is_empty()))
                    .collect(),
            )),
            Value::String(s) => Some(Value::Array(
                s.split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            )),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .required("api_key", FieldType::String, "key")
            .optional("base_url", FieldType::Url, Some(json!("https://api.test")), "host")
            .optional("page_size", FieldType::Int, Some(json!(50)), "size")
            .optional("verbose", FieldType::Bool, Some(json!(false)), "flag")
            .optional("filters", FieldType::Array, None, "filters")
    }

    #[test]
    fn unknown_keys_dropped_and_defaults_filled() {
        let config = schema().sanitize(&json!({ "api_key": " k ", "bogus": 1 }));
        assert_eq!(config.str("api_key"), Some("k"));
        assert_eq!(config.get("bogus"), None);
        assert_eq!(config.str("base_url"), Some("https://api.test"));
        assert_eq!(config.u64("page_size"), Some(50));
        assert_eq!(config.bool("verbose"), Some(false));
        assert!(config.get("filters").is_none());
    }

    #[test]
    fn values_are_coerced_to_declared_types() {
        let config = schema().sanitize(&json!({
            "api_key": 12345,
            "base_url": "https://other.test/v2/",
            "page_size": "25",
            "verbose": "yes",
            "filters": "Sort=AgeDesc, Postcode=SW1A"
        }));
        assert_eq!(config.str("api_key"), Some("12345"));
        assert_eq!(config.str("base_url"), Some("https://other.test/v2"));
        assert_eq!(config.u64("page_size"), Some(25));
        assert_eq!(config.bool("verbose"), Some(true));
        assert_eq!(config.list("filters"), vec!["Sort=AgeDesc", "Postcode=SW1A"]);
    }

    #[test]
    fn uncoercible_values_fall_back_to_default() {
        let config = schema().sanitize(&json!({
            "api_key": "k",
            "base_url": "ftp://nope",
            "page_size": "many",
            "verbose": "maybe"
        }));
        assert_eq!(config.str("base_url"), Some("https://api.test"));
        assert_eq!(config.u64("page_size"), Some(50));
        assert_eq!(config.bool("verbose"), Some(false));
    }

    #[test]
    fn required_fields_must_be_non_empty() {
        let schema = schema();
        assert!(!schema.is_satisfied_by(&schema.sanitize(&json!({}))));
        assert!(!schema.is_satisfied_by(&schema.sanitize(&json!({ "api_key": "   " }))));
        assert_eq!(
            schema.missing_required(&schema.sanitize(&json!({ "api_key": "" }))),
            vec!["api_key"]
        );
        assert!(schema.is_satisfied_by(&schema.sanitize(&json!({ "api_key": "k" }))));
    }
}
