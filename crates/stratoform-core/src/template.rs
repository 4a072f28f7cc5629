//! Template document model
//!
//! A template is a tree document whose relevant subtree is the `Resources`
//! map. The compiler reads `Parameters`, `Mappings`, and `Conditions`, and
//! forwards every other top-level section untouched. `Resources` keeps
//! insertion order so repeated compilations of unchanged input produce
//! byte-identical output.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "Transform", default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Value>,

    #[serde(rename = "Parameters", default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,

    #[serde(rename = "Mappings", default, skip_serializing_if = "Map::is_empty")]
    pub mappings: Map<String, Value>,

    #[serde(rename = "Conditions", default, skip_serializing_if = "Map::is_empty")]
    pub conditions: Map<String, Value>,

    #[serde(rename = "Resources", default)]
    pub resources: IndexMap<String, Value>,

    /// Remaining top-level sections (format version, description, outputs,
    /// ...) preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Template {
    /// Parse a template from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a template from YAML text (long-form intrinsics only; the
    /// short-form `!Ref` tags are a presentation-layer concern).
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Default values of declared parameters, for seeding an intrinsics
    /// resolver. Caller-provided values take precedence over these.
    pub fn default_parameter_values(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        for (name, parameter) in &self.parameters {
            if let Some(default) = parameter.get("Default") {
                defaults.insert(name.clone(), default.clone());
            }
        }
        defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_round_trip() {
        let template = Template::from_json_str(
            r#"{
                "AWSTemplateFormatVersion": "2010-09-09",
                "Transform": "Serverless-2016-10-31",
                "Parameters": { "Stage": { "Type": "String", "Default": "dev" } },
                "Resources": {
                    "B": { "Type": "X::Y::Z" },
                    "A": { "Type": "X::Y::Z" }
                }
            }"#,
        )
        .unwrap();

        // Resource order is preserved, not sorted
        let ids: Vec<&String> = template.resources.keys().collect();
        assert_eq!(ids, ["B", "A"]);

        let value = template.to_value().unwrap();
        assert_eq!(value["AWSTemplateFormatVersion"], json!("2010-09-09"));
        assert_eq!(value["Resources"]["B"]["Type"], json!("X::Y::Z"));
    }

    #[test]
    fn test_parse_yaml() {
        let template = Template::from_yaml_str(
            "Transform: Serverless-2016-10-31\nResources:\n  Fn:\n    Type: X::Y::Z\n",
        )
        .unwrap();
        assert!(template.resources.contains_key("Fn"));
        assert_eq!(template.transform, Some(json!("Serverless-2016-10-31")));
    }

    #[test]
    fn test_default_parameter_values() {
        let template = Template::from_json_str(
            r#"{
                "Parameters": {
                    "Stage": { "Type": "String", "Default": "dev" },
                    "NoDefault": { "Type": "String" }
                },
                "Resources": {}
            }"#,
        )
        .unwrap();
        let defaults = template.default_parameter_values();
        assert_eq!(defaults.get("Stage"), Some(&json!("dev")));
        assert!(!defaults.contains_key("NoDefault"));
    }
}
