//! Macro type registry
//!
//! A closed map from macro type strings to constructors, assembled once at
//! startup. There is no runtime plugin discovery; adding a macro means
//! adding a line here.

use std::collections::HashMap;

use serde_json::Value;
use stratoform_core::{CoreError, Result};

use crate::expansion::ResourceMacro;
use crate::function::{FunctionMacro, SERVERLESS_FUNCTION_TYPE};
use crate::layer_version::{LAYER_VERSION_TYPE, LayerVersionMacro};
use crate::simple_table::{SIMPLE_TABLE_TYPE, SimpleTableMacro};

pub type MacroConstructor = fn(&str, &Value) -> Result<Box<dyn ResourceMacro>>;

pub struct MacroRegistry {
    types: HashMap<&'static str, MacroConstructor>,
}

impl Default for MacroRegistry {
    fn default() -> Self {
        let mut types: HashMap<&'static str, MacroConstructor> = HashMap::new();
        types.insert(SERVERLESS_FUNCTION_TYPE, |logical_id, resource_map| {
            Ok(Box::new(FunctionMacro::from_map(logical_id, resource_map)?))
        });
        types.insert(SIMPLE_TABLE_TYPE, |logical_id, resource_map| {
            Ok(Box::new(SimpleTableMacro::from_map(logical_id, resource_map)?))
        });
        types.insert(LAYER_VERSION_TYPE, |logical_id, resource_map| {
            Ok(Box::new(LayerVersionMacro::from_map(logical_id, resource_map)?))
        });
        Self { types }
    }
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True only when the entry's `Type` is a string present in the
    /// registry.
    pub fn can_resolve(&self, resource_map: &Value) -> bool {
        resource_map
            .get("Type")
            .and_then(Value::as_str)
            .is_some_and(|type_name| self.types.contains_key(type_name))
    }

    pub fn resolve(&self, resource_map: &Value) -> Result<MacroConstructor> {
        let type_name = resource_map
            .get("Type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CoreError::invalid_template(
                    "Resource definition has a missing or invalid value for key 'Type'.",
                )
            })?;
        self.types.get(type_name).copied().ok_or_else(|| {
            CoreError::invalid_template(format!("Invalid resource type {type_name}."))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_can_resolve_only_registered_string_types() {
        let registry = MacroRegistry::new();
        assert!(registry.can_resolve(&json!({ "Type": "AWS::Serverless::Function" })));
        assert!(registry.can_resolve(&json!({ "Type": "AWS::Serverless::SimpleTable" })));
        assert!(!registry.can_resolve(&json!({ "Type": "AWS::Lambda::Function" })));
        assert!(!registry.can_resolve(&json!({ "Type": 42 })));
        assert!(!registry.can_resolve(&json!({})));
    }

    #[test]
    fn test_resolve_unregistered_type_is_an_error() {
        let registry = MacroRegistry::new();
        assert!(registry.resolve(&json!({ "Type": "AWS::Unknown" })).is_err());
        assert!(registry.resolve(&json!({})).is_err());
    }
}
