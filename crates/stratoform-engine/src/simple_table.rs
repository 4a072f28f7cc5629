//! The simple table macro
//!
//! A minimal key-value table declaration that expands into one DynamoDB
//! table with a single-attribute hash key.

use serde_json::{Value, json};
use stratoform_core::resource::{
    PropertyDef,
    PropertyKind::{Map, MapOfStr, StrOrMap},
    Resource, ResourceTypeDef,
};
use stratoform_core::{CoreError, Result};

use crate::expansion::{ExpandCtx, Expansion, ResourceMacro};
use crate::primitives::DYNAMODB_TABLE;

pub const SIMPLE_TABLE_TYPE: &str = "AWS::Serverless::SimpleTable";

static SIMPLE_TABLE: ResourceTypeDef = ResourceTypeDef {
    type_name: SIMPLE_TABLE_TYPE,
    properties: &[
        PropertyDef::optional("PrimaryKey", MapOfStr),
        PropertyDef::optional("ProvisionedThroughput", Map),
        PropertyDef::optional("TableName", StrOrMap),
        PropertyDef::optional("Tags", Map),
        PropertyDef::optional("SSESpecification", Map),
    ],
    runtime_attrs: &[],
};

pub struct SimpleTableMacro {
    resource: Resource,
}

impl SimpleTableMacro {
    pub fn from_map(logical_id: &str, resource_map: &Value) -> Result<Self> {
        Ok(Self {
            resource: Resource::from_map(&SIMPLE_TABLE, logical_id, resource_map)?,
        })
    }

    fn attribute_type(&self, declared: &str) -> Result<&'static str> {
        match declared {
            "String" => Ok("S"),
            "Number" => Ok("N"),
            "Binary" => Ok("B"),
            other => Err(CoreError::invalid_resource(
                self.resource.logical_id(),
                format!("Invalid 'Type' \"{other}\"."),
            )),
        }
    }
}

impl ResourceMacro for SimpleTableMacro {
    fn logical_id(&self) -> &str {
        self.resource.logical_id()
    }

    fn expand(&mut self, _ctx: &ExpandCtx<'_>) -> Result<Expansion> {
        let mut table = Resource::new(&DYNAMODB_TABLE, self.resource.logical_id())?;
        table.set_depends_on(self.resource.depends_on().cloned());
        for (attr, value) in self.resource.resource_attributes() {
            table.set_resource_attribute(attr, value.clone())?;
        }

        let primary_key = match self.resource.get("PrimaryKey") {
            Some(declared) => {
                let name = declared.get("Name").and_then(Value::as_str);
                let declared_type = declared.get("Type").and_then(Value::as_str);
                let (Some(name), Some(declared_type)) = (name, declared_type) else {
                    return Err(CoreError::invalid_resource(
                        self.resource.logical_id(),
                        "'PrimaryKey' requires Name and Type properties to be specified.",
                    ));
                };
                json!({ "AttributeName": name, "AttributeType": self.attribute_type(declared_type)? })
            }
            None => json!({ "AttributeName": "id", "AttributeType": "S" }),
        };

        table.set("AttributeDefinitions", json!([primary_key]))?;
        table.set(
            "KeySchema",
            json!([{ "AttributeName": primary_key["AttributeName"], "KeyType": "HASH" }]),
        )?;
        table.set(
            "ProvisionedThroughput",
            self.resource
                .get("ProvisionedThroughput")
                .cloned()
                .unwrap_or_else(|| json!({ "ReadCapacityUnits": 5, "WriteCapacityUnits": 5 })),
        )?;
        table.set_opt("TableName", self.resource.get("TableName").cloned())?;
        table.set_opt("SSESpecification", self.resource.get("SSESpecification").cloned())?;

        if let Some(tags) = self.resource.get("Tags").and_then(Value::as_object) {
            let tag_list: Vec<Value> = tags
                .iter()
                .map(|(key, value)| json!({ "Key": key, "Value": value }))
                .collect();
            table.set("Tags", Value::Array(tag_list))?;
        }

        let mut expansion = Expansion::new();
        expansion.push(table);
        Ok(expansion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DefaultFeatureToggle, ManagedPolicyMap};
    use serde_json::Map as JsonMap;
    use stratoform_core::IntrinsicsResolver;

    fn expand(resource_map: Value) -> Result<Expansion> {
        let intrinsics = IntrinsicsResolver::new(JsonMap::new());
        let mappings = IntrinsicsResolver::for_mappings(JsonMap::new());
        let policy_map = ManagedPolicyMap::new();
        let ctx = ExpandCtx {
            intrinsics_resolver: &intrinsics,
            mappings_resolver: &mappings,
            managed_policy_map: &policy_map,
            feature_toggle: &DefaultFeatureToggle,
        };
        SimpleTableMacro::from_map("Orders", &resource_map)?.expand(&ctx)
    }

    #[test]
    fn test_defaults_apply_without_primary_key() {
        let expansion = expand(json!({ "Type": "AWS::Serverless::SimpleTable" })).unwrap();
        let table = &expansion.resources[0];
        assert_eq!(table.type_name(), "AWS::DynamoDB::Table");
        assert_eq!(
            table.get("AttributeDefinitions"),
            Some(&json!([{ "AttributeName": "id", "AttributeType": "S" }]))
        );
        assert_eq!(
            table.get("ProvisionedThroughput"),
            Some(&json!({ "ReadCapacityUnits": 5, "WriteCapacityUnits": 5 }))
        );
    }

    #[test]
    fn test_primary_key_type_is_converted() {
        let expansion = expand(json!({
            "Type": "AWS::Serverless::SimpleTable",
            "Properties": { "PrimaryKey": { "Name": "orderId", "Type": "Number" } }
        }))
        .unwrap();
        let table = &expansion.resources[0];
        assert_eq!(
            table.get("KeySchema"),
            Some(&json!([{ "AttributeName": "orderId", "KeyType": "HASH" }]))
        );
        assert_eq!(
            table.get("AttributeDefinitions").unwrap()[0]["AttributeType"],
            json!("N")
        );
    }

    #[test]
    fn test_invalid_key_type_is_rejected() {
        let err = expand(json!({
            "Type": "AWS::Serverless::SimpleTable",
            "Properties": { "PrimaryKey": { "Name": "id", "Type": "Float" } }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("Float"));
    }
}
