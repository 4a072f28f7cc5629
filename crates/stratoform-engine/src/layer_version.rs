//! The layer version macro
//!
//! Layer content is immutable once published, so the macro moves the layer
//! to a content-hashed logical id: any change to the resolved definition
//! creates a new layer version while the superseded one is retained. The
//! original logical id is reported back to the orchestrator, which rewrites
//! every reference to it.

use serde_json::{Map as JsonMap, Value, json};
use stratoform_core::logical_id::LogicalIdGenerator;
use stratoform_core::resource::{
    PropertyDef,
    PropertyKind::{List, Str, StrOrMap},
    Resource, ResourceTypeDef,
};
use stratoform_core::{CoreError, Result};

use crate::expansion::{ExpandCtx, Expansion, ResourceMacro};
use crate::primitives::LAMBDA_LAYER_VERSION;

pub const LAYER_VERSION_TYPE: &str = "AWS::Serverless::LayerVersion";

static LAYER_VERSION: ResourceTypeDef = ResourceTypeDef {
    type_name: LAYER_VERSION_TYPE,
    properties: &[
        PropertyDef::optional("LayerName", StrOrMap),
        PropertyDef::optional("Description", Str),
        PropertyDef::required("ContentUri", StrOrMap),
        PropertyDef::optional("CompatibleArchitectures", List),
        PropertyDef::optional("CompatibleRuntimes", List),
        PropertyDef::optional("LicenseInfo", Str),
        PropertyDef::optional("RetentionPolicy", Str),
    ],
    runtime_attrs: &[],
};

pub struct LayerVersionMacro {
    resource: Resource,
    renamed_to: Option<String>,
}

impl LayerVersionMacro {
    pub fn from_map(logical_id: &str, resource_map: &Value) -> Result<Self> {
        Ok(Self {
            resource: Resource::from_map(&LAYER_VERSION, logical_id, resource_map)?,
            renamed_to: None,
        })
    }

    fn error(&self, message: impl Into<String>) -> CoreError {
        CoreError::invalid_resource(self.resource.logical_id(), message)
    }

    fn content_dict(&self) -> Result<Value> {
        match self.resource.get("ContentUri") {
            Some(Value::Object(location)) => {
                let (Some(bucket), Some(key)) = (location.get("Bucket"), location.get("Key"))
                else {
                    return Err(self.error(
                        "'ContentUri' requires Bucket and Key properties to be specified.",
                    ));
                };
                let mut content = JsonMap::new();
                content.insert("S3Bucket".into(), bucket.clone());
                content.insert("S3Key".into(), key.clone());
                if let Some(version) = location.get("Version") {
                    content.insert("S3ObjectVersion".into(), version.clone());
                }
                Ok(Value::Object(content))
            }
            Some(Value::String(uri)) => {
                let rest = uri.strip_prefix("s3://").ok_or_else(|| {
                    self.error("'ContentUri' is not a valid S3 Uri of the form \"s3://bucket/key\".")
                })?;
                let (bucket, key) = rest.split_once('/').ok_or_else(|| {
                    self.error("'ContentUri' is not a valid S3 Uri of the form \"s3://bucket/key\".")
                })?;
                Ok(json!({ "S3Bucket": bucket, "S3Key": key }))
            }
            _ => Err(self.error("Property 'ContentUri' should be a string or a map.")),
        }
    }

    /// Versions are retained by default; an explicit retention policy of
    /// `Delete` opts out.
    fn deletion_policy(&self) -> Result<Value> {
        match self.resource.get("RetentionPolicy") {
            None => Ok(json!("Retain")),
            Some(policy) => match policy.as_str().map(str::to_ascii_lowercase).as_deref() {
                Some("retain") => Ok(json!("Retain")),
                Some("delete") => Ok(json!("Delete")),
                _ => Err(self.error("'RetentionPolicy' must be one of 'Retain' or 'Delete'.")),
            },
        }
    }
}

impl ResourceMacro for LayerVersionMacro {
    fn logical_id(&self) -> &str {
        self.resource.logical_id()
    }

    fn expand(&mut self, ctx: &ExpandCtx<'_>) -> Result<Expansion> {
        let content = self.content_dict()?;
        let original_id = self.resource.logical_id().to_string();

        // Hash the parameter-resolved definition: the id must move exactly
        // when the published content would differ.
        let defining_content = json!({
            "LayerName": self.resource.get("LayerName"),
            "Content": content,
            "CompatibleArchitectures": self.resource.get("CompatibleArchitectures"),
            "CompatibleRuntimes": self.resource.get("CompatibleRuntimes"),
            "Description": self.resource.get("Description"),
            "LicenseInfo": self.resource.get("LicenseInfo"),
        });
        let resolved = ctx.intrinsics_resolver.resolve_parameter_refs(&defining_content)?;
        let hashed_id = LogicalIdGenerator::with_data(&original_id, &resolved).generate();

        let mut layer = Resource::with_attributes(
            &LAMBDA_LAYER_VERSION,
            &hashed_id,
            &self.resource.passthrough_attributes(),
        )?;
        layer.set_depends_on(self.resource.depends_on().cloned());
        layer.set_resource_attribute("DeletionPolicy", self.deletion_policy()?)?;
        layer.set("Content", content)?;
        for property in [
            "LayerName",
            "Description",
            "CompatibleArchitectures",
            "CompatibleRuntimes",
            "LicenseInfo",
        ] {
            layer.set_opt(property, self.resource.get(property).cloned())?;
        }

        self.renamed_to = Some(hashed_id);
        let mut expansion = Expansion::new();
        expansion.push(layer);
        Ok(expansion)
    }

    fn renamed_to(&self) -> Option<&str> {
        self.renamed_to.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DefaultFeatureToggle, ManagedPolicyMap};
    use stratoform_core::IntrinsicsResolver;

    fn expand(resource_map: Value) -> Result<(Expansion, Option<String>)> {
        let intrinsics = IntrinsicsResolver::new(JsonMap::new());
        let mappings = IntrinsicsResolver::for_mappings(JsonMap::new());
        let policy_map = ManagedPolicyMap::new();
        let ctx = ExpandCtx {
            intrinsics_resolver: &intrinsics,
            mappings_resolver: &mappings,
            managed_policy_map: &policy_map,
            feature_toggle: &DefaultFeatureToggle,
        };
        let mut layer = LayerVersionMacro::from_map("SharedLibs", &resource_map)?;
        let expansion = layer.expand(&ctx)?;
        let renamed = layer.renamed_to().map(str::to_string);
        Ok((expansion, renamed))
    }

    #[test]
    fn test_layer_moves_to_hashed_id_and_retains() {
        let (expansion, renamed) = expand(json!({
            "Type": "AWS::Serverless::LayerVersion",
            "Properties": { "ContentUri": "s3://bucket/layer.zip" }
        }))
        .unwrap();

        let layer = &expansion.resources[0];
        assert!(layer.logical_id().starts_with("SharedLibs"));
        assert_ne!(layer.logical_id(), "SharedLibs");
        assert_eq!(renamed.as_deref(), Some(layer.logical_id()));
        assert_eq!(
            layer.get_resource_attribute("DeletionPolicy"),
            Some(&json!("Retain"))
        );
        assert_eq!(
            layer.get("Content"),
            Some(&json!({ "S3Bucket": "bucket", "S3Key": "layer.zip" }))
        );
    }

    #[test]
    fn test_content_change_moves_the_id() {
        let (first, _) = expand(json!({
            "Type": "AWS::Serverless::LayerVersion",
            "Properties": { "ContentUri": "s3://bucket/layer.zip" }
        }))
        .unwrap();
        let (second, _) = expand(json!({
            "Type": "AWS::Serverless::LayerVersion",
            "Properties": { "ContentUri": "s3://bucket/layer-v2.zip" }
        }))
        .unwrap();
        assert_ne!(
            first.resources[0].logical_id(),
            second.resources[0].logical_id()
        );
    }

    #[test]
    fn test_retention_policy_delete() {
        let (expansion, _) = expand(json!({
            "Type": "AWS::Serverless::LayerVersion",
            "Properties": { "ContentUri": "s3://bucket/layer.zip", "RetentionPolicy": "Delete" }
        }))
        .unwrap();
        assert_eq!(
            expansion.resources[0].get_resource_attribute("DeletionPolicy"),
            Some(&json!("Delete"))
        );

        let err = expand(json!({
            "Type": "AWS::Serverless::LayerVersion",
            "Properties": { "ContentUri": "s3://bucket/layer.zip", "RetentionPolicy": "Keep" }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("RetentionPolicy"));
    }
}
