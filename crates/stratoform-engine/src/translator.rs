//! The translator orchestrator
//!
//! Drives the two-phase expansion of every macro-typed entry in a template
//! and merges the results into the output. Compilation is fully synchronous
//! and fail-fast: the first error anywhere in the expansion graph aborts the
//! run - a half-expanded template could silently omit required permissions.

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};
use stratoform_core::{
    CoreError, IntrinsicsResolver, Result, SupportedResourceReferences, Template,
    resolve_resource_id_refs, resolve_resource_refs,
};

use crate::collaborators::{DefaultFeatureToggle, FeatureToggle, ManagedPolicyMap};
use crate::expansion::{ExpandCtx, SiblingPatch};
use crate::function::SERVERLESS_FUNCTION_TYPE;
use crate::registry::MacroRegistry;

pub struct Translator {
    managed_policy_map: ManagedPolicyMap,
    feature_toggle: Box<dyn FeatureToggle>,
    registry: MacroRegistry,
    passthrough_metadata: bool,
}

impl Translator {
    pub fn new(managed_policy_map: ManagedPolicyMap) -> Self {
        Self {
            managed_policy_map,
            feature_toggle: Box::new(DefaultFeatureToggle),
            registry: MacroRegistry::new(),
            passthrough_metadata: false,
        }
    }

    pub fn with_feature_toggle(mut self, feature_toggle: Box<dyn FeatureToggle>) -> Self {
        self.feature_toggle = feature_toggle;
        self
    }

    /// Copy the macro's `Metadata` attribute onto every generated resource
    /// that does not define its own.
    pub fn with_passthrough_metadata(mut self, enabled: bool) -> Self {
        self.passthrough_metadata = enabled;
        self
    }

    /// Replaces every macro-typed entry of the template with the primitive
    /// resources it expands to and returns the resulting template.
    ///
    /// `parameter_values` seeds the intrinsics resolver on top of the
    /// template's own parameter defaults; passing an empty map explicitly
    /// opts out of parameter-dependent behavior (such as detecting code
    /// changes through a parameterized code location).
    pub fn translate(
        &self,
        template: &Template,
        parameter_values: &JsonMap<String, Value>,
    ) -> Result<Template> {
        let mut symbols = template.default_parameter_values();
        for (name, value) in parameter_values {
            symbols.insert(name.clone(), value.clone());
        }
        let intrinsics_resolver = IntrinsicsResolver::new(symbols);
        let mappings_resolver = IntrinsicsResolver::for_mappings(template.mappings.clone());
        let ctx = ExpandCtx {
            intrinsics_resolver: &intrinsics_resolver,
            mappings_resolver: &mappings_resolver,
            managed_policy_map: &self.managed_policy_map,
            feature_toggle: self.feature_toggle.as_ref(),
        };

        let mut output = template.clone();
        let mut supported_refs = SupportedResourceReferences::new();
        let mut changed_ids: IndexMap<String, String> = IndexMap::new();

        for (logical_id, resource_map) in self.resources_to_iterate(template) {
            tracing::debug!("expanding macro resource {logical_id}");

            let constructor = self.registry.resolve(&resource_map)?;
            let mut resource_macro = constructor(&logical_id, &resource_map)?;
            resource_macro.resources_to_link(&template.resources)?;
            let expansion = resource_macro.expand(&ctx)?;

            output.resources.shift_remove(&logical_id);
            for resource in &expansion.resources {
                let generated_id = resource.logical_id();
                if generated_id != logical_id && template.resources.contains_key(generated_id) {
                    return Err(CoreError::DuplicateLogicalId {
                        logical_id: logical_id.clone(),
                        generated_id: generated_id.to_string(),
                    });
                }
                let mut entry = resource.to_map()?;
                if self.passthrough_metadata && entry.get("Metadata").is_none() {
                    if let Some(metadata) = resource_map.get("Metadata") {
                        entry["Metadata"] = metadata.clone();
                    }
                }
                output.resources.insert(generated_id.to_string(), entry);
            }

            for patch in &expansion.patches {
                apply_patch(&mut output, patch)?;
            }

            for (property, type_name) in resource_macro.referable_properties() {
                if let Some(generated) = expansion
                    .resources
                    .iter()
                    .find(|resource| resource.type_name() == *type_name)
                {
                    supported_refs.add(&logical_id, property, generated.logical_id())?;
                }
            }
            if let Some(new_id) = resource_macro.renamed_to() {
                if new_id != logical_id {
                    changed_ids.insert(logical_id.clone(), new_id.to_string());
                }
            }
        }

        output.transform = None;

        // Final output passes: point references at renamed resources and at
        // the generated resources behind referable properties.
        if !changed_ids.is_empty() || !supported_refs.is_empty() {
            let mut value = output.to_value()?;
            if !changed_ids.is_empty() {
                value = resolve_resource_id_refs(&value, &changed_ids);
            }
            if !supported_refs.is_empty() {
                value = resolve_resource_refs(&value, &supported_refs);
            }
            output = Template::from_value(value)?;
        }

        Ok(output)
    }

    /// Macro entries in processing order: functions first, since their
    /// triggers may patch sibling resources that other macros must observe
    /// only in final form; everything else in declaration order.
    fn resources_to_iterate(&self, template: &Template) -> Vec<(String, Value)> {
        let mut functions = Vec::new();
        let mut others = Vec::new();
        for (logical_id, resource_map) in &template.resources {
            if !self.registry.can_resolve(resource_map) {
                continue;
            }
            let entry = (logical_id.clone(), resource_map.clone());
            if resource_map.get("Type").and_then(Value::as_str) == Some(SERVERLESS_FUNCTION_TYPE) {
                functions.push(entry);
            } else {
                others.push(entry);
            }
        }
        functions.extend(others);
        functions
    }
}

/// Applies one sibling patch to the output template. Patches de-duplicate:
/// identical entries are never appended twice, and keyed writes (routes,
/// condition definitions) resolve to a single value.
fn apply_patch(output: &mut Template, patch: &SiblingPatch) -> Result<()> {
    match patch {
        SiblingPatch::DefineCondition { name, definition } => {
            if !output.conditions.contains_key(name) {
                output.conditions.insert(name.clone(), definition.clone());
            }
            Ok(())
        }

        SiblingPatch::MergeDependsOn {
            logical_id,
            depends_on,
        } => {
            let entry = sibling_mut(output, logical_id)?;
            let addition = Value::String(depends_on.clone());
            // Inserting over an existing key keeps its position, so the
            // sibling's own key order survives the merge.
            let merged = match entry.get("DependsOn") {
                None => Value::Array(vec![addition]),
                Some(Value::String(existing)) => {
                    let mut list = vec![Value::String(existing.clone())];
                    if *existing != *depends_on {
                        list.push(addition);
                    }
                    Value::Array(list)
                }
                Some(Value::Array(existing)) => {
                    let mut list = existing.clone();
                    if !list.contains(&addition) {
                        list.push(addition);
                    }
                    Value::Array(list)
                }
                Some(_) => {
                    return Err(CoreError::invalid_resource(
                        logical_id,
                        "Invalid type for field 'DependsOn'. Expected a string or list of strings.",
                    ));
                }
            };
            entry.insert("DependsOn".into(), merged);
            Ok(())
        }

        SiblingPatch::AppendTag { logical_id, tag } => {
            let properties = properties_mut(sibling_mut(output, logical_id)?);
            let tags = properties
                .entry("Tags".to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(tags) = tags else {
                return Err(CoreError::invalid_resource(
                    logical_id,
                    "Invalid type for field 'Tags'. Expected a list.",
                ));
            };
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
            Ok(())
        }

        SiblingPatch::AppendNotification { logical_id, entry } => {
            let properties = properties_mut(sibling_mut(output, logical_id)?);
            let notification_config = properties
                .entry("NotificationConfiguration".to_string())
                .or_insert_with(|| Value::Object(JsonMap::new()));
            let Value::Object(notification_config) = notification_config else {
                return Err(CoreError::invalid_resource(
                    logical_id,
                    "Invalid type for NotificationConfiguration. Must be a map.",
                ));
            };
            let configurations = notification_config
                .entry("LambdaConfigurations".to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(configurations) = configurations else {
                return Err(CoreError::invalid_resource(
                    logical_id,
                    "Invalid type for LambdaConfigurations. Must be a list.",
                ));
            };
            if !configurations.contains(entry) {
                configurations.push(entry.clone());
            }
            Ok(())
        }

        SiblingPatch::InjectRoute {
            logical_id,
            path,
            method,
            operation,
        } => {
            let properties = properties_mut(sibling_mut(output, logical_id)?);
            let Some(Value::Object(definition_body)) = properties.get_mut("DefinitionBody") else {
                // Definition-less APIs manage their own routes.
                tracing::warn!(
                    "skipping route injection: '{logical_id}' has no definition document"
                );
                return Ok(());
            };
            let paths = definition_body
                .entry("paths".to_string())
                .or_insert_with(|| Value::Object(JsonMap::new()));
            let Value::Object(paths) = paths else {
                return Err(CoreError::invalid_resource(
                    logical_id,
                    "Invalid type for 'paths' in the definition document. Must be a map.",
                ));
            };
            let path_entry = paths
                .entry(path.clone())
                .or_insert_with(|| Value::Object(JsonMap::new()));
            let Value::Object(path_entry) = path_entry else {
                return Err(CoreError::invalid_resource(
                    logical_id,
                    format!("Invalid type for path '{path}' in the definition document."),
                ));
            };
            path_entry.insert(method.clone(), operation.clone());
            Ok(())
        }
    }
}

fn sibling_mut<'a>(
    output: &'a mut Template,
    logical_id: &str,
) -> Result<&'a mut JsonMap<String, Value>> {
    output
        .resources
        .get_mut(logical_id)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| {
            CoreError::contract(format!(
                "patched sibling '{logical_id}' is not present in the template"
            ))
        })
}

fn properties_mut(entry: &mut JsonMap<String, Value>) -> &mut JsonMap<String, Value> {
    let properties = entry
        .entry("Properties".to_string())
        .or_insert_with(|| Value::Object(JsonMap::new()));
    if !properties.is_object() {
        *properties = Value::Object(JsonMap::new());
    }
    properties.as_object_mut().expect("ensured object above")
}
