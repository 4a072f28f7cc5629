//! Event trigger variants
//!
//! An event trigger is a declared association between a function and an
//! upstream event-producing service. Each variant expands into the
//! permission grant and wiring resources for its service, wired to the
//! target's runtime `arn`/`name` references. A trigger moves through
//! `Declared -> Linked -> Expanded`; any validation failure rejects it and
//! aborts the whole compilation.

pub mod pull;
pub mod push;
pub mod scheduler;

use indexmap::IndexMap;
use serde_json::Value;
use stratoform_core::logical_id::LogicalIdGenerator;
use stratoform_core::resource::Resource;
use stratoform_core::{CoreError, Result};

use crate::expansion::{ExpandCtx, SiblingPatch};
use crate::primitives::LAMBDA_PERMISSION;

/// Output of one trigger's expansion. Policy requirements are returned to
/// the owning function rather than applied to the role directly, so that
/// trigger expansion stays a pure function of its inputs.
#[derive(Debug, Default)]
pub struct TriggerExpansion {
    pub resources: Vec<Resource>,
    pub patches: Vec<SiblingPatch>,
    /// Managed policy ARNs to attach to an auto-generated execution role.
    pub managed_policy_arns: Vec<Value>,
    /// Inline `{PolicyName, PolicyDocument}` entries for the role.
    pub policies: Vec<Value>,
}

/// One declared event trigger of a function.
pub trait EventSource: std::fmt::Debug {
    /// The discriminator string in the `Events` map (e.g. `SQS`, `HttpApi`).
    fn resource_type(&self) -> &'static str;

    /// Template-unique id: owning function id + relative id.
    fn logical_id(&self) -> &str;

    /// The trigger's own key within the `Events` map.
    fn relative_id(&self) -> &str;

    /// Triggers that must expand before their siblings (catch-all HTTP
    /// routes) return true; the owning function sorts them first.
    fn sorts_first(&self) -> bool {
        false
    }

    /// Phase one: resolve sibling references. The default links nothing.
    fn resources_to_link(&mut self, resources: &IndexMap<String, Value>) -> Result<()> {
        let _ = resources;
        Ok(())
    }

    /// Phase two: expand against the target (the function, or its alias
    /// when one is published).
    fn expand(&mut self, target: &Resource, ctx: &ExpandCtx<'_>) -> Result<TriggerExpansion>;
}

/// Builds the event source declared under one key of a function's `Events`
/// map. The set of known types is a closed, statically assembled registry.
pub fn build_event_source(
    function_logical_id: &str,
    relative_id: &str,
    event_map: &Value,
) -> Result<Box<dyn EventSource>> {
    let event_type = event_map
        .get("Type")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            CoreError::invalid_event(
                function_logical_id,
                relative_id,
                "Event is missing a 'Type' string.",
            )
        })?;

    let source: Box<dyn EventSource> = match event_type {
        "Kinesis" | "DynamoDB" | "SQS" | "MSK" | "MQ" | "SelfManagedKafka" => Box::new(
            pull::PullEvent::from_map(function_logical_id, relative_id, event_map)?,
        ),
        "S3" => Box::new(push::S3Event::from_map(
            function_logical_id,
            relative_id,
            event_map,
        )?),
        "SNS" => Box::new(push::SnsEvent::from_map(
            function_logical_id,
            relative_id,
            event_map,
        )?),
        "Schedule" => Box::new(push::ScheduleEvent::from_map(
            function_logical_id,
            relative_id,
            event_map,
        )?),
        "CloudWatchEvent" | "EventBridgeRule" => Box::new(push::EventBridgeRuleEvent::from_map(
            function_logical_id,
            relative_id,
            event_map,
        )?),
        "IoTRule" => Box::new(push::IoTRuleEvent::from_map(
            function_logical_id,
            relative_id,
            event_map,
        )?),
        "AlexaSkill" => Box::new(push::AlexaSkillEvent::from_map(
            function_logical_id,
            relative_id,
            event_map,
        )?),
        "HttpApi" => Box::new(push::HttpApiEvent::from_map(
            function_logical_id,
            relative_id,
            event_map,
        )?),
        "ScheduleV2" => Box::new(scheduler::SchedulerEvent::from_map(
            function_logical_id,
            relative_id,
            event_map,
        )?),
        other => {
            return Err(CoreError::invalid_event(
                function_logical_id,
                relative_id,
                format!("Event source type '{other}' is not supported."),
            ));
        }
    };

    Ok(source)
}

/// Rescopes a resource-validation error to the trigger that owns it.
pub(crate) fn as_event_error(err: CoreError, function_id: &str, event_id: &str) -> CoreError {
    match err {
        CoreError::InvalidResource { message, .. } => {
            CoreError::invalid_event(function_id, event_id, message)
        }
        other => other,
    }
}

/// The `FunctionName` value for a permission or mapping: the target's name
/// where it has one, otherwise its ARN (aliases expose no name).
pub(crate) fn target_name_or_arn(target: &Resource) -> Result<Value> {
    if target.has_runtime_attr("name") {
        target.runtime_attr("name")
    } else {
        target.runtime_attr("arn")
    }
}

/// Constructs the permission resource allowing `principal` to invoke the
/// target. The logical id is `prefix + "Permission" + suffix` when the
/// suffix is alphanumeric - predictable ids let operators find per-stage
/// permissions - and falls back to a hashed suffix otherwise.
pub(crate) fn invoke_permission(
    prefix: &str,
    suffix: &str,
    principal: &str,
    target: &Resource,
    source_arn: Option<Value>,
    source_account: Option<Value>,
    event_source_token: Option<Value>,
) -> Result<Resource> {
    let base = format!("{prefix}Permission");
    let logical_id = if suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
        format!("{base}{suffix}")
    } else {
        LogicalIdGenerator::with_data(base, &Value::String(suffix.to_string())).generate()
    };

    let mut permission = Resource::with_attributes(
        &LAMBDA_PERMISSION,
        &logical_id,
        &target.passthrough_attributes(),
    )?;
    permission.set("Action", Value::String("lambda:InvokeFunction".into()))?;
    permission.set("FunctionName", target_name_or_arn(target)?)?;
    permission.set("Principal", Value::String(principal.into()))?;
    permission.set_opt("SourceArn", source_arn)?;
    permission.set_opt("SourceAccount", source_account)?;
    permission.set_opt("EventSourceToken", event_source_token)?;
    Ok(permission)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::LAMBDA_FUNCTION;
    use serde_json::json;

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let err = build_event_source("MyFn", "Bad", &json!({ "Type": "Nope" })).unwrap_err();
        assert!(err.to_string().contains("'Nope' is not supported"));
    }

    #[test]
    fn test_missing_event_type_is_rejected() {
        let err = build_event_source("MyFn", "Bad", &json!({ "Properties": {} })).unwrap_err();
        assert!(err.to_string().contains("missing a 'Type'"));
    }

    #[test]
    fn test_permission_id_uses_alphanumeric_suffix_directly() {
        let function = Resource::new(&LAMBDA_FUNCTION, "MyFn").unwrap();
        let permission =
            invoke_permission("MyFnUpload", "Prod", "s3.amazonaws.com", &function, None, None, None)
                .unwrap();
        assert_eq!(permission.logical_id(), "MyFnUploadPermissionProd");
    }

    #[test]
    fn test_permission_id_hashes_non_alphanumeric_suffix() {
        let function = Resource::new(&LAMBDA_FUNCTION, "MyFn").unwrap();
        let permission =
            invoke_permission("MyFnApi", "st-age", "apigateway.amazonaws.com", &function, None, None, None)
                .unwrap();
        assert!(permission.logical_id().starts_with("MyFnApiPermission"));
        assert_ne!(permission.logical_id(), "MyFnApiPermissionst-age");
    }
}
