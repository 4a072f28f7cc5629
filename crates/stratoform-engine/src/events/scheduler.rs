//! Scheduler event source
//!
//! The `ScheduleV2` trigger translates into a scheduler schedule. Unlike the
//! rule-based `Schedule` trigger, the scheduler service invokes its target
//! through an execution role rather than a resource policy, so expansion
//! constructs a role scoped to starting exactly this one target - unless the
//! caller supplies a role ARN of their own.

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value, json};
use stratoform_core::resource::{
    PropertyDef,
    PropertyKind::{Bool, Map, Str},
    Resource, ResourceTypeDef,
};
use stratoform_core::{CoreError, Result};

use crate::events::{EventSource, TriggerExpansion, as_event_error};
use crate::expansion::ExpandCtx;
use crate::policies;
use crate::primitives::{IAM_ROLE, SCHEDULER_SCHEDULE, SQS_QUEUE};

static SCHEDULER_EVENT: ResourceTypeDef = ResourceTypeDef {
    type_name: "ScheduleV2",
    properties: &[
        PropertyDef::required("ScheduleExpression", Str),
        PropertyDef::optional("FlexibleTimeWindow", Map),
        PropertyDef::optional("Name", Str),
        PropertyDef::optional("State", Str),
        PropertyDef::optional("Description", Str),
        PropertyDef::pass_through("StartDate"),
        PropertyDef::pass_through("EndDate"),
        PropertyDef::pass_through("ScheduleExpressionTimezone"),
        PropertyDef::pass_through("GroupName"),
        PropertyDef::pass_through("KmsKeyArn"),
        PropertyDef::optional("Input", Str),
        PropertyDef::pass_through("RoleArn"),
        PropertyDef::optional("DeadLetterConfig", Map),
        PropertyDef::pass_through("RetryPolicy"),
        PropertyDef::optional("PermissionsBoundary", Str),
        PropertyDef::optional("OmitName", Bool),
    ],
    runtime_attrs: &[],
};

const DEFAULT_FLEXIBLE_TIME_WINDOW: &str = "OFF";

#[derive(Debug)]
pub struct SchedulerEvent {
    function_logical_id: String,
    resource: Resource,
}

impl SchedulerEvent {
    pub fn from_map(
        function_logical_id: &str,
        relative_id: &str,
        event_map: &Value,
    ) -> Result<Self> {
        let logical_id = format!("{function_logical_id}{relative_id}");
        let resource =
            Resource::from_map_relative(&SCHEDULER_EVENT, &logical_id, relative_id, event_map)
                .map_err(|e| as_event_error(e, function_logical_id, relative_id))?;
        Ok(Self {
            function_logical_id: function_logical_id.to_string(),
            resource,
        })
    }

    fn error(&self, message: impl Into<String>) -> CoreError {
        CoreError::invalid_event(
            &self.function_logical_id,
            self.resource.relative_id().unwrap_or_default(),
            message,
        )
    }

    fn dead_letter_queue(
        &self,
        attributes: &IndexMap<String, Value>,
    ) -> Result<Option<(Value, Option<Resource>)>> {
        let Some(config) = self.resource.get("DeadLetterConfig") else {
            return Ok(None);
        };
        let config = config
            .as_object()
            .ok_or_else(|| self.error("Property 'DeadLetterConfig' should be a map."))?;

        for key in config.keys() {
            if key != "Arn" && key != "QueueLogicalId" {
                return Err(self.error(format!(
                    "Invalid 'DeadLetterConfig' property '{key}'. \
                     The supported properties are 'Arn' and 'QueueLogicalId'."
                )));
            }
        }

        if let Some(arn) = config.get("Arn") {
            if config.contains_key("QueueLogicalId") {
                return Err(self.error(
                    "You can either define 'Arn' or 'QueueLogicalId' property of \
                     DeadLetterConfig, not both.",
                ));
            }
            return Ok(Some((arn.clone(), None)));
        }

        let queue_logical_id = match config.get("QueueLogicalId") {
            Some(Value::String(id)) => id.clone(),
            Some(_) => return Err(self.error("QueueLogicalId must be a string")),
            None => format!("{}Queue", self.resource.logical_id()),
        };
        // The scheduler grants delivery through its execution role, so no
        // queue policy accompanies the queue.
        let queue = Resource::with_attributes(&SQS_QUEUE, &queue_logical_id, attributes)?;
        let queue_arn = queue.runtime_attr("arn")?;
        Ok(Some((queue_arn, Some(queue))))
    }

    fn execution_role(
        &self,
        target: &Resource,
        dlq_arn: Option<&Value>,
        attributes: &IndexMap<String, Value>,
    ) -> Result<Resource> {
        let logical_id = self.resource.logical_id();
        let mut role =
            Resource::with_attributes(&IAM_ROLE, &format!("{logical_id}Role"), attributes)?;
        role.set(
            "AssumeRolePolicyDocument",
            policies::scheduler_assume_role_policy(),
        )?;

        let mut role_policies = vec![policies::lambda_invoke_policy(
            &target.runtime_attr("arn")?,
            logical_id,
        )];
        if let Some(dlq_arn) = dlq_arn {
            role_policies.push(policies::sqs_send_message_policy(dlq_arn, logical_id));
        }
        role.set("Policies", Value::Array(role_policies))?;
        role.set_opt(
            "PermissionsBoundary",
            self.resource.get("PermissionsBoundary").cloned(),
        )?;
        Ok(role)
    }
}

impl EventSource for SchedulerEvent {
    fn resource_type(&self) -> &'static str {
        "ScheduleV2"
    }

    fn logical_id(&self) -> &str {
        self.resource.logical_id()
    }

    fn relative_id(&self) -> &str {
        self.resource.relative_id().unwrap_or_default()
    }

    fn expand(&mut self, target: &Resource, _ctx: &ExpandCtx<'_>) -> Result<TriggerExpansion> {
        let attributes = target.passthrough_attributes();
        let logical_id = self.resource.logical_id().to_string();

        let mut schedule = Resource::with_attributes(&SCHEDULER_SCHEDULE, &logical_id, &attributes)?;
        schedule.set_opt(
            "ScheduleExpression",
            self.resource.get("ScheduleExpression").cloned(),
        )?;
        schedule.set(
            "FlexibleTimeWindow",
            self.resource
                .get("FlexibleTimeWindow")
                .cloned()
                .unwrap_or_else(|| json!({ "Mode": DEFAULT_FLEXIBLE_TIME_WINDOW })),
        )?;

        if self.resource.get("OmitName").and_then(Value::as_bool) == Some(true) {
            if self.resource.get("Name").is_some() {
                return Err(self.error("Name cannot be set when OmitName is True"));
            }
        } else {
            schedule.set(
                "Name",
                self.resource
                    .get("Name")
                    .cloned()
                    .unwrap_or_else(|| json!(logical_id)),
            )?;
        }

        schedule.set_opt("State", self.resource.get("State").cloned())?;
        schedule.set_opt("Description", self.resource.get("Description").cloned())?;
        schedule.set_opt("StartDate", self.resource.get("StartDate").cloned())?;
        schedule.set_opt("EndDate", self.resource.get("EndDate").cloned())?;
        schedule.set_opt(
            "ScheduleExpressionTimezone",
            self.resource.get("ScheduleExpressionTimezone").cloned(),
        )?;
        schedule.set_opt("GroupName", self.resource.get("GroupName").cloned())?;
        schedule.set_opt("KmsKeyArn", self.resource.get("KmsKeyArn").cloned())?;

        let dead_letter = self.dead_letter_queue(&attributes)?;
        let dlq_arn = dead_letter.as_ref().map(|(arn, _)| arn.clone());

        let mut role = None;
        let role_arn = match self.resource.get("RoleArn") {
            Some(arn) => arn.clone(),
            None => {
                let execution_role = self.execution_role(target, dlq_arn.as_ref(), &attributes)?;
                let arn = execution_role.runtime_attr("arn")?;
                role = Some(execution_role);
                arn
            }
        };

        let mut schedule_target = JsonMap::new();
        schedule_target.insert("Arn".into(), target.runtime_attr("arn")?);
        schedule_target.insert("RoleArn".into(), role_arn);
        if let Some(input) = self.resource.get("Input") {
            schedule_target.insert("Input".into(), input.clone());
        }
        if let Some(dlq_arn) = &dlq_arn {
            schedule_target.insert("DeadLetterConfig".into(), json!({ "Arn": dlq_arn }));
        }
        if let Some(retry_policy) = self.resource.get("RetryPolicy") {
            schedule_target.insert("RetryPolicy".into(), retry_policy.clone());
        }
        schedule.set("Target", Value::Object(schedule_target))?;

        let mut expansion = TriggerExpansion::default();
        expansion.resources.push(schedule);
        if let Some((_, Some(queue))) = dead_letter {
            expansion.resources.push(queue);
        }
        expansion.resources.extend(role);
        Ok(expansion)
    }
}
