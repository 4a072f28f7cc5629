//! Push event sources
//!
//! Triggers backed by services that call the invoke API themselves: storage
//! events, pub/sub topics, scheduled and pattern-matched rules, HTTP routes,
//! rule-engine topics, and voice skills. Every variant grants the source
//! service permission to invoke the target (scoped by a computed source ARN)
//! and wires its own trigger resource to the target's runtime references.

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value, json};
use stratoform_core::conditions::{ConditionRef, combine_conditions};
use stratoform_core::intrinsics::{make_conditional, ref_to};
use stratoform_core::resource::{
    PropertyDef,
    PropertyKind::{Bool, Int, Map, Str, StrOrList, StrOrMap},
    Resource, ResourceTypeDef,
};
use stratoform_core::{CoreError, Result};

use crate::arns::{execute_api_arn, lambda_integration_uri};
use crate::collaborators::NATIVE_CONDITIONAL_DEPENDS_ON;
use crate::events::pull::PullEvent;
use crate::events::{EventSource, TriggerExpansion, as_event_error, invoke_permission};
use crate::expansion::{ExpandCtx, SiblingPatch};
use crate::policies;
use crate::primitives::{
    EVENTS_RULE, IOT_TOPIC_RULE, SNS_SUBSCRIPTION, SQS_QUEUE, SQS_QUEUE_POLICY,
};

const CONDITION: &str = "Condition";

/// The catch-all HTTP route marker. Routes on it sort before every other
/// trigger so a redundant catch-all is never defined after a more specific
/// route already claimed the path.
const DEFAULT_ROUTE: &str = "$default";
const ANY_METHOD: &str = "x-amazon-apigateway-any-method";

/// Shared state of one declared push trigger.
#[derive(Debug)]
struct EventData {
    function_logical_id: String,
    resource: Resource,
}

impl EventData {
    fn parse(
        def: &'static ResourceTypeDef,
        function_logical_id: &str,
        relative_id: &str,
        event_map: &Value,
    ) -> Result<Self> {
        let logical_id = format!("{function_logical_id}{relative_id}");
        let resource = Resource::from_map_relative(def, &logical_id, relative_id, event_map)
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

    fn logical_id(&self) -> &str {
        self.resource.logical_id()
    }

    fn relative_id(&self) -> &str {
        self.resource.relative_id().unwrap_or_default()
    }
}

/// Validates a rule's `DeadLetterConfig` and returns the queue ARN to target
/// plus any auto-created resources (a queue and its delivery policy) when
/// only a queue is asked for rather than an ARN supplied.
fn rule_dead_letter_queue(
    event: &EventData,
    rule_arn: &Value,
    attributes: &IndexMap<String, Value>,
) -> Result<Option<(Value, Vec<Resource>)>> {
    let Some(config) = event.resource.get("DeadLetterConfig") else {
        return Ok(None);
    };
    let config = config
        .as_object()
        .ok_or_else(|| event.error("Property 'DeadLetterConfig' should be a map."))?;

    for key in config.keys() {
        if key != "Arn" && key != "QueueLogicalId" {
            return Err(event.error(format!(
                "Invalid 'DeadLetterConfig' property '{key}'. \
                 The supported properties are 'Arn' and 'QueueLogicalId'."
            )));
        }
    }
    if config.contains_key("Arn") && config.contains_key("QueueLogicalId") {
        return Err(event.error(
            "You can either define 'Arn' or 'QueueLogicalId' property of DeadLetterConfig, not both.",
        ));
    }

    if let Some(arn) = config.get("Arn") {
        return Ok(Some((arn.clone(), Vec::new())));
    }

    let queue_logical_id = match config.get("QueueLogicalId") {
        Some(Value::String(id)) => id.clone(),
        Some(_) => return Err(event.error("QueueLogicalId must be a string")),
        None => format!("{}Queue", event.logical_id()),
    };

    let queue = Resource::with_attributes(&SQS_QUEUE, &queue_logical_id, attributes)?;
    let queue_arn = queue.runtime_attr("arn")?;

    let mut queue_policy = Resource::with_attributes(
        &SQS_QUEUE_POLICY,
        &format!("{queue_logical_id}Policy"),
        attributes,
    )?;
    queue_policy.set(
        "PolicyDocument",
        policies::events_dlq_queue_policy(rule_arn, &queue_arn),
    )?;
    queue_policy.set("Queues", json!([queue.runtime_attr("queue_url")?]))?;

    Ok(Some((queue_arn, vec![queue, queue_policy])))
}

// =============================================================================
// SCHEDULE
// =============================================================================

static SCHEDULE_EVENT: ResourceTypeDef = ResourceTypeDef {
    type_name: "Schedule",
    properties: &[
        PropertyDef::required("Schedule", Str),
        PropertyDef::optional("Input", Str),
        PropertyDef::optional("Enabled", Bool),
        PropertyDef::optional("Name", Str),
        PropertyDef::optional("Description", Str),
        PropertyDef::optional("DeadLetterConfig", Map),
        PropertyDef::optional("RetryPolicy", Map),
    ],
    runtime_attrs: &[],
};

/// Scheduled invocation through an events rule.
#[derive(Debug)]
pub struct ScheduleEvent {
    data: EventData,
}

impl ScheduleEvent {
    pub fn from_map(
        function_logical_id: &str,
        relative_id: &str,
        event_map: &Value,
    ) -> Result<Self> {
        Ok(Self {
            data: EventData::parse(&SCHEDULE_EVENT, function_logical_id, relative_id, event_map)?,
        })
    }
}

impl EventSource for ScheduleEvent {
    fn resource_type(&self) -> &'static str {
        "Schedule"
    }

    fn logical_id(&self) -> &str {
        self.data.logical_id()
    }

    fn relative_id(&self) -> &str {
        self.data.relative_id()
    }

    fn expand(&mut self, target: &Resource, _ctx: &ExpandCtx<'_>) -> Result<TriggerExpansion> {
        let attributes = target.passthrough_attributes();
        let mut rule = Resource::with_attributes(&EVENTS_RULE, self.data.logical_id(), &attributes)?;

        rule.set_opt("ScheduleExpression", self.data.resource.get("Schedule").cloned())?;
        if let Some(enabled) = self.data.resource.get("Enabled").and_then(Value::as_bool) {
            rule.set("State", json!(if enabled { "ENABLED" } else { "DISABLED" }))?;
        }
        rule.set_opt("Name", self.data.resource.get("Name").cloned())?;
        rule.set_opt("Description", self.data.resource.get("Description").cloned())?;

        let source_arn = rule.runtime_attr("arn")?;
        let dead_letter = rule_dead_letter_queue(&self.data, &source_arn, &attributes)?;

        let mut event_target = JsonMap::new();
        event_target.insert("Arn".into(), target.runtime_attr("arn")?);
        event_target.insert(
            "Id".into(),
            json!(format!("{}LambdaTarget", self.data.logical_id())),
        );
        if let Some(input) = self.data.resource.get("Input") {
            event_target.insert("Input".into(), input.clone());
        }
        if let Some((queue_arn, _)) = &dead_letter {
            event_target.insert("DeadLetterConfig".into(), json!({ "Arn": queue_arn }));
        }
        if let Some(retry_policy) = self.data.resource.get("RetryPolicy") {
            event_target.insert("RetryPolicy".into(), retry_policy.clone());
        }
        rule.set("Targets", json!([event_target]))?;

        let permission = invoke_permission(
            self.data.logical_id(),
            "",
            "events.amazonaws.com",
            target,
            Some(source_arn),
            None,
            None,
        )?;

        let mut expansion = TriggerExpansion::default();
        expansion.resources.push(rule);
        if let Some((_, dlq_resources)) = dead_letter {
            expansion.resources.extend(dlq_resources);
        }
        expansion.resources.push(permission);
        Ok(expansion)
    }
}

// =============================================================================
// EVENT PATTERN RULES
// =============================================================================

static CLOUDWATCH_EVENT: ResourceTypeDef = ResourceTypeDef {
    type_name: "CloudWatchEvent",
    properties: EVENT_RULE_PROPERTIES,
    runtime_attrs: &[],
};

static EVENTBRIDGE_RULE_EVENT: ResourceTypeDef = ResourceTypeDef {
    type_name: "EventBridgeRule",
    properties: EVENT_RULE_PROPERTIES,
    runtime_attrs: &[],
};

static EVENT_RULE_PROPERTIES: &[PropertyDef] = &[
    PropertyDef::required("Pattern", Map),
    PropertyDef::optional("EventBusName", StrOrMap),
    PropertyDef::optional("Input", Str),
    PropertyDef::optional("InputPath", Str),
    PropertyDef::optional("DeadLetterConfig", Map),
    PropertyDef::optional("RetryPolicy", Map),
    PropertyDef::optional("Target", Map),
];

/// Generic event-pattern rule trigger (also registered for the legacy
/// `CloudWatchEvent` type string).
#[derive(Debug)]
pub struct EventBridgeRuleEvent {
    data: EventData,
}

impl EventBridgeRuleEvent {
    pub fn from_map(
        function_logical_id: &str,
        relative_id: &str,
        event_map: &Value,
    ) -> Result<Self> {
        let event_type = event_map.get("Type").and_then(Value::as_str);
        let def = if event_type == Some("CloudWatchEvent") {
            &CLOUDWATCH_EVENT
        } else {
            &EVENTBRIDGE_RULE_EVENT
        };
        Ok(Self {
            data: EventData::parse(def, function_logical_id, relative_id, event_map)?,
        })
    }
}

impl EventSource for EventBridgeRuleEvent {
    fn resource_type(&self) -> &'static str {
        self.data.resource.type_name()
    }

    fn logical_id(&self) -> &str {
        self.data.logical_id()
    }

    fn relative_id(&self) -> &str {
        self.data.relative_id()
    }

    fn expand(&mut self, target: &Resource, _ctx: &ExpandCtx<'_>) -> Result<TriggerExpansion> {
        let attributes = target.passthrough_attributes();
        let mut rule = Resource::with_attributes(&EVENTS_RULE, self.data.logical_id(), &attributes)?;
        rule.set_opt("EventBusName", self.data.resource.get("EventBusName").cloned())?;
        rule.set_opt("EventPattern", self.data.resource.get("Pattern").cloned())?;

        let source_arn = rule.runtime_attr("arn")?;
        let dead_letter = rule_dead_letter_queue(&self.data, &source_arn, &attributes)?;

        let target_id = self
            .data
            .resource
            .get("Target")
            .and_then(|t| t.get("Id"))
            .cloned()
            .unwrap_or_else(|| json!(format!("{}LambdaTarget", self.data.logical_id())));

        let mut event_target = JsonMap::new();
        event_target.insert("Arn".into(), target.runtime_attr("arn")?);
        event_target.insert("Id".into(), target_id);
        if let Some(input) = self.data.resource.get("Input") {
            event_target.insert("Input".into(), input.clone());
        }
        if let Some(input_path) = self.data.resource.get("InputPath") {
            event_target.insert("InputPath".into(), input_path.clone());
        }
        if let Some((queue_arn, _)) = &dead_letter {
            event_target.insert("DeadLetterConfig".into(), json!({ "Arn": queue_arn }));
        }
        if let Some(retry_policy) = self.data.resource.get("RetryPolicy") {
            event_target.insert("RetryPolicy".into(), retry_policy.clone());
        }
        rule.set("Targets", json!([event_target]))?;

        let permission = invoke_permission(
            self.data.logical_id(),
            "",
            "events.amazonaws.com",
            target,
            Some(source_arn),
            None,
            None,
        )?;

        let mut expansion = TriggerExpansion::default();
        if let Some((_, dlq_resources)) = dead_letter {
            expansion.resources.extend(dlq_resources);
        }
        expansion.resources.push(rule);
        expansion.resources.push(permission);
        Ok(expansion)
    }
}

// =============================================================================
// STORAGE EVENTS
// =============================================================================

static S3_EVENT: ResourceTypeDef = ResourceTypeDef {
    type_name: "S3",
    properties: &[
        PropertyDef::required("Bucket", StrOrMap),
        // Event names are read by the compiler; an unresolved reference
        // here cannot be expanded into notification entries.
        PropertyDef {
            name: "Events",
            required: true,
            kind: StrOrList,
            supports_intrinsics: false,
        },
        PropertyDef::optional("Filter", Map),
    ],
    runtime_attrs: &[],
};

/// Storage bucket notification trigger. The bucket must live in the same
/// template; its notification configuration and dependency list are updated
/// through orchestrator patches, never by direct mutation.
#[derive(Debug)]
pub struct S3Event {
    data: EventData,
    bucket_id: Option<String>,
}

impl S3Event {
    pub fn from_map(
        function_logical_id: &str,
        relative_id: &str,
        event_map: &Value,
    ) -> Result<Self> {
        Ok(Self {
            data: EventData::parse(&S3_EVENT, function_logical_id, relative_id, event_map)?,
            bucket_id: None,
        })
    }
}

impl EventSource for S3Event {
    fn resource_type(&self) -> &'static str {
        "S3"
    }

    fn logical_id(&self) -> &str {
        self.data.logical_id()
    }

    fn relative_id(&self) -> &str {
        self.data.relative_id()
    }

    fn resources_to_link(&mut self, resources: &IndexMap<String, Value>) -> Result<()> {
        if let Some(bucket_ref) = self.data.resource.get("Bucket") {
            if let Some(reference) = bucket_ref.get("Ref") {
                let bucket_id = reference.as_str().ok_or_else(|| {
                    self.data
                        .error("'Ref' value in S3 events is not a valid string.")
                })?;
                if resources.contains_key(bucket_id) {
                    self.bucket_id = Some(bucket_id.to_string());
                    return Ok(());
                }
            }
        }
        Err(self
            .data
            .error("S3 events must reference an S3 bucket in the same template."))
    }

    fn expand(&mut self, target: &Resource, ctx: &ExpandCtx<'_>) -> Result<TriggerExpansion> {
        let bucket_id = self
            .bucket_id
            .clone()
            .ok_or_else(|| CoreError::contract("S3 event expanded before linking"))?;

        let permission = invoke_permission(
            self.data.logical_id(),
            "",
            "s3.amazonaws.com",
            target,
            None,
            Some(ref_to("AWS::AccountId")),
            None,
        )?;

        let mut expansion = TriggerExpansion::default();

        // The bucket must wait for the permission, or attaching the
        // notification fails its invoke-permission check. A condition on the
        // permission rules out a plain DependsOn; the conditional-dependency
        // tag stands in unless the platform-native behavior is toggled on.
        match permission.get_resource_attribute(CONDITION) {
            Some(condition) if !ctx.feature_toggle.is_enabled(NATIVE_CONDITIONAL_DEPENDS_ON) => {
                let condition = condition
                    .as_str()
                    .ok_or_else(|| self.data.error("Condition attribute must be a string."))?;
                expansion.patches.push(SiblingPatch::AppendTag {
                    logical_id: bucket_id.clone(),
                    tag: conditional_depends_on(condition, permission.logical_id()),
                });
            }
            _ => {
                expansion.patches.push(SiblingPatch::MergeDependsOn {
                    logical_id: bucket_id.clone(),
                    depends_on: permission.logical_id().to_string(),
                });
            }
        }

        let mut base_entry = JsonMap::new();
        base_entry.insert("Function".into(), target.runtime_attr("arn")?);
        if let Some(filter) = self.data.resource.get("Filter") {
            base_entry.insert("Filter".into(), filter.clone());
        }

        let event_types: Vec<Value> = match self.data.resource.get("Events") {
            Some(Value::String(event)) => vec![json!(event)],
            Some(Value::Array(events)) => events.clone(),
            _ => Vec::new(),
        };
        for event_type in event_types {
            let mut entry = base_entry.clone();
            entry.insert("Event".into(), event_type);
            let mut entry = Value::Object(entry);
            if let Some(condition) = target.get_resource_attribute(CONDITION) {
                if let Some(condition) = condition.as_str() {
                    entry = make_conditional(condition, entry, None);
                }
            }
            expansion.patches.push(SiblingPatch::AppendNotification {
                logical_id: bucket_id.clone(),
                entry,
            });
        }

        expansion.resources.push(permission);
        Ok(expansion)
    }
}

/// The conditional-dependency workaround: a tag whose value is a `Ref` to
/// the permission wrapped in `Fn::If`. The `Ref` implies ordering exactly
/// like a `DependsOn` would, but only when the condition holds.
fn conditional_depends_on(condition: &str, permission_logical_id: &str) -> Value {
    json!({
        "Key": format!("stratoform:ConditionalDependsOn:{permission_logical_id}"),
        "Value": {
            "Fn::If": [condition, { "Ref": permission_logical_id }, "no dependency"]
        }
    })
}

// =============================================================================
// PUB/SUB TOPICS
// =============================================================================

static SNS_EVENT: ResourceTypeDef = ResourceTypeDef {
    type_name: "SNS",
    properties: &[
        PropertyDef::required("Topic", Str),
        PropertyDef::optional("Region", Str),
        PropertyDef::optional("FilterPolicy", Map),
        PropertyDef::pass_through("SqsSubscription"),
    ],
    runtime_attrs: &[],
};

/// Pub/sub topic trigger: either a direct subscription on the function, or
/// a queue fan-in (`SqsSubscription`) where the topic feeds a queue that the
/// function polls.
#[derive(Debug)]
pub struct SnsEvent {
    data: EventData,
}

impl SnsEvent {
    pub fn from_map(
        function_logical_id: &str,
        relative_id: &str,
        event_map: &Value,
    ) -> Result<Self> {
        Ok(Self {
            data: EventData::parse(&SNS_EVENT, function_logical_id, relative_id, event_map)?,
        })
    }

    fn subscription(
        &self,
        protocol: &str,
        endpoint: Value,
        attributes: &IndexMap<String, Value>,
    ) -> Result<Resource> {
        let mut subscription =
            Resource::with_attributes(&SNS_SUBSCRIPTION, self.data.logical_id(), attributes)?;
        subscription.set("Protocol", json!(protocol))?;
        subscription.set("Endpoint", endpoint)?;
        subscription.set_opt("TopicArn", self.data.resource.get("Topic").cloned())?;
        subscription.set_opt("Region", self.data.resource.get("Region").cloned())?;
        subscription.set_opt("FilterPolicy", self.data.resource.get("FilterPolicy").cloned())?;
        Ok(subscription)
    }

    fn queue_policy(
        &self,
        logical_id: &str,
        queue_arn: &Value,
        queue_url: Value,
        attributes: &IndexMap<String, Value>,
    ) -> Result<Resource> {
        let mut policy = Resource::with_attributes(&SQS_QUEUE_POLICY, logical_id, attributes)?;
        let topic_arn = self.data.resource.get("Topic").cloned().unwrap_or(Value::Null);
        policy.set(
            "PolicyDocument",
            policies::sns_topic_send_message_policy(&topic_arn, queue_arn),
        )?;
        policy.set("Queues", json!([queue_url]))?;
        Ok(policy)
    }

    fn queue_mapping(
        &self,
        queue_arn: &Value,
        batch_size: Option<Value>,
        enabled: Option<Value>,
        target: &Resource,
        ctx: &ExpandCtx<'_>,
    ) -> Result<TriggerExpansion> {
        let mut properties = JsonMap::new();
        properties.insert("Queue".into(), queue_arn.clone());
        properties.insert("BatchSize".into(), batch_size.unwrap_or(json!(10)));
        properties.insert("Enabled".into(), enabled.unwrap_or(json!(true)));
        let mapping_event = json!({ "Type": "SQS", "Properties": properties });

        let mut pull =
            PullEvent::from_map(self.data.logical_id(), "EventSourceMapping", &mapping_event)?;
        pull.expand(target, ctx)
    }
}

impl EventSource for SnsEvent {
    fn resource_type(&self) -> &'static str {
        "SNS"
    }

    fn logical_id(&self) -> &str {
        self.data.logical_id()
    }

    fn relative_id(&self) -> &str {
        self.data.relative_id()
    }

    fn expand(&mut self, target: &Resource, ctx: &ExpandCtx<'_>) -> Result<TriggerExpansion> {
        let attributes = target.passthrough_attributes();
        let topic_arn = self.data.resource.get("Topic").cloned().unwrap_or(Value::Null);
        let sqs_subscription = match self.data.resource.get("SqsSubscription") {
            // Explicitly disabled fan-in behaves like an absent one.
            Some(Value::Bool(false)) | None => None,
            Some(subscription) => Some(subscription),
        };

        // Topic -> function
        let Some(sqs_subscription) = sqs_subscription else {
            let mut expansion = TriggerExpansion::default();
            expansion.resources.push(invoke_permission(
                self.data.logical_id(),
                "",
                "sns.amazonaws.com",
                target,
                Some(topic_arn),
                None,
                None,
            )?);
            expansion
                .resources
                .push(self.subscription("lambda", target.runtime_attr("arn")?, &attributes)?);
            return Ok(expansion);
        };

        // Topic -> new queue -> function
        if sqs_subscription.as_bool().is_some() {
            let queue_logical_id = format!("{}Queue", self.data.logical_id());
            let queue = Resource::with_attributes(&SQS_QUEUE, &queue_logical_id, &attributes)?;
            let queue_arn = queue.runtime_attr("arn")?;
            let queue_url = queue.runtime_attr("queue_url")?;

            let mut expansion = self.queue_mapping(&queue_arn, None, None, target, ctx)?;
            expansion.resources.push(queue);
            expansion.resources.push(self.queue_policy(
                &format!("{}QueuePolicy", self.data.logical_id()),
                &queue_arn,
                queue_url,
                &attributes,
            )?);
            expansion
                .resources
                .push(self.subscription("sqs", queue_arn, &attributes)?);
            return Ok(expansion);
        }

        // Topic -> existing queue -> function
        let (Some(queue_arn), Some(queue_url)) = (
            sqs_subscription.get("QueueArn").cloned(),
            sqs_subscription.get("QueueUrl").cloned(),
        ) else {
            return Err(self.data.error("No QueueARN or QueueURL provided."));
        };
        let policy_logical_id = match sqs_subscription.get("QueuePolicyLogicalId") {
            Some(Value::String(id)) => id.clone(),
            Some(_) => return Err(self.data.error("QueuePolicyLogicalId must be a string")),
            None => format!("{}QueuePolicy", self.data.logical_id()),
        };

        let mut expansion = self.queue_mapping(
            &queue_arn,
            sqs_subscription.get("BatchSize").cloned(),
            sqs_subscription.get("Enabled").cloned(),
            target,
            ctx,
        )?;
        expansion.resources.push(self.queue_policy(
            &policy_logical_id,
            &queue_arn,
            queue_url,
            &attributes,
        )?);
        expansion
            .resources
            .push(self.subscription("sqs", queue_arn, &attributes)?);
        Ok(expansion)
    }
}

// =============================================================================
// RULE-ENGINE TOPICS
// =============================================================================

static IOT_RULE_EVENT: ResourceTypeDef = ResourceTypeDef {
    type_name: "IoTRule",
    properties: &[
        PropertyDef::required("Sql", Str),
        PropertyDef::optional("AwsIotSqlVersion", Str),
    ],
    runtime_attrs: &[],
};

#[derive(Debug)]
pub struct IoTRuleEvent {
    data: EventData,
}

impl IoTRuleEvent {
    pub fn from_map(
        function_logical_id: &str,
        relative_id: &str,
        event_map: &Value,
    ) -> Result<Self> {
        Ok(Self {
            data: EventData::parse(&IOT_RULE_EVENT, function_logical_id, relative_id, event_map)?,
        })
    }
}

impl EventSource for IoTRuleEvent {
    fn resource_type(&self) -> &'static str {
        "IoTRule"
    }

    fn logical_id(&self) -> &str {
        self.data.logical_id()
    }

    fn relative_id(&self) -> &str {
        self.data.relative_id()
    }

    fn expand(&mut self, target: &Resource, _ctx: &ExpandCtx<'_>) -> Result<TriggerExpansion> {
        let source_arn = crate::arns::iot_rule_arn(self.data.logical_id());
        let permission = invoke_permission(
            self.data.logical_id(),
            "",
            "iot.amazonaws.com",
            target,
            Some(source_arn),
            Some(json!({ "Fn::Sub": "${AWS::AccountId}" })),
            None,
        )?;

        let mut payload = JsonMap::new();
        payload.insert("Sql".into(), self.data.resource.get("Sql").cloned().unwrap_or(Value::Null));
        payload.insert("RuleDisabled".into(), json!(false));
        if let Some(version) = self.data.resource.get("AwsIotSqlVersion") {
            payload.insert("AwsIotSqlVersion".into(), version.clone());
        }
        payload.insert(
            "Actions".into(),
            json!([{ "Lambda": { "FunctionArn": target.runtime_attr("arn")? } }]),
        );

        let mut rule = Resource::with_attributes(
            &IOT_TOPIC_RULE,
            self.data.logical_id(),
            &target.passthrough_attributes(),
        )?;
        rule.set("TopicRulePayload", Value::Object(payload))?;

        let mut expansion = TriggerExpansion::default();
        expansion.resources.push(permission);
        expansion.resources.push(rule);
        Ok(expansion)
    }
}

// =============================================================================
// VOICE SKILLS
// =============================================================================

static ALEXA_SKILL_EVENT: ResourceTypeDef = ResourceTypeDef {
    type_name: "AlexaSkill",
    properties: &[PropertyDef::optional("SkillId", Str)],
    runtime_attrs: &[],
};

#[derive(Debug)]
pub struct AlexaSkillEvent {
    data: EventData,
}

impl AlexaSkillEvent {
    pub fn from_map(
        function_logical_id: &str,
        relative_id: &str,
        event_map: &Value,
    ) -> Result<Self> {
        Ok(Self {
            data: EventData::parse(&ALEXA_SKILL_EVENT, function_logical_id, relative_id, event_map)?,
        })
    }
}

impl EventSource for AlexaSkillEvent {
    fn resource_type(&self) -> &'static str {
        "AlexaSkill"
    }

    fn logical_id(&self) -> &str {
        self.data.logical_id()
    }

    fn relative_id(&self) -> &str {
        self.data.relative_id()
    }

    fn expand(&mut self, target: &Resource, _ctx: &ExpandCtx<'_>) -> Result<TriggerExpansion> {
        let mut expansion = TriggerExpansion::default();
        expansion.resources.push(invoke_permission(
            self.data.logical_id(),
            "",
            "alexa-appkit.amazon.com",
            target,
            None,
            None,
            self.data.resource.get("SkillId").cloned(),
        )?);
        Ok(expansion)
    }
}

// =============================================================================
// HTTP ROUTES
// =============================================================================

static HTTP_API_EVENT: ResourceTypeDef = ResourceTypeDef {
    type_name: "HttpApi",
    properties: &[
        PropertyDef::required("ApiId", StrOrMap),
        PropertyDef::required("Path", Str),
        PropertyDef::required("Method", Str),
        PropertyDef::optional("PayloadFormatVersion", Str),
        PropertyDef::optional("TimeoutInMillis", Int),
        PropertyDef::optional("Auth", Map),
    ],
    runtime_attrs: &[],
};

/// HTTP route trigger: a permission scoped to the api/stage/route, plus a
/// route operation injected into the sibling API's definition document.
#[derive(Debug)]
pub struct HttpApiEvent {
    data: EventData,
    /// Resolved api logical id, when `ApiId` is a plain id or `Ref`.
    api_id: Option<String>,
    api_condition: Option<String>,
    api_has_definition_body: bool,
}

impl HttpApiEvent {
    pub fn from_map(
        function_logical_id: &str,
        relative_id: &str,
        event_map: &Value,
    ) -> Result<Self> {
        Ok(Self {
            data: EventData::parse(&HTTP_API_EVENT, function_logical_id, relative_id, event_map)?,
            api_id: None,
            api_condition: None,
            api_has_definition_body: false,
        })
    }

    fn declared_path(&self) -> &str {
        self.data
            .resource
            .get("Path")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    fn declared_method(&self) -> String {
        self.data
            .resource
            .get("Method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase()
    }

    fn route_operation(&self, target: &Resource) -> Result<Value> {
        let mut integration = JsonMap::new();
        integration.insert("type".into(), json!("aws_proxy"));
        integration.insert("httpMethod".into(), json!("POST"));
        integration.insert(
            "payloadFormatVersion".into(),
            self.data
                .resource
                .get("PayloadFormatVersion")
                .cloned()
                .unwrap_or(json!("2.0")),
        );
        integration.insert("uri".into(), lambda_integration_uri(target)?);
        if let Some(timeout) = self.data.resource.get("TimeoutInMillis") {
            integration.insert("timeoutInMillis".into(), timeout.clone());
        }

        let mut operation = JsonMap::new();
        operation.insert(
            "x-amazon-apigateway-integration".into(),
            Value::Object(integration),
        );

        if let Some(auth) = self.data.resource.get("Auth") {
            if let Some(authorizer) = auth.get("Authorizer").and_then(Value::as_str) {
                let scopes = match auth.get("AuthorizationScopes") {
                    None => json!([]),
                    Some(scopes @ Value::Array(_)) => scopes.clone(),
                    Some(_) => {
                        return Err(self
                            .data
                            .error("'AuthorizationScopes' must be a list of strings."));
                    }
                };
                let mut requirement = JsonMap::new();
                requirement.insert(authorizer.to_string(), scopes);
                operation.insert("security".into(), json!([requirement]));
            }
        }
        Ok(Value::Object(operation))
    }
}

impl EventSource for HttpApiEvent {
    fn resource_type(&self) -> &'static str {
        "HttpApi"
    }

    fn logical_id(&self) -> &str {
        self.data.logical_id()
    }

    fn relative_id(&self) -> &str {
        self.data.relative_id()
    }

    fn sorts_first(&self) -> bool {
        self.declared_path().starts_with(DEFAULT_ROUTE)
    }

    fn resources_to_link(&mut self, resources: &IndexMap<String, Value>) -> Result<()> {
        let api_ref = self.data.resource.get("ApiId").cloned().unwrap_or(Value::Null);
        let api_id = match &api_ref {
            Value::String(id) => Some(id.clone()),
            other => other
                .get("Ref")
                .and_then(Value::as_str)
                .map(str::to_string),
        };

        // A reference we cannot resolve at compile time (a cross-stack
        // import, a complex expression) falls back to the most permissive
        // safe assumption: permission for any stage, no route injection.
        let Some(api_id) = api_id else {
            return Ok(());
        };

        let api = resources.get(&api_id).ok_or_else(|| {
            self.data
                .error("ApiId must reference a valid resource in the same template.")
        })?;
        self.api_condition = api
            .get("Condition")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.api_has_definition_body = api
            .get("Properties")
            .and_then(|p| p.get("DefinitionBody"))
            .is_some();
        self.api_id = Some(api_id);
        Ok(())
    }

    fn expand(&mut self, target: &Resource, _ctx: &ExpandCtx<'_>) -> Result<TriggerExpansion> {
        let method = self.declared_method();
        let permission_method = if method == "any" || method == ANY_METHOD {
            "*".to_string()
        } else {
            method.to_uppercase()
        };

        let path = self.declared_path();
        let permission_path = if path == DEFAULT_ROUTE {
            String::new()
        } else {
            // The gateway strips trailing slashes; scope the permission the
            // same way.
            path.strip_suffix('/')
                .filter(|stripped| !stripped.is_empty())
                .unwrap_or(path)
                .to_string()
        };

        let api_value = match &self.api_id {
            Some(api_id) => ref_to(api_id),
            None => self.data.resource.get("ApiId").cloned().unwrap_or(Value::Null),
        };
        let source_arn = execute_api_arn(api_value, json!("*"), &permission_method, &permission_path);

        let mut expansion = TriggerExpansion::default();
        expansion.resources.push(invoke_permission(
            self.data.logical_id(),
            "",
            "apigateway.amazonaws.com",
            target,
            Some(source_arn),
            None,
            None,
        )?);

        if let Some(api_id) = &self.api_id {
            if self.api_has_definition_body {
                let mut operation = self.route_operation(target)?;

                let mut condition_names: Vec<&str> = Vec::new();
                let target_condition = target
                    .get_resource_attribute(CONDITION)
                    .and_then(Value::as_str);
                condition_names.extend(target_condition);
                condition_names.extend(self.api_condition.as_deref());

                if let Some(combined) = combine_conditions(&condition_names) {
                    if let ConditionRef::Synthesized { name, definition } = &combined {
                        expansion.patches.push(SiblingPatch::DefineCondition {
                            name: name.clone(),
                            definition: definition.clone(),
                        });
                    }
                    operation = make_conditional(combined.name(), operation, None);
                }

                let method_key = if method == "any" {
                    ANY_METHOD.to_string()
                } else {
                    method
                };
                expansion.patches.push(SiblingPatch::InjectRoute {
                    logical_id: api_id.clone(),
                    path: path.to_string(),
                    method: method_key,
                    operation,
                });
            }
        }
        Ok(expansion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DefaultFeatureToggle, ManagedPolicyMap, StaticFeatureToggle};
    use crate::primitives::LAMBDA_FUNCTION;
    use stratoform_core::IntrinsicsResolver;

    fn expand_with_toggle(
        relative_id: &str,
        event_map: Value,
        resources: Value,
        target_condition: Option<&str>,
        native_depends_on: bool,
    ) -> Result<TriggerExpansion> {
        let intrinsics = IntrinsicsResolver::new(JsonMap::new());
        let mappings = IntrinsicsResolver::for_mappings(JsonMap::new());
        let policy_map = ManagedPolicyMap::new();
        let default_toggle = DefaultFeatureToggle;
        let native_toggle = StaticFeatureToggle::new([NATIVE_CONDITIONAL_DEPENDS_ON]);
        let ctx = ExpandCtx {
            intrinsics_resolver: &intrinsics,
            mappings_resolver: &mappings,
            managed_policy_map: &policy_map,
            feature_toggle: if native_depends_on {
                &native_toggle as &dyn crate::collaborators::FeatureToggle
            } else {
                &default_toggle
            },
        };

        let mut target = Resource::new(&LAMBDA_FUNCTION, "MyFn").unwrap();
        if let Some(condition) = target_condition {
            target
                .set_resource_attribute(CONDITION, json!(condition))
                .unwrap();
        }

        let sibling_map: IndexMap<String, Value> =
            serde_json::from_value(resources).unwrap();
        let mut source =
            crate::events::build_event_source("MyFn", relative_id, &event_map).unwrap();
        source.resources_to_link(&sibling_map)?;
        source.expand(&target, &ctx)
    }

    fn expand(relative_id: &str, event_map: Value, resources: Value) -> Result<TriggerExpansion> {
        expand_with_toggle(relative_id, event_map, resources, None, false)
    }

    #[test]
    fn test_schedule_produces_rule_and_permission() {
        let expansion = expand(
            "Timer",
            json!({
                "Type": "Schedule",
                "Properties": { "Schedule": "rate(5 minutes)", "Enabled": false }
            }),
            json!({}),
        )
        .unwrap();

        let rule = &expansion.resources[0];
        assert_eq!(rule.type_name(), "AWS::Events::Rule");
        assert_eq!(rule.get("ScheduleExpression"), Some(&json!("rate(5 minutes)")));
        assert_eq!(rule.get("State"), Some(&json!("DISABLED")));
        let targets = rule.get("Targets").unwrap();
        assert_eq!(targets[0]["Id"], json!("MyFnTimerLambdaTarget"));

        let permission = &expansion.resources[1];
        assert_eq!(permission.logical_id(), "MyFnTimerPermission");
        assert_eq!(permission.get("Principal"), Some(&json!("events.amazonaws.com")));
    }

    #[test]
    fn test_schedule_auto_creates_dead_letter_queue() {
        let expansion = expand(
            "Timer",
            json!({
                "Type": "Schedule",
                "Properties": {
                    "Schedule": "rate(1 hour)",
                    "DeadLetterConfig": {},
                    "RetryPolicy": { "MaximumRetryAttempts": 2 }
                }
            }),
            json!({}),
        )
        .unwrap();

        let ids: Vec<&str> = expansion.resources.iter().map(|r| r.logical_id()).collect();
        assert_eq!(
            ids,
            ["MyFnTimer", "MyFnTimerQueue", "MyFnTimerQueuePolicy", "MyFnTimerPermission"]
        );
        let rule = &expansion.resources[0];
        let target = &rule.get("Targets").unwrap()[0];
        assert_eq!(
            target["DeadLetterConfig"]["Arn"],
            json!({ "Fn::GetAtt": ["MyFnTimerQueue", "Arn"] })
        );
        assert_eq!(target["RetryPolicy"], json!({ "MaximumRetryAttempts": 2 }));
    }

    #[test]
    fn test_dead_letter_config_rejects_arn_and_queue_id_together() {
        let err = expand(
            "Timer",
            json!({
                "Type": "Schedule",
                "Properties": {
                    "Schedule": "rate(1 hour)",
                    "DeadLetterConfig": { "Arn": "arn:q", "QueueLogicalId": "Dlq" }
                }
            }),
            json!({}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not both"));
    }

    #[test]
    fn test_s3_event_requires_sibling_bucket() {
        let err = expand(
            "Upload",
            json!({
                "Type": "S3",
                "Properties": { "Bucket": { "Ref": "Missing" }, "Events": "s3:ObjectCreated:*" }
            }),
            json!({}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("same template"));
    }

    #[test]
    fn test_s3_event_patches_bucket() {
        let expansion = expand(
            "Upload",
            json!({
                "Type": "S3",
                "Properties": {
                    "Bucket": { "Ref": "Uploads" },
                    "Events": ["s3:ObjectCreated:*", "s3:ObjectRemoved:*"]
                }
            }),
            json!({ "Uploads": { "Type": "AWS::S3::Bucket" } }),
        )
        .unwrap();

        assert_eq!(expansion.resources.len(), 1);
        assert_eq!(expansion.resources[0].logical_id(), "MyFnUploadPermission");

        // One DependsOn merge + one notification per event type
        assert!(matches!(
            &expansion.patches[0],
            SiblingPatch::MergeDependsOn { logical_id, depends_on }
                if logical_id == "Uploads" && depends_on == "MyFnUploadPermission"
        ));
        let notifications: Vec<_> = expansion
            .patches
            .iter()
            .filter(|p| matches!(p, SiblingPatch::AppendNotification { .. }))
            .collect();
        assert_eq!(notifications.len(), 2);
    }

    #[test]
    fn test_s3_event_uses_conditional_tag_for_conditional_permission() {
        let expansion = expand_with_toggle(
            "Upload",
            json!({
                "Type": "S3",
                "Properties": { "Bucket": { "Ref": "Uploads" }, "Events": "s3:ObjectCreated:*" }
            }),
            json!({ "Uploads": { "Type": "AWS::S3::Bucket" } }),
            Some("IsProd"),
            false,
        )
        .unwrap();

        let SiblingPatch::AppendTag { logical_id, tag } = &expansion.patches[0] else {
            panic!("expected a conditional-dependency tag, got {:?}", expansion.patches[0]);
        };
        assert_eq!(logical_id, "Uploads");
        assert_eq!(
            tag["Key"],
            json!("stratoform:ConditionalDependsOn:MyFnUploadPermission")
        );
        assert_eq!(tag["Value"]["Fn::If"][0], json!("IsProd"));

        // With the native toggle on, a plain DependsOn is used instead.
        let expansion = expand_with_toggle(
            "Upload",
            json!({
                "Type": "S3",
                "Properties": { "Bucket": { "Ref": "Uploads" }, "Events": "s3:ObjectCreated:*" }
            }),
            json!({ "Uploads": { "Type": "AWS::S3::Bucket" } }),
            Some("IsProd"),
            true,
        )
        .unwrap();
        assert!(matches!(
            &expansion.patches[0],
            SiblingPatch::MergeDependsOn { .. }
        ));
    }

    #[test]
    fn test_sns_direct_subscription() {
        let expansion = expand(
            "Topic",
            json!({
                "Type": "SNS",
                "Properties": { "Topic": "arn:aws:sns:us-east-1:1:t" }
            }),
            json!({}),
        )
        .unwrap();

        assert_eq!(expansion.resources.len(), 2);
        let permission = &expansion.resources[0];
        assert_eq!(permission.get("SourceArn"), Some(&json!("arn:aws:sns:us-east-1:1:t")));
        let subscription = &expansion.resources[1];
        assert_eq!(subscription.type_name(), "AWS::SNS::Subscription");
        assert_eq!(subscription.get("Protocol"), Some(&json!("lambda")));
    }

    #[test]
    fn test_sns_queue_fan_in_creates_queue_chain() {
        let expansion = expand(
            "Topic",
            json!({
                "Type": "SNS",
                "Properties": { "Topic": "arn:aws:sns:us-east-1:1:t", "SqsSubscription": true }
            }),
            json!({}),
        )
        .unwrap();

        let ids: Vec<&str> = expansion.resources.iter().map(|r| r.logical_id()).collect();
        assert_eq!(
            ids,
            [
                "MyFnTopicEventSourceMapping",
                "MyFnTopicQueue",
                "MyFnTopicQueuePolicy",
                "MyFnTopic"
            ]
        );
        // The queue poller's managed policy flows up to the role.
        assert_eq!(expansion.managed_policy_arns.len(), 1);
        let subscription = expansion.resources.last().unwrap();
        assert_eq!(subscription.get("Protocol"), Some(&json!("sqs")));
    }

    #[test]
    fn test_http_api_default_route_sorts_first_and_blanks_path() {
        let mut source = crate::events::build_event_source(
            "MyFn",
            "Catchall",
            &json!({
                "Type": "HttpApi",
                "Properties": { "ApiId": { "Ref": "Api" }, "Path": "$default", "Method": "ANY" }
            }),
        )
        .unwrap();
        assert!(source.sorts_first());

        let expansion = expand(
            "Catchall",
            json!({
                "Type": "HttpApi",
                "Properties": { "ApiId": { "Ref": "Api" }, "Path": "$default", "Method": "ANY" }
            }),
            json!({ "Api": {
                "Type": "AWS::ApiGatewayV2::Api",
                "Properties": { "DefinitionBody": { "openapi": "3.0.1", "paths": {} } }
            }}),
        )
        .unwrap();

        let permission = &expansion.resources[0];
        let source_arn = permission.get("SourceArn").unwrap();
        let arn_text = source_arn["Fn::Sub"][0].as_str().unwrap();
        assert!(arn_text.ends_with("${__ApiId__}/${__Stage__}/*"));

        let SiblingPatch::InjectRoute { path, method, .. } = &expansion.patches[0] else {
            panic!("expected route injection");
        };
        assert_eq!(path, "$default");
        assert_eq!(method, ANY_METHOD);
    }

    #[test]
    fn test_http_api_combines_function_and_api_conditions() {
        let expansion = expand_with_toggle(
            "Get",
            json!({
                "Type": "HttpApi",
                "Properties": { "ApiId": { "Ref": "Api" }, "Path": "/items", "Method": "GET" }
            }),
            json!({ "Api": {
                "Type": "AWS::ApiGatewayV2::Api",
                "Condition": "HasApi",
                "Properties": { "DefinitionBody": { "openapi": "3.0.1", "paths": {} } }
            }}),
            Some("IsProd"),
            false,
        )
        .unwrap();

        let define = expansion
            .patches
            .iter()
            .find_map(|p| match p {
                SiblingPatch::DefineCondition { name, .. } => Some(name.clone()),
                _ => None,
            })
            .expect("synthesized condition");
        let SiblingPatch::InjectRoute { operation, .. } = expansion
            .patches
            .iter()
            .find(|p| matches!(p, SiblingPatch::InjectRoute { .. }))
            .unwrap()
        else {
            unreachable!()
        };
        assert_eq!(operation["Fn::If"][0], json!(define));
    }
}
