//! Primitive resource type definitions
//!
//! Statically assembled property tables and runtime-attribute maps for every
//! CloudFormation resource kind the compiler emits. These are data, not
//! algorithm: each table mirrors the platform's property surface for the
//! subset of properties the compiler can produce.

use serde_json::Value;
use stratoform_core::intrinsics::{fn_get_att, ref_to};
use stratoform_core::resource::{
    PropertyDef,
    PropertyKind::{Bool, Int, List, ListOfMap, Map, Str, StrOrMap},
    ResourceTypeDef,
};

fn attr_ref(logical_id: &str) -> Value {
    ref_to(logical_id)
}

fn attr_arn(logical_id: &str) -> Value {
    fn_get_att(logical_id, "Arn")
}

fn attr_version(logical_id: &str) -> Value {
    fn_get_att(logical_id, "Version")
}

pub static LAMBDA_FUNCTION: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::Lambda::Function",
    properties: &[
        PropertyDef::required("Code", Map),
        PropertyDef::optional("PackageType", Str),
        PropertyDef::optional("DeadLetterConfig", Map),
        PropertyDef::optional("Description", Str),
        PropertyDef::optional("FunctionName", Str),
        PropertyDef::optional("Handler", Str),
        PropertyDef::optional("MemorySize", Int),
        PropertyDef::optional("Role", Str),
        PropertyDef::optional("Runtime", Str),
        PropertyDef::optional("Timeout", Int),
        PropertyDef::optional("VpcConfig", Map),
        PropertyDef::optional("Environment", Map),
        PropertyDef::optional("Tags", ListOfMap),
        PropertyDef::optional("TracingConfig", Map),
        PropertyDef::optional("KmsKeyArn", StrOrMap),
        PropertyDef::optional("Layers", List),
        PropertyDef::pass_through("ReservedConcurrentExecutions"),
        PropertyDef::optional("FileSystemConfigs", ListOfMap),
        PropertyDef::optional("CodeSigningConfigArn", Str),
        PropertyDef::optional("ImageConfig", Map),
        PropertyDef::optional("Architectures", List),
        PropertyDef::optional("EphemeralStorage", Map),
    ],
    runtime_attrs: &[("name", attr_ref), ("arn", attr_arn)],
};

pub static LAMBDA_VERSION: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::Lambda::Version",
    properties: &[
        PropertyDef::optional("CodeSha256", Str),
        PropertyDef::optional("Description", Str),
        PropertyDef::required("FunctionName", StrOrMap),
    ],
    runtime_attrs: &[("arn", attr_ref), ("version", attr_version)],
};

pub static LAMBDA_ALIAS: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::Lambda::Alias",
    properties: &[
        PropertyDef::optional("Description", Str),
        PropertyDef::optional("Name", Str),
        PropertyDef::required("FunctionName", StrOrMap),
        PropertyDef::required("FunctionVersion", StrOrMap),
        PropertyDef::optional("ProvisionedConcurrencyConfig", Map),
    ],
    runtime_attrs: &[("arn", attr_ref)],
};

pub static LAMBDA_URL: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::Lambda::Url",
    properties: &[
        PropertyDef::required("TargetFunctionArn", StrOrMap),
        PropertyDef::required("AuthType", Str),
        PropertyDef::optional("InvokeMode", Str),
        PropertyDef::optional("Cors", Map),
    ],
    runtime_attrs: &[],
};

pub static LAMBDA_PERMISSION: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::Lambda::Permission",
    properties: &[
        PropertyDef::required("Action", Str),
        PropertyDef::required("FunctionName", StrOrMap),
        PropertyDef::required("Principal", Str),
        PropertyDef::optional("SourceAccount", StrOrMap),
        PropertyDef::optional("SourceArn", StrOrMap),
        PropertyDef::optional("EventSourceToken", Str),
        PropertyDef::optional("FunctionUrlAuthType", Str),
    ],
    runtime_attrs: &[],
};

pub static LAMBDA_EVENT_SOURCE_MAPPING: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::Lambda::EventSourceMapping",
    properties: &[
        PropertyDef::optional("BatchSize", Int),
        PropertyDef::optional("Enabled", Bool),
        PropertyDef::optional("EventSourceArn", StrOrMap),
        PropertyDef::required("FunctionName", StrOrMap),
        PropertyDef::optional("MaximumBatchingWindowInSeconds", Int),
        PropertyDef::optional("MaximumRetryAttempts", Int),
        PropertyDef::optional("BisectBatchOnFunctionError", Bool),
        PropertyDef::optional("MaximumRecordAgeInSeconds", Int),
        PropertyDef::optional("DestinationConfig", Map),
        PropertyDef::optional("ParallelizationFactor", Int),
        PropertyDef::pass_through("StartingPosition"),
        PropertyDef::pass_through("StartingPositionTimestamp"),
        PropertyDef::optional("Topics", List),
        PropertyDef::optional("Queues", List),
        PropertyDef::optional("SourceAccessConfigurations", List),
        PropertyDef::optional("TumblingWindowInSeconds", Int),
        PropertyDef::optional("FunctionResponseTypes", List),
        PropertyDef::optional("SelfManagedEventSource", Map),
        PropertyDef::optional("AmazonManagedKafkaEventSourceConfig", Map),
        PropertyDef::optional("SelfManagedKafkaEventSourceConfig", Map),
        PropertyDef::optional("FilterCriteria", Map),
        PropertyDef::optional("ScalingConfig", Map),
    ],
    runtime_attrs: &[("name", attr_ref)],
};

pub static LAMBDA_EVENT_INVOKE_CONFIG: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::Lambda::EventInvokeConfig",
    properties: &[
        PropertyDef::optional("DestinationConfig", Map),
        PropertyDef::required("FunctionName", StrOrMap),
        PropertyDef::optional("MaximumEventAgeInSeconds", Int),
        PropertyDef::optional("MaximumRetryAttempts", Int),
        PropertyDef::required("Qualifier", Str),
    ],
    runtime_attrs: &[],
};

pub static LAMBDA_LAYER_VERSION: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::Lambda::LayerVersion",
    properties: &[
        PropertyDef::required("Content", Map),
        PropertyDef::optional("Description", Str),
        PropertyDef::optional("LayerName", StrOrMap),
        PropertyDef::optional("CompatibleArchitectures", List),
        PropertyDef::optional("CompatibleRuntimes", List),
        PropertyDef::optional("LicenseInfo", Str),
    ],
    runtime_attrs: &[("name", attr_ref), ("arn", attr_ref)],
};

pub static IAM_ROLE: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::IAM::Role",
    properties: &[
        PropertyDef::required("AssumeRolePolicyDocument", Map),
        PropertyDef::optional("ManagedPolicyArns", List),
        PropertyDef::optional("Path", Str),
        PropertyDef::optional("Policies", List),
        PropertyDef::optional("PermissionsBoundary", Str),
        PropertyDef::optional("RoleName", StrOrMap),
        PropertyDef::optional("Tags", ListOfMap),
    ],
    runtime_attrs: &[("name", attr_ref), ("arn", attr_arn)],
};

pub static SQS_QUEUE: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::SQS::Queue",
    properties: &[
        PropertyDef::optional("QueueName", StrOrMap),
        PropertyDef::optional("FifoQueue", Bool),
        PropertyDef::optional("Tags", ListOfMap),
    ],
    runtime_attrs: &[("arn", attr_arn), ("queue_url", attr_ref)],
};

pub static SQS_QUEUE_POLICY: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::SQS::QueuePolicy",
    properties: &[
        PropertyDef::required("PolicyDocument", Map),
        PropertyDef::required("Queues", List),
    ],
    runtime_attrs: &[],
};

pub static SNS_TOPIC: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::SNS::Topic",
    properties: &[
        PropertyDef::optional("TopicName", StrOrMap),
        PropertyDef::optional("Tags", ListOfMap),
    ],
    // Referencing a topic yields its ARN
    runtime_attrs: &[("arn", attr_ref)],
};

pub static SNS_SUBSCRIPTION: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::SNS::Subscription",
    properties: &[
        PropertyDef::pass_through_required("Endpoint"),
        PropertyDef::required("Protocol", Str),
        PropertyDef::required("TopicArn", StrOrMap),
        PropertyDef::optional("Region", Str),
        PropertyDef::optional("FilterPolicy", Map),
    ],
    runtime_attrs: &[],
};

pub static EVENTS_RULE: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::Events::Rule",
    properties: &[
        PropertyDef::optional("ScheduleExpression", Str),
        PropertyDef::optional("EventBusName", StrOrMap),
        PropertyDef::optional("EventPattern", Map),
        PropertyDef::optional("State", Str),
        PropertyDef::optional("Name", Str),
        PropertyDef::optional("Description", Str),
        PropertyDef::optional("Targets", ListOfMap),
    ],
    runtime_attrs: &[("arn", attr_arn)],
};

pub static SCHEDULER_SCHEDULE: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::Scheduler::Schedule",
    properties: &[
        PropertyDef::required("ScheduleExpression", Str),
        PropertyDef::required("FlexibleTimeWindow", Map),
        PropertyDef::optional("Name", Str),
        PropertyDef::optional("State", Str),
        PropertyDef::optional("Description", Str),
        PropertyDef::pass_through("StartDate"),
        PropertyDef::pass_through("EndDate"),
        PropertyDef::pass_through("ScheduleExpressionTimezone"),
        PropertyDef::pass_through("GroupName"),
        PropertyDef::pass_through("KmsKeyArn"),
        PropertyDef::optional("Target", Map),
    ],
    runtime_attrs: &[("arn", attr_arn)],
};

pub static IOT_TOPIC_RULE: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::IoT::TopicRule",
    properties: &[PropertyDef::required("TopicRulePayload", Map)],
    runtime_attrs: &[],
};

pub static DYNAMODB_TABLE: ResourceTypeDef = ResourceTypeDef {
    type_name: "AWS::DynamoDB::Table",
    properties: &[
        PropertyDef::required("AttributeDefinitions", ListOfMap),
        PropertyDef::required("KeySchema", ListOfMap),
        PropertyDef::optional("ProvisionedThroughput", Map),
        PropertyDef::optional("TableName", StrOrMap),
        PropertyDef::optional("Tags", ListOfMap),
        PropertyDef::optional("SSESpecification", Map),
    ],
    runtime_attrs: &[("name", attr_ref), ("arn", attr_arn)],
};
