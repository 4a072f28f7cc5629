//! Pull event sources
//!
//! Stream- and queue-backed triggers (data streams, change streams, queues,
//! message brokers, managed and self-managed Kafka topics). Each expands to
//! one event source mapping binding the target to the source, plus the
//! managed policy ARN and/or inline policy statements the execution role
//! needs to poll that source.

use serde_json::{Value, json};
use stratoform_core::intrinsics::is_intrinsic;
use stratoform_core::resource::{
    PropertyDef,
    PropertyKind::{Bool, Int, List, Map, Str},
    Resource, ResourceTypeDef,
};
use stratoform_core::{CoreError, Result};

use crate::arns::managed_policy_arn;
use crate::events::{EventSource, TriggerExpansion, as_event_error, target_name_or_arn};
use crate::expansion::ExpandCtx;
use crate::policies;
use crate::primitives::LAMBDA_EVENT_SOURCE_MAPPING;

/// Mapping knobs copied verbatim from the event declaration.
const COPIED_PROPERTIES: &[&str] = &[
    "StartingPosition",
    "StartingPositionTimestamp",
    "BatchSize",
    "Enabled",
    "MaximumBatchingWindowInSeconds",
    "MaximumRetryAttempts",
    "BisectBatchOnFunctionError",
    "MaximumRecordAgeInSeconds",
    "ParallelizationFactor",
    "Topics",
    "Queues",
    "SourceAccessConfigurations",
    "TumblingWindowInSeconds",
    "FunctionResponseTypes",
    "ScalingConfig",
];

const KAFKA_AUTH_MECHANISMS: &[&str] = &[
    "SASL_SCRAM_256_AUTH",
    "SASL_SCRAM_512_AUTH",
    "BASIC_AUTH",
    "CLIENT_CERTIFICATE_TLS_AUTH",
];

macro_rules! pull_event_def {
    ($name:ident, $type_name:literal $(, $extra:expr)* $(,)?) => {
        static $name: ResourceTypeDef = ResourceTypeDef {
            type_name: $type_name,
            properties: &[
                PropertyDef::optional("BatchSize", Int),
                PropertyDef::pass_through("StartingPosition"),
                PropertyDef::pass_through("StartingPositionTimestamp"),
                PropertyDef::optional("Enabled", Bool),
                PropertyDef::optional("MaximumBatchingWindowInSeconds", Int),
                PropertyDef::optional("MaximumRetryAttempts", Int),
                PropertyDef::optional("BisectBatchOnFunctionError", Bool),
                PropertyDef::optional("MaximumRecordAgeInSeconds", Int),
                PropertyDef::optional("DestinationConfig", Map),
                PropertyDef::optional("ParallelizationFactor", Int),
                PropertyDef::optional("Topics", List),
                PropertyDef::optional("Queues", List),
                PropertyDef::optional("SourceAccessConfigurations", List),
                PropertyDef::optional("SecretsManagerKmsKeyId", Str),
                PropertyDef::optional("TumblingWindowInSeconds", Int),
                PropertyDef::optional("FunctionResponseTypes", List),
                PropertyDef::optional("KafkaBootstrapServers", List),
                PropertyDef::optional("FilterCriteria", Map),
                PropertyDef::optional("ConsumerGroupId", Str),
                PropertyDef::optional("ScalingConfig", Map),
                $($extra,)*
            ],
            runtime_attrs: &[],
        };
    };
}

pull_event_def!(KINESIS_EVENT, "Kinesis", PropertyDef::pass_through("Stream"));
pull_event_def!(DYNAMODB_EVENT, "DynamoDB", PropertyDef::pass_through("Stream"));
pull_event_def!(SQS_EVENT, "SQS", PropertyDef::pass_through("Queue"));
pull_event_def!(MSK_EVENT, "MSK", PropertyDef::pass_through("Stream"));
pull_event_def!(MQ_EVENT, "MQ", PropertyDef::pass_through("Broker"));
pull_event_def!(SELF_MANAGED_KAFKA_EVENT, "SelfManagedKafka");

/// The pull source families and their variant-specific behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PullFamily {
    Kinesis,
    DynamoDb,
    Sqs,
    Msk,
    Mq,
    SelfManagedKafka,
}

impl PullFamily {
    fn from_type(event_type: &str) -> Option<Self> {
        match event_type {
            "Kinesis" => Some(Self::Kinesis),
            "DynamoDB" => Some(Self::DynamoDb),
            "SQS" => Some(Self::Sqs),
            "MSK" => Some(Self::Msk),
            "MQ" => Some(Self::Mq),
            "SelfManagedKafka" => Some(Self::SelfManagedKafka),
            _ => None,
        }
    }

    fn def(&self) -> &'static ResourceTypeDef {
        match self {
            Self::Kinesis => &KINESIS_EVENT,
            Self::DynamoDb => &DYNAMODB_EVENT,
            Self::Sqs => &SQS_EVENT,
            Self::Msk => &MSK_EVENT,
            Self::Mq => &MQ_EVENT,
            Self::SelfManagedKafka => &SELF_MANAGED_KAFKA_EVENT,
        }
    }

    fn required_properties(&self) -> &'static [&'static str] {
        match self {
            Self::Kinesis | Self::DynamoDb | Self::Msk => &["Stream", "StartingPosition"],
            Self::Sqs => &["Queue"],
            Self::Mq => &["Broker"],
            Self::SelfManagedKafka => &[],
        }
    }

    fn source_arn_property(&self) -> Option<&'static str> {
        match self {
            Self::Kinesis | Self::DynamoDb | Self::Msk => Some("Stream"),
            Self::Sqs => Some("Queue"),
            Self::Mq => Some("Broker"),
            Self::SelfManagedKafka => None,
        }
    }

    fn managed_policy(&self) -> Option<&'static str> {
        match self {
            Self::Kinesis => Some("service-role/AWSLambdaKinesisExecutionRole"),
            Self::DynamoDb => Some("service-role/AWSLambdaDynamoDBExecutionRole"),
            Self::Sqs => Some("service-role/AWSLambdaSQSQueueExecutionRole"),
            Self::Msk => Some("service-role/AWSLambdaMSKExecutionRole"),
            Self::Mq | Self::SelfManagedKafka => None,
        }
    }
}

/// A stream/queue-backed trigger. Expands to one event source mapping.
#[derive(Debug)]
pub struct PullEvent {
    family: PullFamily,
    function_logical_id: String,
    resource: Resource,
}

impl PullEvent {
    pub fn from_map(
        function_logical_id: &str,
        relative_id: &str,
        event_map: &Value,
    ) -> Result<Self> {
        let event_type = event_map
            .get("Type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let family = PullFamily::from_type(event_type).ok_or_else(|| {
            CoreError::invalid_event(
                function_logical_id,
                relative_id,
                format!("Event source type '{event_type}' is not supported."),
            )
        })?;

        let logical_id = format!("{function_logical_id}{relative_id}");
        let resource =
            Resource::from_map_relative(family.def(), &logical_id, relative_id, event_map)
                .map_err(|e| as_event_error(e, function_logical_id, relative_id))?;

        let event = Self {
            family,
            function_logical_id: function_logical_id.to_string(),
            resource,
        };
        for property in family.required_properties() {
            if event.resource.get(property).is_none() {
                return Err(event.error(format!("Missing required property '{property}'.")));
            }
        }
        Ok(event)
    }

    fn error(&self, message: impl Into<String>) -> CoreError {
        CoreError::invalid_event(
            &self.function_logical_id,
            self.resource.relative_id().unwrap_or_default(),
            message,
        )
    }

    fn validate_filter_criteria(&self) -> Result<()> {
        let Some(criteria) = self.resource.get("FilterCriteria") else {
            return Ok(());
        };
        if is_intrinsic(criteria) {
            return Ok(());
        }
        let keys: Vec<&String> = criteria
            .as_object()
            .map(|map| map.keys().collect())
            .unwrap_or_default();
        if !(keys.is_empty() || keys == ["Filters"]) {
            return Err(self.error("FilterCriteria field has a wrong format"));
        }
        Ok(())
    }

    /// Validates the auth configuration entries and returns the URI of the
    /// single entry of `required_type`; several entries of the required type
    /// (or none at all) are authoring errors.
    fn validate_source_access_configurations(
        &self,
        supported: &[&str],
        required_type: &str,
    ) -> Result<Value> {
        let configurations = self
            .resource
            .get("SourceAccessConfigurations")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                self.error(format!(
                    "No SourceAccessConfigurations for Amazon {} event provided.",
                    self.resource.type_name()
                ))
            })?;

        let mut required_uri: Option<Value> = None;
        for (index, configuration) in configurations.iter().enumerate() {
            let entry = configuration.as_object().ok_or_else(|| {
                self.error(format!(
                    "Property 'SourceAccessConfigurations[{index}]' should be a map."
                ))
            })?;
            let entry_type = entry.get("Type").and_then(Value::as_str).ok_or_else(|| {
                self.error(format!(
                    "Property 'SourceAccessConfigurations[{index}].Type' should be a string."
                ))
            })?;
            if !supported.contains(&entry_type) {
                return Err(self.error(format!(
                    "Invalid property Type specified in SourceAccessConfigurations. \
                     The supported values are: {supported:?}."
                )));
            }
            if entry_type == required_type {
                if required_uri.is_some() {
                    return Err(self.error(format!(
                        "Multiple {required_type} properties specified in SourceAccessConfigurations."
                    )));
                }
                match entry.get("URI") {
                    Some(uri) => required_uri = Some(uri.clone()),
                    None => {
                        return Err(self.error(format!(
                            "No {required_type} URI property specified in SourceAccessConfigurations."
                        )));
                    }
                }
            }
        }

        required_uri.ok_or_else(|| {
            self.error(format!(
                "No {required_type} property specified in SourceAccessConfigurations."
            ))
        })
    }

    fn kms_decrypt_statement(&self, key_id: &Value) -> Value {
        let key_id = key_id.as_str().unwrap_or_default();
        json!({
            "Action": ["kms:Decrypt"],
            "Effect": "Allow",
            "Resource": {
                "Fn::Sub": format!(
                    "arn:${{AWS::Partition}}:kms:${{AWS::Region}}:${{AWS::AccountId}}:key/{key_id}"
                )
            }
        })
    }

    fn mq_policy(&self) -> Result<Value> {
        let basic_auth_uri =
            self.validate_source_access_configurations(&["BASIC_AUTH", "VIRTUAL_HOST"], "BASIC_AUTH")?;

        let mut statements = vec![
            json!({
                "Action": ["secretsmanager:GetSecretValue"],
                "Effect": "Allow",
                "Resource": basic_auth_uri
            }),
            json!({
                "Action": ["mq:DescribeBroker"],
                "Effect": "Allow",
                "Resource": self.resource.get("Broker")
            }),
        ];
        if let Some(key_id) = self.resource.get("SecretsManagerKmsKeyId") {
            statements.push(self.kms_decrypt_statement(key_id));
        }

        // Policy name is scoped by the event's logical id so two broker
        // triggers on one function never clash.
        Ok(json!({
            "PolicyName": format!("{}MQPolicy", self.resource.logical_id()),
            "PolicyDocument": { "Statement": statements }
        }))
    }

    fn msk_policy(&self) -> Option<Value> {
        let configurations = self
            .resource
            .get("SourceAccessConfigurations")
            .and_then(Value::as_array)?;
        for configuration in configurations {
            let entry = configuration.as_object()?;
            if entry.get("Type").and_then(Value::as_str) == Some("CLIENT_CERTIFICATE_TLS_AUTH")
                && entry.get("URI").is_some()
            {
                return Some(json!({
                    "PolicyName": "MSKExecutionRolePolicy",
                    "PolicyDocument": {
                        "Statement": [{
                            "Action": ["secretsmanager:GetSecretValue"],
                            "Effect": "Allow",
                            "Resource": entry["URI"]
                        }]
                    }
                }));
            }
        }
        None
    }

    fn self_managed_kafka_policy(&self) -> Result<Value> {
        if self.resource.get("KafkaBootstrapServers").is_none() {
            return Err(
                self.error("No KafkaBootstrapServers provided for self managed kafka as an event source")
            );
        }
        match self.resource.get("Topics").and_then(Value::as_array) {
            None => {
                return Err(self.error("No Topics provided for self managed kafka as an event source"));
            }
            Some(topics) if topics.len() != 1 => {
                return Err(
                    self.error("Topics for self managed kafka only supports single configuration entry.")
                );
            }
            Some(_) => {}
        }
        let configurations = self
            .resource
            .get("SourceAccessConfigurations")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                self.error("No SourceAccessConfigurations for self managed kafka event provided.")
            })?;

        let mut auth_uri: Option<Value> = None;
        let mut ca_cert_uri: Option<Value> = None;
        let mut has_vpc_subnet = false;
        let mut has_vpc_security_group = false;

        for configuration in configurations {
            let entry = configuration.as_object().ok_or_else(|| {
                self.error("Property 'SourceAccessConfigurations' should be a list of maps.")
            })?;
            let entry_type = entry.get("Type").and_then(Value::as_str).unwrap_or_default();
            let uri = entry.get("URI");
            match entry_type {
                "VPC_SUBNET" => {
                    self.validate_kafka_uri(uri, "VPC_SUBNET")?;
                    has_vpc_subnet = true;
                }
                "VPC_SECURITY_GROUP" => {
                    self.validate_kafka_uri(uri, "VPC_SECURITY_GROUP")?;
                    has_vpc_security_group = true;
                }
                "SERVER_ROOT_CA_CERTIFICATE" => {
                    self.validate_kafka_uri(uri, "SERVER_ROOT_CA_CERTIFICATE")?;
                    ca_cert_uri = uri.cloned();
                }
                _ if KAFKA_AUTH_MECHANISMS.contains(&entry_type) => {
                    if auth_uri.is_some() {
                        return Err(self.error(
                            "Multiple auth mechanism properties specified in \
                             SourceAccessConfigurations for self managed kafka event.",
                        ));
                    }
                    self.validate_kafka_uri(uri, "auth mechanism")?;
                    auth_uri = uri.cloned();
                }
                _ => {
                    return Err(self.error(
                        "Invalid SourceAccessConfigurations Type provided for self managed kafka event.",
                    ));
                }
            }
        }

        if has_vpc_subnet != has_vpc_security_group {
            return Err(self.error(
                "VPC_SUBNET and VPC_SECURITY_GROUP in SourceAccessConfigurations for \
                 SelfManagedKafka must be both provided.",
            ));
        }

        let mut statements = Vec::new();
        for uri in [auth_uri, ca_cert_uri].into_iter().flatten() {
            statements.push(json!({
                "Action": ["secretsmanager:GetSecretValue"],
                "Effect": "Allow",
                "Resource": uri
            }));
        }
        if has_vpc_subnet {
            statements.push(json!({
                "Action": [
                    "ec2:CreateNetworkInterface",
                    "ec2:DescribeNetworkInterfaces",
                    "ec2:DeleteNetworkInterface",
                    "ec2:DescribeVpcs",
                    "ec2:DescribeSubnets",
                    "ec2:DescribeSecurityGroups"
                ],
                "Effect": "Allow",
                "Resource": "*"
            }));
        }
        if let Some(key_id) = self.resource.get("SecretsManagerKmsKeyId") {
            statements.push(self.kms_decrypt_statement(key_id));
        }

        Ok(json!({
            "PolicyName": "SelfManagedKafkaExecutionRolePolicy",
            "PolicyDocument": { "Statement": statements, "Version": "2012-10-17" }
        }))
    }

    fn validate_kafka_uri(&self, uri: Option<&Value>, kind: &str) -> Result<()> {
        let Some(uri) = uri else {
            return Err(self.error(format!(
                "No {kind} URI property specified in SourceAccessConfigurations \
                 for self managed kafka event."
            )));
        };
        if !uri.is_string() && !is_intrinsic(uri) {
            return Err(self.error(format!(
                "Wrong Type for {kind} URI property specified in SourceAccessConfigurations \
                 for self managed kafka event."
            )));
        }
        Ok(())
    }

    /// Destination-on-failure: wires the declared config through and, when a
    /// destination type is given, returns the role policy granting delivery.
    fn destination_config(&self) -> Result<Option<(Value, Option<Value>)>> {
        let Some(config) = self.resource.get("DestinationConfig") else {
            return Ok(None);
        };
        let on_failure = config
            .get("OnFailure")
            .and_then(Value::as_object)
            .ok_or_else(|| self.error("Property 'DestinationConfig.OnFailure' should be a map."))?;

        let Some(destination_type) = on_failure.get("Type") else {
            return Ok(Some((config.clone(), None)));
        };
        let destination_type = destination_type.as_str().unwrap_or_default();
        let destination = on_failure.get("Destination").cloned().unwrap_or(Value::Null);
        let logical_id = self.resource.logical_id();
        let policy = match destination_type {
            "SQS" => policies::sqs_send_message_policy(&destination, logical_id),
            "SNS" => policies::sns_publish_policy(&destination, logical_id),
            "S3" => json!({
                "PolicyName": format!("{logical_id}S3Policy"),
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Action": "s3:PutObject",
                        "Effect": "Allow",
                        "Resource": destination
                    }]
                }
            }),
            _ => {
                return Err(self.error("The only valid values for 'Type' are 'SQS', 'SNS', and 'S3'"));
            }
        };

        // 'Type' exists for the compiler to pick the right policy; the
        // platform's mapping resource does not know it.
        let mut out_config = config.clone();
        if let Some(entry) = out_config
            .get_mut("OnFailure")
            .and_then(Value::as_object_mut)
        {
            entry.remove("Type");
        }
        Ok(Some((out_config, Some(policy))))
    }
}

impl EventSource for PullEvent {
    fn resource_type(&self) -> &'static str {
        self.resource.type_name()
    }

    fn logical_id(&self) -> &str {
        self.resource.logical_id()
    }

    fn relative_id(&self) -> &str {
        self.resource.relative_id().unwrap_or_default()
    }

    fn expand(&mut self, target: &Resource, _ctx: &ExpandCtx<'_>) -> Result<TriggerExpansion> {
        let mut mapping = Resource::with_attributes(
            &LAMBDA_EVENT_SOURCE_MAPPING,
            self.resource.logical_id(),
            &target.passthrough_attributes(),
        )?;

        mapping.set("FunctionName", target_name_or_arn(target)?)?;
        if let Some(source_property) = self.family.source_arn_property() {
            mapping.set_opt("EventSourceArn", self.resource.get(source_property).cloned())?;
        }
        for property in COPIED_PROPERTIES {
            mapping.set_opt(property, self.resource.get(property).cloned())?;
        }

        self.validate_filter_criteria()?;
        mapping.set_opt("FilterCriteria", self.resource.get("FilterCriteria").cloned())?;

        if let Some(servers) = self.resource.get("KafkaBootstrapServers") {
            mapping.set(
                "SelfManagedEventSource",
                json!({ "Endpoints": { "KafkaBootstrapServers": servers } }),
            )?;
        }
        if let Some(consumer_group_id) = self.resource.get("ConsumerGroupId") {
            let config = json!({ "ConsumerGroupId": consumer_group_id });
            match self.family {
                PullFamily::Msk => mapping.set("AmazonManagedKafkaEventSourceConfig", config)?,
                PullFamily::SelfManagedKafka => {
                    mapping.set("SelfManagedKafkaEventSourceConfig", config)?
                }
                _ => {
                    return Err(self.error(format!(
                        "Property ConsumerGroupId not defined for resource of type {}.",
                        self.resource.type_name()
                    )));
                }
            }
        }

        let mut expansion = TriggerExpansion::default();

        if let Some((config, destination_policy)) = self.destination_config()? {
            mapping.set("DestinationConfig", config)?;
            expansion.policies.extend(destination_policy);
        }

        if let Some(policy_path) = self.family.managed_policy() {
            expansion
                .managed_policy_arns
                .push(managed_policy_arn(policy_path));
        }
        match self.family {
            PullFamily::Mq => expansion.policies.push(self.mq_policy()?),
            PullFamily::SelfManagedKafka => {
                expansion.policies.push(self.self_managed_kafka_policy()?)
            }
            PullFamily::Msk => expansion.policies.extend(self.msk_policy()),
            _ => {}
        }

        expansion.resources.push(mapping);
        Ok(expansion)
    }
}
