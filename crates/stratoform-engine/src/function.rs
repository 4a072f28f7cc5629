//! The serverless function macro
//!
//! The most involved expansion in the compiler: one declared function fans
//! out into the primitive function, an optional content-addressed version
//! with its alias, an optional public URL, async-invoke configuration, an
//! execution role, and the resources behind every declared event trigger.
//! Expansion is a deterministic, fail-fast sequence; the emitted order is
//! function, version, alias, url, event-invoke-config, role, then trigger
//! resources in sorted-trigger order.

use serde_json::{Map as JsonMap, Value, json};
use stratoform_core::logical_id::LogicalIdGenerator;
use stratoform_core::resource::{
    PropertyDef,
    PropertyKind::{Int, List, ListOfMap, Map, Str, StrOrMap},
    Resource, ResourceTypeDef,
};
use stratoform_core::{CoreError, Result, intrinsics};

use crate::arns::{managed_policy_arn, resolve_policy_name};
use crate::events::{EventSource, build_event_source};
use crate::expansion::{ExpandCtx, Expansion, ResourceMacro};
use crate::policies;
use crate::primitives::{
    IAM_ROLE, LAMBDA_ALIAS, LAMBDA_EVENT_INVOKE_CONFIG, LAMBDA_FUNCTION, LAMBDA_PERMISSION,
    LAMBDA_URL, LAMBDA_VERSION, SNS_TOPIC, SQS_QUEUE,
};

pub const SERVERLESS_FUNCTION_TYPE: &str = "AWS::Serverless::Function";

const CREATED_BY_TAG_KEY: &str = "stratoform:createdBy";
const CREATED_BY_TAG_VALUE: &str = "Stratoform";

const URL_AUTH_TYPES: &[&str] = &["AWS_IAM", "NONE"];
const DESTINATION_TYPES: &[&str] = &["SQS", "SNS", "Lambda", "EventBridge"];

/// CORS sub-fields of a function URL and the shape each must have.
const URL_CORS_PROPERTIES: &[(&str, stratoform_core::resource::PropertyKind)] = &[
    ("AllowCredentials", stratoform_core::resource::PropertyKind::Bool),
    ("AllowHeaders", List),
    ("AllowMethods", List),
    ("AllowOrigins", List),
    ("ExposeHeaders", List),
    ("MaxAge", Int),
];

static SERVERLESS_FUNCTION: ResourceTypeDef = ResourceTypeDef {
    type_name: SERVERLESS_FUNCTION_TYPE,
    properties: &[
        PropertyDef::optional("FunctionName", StrOrMap),
        PropertyDef::optional("Handler", Str),
        PropertyDef::optional("Runtime", Str),
        PropertyDef::optional("CodeUri", StrOrMap),
        PropertyDef::optional("InlineCode", Str),
        PropertyDef::optional("ImageUri", Str),
        PropertyDef::optional("PackageType", Str),
        PropertyDef::optional("DeadLetterQueue", Map),
        PropertyDef::optional("Description", Str),
        PropertyDef::optional("MemorySize", Int),
        PropertyDef::optional("Timeout", Int),
        PropertyDef::optional("VpcConfig", Map),
        PropertyDef::optional("Role", Str),
        PropertyDef::pass_through("Policies"),
        PropertyDef::optional("Environment", Map),
        PropertyDef::optional("Events", Map),
        PropertyDef::optional("Tags", Map),
        PropertyDef::optional("Tracing", Str),
        PropertyDef::optional("KmsKeyArn", StrOrMap),
        PropertyDef::optional("Layers", List),
        PropertyDef::optional("AutoPublishAlias", Str),
        PropertyDef::optional("FunctionUrlConfig", Map),
        PropertyDef::optional("EventInvokeConfig", Map),
        PropertyDef::pass_through("ReservedConcurrentExecutions"),
        PropertyDef::optional("Architectures", List),
        PropertyDef::optional("EphemeralStorage", Map),
        PropertyDef::optional("ImageConfig", Map),
        PropertyDef::optional("FileSystemConfigs", ListOfMap),
        PropertyDef::optional("PermissionsBoundary", Str),
        PropertyDef::optional("CodeSigningConfigArn", Str),
    ],
    runtime_attrs: &[],
};

pub struct FunctionMacro {
    resource: Resource,
    events: Vec<Box<dyn EventSource>>,
}

impl FunctionMacro {
    pub fn from_map(logical_id: &str, resource_map: &Value) -> Result<Self> {
        Ok(Self {
            resource: Resource::from_map(&SERVERLESS_FUNCTION, logical_id, resource_map)?,
            events: Vec::new(),
        })
    }

    fn error(&self, message: impl Into<String>) -> CoreError {
        CoreError::invalid_resource(self.resource.logical_id(), message)
    }

    // -------------------------------------------------------------------------
    // Step 1: code source
    // -------------------------------------------------------------------------

    /// Validates the mutually exclusive code-source properties and projects
    /// them into the primitive `Code` map.
    fn code_dict(&self) -> Result<Value> {
        let package_type = self
            .resource
            .get("PackageType")
            .and_then(Value::as_str)
            .unwrap_or("Zip");
        if package_type != "Zip" && package_type != "Image" {
            return Err(self.error("'PackageType' must be 'Zip' or 'Image'."));
        }

        let code_uri = self.resource.get("CodeUri");
        let inline_code = self.resource.get("InlineCode");
        let image_uri = self.resource.get("ImageUri");

        if package_type == "Image" {
            if code_uri.is_some() || inline_code.is_some() {
                return Err(self.error(
                    "'CodeUri' and 'InlineCode' cannot be set when 'PackageType' is 'Image'.",
                ));
            }
            let image_uri = image_uri.ok_or_else(|| {
                self.error("'ImageUri' must be set when 'PackageType' is 'Image'.")
            })?;
            return Ok(json!({ "ImageUri": image_uri }));
        }

        if image_uri.is_some() {
            return Err(self.error("'ImageUri' requires 'PackageType' set to 'Image'."));
        }
        match (inline_code, code_uri) {
            (Some(_), Some(_)) => Err(self.error(
                "'InlineCode' and 'CodeUri' are mutually exclusive; only one can be set.",
            )),
            (None, None) => {
                Err(self.error("Either 'InlineCode' or 'CodeUri' must be set for PackageType 'Zip'."))
            }
            (Some(inline_code), None) => Ok(json!({ "ZipFile": inline_code })),
            (None, Some(Value::Object(location))) => {
                let (Some(bucket), Some(key)) = (location.get("Bucket"), location.get("Key"))
                else {
                    return Err(
                        self.error("'CodeUri' requires Bucket and Key properties to be specified.")
                    );
                };
                let mut code = JsonMap::new();
                code.insert("S3Bucket".into(), bucket.clone());
                code.insert("S3Key".into(), key.clone());
                if let Some(version) = location.get("Version") {
                    code.insert("S3ObjectVersion".into(), version.clone());
                }
                Ok(Value::Object(code))
            }
            (None, Some(Value::String(uri))) => {
                let (bucket, key, version) = parse_s3_uri(uri).ok_or_else(|| {
                    self.error(
                        "'CodeUri' is not a valid S3 Uri of the form \"s3://bucket/key\" \
                         with optional versionId query parameter.",
                    )
                })?;
                let mut code = JsonMap::new();
                code.insert("S3Bucket".into(), json!(bucket));
                code.insert("S3Key".into(), json!(key));
                if let Some(version) = version {
                    code.insert("S3ObjectVersion".into(), json!(version));
                }
                Ok(Value::Object(code))
            }
            (None, Some(_)) => Err(self.error("Property 'CodeUri' should be a string or a map.")),
        }
    }

    // -------------------------------------------------------------------------
    // Step 2: the primitive function
    // -------------------------------------------------------------------------

    fn build_function(&self, code: Value) -> Result<Resource> {
        let mut function = Resource::new(&LAMBDA_FUNCTION, self.resource.logical_id())?;
        function.set_depends_on(self.resource.depends_on().cloned());
        for (attr, value) in self.resource.resource_attributes() {
            function.set_resource_attribute(attr, value.clone())?;
        }

        for property in [
            "FunctionName",
            "Handler",
            "Runtime",
            "Description",
            "MemorySize",
            "Timeout",
            "VpcConfig",
            "Role",
            "Environment",
            "KmsKeyArn",
            "Layers",
            "ReservedConcurrentExecutions",
            "Architectures",
            "EphemeralStorage",
            "ImageConfig",
            "FileSystemConfigs",
            "CodeSigningConfigArn",
            "PackageType",
        ] {
            function.set_opt(property, self.resource.get(property).cloned())?;
        }
        function.set("Code", code)?;
        function.set("Tags", self.tag_list()?)?;

        if let Some(tracing) = self.resource.get("Tracing") {
            function.set("TracingConfig", json!({ "Mode": tracing }))?;
        }
        if let Some(action_and_arn) = self.validated_dead_letter_queue()? {
            function.set("DeadLetterConfig", json!({ "TargetArn": action_and_arn.1 }))?;
        }
        Ok(function)
    }

    /// The function's tag list: the created-by tag first, then caller tags
    /// in declaration order. The fixed position means an unrelated tag
    /// reorder never looks like a semantic change downstream.
    fn tag_list(&self) -> Result<Value> {
        let mut tags = vec![json!({ "Key": CREATED_BY_TAG_KEY, "Value": CREATED_BY_TAG_VALUE })];
        if let Some(caller_tags) = self.resource.get("Tags").and_then(Value::as_object) {
            for (key, value) in caller_tags {
                if key == CREATED_BY_TAG_KEY {
                    return Err(self.error(format!(
                        "{CREATED_BY_TAG_KEY} is a reserved Tag key name and cannot be set \
                         on your resource. Please change the tag key in the input."
                    )));
                }
                tags.push(json!({ "Key": key, "Value": value }));
            }
        }
        Ok(Value::Array(tags))
    }

    /// Returns the delivery action and target ARN of a declared dead-letter
    /// queue, validating the required shape.
    fn validated_dead_letter_queue(&self) -> Result<Option<(&'static str, Value)>> {
        let Some(dead_letter_queue) = self.resource.get("DeadLetterQueue") else {
            return Ok(None);
        };
        let queue_type = dead_letter_queue.get("Type").and_then(Value::as_str);
        let target_arn = dead_letter_queue.get("TargetArn");
        let (Some(queue_type), Some(target_arn)) = (queue_type, target_arn) else {
            return Err(self.error(
                "'DeadLetterQueue' requires Type and TargetArn properties to be specified.",
            ));
        };
        let action = match queue_type {
            "SQS" => "sqs:SendMessage",
            "SNS" => "sns:Publish",
            _ => return Err(self.error("'DeadLetterQueue' requires Type of 'SQS' or 'SNS'.")),
        };
        Ok(Some((action, target_arn.clone())))
    }

    // -------------------------------------------------------------------------
    // Step 3: version and alias
    // -------------------------------------------------------------------------

    /// Alias names may be supplied as a reference to a template parameter or
    /// a static mapping lookup. Anything that does not resolve to a plain
    /// string is an error.
    fn resolved_alias_name(&self, value: &Value, ctx: &ExpandCtx<'_>) -> Result<String> {
        let resolved = ctx.intrinsics_resolver.resolve_parameter_refs(value)?;
        let resolved = ctx.mappings_resolver.resolve_parameter_refs(&resolved)?;
        match resolved.as_str() {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => Err(self.error(
                "'AutoPublishAlias' must be a string or a Ref to a template parameter",
            )),
        }
    }

    /// Constructs the Version resource at a content-hashed logical id. The
    /// hash covers the parameter-resolved code location, environment, and
    /// memory size - the inputs that change runtime behavior - and nothing
    /// else, so an unrelated edit never publishes a new version. Superseded
    /// versions are retained, never deleted.
    fn build_version(&self, function: &Resource, ctx: &ExpandCtx<'_>) -> Result<Resource> {
        let defining_content = json!({
            "Code": function.get("Code"),
            "Environment": function.get("Environment"),
            "MemorySize": function.get("MemorySize"),
        });
        let resolved = ctx.intrinsics_resolver.resolve_parameter_refs(&defining_content)?;

        let prefix = format!("{}Version", self.resource.logical_id());
        let logical_id = LogicalIdGenerator::with_data(prefix, &resolved).generate();

        let mut version = Resource::with_attributes(
            &LAMBDA_VERSION,
            &logical_id,
            &self.resource.passthrough_attributes(),
        )?;
        version.set_resource_attribute("DeletionPolicy", json!("Retain"))?;
        version.set("FunctionName", function.runtime_attr("name")?)?;
        Ok(version)
    }

    fn build_alias(&self, name: &str, function: &Resource, version: &Resource) -> Result<Resource> {
        let logical_id = format!("{}Alias{}", function.logical_id(), name);
        let mut alias = Resource::with_attributes(
            &LAMBDA_ALIAS,
            &logical_id,
            &self.resource.passthrough_attributes(),
        )?;
        alias.set("Name", json!(name))?;
        alias.set("FunctionName", function.runtime_attr("name")?)?;
        alias.set("FunctionVersion", version.runtime_attr("version")?)?;
        Ok(alias)
    }

    // -------------------------------------------------------------------------
    // Step 4: function URL
    // -------------------------------------------------------------------------

    fn build_url(&self, target: &Resource) -> Result<Vec<Resource>> {
        let Some(config) = self.resource.get("FunctionUrlConfig") else {
            return Ok(Vec::new());
        };
        let config = config
            .as_object()
            .ok_or_else(|| self.error("Property 'FunctionUrlConfig' should be a map."))?;
        for key in config.keys() {
            if !["AuthType", "Cors", "InvokeMode"].contains(&key.as_str()) {
                return Err(self.error(format!(
                    "'{key}' is not a valid property of 'FunctionUrlConfig'."
                )));
            }
        }

        let auth_type = config.get("AuthType").ok_or_else(|| {
            self.error("'FunctionUrlConfig' requires 'AuthType' to be specified.")
        })?;
        // An unresolved reference is trusted; the platform validates it.
        if let Some(literal) = auth_type.as_str() {
            if !URL_AUTH_TYPES.contains(&literal) {
                return Err(self.error("'AuthType' must be one of: 'AWS_IAM', 'NONE'."));
            }
        } else if !intrinsics::is_intrinsic(auth_type) {
            return Err(self.error("'AuthType' must be one of: 'AWS_IAM', 'NONE'."));
        }

        if let Some(cors) = config.get("Cors") {
            self.validate_cors(cors)?;
        }

        let attributes = self.resource.passthrough_attributes();
        let mut url = Resource::with_attributes(
            &LAMBDA_URL,
            &format!("{}Url", self.resource.logical_id()),
            &attributes,
        )?;
        url.set("TargetFunctionArn", target.runtime_attr("arn")?)?;
        url.set("AuthType", auth_type.clone())?;
        url.set_opt("Cors", config.get("Cors").cloned())?;
        url.set_opt("InvokeMode", config.get("InvokeMode").cloned())?;

        let mut resources = vec![url];
        if auth_type.as_str() == Some("NONE") {
            let mut permission = Resource::with_attributes(
                &LAMBDA_PERMISSION,
                &format!("{}UrlPublicPermissions", self.resource.logical_id()),
                &attributes,
            )?;
            permission.set("Action", json!("lambda:InvokeFunctionUrl"))?;
            permission.set("FunctionName", target.runtime_attr("arn")?)?;
            permission.set("Principal", json!("*"))?;
            permission.set("FunctionUrlAuthType", json!("NONE"))?;
            resources.push(permission);
        }
        Ok(resources)
    }

    fn validate_cors(&self, cors: &Value) -> Result<()> {
        if intrinsics::is_intrinsic(cors) {
            return Ok(());
        }
        let cors = cors
            .as_object()
            .ok_or_else(|| self.error("Property 'Cors' should be a map."))?;
        for (key, value) in cors {
            let Some((_, kind)) = URL_CORS_PROPERTIES.iter().find(|(name, _)| name == key) else {
                return Err(self.error(format!("'{key}' is not a valid property of 'Cors'.")));
            };
            if intrinsics::is_intrinsic(value) {
                continue;
            }
            if !kind.validate(value) {
                return Err(self.error(format!(
                    "Cors property '{key}' should be {}.",
                    kind.expected()
                )));
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Step 5: event invoke configuration
    // -------------------------------------------------------------------------

    /// Builds the async-invoke configuration, auto-creating queue/topic
    /// destinations when only a type is declared. Returns the generated
    /// resources (destinations first, config last) and the role policies
    /// granting delivery.
    fn build_event_invoke_config(
        &self,
        function: &Resource,
        alias_name: Option<&str>,
    ) -> Result<(Vec<Resource>, Vec<Value>)> {
        let Some(config) = self.resource.get("EventInvokeConfig") else {
            return Ok((Vec::new(), Vec::new()));
        };
        let config = config
            .as_object()
            .ok_or_else(|| self.error("Property 'EventInvokeConfig' should be a map."))?;
        for key in config.keys() {
            if !["MaximumEventAgeInSeconds", "MaximumRetryAttempts", "DestinationConfig"]
                .contains(&key.as_str())
            {
                return Err(self.error(format!(
                    "'{key}' is not a valid property of 'EventInvokeConfig'."
                )));
            }
        }

        let logical_id = self.resource.logical_id();
        let attributes = self.resource.passthrough_attributes();
        let mut resources = Vec::new();
        let mut role_policies = Vec::new();
        let mut destination_config = JsonMap::new();

        if let Some(declared) = config.get("DestinationConfig") {
            let declared = declared.as_object().ok_or_else(|| {
                self.error("Property 'EventInvokeConfig.DestinationConfig' should be a map.")
            })?;
            for key in declared.keys() {
                if key != "OnSuccess" && key != "OnFailure" {
                    return Err(self.error(format!(
                        "'{key}' is not a valid property of 'DestinationConfig'."
                    )));
                }
            }

            for key in ["OnSuccess", "OnFailure"] {
                let Some(entry) = declared.get(key) else {
                    continue;
                };
                let entry = entry.as_object().ok_or_else(|| {
                    self.error(format!("'DestinationConfig.{key}' should be a map."))
                })?;
                let destination_type =
                    entry.get("Type").and_then(Value::as_str).ok_or_else(|| {
                        self.error(format!("'DestinationConfig.{key}' requires 'Type'."))
                    })?;
                if !DESTINATION_TYPES.contains(&destination_type) {
                    return Err(self.error(format!(
                        "'Type' of 'DestinationConfig.{key}' must be one of \
                         'SQS', 'SNS', 'Lambda', 'EventBridge'."
                    )));
                }

                // Honor conditional (Fn::If-wrapped) destinations by passing
                // them through untouched; a missing destination is created
                // for queue/topic types only.
                let destination = match entry.get("Destination") {
                    Some(destination) => destination.clone(),
                    None => match destination_type {
                        "SQS" => {
                            let queue = Resource::with_attributes(
                                &SQS_QUEUE,
                                &format!("{logical_id}{key}Queue"),
                                &attributes,
                            )?;
                            let arn = queue.runtime_attr("arn")?;
                            resources.push(queue);
                            arn
                        }
                        "SNS" => {
                            let topic = Resource::with_attributes(
                                &SNS_TOPIC,
                                &format!("{logical_id}{key}Topic"),
                                &attributes,
                            )?;
                            let arn = topic.runtime_attr("arn")?;
                            resources.push(topic);
                            arn
                        }
                        _ => {
                            return Err(self.error(format!(
                                "'Destination' is required for 'Type' {destination_type} \
                                 of 'DestinationConfig.{key}'."
                            )));
                        }
                    },
                };

                let scope = format!("{logical_id}{key}");
                role_policies.push(match destination_type {
                    "SQS" => policies::sqs_send_message_policy(&destination, &scope),
                    "SNS" => policies::sns_publish_policy(&destination, &scope),
                    "Lambda" => policies::lambda_invoke_policy(&destination, &scope),
                    _ => policies::event_bus_put_events_policy(&destination, &scope),
                });
                destination_config.insert(key.into(), json!({ "Destination": destination }));
            }
        }

        let mut event_invoke_config = Resource::with_attributes(
            &LAMBDA_EVENT_INVOKE_CONFIG,
            &format!("{logical_id}EventInvokeConfig"),
            &attributes,
        )?;
        if !destination_config.is_empty() {
            event_invoke_config.set("DestinationConfig", Value::Object(destination_config))?;
        }
        event_invoke_config.set("FunctionName", function.runtime_attr("name")?)?;
        event_invoke_config.set_opt(
            "MaximumEventAgeInSeconds",
            config.get("MaximumEventAgeInSeconds").cloned(),
        )?;
        event_invoke_config.set_opt(
            "MaximumRetryAttempts",
            config.get("MaximumRetryAttempts").cloned(),
        )?;
        event_invoke_config.set(
            "Qualifier",
            json!(alias_name.unwrap_or("$LATEST")),
        )?;

        resources.push(event_invoke_config);
        Ok((resources, role_policies))
    }

    // -------------------------------------------------------------------------
    // Step 6: execution role
    // -------------------------------------------------------------------------

    /// Assembles the execution role skeleton plus the managed-ARN and inline
    /// policy lists accumulated so far. The lists are finalized after
    /// trigger expansion contributed its policies.
    fn build_role(
        &self,
        ctx: &ExpandCtx<'_>,
        mut policy_documents: Vec<Value>,
    ) -> Result<(Resource, Vec<Value>, Vec<Value>)> {
        let role_logical_id = format!("{}Role", self.resource.logical_id());
        let mut role = Resource::with_attributes(
            &IAM_ROLE,
            &role_logical_id,
            &self.resource.passthrough_attributes(),
        )?;
        role.set(
            "AssumeRolePolicyDocument",
            policies::lambda_assume_role_policy(),
        )?;
        role.set_opt(
            "PermissionsBoundary",
            self.resource.get("PermissionsBoundary").cloned(),
        )?;

        let mut managed_policy_arns =
            vec![managed_policy_arn("service-role/AWSLambdaBasicExecutionRole")];
        if self.resource.get("Tracing").is_some() {
            managed_policy_arns.push(managed_policy_arn("AWSXrayWriteOnlyAccess"));
        }
        if self.resource.get("VpcConfig").is_some() {
            managed_policy_arns.push(managed_policy_arn(
                "service-role/AWSLambdaVPCAccessExecutionRole",
            ));
        }
        if let Some((action, target_arn)) = self.validated_dead_letter_queue()? {
            policy_documents.push(policies::dead_letter_queue_policy(action, &target_arn));
        }

        let declared = match self.resource.get("Policies") {
            None => Vec::new(),
            Some(Value::Array(entries)) => entries.clone(),
            Some(single) => vec![single.clone()],
        };
        for (index, entry) in declared.iter().enumerate() {
            match entry {
                Value::String(name) => {
                    let arn = resolve_policy_name(name, ctx.managed_policy_map);
                    if !managed_policy_arns.contains(&arn) {
                        managed_policy_arns.push(arn);
                    }
                }
                intrinsic if intrinsics::is_intrinsic(intrinsic) => {
                    if !managed_policy_arns.contains(intrinsic) {
                        managed_policy_arns.push(intrinsic.clone());
                    }
                }
                Value::Object(statement) => {
                    policy_documents.push(json!({
                        "PolicyName": format!("{role_logical_id}Policy{index}"),
                        "PolicyDocument": statement
                    }));
                }
                _ => {
                    return Err(self.error(format!(
                        "Policy at index {index} in the 'Policies' property is not valid"
                    )));
                }
            }
        }

        Ok((role, managed_policy_arns, policy_documents))
    }
}

impl ResourceMacro for FunctionMacro {
    fn logical_id(&self) -> &str {
        self.resource.logical_id()
    }

    fn resources_to_link(
        &mut self,
        resources: &indexmap::IndexMap<String, Value>,
    ) -> Result<()> {
        let Some(events) = self.resource.get("Events").cloned() else {
            return Ok(());
        };
        let events = events
            .as_object()
            .ok_or_else(|| self.error("Property 'Events' should be a map."))?;

        for (relative_id, event_map) in events {
            let mut source =
                build_event_source(self.resource.logical_id(), relative_id, event_map)?;
            source.resources_to_link(resources)?;
            self.events.push(source);
        }
        // Catch-all HTTP routes expand first so a more specific route never
        // precedes its own fallback. The sort is stable: everything else
        // keeps declaration order.
        self.events.sort_by_key(|source| !source.sorts_first());
        Ok(())
    }

    fn expand(&mut self, ctx: &ExpandCtx<'_>) -> Result<Expansion> {
        let code = self.code_dict()?;
        let mut function = self.build_function(code)?;

        let mut version = None;
        let mut alias = None;
        let mut alias_name = None;
        if let Some(declared_alias) = self.resource.get("AutoPublishAlias") {
            let name = self.resolved_alias_name(&declared_alias.clone(), ctx)?;
            let built_version = self.build_version(&function, ctx)?;
            alias = Some(self.build_alias(&name, &function, &built_version)?);
            version = Some(built_version);
            alias_name = Some(name);
        }

        // URL and async-invoke config bind to the alias when one exists.
        let url_resources = self.build_url(alias.as_ref().unwrap_or(&function))?;
        let (event_invoke_resources, mut policy_documents) =
            self.build_event_invoke_config(&function, alias_name.as_deref())?;

        let mut role = None;
        let mut managed_policy_arns = Vec::new();

        if self.resource.get("Role").is_none() {
            let (built_role, arns, documents) = self.build_role(ctx, policy_documents)?;
            function.set("Role", built_role.runtime_attr("arn")?)?;
            role = Some(built_role);
            managed_policy_arns = arns;
            policy_documents = documents;
        }

        let mut trigger_resources = Vec::new();
        let mut patches = Vec::new();
        {
            let target = alias.as_ref().unwrap_or(&function);
            for source in &mut self.events {
                let trigger = source.expand(target, ctx)?;
                trigger_resources.extend(trigger.resources);
                patches.extend(trigger.patches);
                if role.is_some() {
                    for arn in trigger.managed_policy_arns {
                        if !managed_policy_arns.contains(&arn) {
                            managed_policy_arns.push(arn);
                        }
                    }
                    for policy in trigger.policies {
                        let duplicate = policy_documents.iter().any(|existing| {
                            existing == &policy
                                || existing.get("PolicyDocument") == policy.get("PolicyDocument")
                        });
                        if !duplicate {
                            policy_documents.push(policy);
                        }
                    }
                }
            }
        }

        if let Some(role) = &mut role {
            role.set("ManagedPolicyArns", Value::Array(managed_policy_arns))?;
            if !policy_documents.is_empty() {
                role.set("Policies", Value::Array(policy_documents))?;
            }
        }

        let mut expansion = Expansion::new();
        expansion.push(function);
        expansion.resources.extend(version);
        expansion.resources.extend(alias);
        expansion.resources.extend(url_resources);
        expansion.resources.extend(event_invoke_resources);
        expansion.resources.extend(role);
        expansion.resources.extend(trigger_resources);
        expansion.patches = patches;
        Ok(expansion)
    }

    fn referable_properties(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("Alias", "AWS::Lambda::Alias"),
            ("Version", "AWS::Lambda::Version"),
        ]
    }
}

fn parse_s3_uri(uri: &str) -> Option<(&str, &str, Option<&str>)> {
    let rest = uri.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    match key.split_once("?versionId=") {
        Some((key, version)) if !key.is_empty() && !version.is_empty() => {
            Some((bucket, key, Some(version)))
        }
        Some(_) => None,
        None => Some((bucket, key, None)),
    }
}
