//! End-to-end translator tests
//!
//! Each test feeds a whole template through `Translator::translate` and
//! asserts on the emitted CloudFormation, the way an embedding tool would
//! consume the compiler.

use serde_json::{Map as JsonMap, Value, json};
use stratoform_core::{CoreError, Template};
use stratoform_engine::{ManagedPolicyMap, Translator};

fn translate(template: Value) -> Result<Template, CoreError> {
    translate_with_parameters(template, JsonMap::new())
}

fn translate_with_parameters(
    template: Value,
    parameters: JsonMap<String, Value>,
) -> Result<Template, CoreError> {
    let template = Template::from_value(template)?;
    Translator::new(ManagedPolicyMap::new()).translate(&template, &parameters)
}

fn resource_ids(template: &Template) -> Vec<&str> {
    template.resources.keys().map(String::as_str).collect()
}

fn position(template: &Template, logical_id: &str) -> usize {
    template
        .resources
        .keys()
        .position(|id| id == logical_id)
        .unwrap_or_else(|| panic!("{logical_id} not in output"))
}

#[test]
fn test_function_with_alias_and_queue_trigger() {
    let output = translate(json!({
        "Transform": "Stratoform-2024",
        "Resources": {
            "OrdersQueue": { "Type": "AWS::SQS::Queue" },
            "MyFn": {
                "Type": "AWS::Serverless::Function",
                "Properties": {
                    "Handler": "app.handler",
                    "Runtime": "python3.12",
                    "CodeUri": "s3://bucket/app.zip",
                    "AutoPublishAlias": "live",
                    "Events": {
                        "Orders": {
                            "Type": "SQS",
                            "Properties": {
                                "Queue": { "Fn::GetAtt": ["OrdersQueue", "Arn"] },
                                "BatchSize": 5
                            }
                        }
                    }
                }
            }
        }
    }))
    .unwrap();

    // Untouched sibling + function, version, alias, role, mapping.
    assert_eq!(output.resources.len(), 6);
    let ids = resource_ids(&output);
    assert_eq!(ids[0], "OrdersQueue");
    assert_eq!(ids[1], "MyFn");
    assert!(ids[2].starts_with("MyFnVersion"));
    assert_eq!(ids[3], "MyFnAliaslive");
    assert_eq!(ids[4], "MyFnRole");
    assert_eq!(ids[5], "MyFnOrders");

    let function = &output.resources["MyFn"];
    assert_eq!(function["Type"], json!("AWS::Lambda::Function"));
    assert_eq!(function["Properties"]["Code"]["S3Bucket"], json!("bucket"));
    assert_eq!(
        function["Properties"]["Role"],
        json!({ "Fn::GetAtt": ["MyFnRole", "Arn"] })
    );

    // Superseded versions are orphaned, never deleted.
    let version_id = ids[2];
    let version = &output.resources[version_id];
    assert_eq!(version["Type"], json!("AWS::Lambda::Version"));
    assert_eq!(version["DeletionPolicy"], json!("Retain"));

    let alias = &output.resources["MyFnAliaslive"];
    assert_eq!(alias["Properties"]["Name"], json!("live"));
    assert_eq!(
        alias["Properties"]["FunctionVersion"],
        json!({ "Fn::GetAtt": [version_id, "Version"] })
    );

    // The pull source's managed policy lands on the generated role.
    let role = &output.resources["MyFnRole"];
    let managed = role["Properties"]["ManagedPolicyArns"].as_array().unwrap();
    assert!(managed.iter().any(|arn| {
        arn["Fn::Sub"]
            .as_str()
            .is_some_and(|text| text.contains("AWSLambdaSQSQueueExecutionRole"))
    }));

    // The mapping targets the alias, not the bare function.
    let mapping = &output.resources["MyFnOrders"];
    assert_eq!(mapping["Type"], json!("AWS::Lambda::EventSourceMapping"));
    assert_eq!(
        mapping["Properties"]["FunctionName"],
        json!({ "Ref": "MyFnAliaslive" })
    );
    assert_eq!(mapping["Properties"]["BatchSize"], json!(5));

    // The transform marker never survives compilation.
    assert!(output.transform.is_none());
}

#[test]
fn test_default_route_triggers_expand_first() {
    let output = translate(json!({
        "Resources": {
            "Api": {
                "Type": "AWS::ApiGatewayV2::Api",
                "Properties": { "DefinitionBody": { "openapi": "3.0.1", "paths": {} } }
            },
            "MyFn": {
                "Type": "AWS::Serverless::Function",
                "Properties": {
                    "Handler": "app.handler",
                    "Runtime": "python3.12",
                    "CodeUri": "s3://bucket/app.zip",
                    "Events": {
                        "Foo": {
                            "Type": "HttpApi",
                            "Properties": { "ApiId": { "Ref": "Api" }, "Path": "/foo", "Method": "GET" }
                        },
                        "Default": {
                            "Type": "HttpApi",
                            "Properties": { "ApiId": { "Ref": "Api" }, "Path": "$default", "Method": "ANY" }
                        }
                    }
                }
            }
        }
    }))
    .unwrap();

    // Declared after /foo, the catch-all still expands (and is emitted)
    // first.
    assert!(
        position(&output, "MyFnDefaultPermission") < position(&output, "MyFnFooPermission"),
        "catch-all route must expand before specific routes: {:?}",
        resource_ids(&output)
    );

    // Both routes were injected into the definition document.
    let paths = &output.resources["Api"]["Properties"]["DefinitionBody"]["paths"];
    assert!(paths.get("$default").is_some());
    assert!(paths["/foo"]["get"]["x-amazon-apigateway-integration"]["uri"]["Fn::Sub"]
        .as_str()
        .unwrap()
        .contains("MyFn.Arn"));
}

#[test]
fn test_two_bucket_triggers_merge_into_one_dependency_list() {
    let output = translate(json!({
        "Resources": {
            "Uploads": { "Type": "AWS::S3::Bucket" },
            "MyFn": {
                "Type": "AWS::Serverless::Function",
                "Properties": {
                    "Handler": "app.handler",
                    "Runtime": "python3.12",
                    "CodeUri": "s3://bucket/app.zip",
                    "Events": {
                        "Created": {
                            "Type": "S3",
                            "Properties": { "Bucket": { "Ref": "Uploads" }, "Events": "s3:ObjectCreated:*" }
                        },
                        "Removed": {
                            "Type": "S3",
                            "Properties": { "Bucket": { "Ref": "Uploads" }, "Events": "s3:ObjectRemoved:*" }
                        }
                    }
                }
            }
        }
    }))
    .unwrap();

    let bucket = &output.resources["Uploads"];
    assert_eq!(
        bucket["DependsOn"],
        json!(["MyFnCreatedPermission", "MyFnRemovedPermission"])
    );

    let notifications = bucket["Properties"]["NotificationConfiguration"]["LambdaConfigurations"]
        .as_array()
        .unwrap();
    assert_eq!(notifications.len(), 2);
    assert!(notifications.iter().all(|entry| {
        entry["Function"] == json!({ "Fn::GetAtt": ["MyFn", "Arn"] })
    }));
}

#[test]
fn test_layer_rename_rewrites_references() {
    let output = translate(json!({
        "Resources": {
            "SharedLibs": {
                "Type": "AWS::Serverless::LayerVersion",
                "Properties": { "ContentUri": "s3://bucket/layer.zip" }
            },
            "MyFn": {
                "Type": "AWS::Serverless::Function",
                "Properties": {
                    "Handler": "app.handler",
                    "Runtime": "python3.12",
                    "CodeUri": "s3://bucket/app.zip",
                    "Layers": [{ "Ref": "SharedLibs" }]
                }
            }
        }
    }))
    .unwrap();

    let layer_id = output
        .resources
        .keys()
        .find(|id| id.starts_with("SharedLibs") && id.len() > "SharedLibs".len())
        .expect("hashed layer id");
    assert!(!output.resources.contains_key("SharedLibs"));

    let layers = &output.resources["MyFn"]["Properties"]["Layers"];
    assert_eq!(layers[0], json!({ "Ref": layer_id }));
}

#[test]
fn test_alias_surface_property_resolves_to_generated_resource() {
    let output = translate(json!({
        "Outputs": {
            "LiveAliasArn": { "Value": { "Ref": "MyFn.Alias" } }
        },
        "Resources": {
            "MyFn": {
                "Type": "AWS::Serverless::Function",
                "Properties": {
                    "Handler": "app.handler",
                    "Runtime": "python3.12",
                    "CodeUri": "s3://bucket/app.zip",
                    "AutoPublishAlias": "live"
                }
            }
        }
    }))
    .unwrap();

    assert_eq!(
        output.extra["Outputs"]["LiveAliasArn"]["Value"],
        json!({ "Ref": "MyFnAliaslive" })
    );
}

#[test]
fn test_pass_through_attributes_reach_generated_children() {
    let output = translate(json!({
        "Conditions": { "IsProd": { "Fn::Equals": [{ "Ref": "AWS::Region" }, "us-east-1"] } },
        "Resources": {
            "MyFn": {
                "Type": "AWS::Serverless::Function",
                "Condition": "IsProd",
                "Properties": {
                    "Handler": "app.handler",
                    "Runtime": "python3.12",
                    "CodeUri": "s3://bucket/app.zip",
                    "AutoPublishAlias": "live"
                }
            }
        }
    }))
    .unwrap();

    for (logical_id, resource) in &output.resources {
        assert_eq!(
            resource["Condition"],
            json!("IsProd"),
            "{logical_id} lost the macro's Condition"
        );
    }
}

#[test]
fn test_metadata_passthrough_is_opt_in() {
    let template = Template::from_value(json!({
        "Resources": {
            "MyFn": {
                "Type": "AWS::Serverless::Function",
                "Metadata": { "BuildMethod": "makefile" },
                "Properties": {
                    "Handler": "app.handler",
                    "Runtime": "python3.12",
                    "CodeUri": "s3://bucket/app.zip"
                }
            }
        }
    }))
    .unwrap();

    let plain = Translator::new(ManagedPolicyMap::new())
        .translate(&template, &JsonMap::new())
        .unwrap();
    assert!(plain.resources["MyFnRole"].get("Metadata").is_none());

    let with_metadata = Translator::new(ManagedPolicyMap::new())
        .with_passthrough_metadata(true)
        .translate(&template, &JsonMap::new())
        .unwrap();
    assert_eq!(
        with_metadata.resources["MyFnRole"]["Metadata"],
        json!({ "BuildMethod": "makefile" })
    );
    // The function entry carries it in both modes.
    assert_eq!(
        plain.resources["MyFn"]["Metadata"],
        json!({ "BuildMethod": "makefile" })
    );
}

#[test]
fn test_version_identity_follows_parameter_values() {
    let template = json!({
        "Parameters": { "CodeKey": { "Type": "String", "Default": "app.zip" } },
        "Resources": {
            "MyFn": {
                "Type": "AWS::Serverless::Function",
                "Properties": {
                    "Handler": "app.handler",
                    "Runtime": "python3.12",
                    "CodeUri": { "Bucket": "bucket", "Key": { "Ref": "CodeKey" } },
                    "AutoPublishAlias": "live"
                }
            }
        }
    });

    let version_id = |output: &Template| -> String {
        output
            .resources
            .keys()
            .find(|id| id.starts_with("MyFnVersion"))
            .unwrap()
            .clone()
    };

    let defaulted = translate(template.clone()).unwrap();
    let defaulted_again = translate(template.clone()).unwrap();
    assert_eq!(version_id(&defaulted), version_id(&defaulted_again));

    let mut overridden = JsonMap::new();
    overridden.insert("CodeKey".into(), json!("app-v2.zip"));
    let moved = translate_with_parameters(template, overridden).unwrap();
    assert_ne!(version_id(&defaulted), version_id(&moved));

    // The emitted template keeps the unresolved reference; only the
    // identity hash consumed the parameter value.
    assert_eq!(
        moved.resources["MyFn"]["Properties"]["Code"]["S3Key"],
        json!({ "Ref": "CodeKey" })
    );
}

#[test]
fn test_yaml_templates_translate_too() {
    let template = Template::from_yaml_str(concat!(
        "Transform: Stratoform-2024\n",
        "Resources:\n",
        "  MyFn:\n",
        "    Type: AWS::Serverless::Function\n",
        "    Properties:\n",
        "      Handler: app.handler\n",
        "      Runtime: python3.12\n",
        "      CodeUri: s3://bucket/app.zip\n",
    ))
    .unwrap();

    let output = Translator::new(ManagedPolicyMap::new())
        .translate(&template, &JsonMap::new())
        .unwrap();
    assert_eq!(output.resources["MyFn"]["Type"], json!("AWS::Lambda::Function"));
    assert!(output.resources.contains_key("MyFnRole"));
}

#[test]
fn test_simple_table_macro_expands() {
    let output = translate(json!({
        "Resources": {
            "Orders": {
                "Type": "AWS::Serverless::SimpleTable",
                "Properties": { "PrimaryKey": { "Name": "orderId", "Type": "String" } }
            }
        }
    }))
    .unwrap();

    let table = &output.resources["Orders"];
    assert_eq!(table["Type"], json!("AWS::DynamoDB::Table"));
    assert_eq!(
        table["Properties"]["KeySchema"],
        json!([{ "AttributeName": "orderId", "KeyType": "HASH" }])
    );
}

#[test]
fn test_generated_id_collision_aborts() {
    let err = translate(json!({
        "Resources": {
            "MyFnRole": { "Type": "AWS::SQS::Queue" },
            "MyFn": {
                "Type": "AWS::Serverless::Function",
                "Properties": {
                    "Handler": "app.handler",
                    "Runtime": "python3.12",
                    "CodeUri": "s3://bucket/app.zip"
                }
            }
        }
    }))
    .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateLogicalId { .. }));
}

#[test]
fn test_first_error_aborts_whole_compilation() {
    let err = translate(json!({
        "Resources": {
            "Fine": {
                "Type": "AWS::Serverless::SimpleTable"
            },
            "Broken": {
                "Type": "AWS::Serverless::Function",
                "Properties": {
                    "Handler": "app.handler",
                    "Runtime": "python3.12",
                    "CodeUri": "s3://bucket/app.zip",
                    "NotAProperty": true
                }
            }
        }
    }))
    .unwrap_err();
    assert!(err.to_string().contains("NotAProperty"));
}

#[test]
fn test_trigger_errors_carry_both_ids() {
    let err = translate(json!({
        "Resources": {
            "MyFn": {
                "Type": "AWS::Serverless::Function",
                "Properties": {
                    "Handler": "app.handler",
                    "Runtime": "python3.12",
                    "CodeUri": "s3://bucket/app.zip",
                    "Events": {
                        "Upload": {
                            "Type": "S3",
                            "Properties": { "Bucket": { "Ref": "Missing" }, "Events": "s3:ObjectCreated:*" }
                        }
                    }
                }
            }
        }
    }))
    .unwrap_err();

    let CoreError::InvalidEvent {
        logical_id,
        event_id,
        ..
    } = err
    else {
        panic!("expected a trigger-scoped error, got {err}");
    };
    assert_eq!(logical_id, "MyFn");
    assert_eq!(event_id, "Upload");
}
