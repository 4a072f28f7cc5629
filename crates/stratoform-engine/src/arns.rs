//! ARN construction
//!
//! Every ARN the compiler emits is partition- and region-relative via
//! `Fn::Sub`, so the output template deploys unchanged in any partition.

use serde_json::{Value, json};
use stratoform_core::Result;
use stratoform_core::intrinsics::{fn_sub, fn_sub_with, make_shorthand};
use stratoform_core::resource::Resource;

use crate::collaborators::ManagedPolicyMap;

/// ARN of an AWS-managed IAM policy, e.g.
/// `service-role/AWSLambdaBasicExecutionRole`.
pub fn managed_policy_arn(policy_path: &str) -> Value {
    fn_sub(&format!(
        "arn:${{AWS::Partition}}:iam::aws:policy/{policy_path}"
    ))
}

/// Resolves a caller-declared policy entry: a name known to the managed
/// policy map becomes its ARN; anything else is assumed to already be an
/// ARN and passes through.
pub fn resolve_policy_name(name: &str, map: &ManagedPolicyMap) -> Value {
    match map.get(name) {
        Some(arn) => Value::String(arn.to_string()),
        None => Value::String(name.to_string()),
    }
}

/// Source ARN scoping an API route permission to one api/stage/method/path.
/// `api_id` may be a plain string or a reference expression; `Fn::Sub`
/// handles both.
pub fn execute_api_arn(api_id: Value, stage: Value, method: &str, path: &str) -> Value {
    let resource = format!("${{__ApiId__}}/${{__Stage__}}/{method}{path}");
    fn_sub_with(
        &format!("arn:${{AWS::Partition}}:execute-api:${{AWS::Region}}:${{AWS::AccountId}}:{resource}"),
        json!({ "__ApiId__": api_id, "__Stage__": stage }),
    )
}

/// Source ARN of an IoT topic rule, referenced by the rule's logical id.
pub fn iot_rule_arn(rule_logical_id: &str) -> Value {
    fn_sub_with(
        "arn:${AWS::Partition}:iot:${AWS::Region}:${AWS::AccountId}:rule/${RuleName}",
        json!({ "RuleName": { "Ref": rule_logical_id } }),
    )
}

/// The API-Gateway-to-Lambda integration URI for the given target function
/// or alias.
pub fn lambda_integration_uri(target: &Resource) -> Result<Value> {
    let target_arn = target.runtime_attr("arn")?;
    Ok(fn_sub(&format!(
        "arn:${{AWS::Partition}}:apigateway:${{AWS::Region}}:lambda:path/2015-03-31/functions/{}/invocations",
        make_shorthand(&target_arn)?
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_policy_arn_is_partition_relative() {
        assert_eq!(
            managed_policy_arn("service-role/AWSLambdaBasicExecutionRole"),
            json!({ "Fn::Sub":
                "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole" })
        );
    }

    #[test]
    fn test_resolve_policy_name_falls_back_to_the_name() {
        let mut map = ManagedPolicyMap::new();
        map.insert("aws", "ReadOnlyAccess", "arn:aws:iam::aws:policy/ReadOnlyAccess");
        assert_eq!(
            resolve_policy_name("ReadOnlyAccess", &map),
            json!("arn:aws:iam::aws:policy/ReadOnlyAccess")
        );
        assert_eq!(
            resolve_policy_name("arn:aws:iam::123:policy/custom", &map),
            json!("arn:aws:iam::123:policy/custom")
        );
    }

    #[test]
    fn test_execute_api_arn() {
        let arn = execute_api_arn(json!({ "Ref": "MyApi" }), json!("*"), "GET", "/items");
        assert_eq!(
            arn,
            json!({ "Fn::Sub": [
                "arn:${AWS::Partition}:execute-api:${AWS::Region}:${AWS::AccountId}:${__ApiId__}/${__Stage__}/GET/items",
                { "__ApiId__": { "Ref": "MyApi" }, "__Stage__": "*" }
            ]})
        );
    }
}
