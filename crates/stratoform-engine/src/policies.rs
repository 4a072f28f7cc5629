//! IAM policy document builders
//!
//! Plain value trees for the assume-role documents and inline policies the
//! compiler attaches to generated execution roles.

use serde_json::{Value, json};

const POLICY_VERSION: &str = "2012-10-17";

/// Trust policy letting the compute service assume an execution role.
pub fn lambda_assume_role_policy() -> Value {
    assume_role_policy("lambda.amazonaws.com")
}

/// Trust policy letting the scheduler service assume an execution role.
pub fn scheduler_assume_role_policy() -> Value {
    assume_role_policy("scheduler.amazonaws.com")
}

fn assume_role_policy(service: &str) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Action": ["sts:AssumeRole"],
            "Effect": "Allow",
            "Principal": { "Service": [service] }
        }]
    })
}

/// Inline policy granting `sqs:SendMessage` on one queue.
pub fn sqs_send_message_policy(queue_arn: &Value, logical_id: &str) -> Value {
    single_statement_policy(
        format!("{logical_id}SQSPolicy"),
        json!("sqs:SendMessage"),
        queue_arn.clone(),
    )
}

/// Inline policy granting `sns:Publish` on one topic.
pub fn sns_publish_policy(topic_arn: &Value, logical_id: &str) -> Value {
    single_statement_policy(
        format!("{logical_id}SNSPolicy"),
        json!("sns:Publish"),
        topic_arn.clone(),
    )
}

/// Inline policy granting `lambda:InvokeFunction` on one function.
pub fn lambda_invoke_policy(function_arn: &Value, logical_id: &str) -> Value {
    single_statement_policy(
        format!("{logical_id}LambdaPolicy"),
        json!("lambda:InvokeFunction"),
        function_arn.clone(),
    )
}

/// Inline policy granting `events:PutEvents` on one event bus.
pub fn event_bus_put_events_policy(event_bus_arn: &Value, logical_id: &str) -> Value {
    single_statement_policy(
        format!("{logical_id}EventBridgePolicy"),
        json!("events:PutEvents"),
        event_bus_arn.clone(),
    )
}

/// Inline policy letting a function deliver failed invocations to its
/// dead-letter target. `action` is the queue/topic-specific send action.
pub fn dead_letter_queue_policy(action: &str, target_arn: &Value) -> Value {
    json!({
        "PolicyName": "DeadLetterQueuePolicy",
        "PolicyDocument": {
            "Version": POLICY_VERSION,
            "Statement": [{
                "Action": action,
                "Resource": target_arn,
                "Effect": "Allow"
            }]
        }
    })
}

/// Resource-based queue policy letting the events service deliver to a
/// dead-letter queue, scoped to one rule ARN.
pub fn events_dlq_queue_policy(rule_arn: &Value, queue_arn: &Value) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Action": "sqs:SendMessage",
            "Effect": "Allow",
            "Principal": { "Service": "events.amazonaws.com" },
            "Resource": queue_arn,
            "Condition": { "ArnEquals": { "aws:SourceArn": rule_arn } }
        }]
    })
}

/// Resource-based queue policy letting a pub/sub topic fan into a queue.
pub fn sns_topic_send_message_policy(topic_arn: &Value, queue_arn: &Value) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Action": "sqs:SendMessage",
            "Effect": "Allow",
            "Principal": "*",
            "Resource": queue_arn,
            "Condition": { "ArnEquals": { "aws:SourceArn": topic_arn } }
        }]
    })
}

fn single_statement_policy(name: String, action: Value, resource: Value) -> Value {
    json!({
        "PolicyName": name,
        "PolicyDocument": {
            "Version": POLICY_VERSION,
            "Statement": [{
                "Action": action,
                "Effect": "Allow",
                "Resource": resource
            }]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assume_role_services() {
        let lambda = lambda_assume_role_policy();
        assert_eq!(
            lambda["Statement"][0]["Principal"]["Service"][0],
            json!("lambda.amazonaws.com")
        );
        let scheduler = scheduler_assume_role_policy();
        assert_eq!(
            scheduler["Statement"][0]["Principal"]["Service"][0],
            json!("scheduler.amazonaws.com")
        );
    }

    #[test]
    fn test_policy_names_are_scoped_by_logical_id() {
        let policy = sqs_send_message_policy(&json!("arn:aws:sqs:us-east-1:1:q"), "MyFnOnFailure");
        assert_eq!(policy["PolicyName"], json!("MyFnOnFailureSQSPolicy"));
        assert_eq!(
            policy["PolicyDocument"]["Statement"][0]["Action"],
            json!("sqs:SendMessage")
        );
    }
}
