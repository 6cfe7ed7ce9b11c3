//! Object-store bucket and its created-object notifications.

use super::{iam, lambda};
use crate::core::intrinsic;
use crate::core::stack::Stack;
use crate::core::types::{BucketConfig, RemovalPolicy, ResourceDecl, ResourceType};
use crate::error::Result;
use serde_json::{json, Value};

/// Event name for any object creation.
pub const OBJECT_CREATED: &str = "s3:ObjectCreated:*";

/// Tag the engine's cleanup handler looks for before emptying a bucket.
pub const AUTO_DELETE_TAG: &str = "aws-cdk:auto-delete-objects";

pub fn bucket(config: &BucketConfig) -> ResourceDecl {
    let mut props = serde_json::Map::new();
    if config.versioned {
        props.insert(
            "VersioningConfiguration".to_string(),
            json!({ "Status": "Enabled" }),
        );
    }
    if config.auto_delete_objects && config.removal == RemovalPolicy::Destroy {
        props.insert(
            "Tags".to_string(),
            json!([{ "Key": AUTO_DELETE_TAG, "Value": "true" }]),
        );
    }
    let decl = ResourceDecl::new(ResourceType::Bucket, Value::Object(props));
    match config.removal {
        RemovalPolicy::Retain => decl.retain(),
        RemovalPolicy::Destroy => decl,
    }
}

/// Invoke `function_id` for every object created in `bucket_id`.
///
/// Adds the invoke permission for the storage service and the notification
/// resource, which waits for the permission.
pub fn add_object_created_notification(
    stack: &mut Stack,
    id: &str,
    bucket_id: &str,
    function_id: &str,
) -> Result<()> {
    let permission_id = format!("{}Permission", id);
    stack.add(
        &permission_id,
        lambda::invoke_permission(
            function_id,
            "s3.amazonaws.com",
            intrinsic::get_att(bucket_id, "Arn"),
            Some(intrinsic::reference("AWS::AccountId")),
        ),
    )?;
    let notification = ResourceDecl::new(
        ResourceType::BucketNotification,
        json!({
            "BucketName": intrinsic::reference(bucket_id),
            "NotificationConfiguration": {
                "LambdaFunctionConfigurations": [{
                    "Events": [OBJECT_CREATED],
                    "LambdaFunctionArn": intrinsic::get_att(function_id, "Arn"),
                }],
            },
        }),
    )
    .depends_on(&permission_id);
    stack.add(id, notification)
}

/// An event routing from a bucket to a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSource {
    pub bucket: String,
    pub event: String,
    pub function: String,
}

/// Every bucket-to-function event routing declared in `stack`.
pub fn event_sources(stack: &Stack) -> Vec<EventSource> {
    let mut sources = Vec::new();
    for (_, decl) in stack.resources_of(ResourceType::BucketNotification) {
        let Some(bucket) = decl
            .properties
            .get("BucketName")
            .and_then(|b| b.get("Ref"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        let configs = decl
            .properties
            .get("NotificationConfiguration")
            .and_then(|n| n.get("LambdaFunctionConfigurations"))
            .and_then(Value::as_array);
        for config in configs.into_iter().flatten() {
            let function = config
                .get("LambdaFunctionArn")
                .and_then(|a| a.get("Fn::GetAtt"))
                .and_then(|parts| parts.get(0))
                .and_then(Value::as_str);
            let events = config.get("Events").and_then(Value::as_array);
            let (Some(function), Some(events)) = (function, events) else {
                continue;
            };
            for event in events.iter().filter_map(Value::as_str) {
                sources.push(EventSource {
                    bucket: bucket.to_string(),
                    event: event.to_string(),
                    function: function.to_string(),
                });
            }
        }
    }
    sources
}

pub fn read_statement(bucket_id: &str) -> Value {
    iam::statement(
        &["s3:GetObject*", "s3:GetBucket*", "s3:List*"],
        vec![
            intrinsic::get_att(bucket_id, "Arn"),
            intrinsic::sub(&format!("${{{}.Arn}}/*", bucket_id)),
        ],
    )
}
