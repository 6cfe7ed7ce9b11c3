//! Serverless functions, shared layers, and invoke permissions.

use crate::core::intrinsic;
use crate::core::stack::Stack;
use crate::core::types::*;
use crate::error::Result;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Bucket the engine uploads staged archives to.
pub fn asset_bucket() -> Value {
    intrinsic::sub("wwapi-assets-${AWS::AccountId}-${AWS::Region}")
}

fn asset_code(asset: &Asset) -> Value {
    json!({ "S3Bucket": asset_bucket(), "S3Key": asset.object_key() })
}

pub fn layer(asset: &Asset, runtime: &str, description: &str) -> ResourceDecl {
    ResourceDecl::new(
        ResourceType::LayerVersion,
        json!({
            "Content": asset_code(asset),
            "CompatibleRuntimes": [runtime],
            "Description": description,
        }),
    )
}

/// Inputs for [`add_function`].
#[derive(Debug, Clone)]
pub struct FunctionProps<'a> {
    pub handler: &'a str,
    pub code: &'a Asset,
    /// Execution role logical id
    pub role: &'a str,
    /// Layer logical ids
    pub layers: Vec<&'a str>,
    pub environment: IndexMap<String, String>,
    pub settings: &'a FunctionsConfig,
}

/// Declare a function plus its retained log group.
///
/// With active tracing the execution role is granted trace-segment writes.
pub fn add_function(stack: &mut Stack, id: &str, props: FunctionProps<'_>) -> Result<()> {
    let layers: Vec<Value> = props.layers.iter().map(|l| intrinsic::reference(l)).collect();
    let mut properties = json!({
        "Code": asset_code(props.code),
        "Handler": props.handler,
        "Role": intrinsic::get_att(props.role, "Arn"),
        "Runtime": props.settings.runtime,
        "Timeout": props.settings.timeout_seconds,
        "Layers": layers,
        "Environment": { "Variables": props.environment },
    });
    if props.settings.tracing {
        properties["TracingConfig"] = json!({ "Mode": "Active" });
    }
    stack.add(id, ResourceDecl::new(ResourceType::Function, properties))?;

    let log_group = ResourceDecl::new(
        ResourceType::LogGroup,
        json!({
            "LogGroupName": intrinsic::sub(&format!("/aws/lambda/${{{}}}", id)),
            "RetentionInDays": props.settings.log_retention_days,
        }),
    )
    .retain();
    stack.add(&format!("{}LogGroup", id), log_group)?;

    if props.settings.tracing {
        stack.grant(
            props.role,
            GrantTarget::Any,
            Access::Actions(vec![
                "xray:PutTraceSegments".to_string(),
                "xray:PutTelemetryRecords".to_string(),
            ]),
        );
    }
    Ok(())
}

/// Allow `principal` to invoke `function_id`.
pub fn invoke_permission(
    function_id: &str,
    principal: &str,
    source_arn: Value,
    source_account: Option<Value>,
) -> ResourceDecl {
    let mut properties = json!({
        "Action": "lambda:InvokeFunction",
        "FunctionName": intrinsic::get_att(function_id, "Arn"),
        "Principal": principal,
        "SourceArn": source_arn,
    });
    if let Some(account) = source_account {
        properties["SourceAccount"] = account;
    }
    ResourceDecl::new(ResourceType::Permission, properties)
}

/// Environment variables of a function declaration.
pub fn environment_of(decl: &ResourceDecl) -> BTreeMap<String, String> {
    decl.properties
        .get("Environment")
        .and_then(|e| e.get("Variables"))
        .and_then(Value::as_object)
        .map(|vars| {
            vars.iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect()
        })
        .unwrap_or_default()
}
