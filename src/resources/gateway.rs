//! REST gateway with function-proxy routes.

use super::lambda;
use crate::core::intrinsic;
use crate::core::stack::Stack;
use crate::core::types::{ApiConfig, ResourceDecl, ResourceType};
use crate::error::{Error, Result};
use serde_json::{json, Value};

pub fn rest_api(config: &ApiConfig) -> ResourceDecl {
    ResourceDecl::new(
        ResourceType::RestApi,
        json!({
            "Name": config.name,
            "Description": config.description,
        }),
    )
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Route `method /path` on `api_id` to `function_id` through a proxy
/// integration. Returns the method's logical id.
pub fn add_route(
    stack: &mut Stack,
    api_id: &str,
    path: &str,
    method: &str,
    function_id: &str,
) -> Result<String> {
    let path = path.trim_matches('/');
    if path.is_empty() || path.contains('/') {
        return Err(Error::Other(format!(
            "route path '{}' must be a single segment",
            path
        )));
    }
    let method = method.to_ascii_uppercase();
    let resource_id = format!(
        "{}{}",
        api_id,
        capitalize(&path.replace(|c: char| !c.is_ascii_alphanumeric(), ""))
    );
    if stack.resource(&resource_id).is_none() {
        stack.add(
            &resource_id,
            ResourceDecl::new(
                ResourceType::ApiResource,
                json!({
                    "ParentId": intrinsic::get_att(api_id, "RootResourceId"),
                    "PathPart": path,
                    "RestApiId": intrinsic::reference(api_id),
                }),
            ),
        )?;
    }

    let method_id = format!("{}{}", resource_id, method);
    stack.add(
        &method_id,
        ResourceDecl::new(
            ResourceType::ApiMethod,
            json!({
                "HttpMethod": method,
                "ResourceId": intrinsic::reference(&resource_id),
                "RestApiId": intrinsic::reference(api_id),
                "AuthorizationType": "NONE",
                "Integration": {
                    "Type": "AWS_PROXY",
                    "IntegrationHttpMethod": "POST",
                    "Uri": intrinsic::sub(&format!(
                        "arn:${{AWS::Partition}}:apigateway:${{AWS::Region}}:lambda:path/2015-03-31/functions/${{{}.Arn}}/invocations",
                        function_id
                    )),
                },
            }),
        ),
    )?;

    stack.add(
        &format!("{}Permission", method_id),
        lambda::invoke_permission(
            function_id,
            "apigateway.amazonaws.com",
            intrinsic::arn("execute-api", &format!("${{{}}}/*/{}/{}", api_id, method, path)),
            None,
        ),
    )?;
    Ok(method_id)
}

/// Deploy every method of `api_id` to `stage`. Returns the stage's logical id.
pub fn add_deployment(stack: &mut Stack, api_id: &str, stage: &str) -> Result<String> {
    let methods: Vec<String> = stack
        .resources_of(ResourceType::ApiMethod)
        .filter(|(_, d)| d.properties.get("RestApiId") == Some(&intrinsic::reference(api_id)))
        .map(|(id, _)| id.clone())
        .collect();
    if methods.is_empty() {
        return Err(Error::Other(format!("api '{}' has no routes to deploy", api_id)));
    }

    let deployment_id = format!("{}Deployment", api_id);
    let mut deployment = ResourceDecl::new(
        ResourceType::ApiDeployment,
        json!({
            "RestApiId": intrinsic::reference(api_id),
            "Description": "Automatically created by wwapi",
        }),
    );
    for method in &methods {
        deployment = deployment.depends_on(method);
    }
    stack.add(&deployment_id, deployment)?;

    let stage_id = format!("{}Stage{}", api_id, capitalize(stage));
    stack.add(
        &stage_id,
        ResourceDecl::new(
            ResourceType::ApiStage,
            json!({
                "RestApiId": intrinsic::reference(api_id),
                "DeploymentId": intrinsic::reference(&deployment_id),
                "StageName": stage,
            }),
        ),
    )?;
    Ok(stage_id)
}

/// Invoke URL of a deployed stage, ending in `/`.
pub fn url(api_id: &str, stage_id: &str) -> Value {
    intrinsic::join(
        "",
        vec![
            json!("https://"),
            intrinsic::reference(api_id),
            json!(".execute-api."),
            intrinsic::reference("AWS::Region"),
            json!("."),
            intrinsic::reference("AWS::URLSuffix"),
            json!("/"),
            intrinsic::reference(stage_id),
            json!("/"),
        ],
    )
}

/// [`url`] with a route path appended.
pub fn route_url(api_id: &str, stage_id: &str, path: &str) -> Value {
    let mut value = url(api_id, stage_id);
    if let Some(parts) = value["Fn::Join"][1].as_array_mut() {
        parts.push(json!(path));
    }
    value
}

/// A method exposed by a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: String,
    /// Path with a leading slash
    pub path: String,
    pub function: String,
}

/// Every route declared in `stack`, in declaration order.
pub fn routes(stack: &Stack) -> Vec<Route> {
    stack
        .resources_of(ResourceType::ApiMethod)
        .filter_map(|(_, decl)| {
            let method = decl.prop_str("HttpMethod")?;
            let resource_id = decl.properties.get("ResourceId")?.get("Ref")?.as_str()?;
            let path = stack.resource(resource_id)?.prop_str("PathPart")?;
            let uri = decl.properties.get("Integration")?.get("Uri")?;
            let function = intrinsic::references(uri).into_iter().next()?;
            Some(Route {
                method: method.to_string(),
                path: format!("/{}", path),
                function,
            })
        })
        .collect()
}
