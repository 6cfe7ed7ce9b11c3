//! Roles, and compilation of permission grants into role policies.
//!
//! Grants made to a function land on the function's execution role. All
//! statements for one role are collected into a single `<Role>DefaultPolicy`,
//! with identical statements emitted once.

use super::{parameter, search, storage};
use crate::core::intrinsic;
use crate::core::stack::Stack;
use crate::core::types::*;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// Managed policy granting log-group writes to function roles.
pub const BASIC_EXECUTION: &str = "service-role/AWSLambdaBasicExecutionRole";

/// Role assumable by a service principal.
pub fn service_role(service: &str, description: Option<&str>, managed_policies: &[&str]) -> ResourceDecl {
    let mut props = json!({
        "AssumeRolePolicyDocument": {
            "Version": "2012-10-17",
            "Statement": [{
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": { "Service": service },
            }],
        },
    });
    if let Some(description) = description {
        props["Description"] = json!(description);
    }
    if !managed_policies.is_empty() {
        let arns: Vec<Value> = managed_policies
            .iter()
            .map(|name| intrinsic::sub(&format!("arn:${{AWS::Partition}}:iam::aws:policy/{}", name)))
            .collect();
        props["ManagedPolicyArns"] = Value::Array(arns);
    }
    ResourceDecl::new(ResourceType::Role, props)
}

/// Managed policy names attached to a role.
pub fn managed_policies(role: &ResourceDecl) -> Vec<String> {
    let Some(Value::Array(arns)) = role.properties.get("ManagedPolicyArns") else {
        return Vec::new();
    };
    arns.iter()
        .filter_map(|arn| arn.get("Fn::Sub").and_then(Value::as_str))
        .filter_map(|arn| arn.split_once(":policy/").map(|(_, name)| name.to_string()))
        .collect()
}

/// Allow statement. Single actions and resources are written unwrapped.
pub fn statement<S: AsRef<str>>(actions: &[S], resources: Vec<Value>) -> Value {
    let action = match actions {
        [single] => json!(single.as_ref()),
        many => json!(many.iter().map(|a| a.as_ref()).collect::<Vec<_>>()),
    };
    let resource = match resources.len() {
        1 => resources.into_iter().next().unwrap_or(Value::Null),
        _ => Value::Array(resources),
    };
    json!({ "Action": action, "Effect": "Allow", "Resource": resource })
}

pub fn policy_id(role_id: &str) -> String {
    format!("{}DefaultPolicy", role_id)
}

/// Compile every grant of `stack` into one policy resource per role.
pub fn compile_grants(stack: &Stack) -> Result<IndexMap<String, ResourceDecl>> {
    let mut by_role: IndexMap<String, Vec<Value>> = IndexMap::new();
    for grant in &stack.grants {
        let role = stack.role_of(&grant.principal).ok_or_else(|| {
            Error::Other(format!(
                "grant principal '{}' is not a role or function in stack '{}'",
                grant.principal, stack.name
            ))
        })?;
        let stmt = grant_statement(stack, grant)?;
        let statements = by_role.entry(role).or_default();
        if !statements.contains(&stmt) {
            statements.push(stmt);
        }
    }

    let mut policies = IndexMap::new();
    for (role, statements) in by_role {
        let id = policy_id(&role);
        let decl = ResourceDecl::new(
            ResourceType::Policy,
            json!({
                "PolicyName": id,
                "PolicyDocument": { "Version": "2012-10-17", "Statement": statements },
                "Roles": [intrinsic::reference(&role)],
            }),
        );
        policies.insert(id, decl);
    }
    Ok(policies)
}

fn grant_statement(stack: &Stack, grant: &Grant) -> Result<Value> {
    let unsupported = || {
        Error::Other(format!(
            "grant {:?} on {:?} is not supported",
            grant.access, grant.target
        ))
    };
    match (&grant.target, &grant.access) {
        (GrantTarget::Any, Access::Decrypt) => Ok(statement(&["kms:Decrypt"], vec![json!("*")])),
        (GrantTarget::Any, Access::Actions(actions)) => Ok(statement(actions, vec![json!("*")])),
        (GrantTarget::ImportedParameter(name), Access::ParameterRead) => {
            Ok(parameter::read_statement(intrinsic::parameter_arn(name)))
        }
        (GrantTarget::Resource(id), access) => {
            let decl = stack
                .resource(id)
                .ok_or_else(|| Error::unknown("grant target", id.clone()))?;
            match (decl.resource_type, access) {
                (ResourceType::Bucket, Access::Read) => Ok(storage::read_statement(id)),
                (ResourceType::SearchDomain, Access::ReadWrite) => {
                    Ok(search::read_write_statement(id, None))
                }
                (ResourceType::SearchDomain, Access::IndexReadWrite(index)) => {
                    Ok(search::read_write_statement(id, Some(index)))
                }
                (ResourceType::Parameter, Access::ParameterRead) => {
                    let name = decl.prop_str("Name").ok_or_else(unsupported)?;
                    Ok(parameter::read_statement(intrinsic::parameter_arn(name)))
                }
                (ResourceType::Secret, Access::SecretRead) => Ok(search::secret_read_statement(id)),
                (_, Access::Actions(actions)) => {
                    Ok(statement(actions, vec![intrinsic::get_att(id, "Arn")]))
                }
                _ => Err(unsupported()),
            }
        }
        _ => Err(unsupported()),
    }
}

/// Classify a grant into the permission it confers.
pub fn classify(stack: &Stack, grant: &Grant) -> Permission {
    let target_type = match &grant.target {
        GrantTarget::Resource(id) => stack.resource(id).map(|d| d.resource_type),
        _ => None,
    };
    match (&grant.access, target_type) {
        (Access::Read, Some(ResourceType::Bucket)) => Permission::StoreRead,
        (Access::ReadWrite, Some(ResourceType::SearchDomain)) => Permission::SearchReadWrite,
        (Access::IndexReadWrite(_), Some(ResourceType::SearchDomain)) => {
            Permission::SearchIndexReadWrite
        }
        (Access::ParameterRead, _) => Permission::ParameterRead,
        (Access::SecretRead, _) => Permission::SecretRead,
        (Access::Decrypt, _) => Permission::Decrypt,
        (access, _) => Permission::Custom(match access {
            Access::Actions(actions) => actions.join(","),
            other => format!("{:?}", other),
        }),
    }
}

/// Effective permissions of a role: its own grants, grants made to the
/// functions that run as it, and its managed policies.
pub fn permission_set(stack: &Stack, role_id: &str) -> BTreeSet<Permission> {
    let mut set: BTreeSet<Permission> = stack
        .grants
        .iter()
        .filter(|g| stack.role_of(&g.principal).as_deref() == Some(role_id))
        .map(|g| classify(stack, g))
        .collect();
    if let Some(role) = stack.resource(role_id) {
        if managed_policies(role).iter().any(|m| m == BASIC_EXECUTION) {
            set.insert(Permission::BasicExecution);
        }
    }
    set
}
