//! Plan generation: diff synthesized templates against state locks.

use super::codegen::SynthesizedStack;
use super::types::*;
use crate::tripwire::hasher;
use std::collections::HashMap;

/// Lock detail key recording the removal policy.
pub const REMOVAL_DETAIL: &str = "removal";

/// Hash of a resource's desired state: its full template entry.
pub fn hash_desired_state(entry: &serde_json::Value) -> String {
    hasher::hash_string(&entry.to_string())
}

/// Plan every stack against its lock. Resources in a lock that the stack no
/// longer declares are destroyed, or retained when recorded with a retain
/// removal policy.
pub fn plan(
    app: &str,
    stacks: &[SynthesizedStack],
    locks: &HashMap<String, StateLock>,
) -> ExecutionPlan {
    let mut plan = empty_plan(app, stacks.iter().map(|s| s.name.clone()).collect());

    for stack in stacks {
        let lock = locks.get(&stack.name);
        for id in &stack.order {
            let (Some(decl), Some(entry)) = (stack.resources.get(id), stack.resource_template(id))
            else {
                continue;
            };
            let desired = hash_desired_state(entry);
            let action = match lock.and_then(|l| l.resources.get(id)) {
                None => PlanAction::Create,
                Some(rl) if rl.status == ResourceStatus::Converged && rl.hash == desired => {
                    PlanAction::NoOp
                }
                Some(_) => PlanAction::Update,
            };
            push(&mut plan, &stack.name, id, decl.resource_type, action);
        }

        if let Some(lock) = lock {
            for (id, rl) in lock.resources.iter().rev() {
                if !stack.resources.contains_key(id) {
                    push(&mut plan, &stack.name, id, rl.resource_type, removal_action(rl));
                }
            }
        }
    }
    plan
}

/// Teardown plan: stacks in reverse order, resources in reverse record order.
pub fn plan_destroy(
    app: &str,
    stack_order: &[String],
    locks: &HashMap<String, StateLock>,
) -> ExecutionPlan {
    let reversed: Vec<String> = stack_order.iter().rev().cloned().collect();
    let mut plan = empty_plan(app, reversed.clone());
    for name in &reversed {
        let Some(lock) = locks.get(name) else {
            continue;
        };
        for (id, rl) in lock.resources.iter().rev() {
            push(&mut plan, name, id, rl.resource_type, removal_action(rl));
        }
    }
    plan
}

fn removal_action(rl: &ResourceLock) -> PlanAction {
    match rl.details.get(REMOVAL_DETAIL) {
        Some(serde_yaml_ng::Value::String(s)) if s == "retain" => PlanAction::Retain,
        _ => PlanAction::Destroy,
    }
}

fn empty_plan(app: &str, stack_order: Vec<String>) -> ExecutionPlan {
    ExecutionPlan {
        name: app.to_string(),
        changes: Vec::new(),
        stack_order,
        to_create: 0,
        to_update: 0,
        to_destroy: 0,
        to_retain: 0,
        unchanged: 0,
    }
}

fn push(
    plan: &mut ExecutionPlan,
    stack: &str,
    id: &str,
    resource_type: ResourceType,
    action: PlanAction,
) {
    match action {
        PlanAction::Create => plan.to_create += 1,
        PlanAction::Update => plan.to_update += 1,
        PlanAction::Destroy => plan.to_destroy += 1,
        PlanAction::Retain => plan.to_retain += 1,
        PlanAction::NoOp => plan.unchanged += 1,
    }
    let description = describe_action(id, resource_type, &action);
    plan.changes.push(PlannedChange {
        resource_id: id.to_string(),
        stack: stack.to_string(),
        resource_type,
        action,
        description,
    });
}

fn describe_action(id: &str, resource_type: ResourceType, action: &PlanAction) -> String {
    match action {
        PlanAction::Create => format!("{}: create {}", id, resource_type.provider_type()),
        PlanAction::Update => format!("{}: update (descriptor changed)", id),
        PlanAction::Destroy => format!("{}: destroy", id),
        PlanAction::Retain => format!("{}: remove from stack, keep in account", id),
        PlanAction::NoOp => format!("{}: no changes", id),
    }
}
