//! Apply and destroy loops.
//!
//! Apply: synth → write assembly → plan → for each stack in dependency order:
//! check preconditions → record hash → lock → events. The external engine
//! deploys the assembly; recording here tracks what was handed over.

use super::assembly;
use super::codegen::{self, SynthesizedStack, TemplateFormat};
use super::planner::{self, REMOVAL_DETAIL};
use super::resolver;
use super::stack::App;
use super::state;
use super::types::*;
use crate::error::{Error, Result};
use crate::tripwire::eventlog;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

/// Configuration for an apply run.
pub struct ApplyConfig<'a> {
    pub app: &'a App,
    pub policy: &'a Policy,
    pub state_dir: &'a Path,
    /// Assembly output directory
    pub out_dir: &'a Path,
    pub format: TemplateFormat,
    pub force: bool,
    pub dry_run: bool,
    pub stack_filter: Option<&'a str>,
}

/// Configuration for a destroy run.
pub struct DestroyConfig<'a> {
    pub app: &'a App,
    pub policy: &'a Policy,
    pub state_dir: &'a Path,
    pub dry_run: bool,
    pub stack_filter: Option<&'a str>,
}

fn load_locks(state_dir: &Path, names: &[String]) -> Result<HashMap<String, StateLock>> {
    let mut locks = HashMap::new();
    for name in names {
        if let Some(lock) = state::load_lock(state_dir, name)? {
            locks.insert(name.clone(), lock);
        }
    }
    Ok(locks)
}

fn fully_recorded(lock: Option<&StateLock>) -> bool {
    lock.is_some_and(|l| {
        !l.resources.is_empty()
            && l.resources
                .values()
                .all(|r| r.status == ResourceStatus::Converged)
    })
}

/// First change the plan holds for `stack`, if any.
fn pending_change<'p>(plan: &'p ExecutionPlan, stack: &str) -> Option<&'p PlannedChange> {
    plan.changes
        .iter()
        .find(|c| c.stack == stack && c.action != PlanAction::NoOp)
}

fn log_tripwire(state_dir: &Path, stack: &str, tripwire: bool, event: ProvenanceEvent) {
    if tripwire {
        if let Err(e) = eventlog::append_event(state_dir, stack, event) {
            tracing::warn!(stack, error = %e, "cannot append provenance event");
        }
    }
}

fn dry_run_results(plan: &ExecutionPlan, selected: &[String]) -> Vec<ApplyResult> {
    selected
        .iter()
        .map(|name| {
            let count = |action: PlanAction| {
                plan.changes
                    .iter()
                    .filter(|c| &c.stack == name && c.action == action)
                    .count() as u32
            };
            ApplyResult {
                stack: name.clone(),
                resources_recorded: count(PlanAction::Create) + count(PlanAction::Update),
                resources_unchanged: count(PlanAction::NoOp),
                resources_destroyed: count(PlanAction::Destroy),
                resources_retained: count(PlanAction::Retain),
                resources_failed: 0,
                total_duration: std::time::Duration::ZERO,
            }
        })
        .collect()
}

/// Execute the apply loop.
pub fn apply(cfg: &ApplyConfig) -> Result<Vec<ApplyResult>> {
    let synths = codegen::synth_app(cfg.app)?;
    let order: Vec<String> = synths.iter().map(|s| s.name.clone()).collect();
    let mut locks = load_locks(cfg.state_dir, &order)?;
    let plan = planner::plan(&cfg.app.name, &synths, &locks);

    let selected: Vec<String> = match cfg.stack_filter {
        None => order.clone(),
        Some(filter) => {
            cfg.app.stack(filter)?;
            for dep in cfg.app.transitive_dependencies(filter) {
                if !fully_recorded(locks.get(&dep)) {
                    return Err(Error::Other(format!(
                        "stack '{}' depends on '{}', which has not been applied",
                        filter, dep
                    )));
                }
                if let Some(change) = pending_change(&plan, &dep) {
                    return Err(Error::Other(format!(
                        "stack '{}' depends on '{}', which has pending changes ({} {}); apply it first",
                        filter, dep, change.action, change.resource_id
                    )));
                }
            }
            vec![filter.to_string()]
        }
    };

    if cfg.dry_run {
        return Ok(dry_run_results(&plan, &selected));
    }

    let written = match cfg.stack_filter {
        None => assembly::write_assembly(cfg.out_dir, &cfg.app.name, &synths, cfg.format)?,
        Some(_) => assembly::write_partial_assembly(
            cfg.out_dir,
            &cfg.app.name,
            &synths,
            &selected,
            cfg.format,
        )?,
    };

    let mut results = Vec::new();
    let mut incomplete: HashSet<String> = HashSet::new();
    for synth in synths.iter().filter(|s| selected.contains(&s.name)) {
        if let Some(dep) = synth.dependencies.iter().find(|d| incomplete.contains(*d)) {
            tracing::warn!(stack = %synth.name, dependency = %dep, "skipped: dependency did not complete");
            incomplete.insert(synth.name.clone());
            continue;
        }
        let template = written.iter().find(|w| w.stack == synth.name);
        let lock = locks
            .remove(&synth.name)
            .unwrap_or_else(|| state::new_lock(&synth.name));
        let result = apply_stack(cfg, synth, template, &plan, lock)?;
        let failed = result.resources_failed > 0;
        results.push(result);
        if failed {
            incomplete.insert(synth.name.clone());
            if cfg.policy.failure == FailurePolicy::StopOnFirst {
                break;
            }
        }
    }
    Ok(results)
}

/// Shared context for recording resource outcomes.
struct RecordCtx<'a> {
    lock: &'a mut StateLock,
    state_dir: &'a Path,
    stack: &'a str,
    tripwire: bool,
}

fn resource_details(decl: &ResourceDecl) -> HashMap<String, serde_yaml_ng::Value> {
    let removal = match decl.removal {
        RemovalPolicy::Retain => "retain",
        RemovalPolicy::Destroy => "destroy",
    };
    let mut details = HashMap::from([
        (
            REMOVAL_DETAIL.to_string(),
            serde_yaml_ng::Value::String(removal.to_string()),
        ),
        (
            "provider_type".to_string(),
            serde_yaml_ng::Value::String(decl.resource_type.provider_type().to_string()),
        ),
    ]);
    if decl.resource_type == ResourceType::Parameter {
        if let Some(name) = decl.prop_str("Name") {
            details.insert(
                "parameter_name".to_string(),
                serde_yaml_ng::Value::String(name.to_string()),
            );
        }
    }
    details
}

fn record_success(ctx: &mut RecordCtx, id: &str, decl: &ResourceDecl, hash: String, action: &PlanAction) {
    ctx.lock.resources.insert(
        id.to_string(),
        ResourceLock {
            resource_type: decl.resource_type,
            status: ResourceStatus::Converged,
            applied_at: Some(eventlog::now_iso8601()),
            hash: hash.clone(),
            details: resource_details(decl),
        },
    );
    log_tripwire(
        ctx.state_dir,
        ctx.stack,
        ctx.tripwire,
        ProvenanceEvent::ResourceRecorded {
            stack: ctx.stack.to_string(),
            resource: id.to_string(),
            action: action.to_string().to_lowercase(),
            hash,
        },
    );
}

fn record_failure(ctx: &mut RecordCtx, id: &str, decl: &ResourceDecl, error: &str) {
    tracing::error!(stack = ctx.stack, resource = id, error, "resource failed");
    ctx.lock.resources.insert(
        id.to_string(),
        ResourceLock {
            resource_type: decl.resource_type,
            status: ResourceStatus::Failed,
            applied_at: Some(eventlog::now_iso8601()),
            hash: String::new(),
            details: resource_details(decl),
        },
    );
    log_tripwire(
        ctx.state_dir,
        ctx.stack,
        ctx.tripwire,
        ProvenanceEvent::ResourceFailed {
            stack: ctx.stack.to_string(),
            resource: id.to_string(),
            error: error.to_string(),
        },
    );
}

/// Preconditions for recording a resource: its dependencies did not fail,
/// and function code it points at is staged in the assembly.
fn check_resource(
    out_dir: &Path,
    decl: &ResourceDecl,
    deps: &[String],
    failed: &HashSet<String>,
) -> std::result::Result<(), String> {
    if let Some(dep) = deps.iter().find(|d| failed.contains(*d)) {
        return Err(format!("dependency '{}' failed", dep));
    }
    let code = match decl.resource_type {
        ResourceType::Function => decl.properties.get("Code"),
        ResourceType::LayerVersion => decl.properties.get("Content"),
        _ => None,
    };
    if let Some(key) = code.and_then(|c| c.get("S3Key")).and_then(|k| k.as_str()) {
        let staged = out_dir.join(format!("asset.{}", key));
        if !staged.exists() {
            return Err(format!("asset archive {} is not staged", staged.display()));
        }
    }
    Ok(())
}

fn apply_stack(
    cfg: &ApplyConfig,
    synth: &SynthesizedStack,
    template: Option<&assembly::WrittenTemplate>,
    plan: &ExecutionPlan,
    mut lock: StateLock,
) -> Result<ApplyResult> {
    let stack_start = Instant::now();
    let run_id = eventlog::generate_run_id();
    let tripwire = cfg.policy.tripwire;
    let stack = synth.name.as_str();

    log_tripwire(
        cfg.state_dir,
        stack,
        tripwire,
        ProvenanceEvent::ApplyStarted {
            stack: stack.to_string(),
            run_id: run_id.clone(),
            wwapi_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    );

    if let Some(t) = template {
        let path = std::fs::canonicalize(&t.path).map_err(|e| Error::io("resolve", &t.path, e))?;
        lock.template_path = Some(path.display().to_string());
        lock.template_hash = Some(t.hash.clone());
    }

    let mut deps: HashMap<String, Vec<String>> = HashMap::new();
    for (dep, id) in resolver::resource_edges(&synth.resources)? {
        deps.entry(id).or_default().push(dep);
    }

    let mut result = ApplyResult {
        stack: stack.to_string(),
        resources_recorded: 0,
        resources_unchanged: 0,
        resources_destroyed: 0,
        resources_retained: 0,
        resources_failed: 0,
        total_duration: std::time::Duration::ZERO,
    };
    let mut failed: HashSet<String> = HashSet::new();
    let mut ctx = RecordCtx {
        lock: &mut lock,
        state_dir: cfg.state_dir,
        stack,
        tripwire,
    };

    for change in plan.changes.iter().filter(|c| c.stack == stack) {
        let id = change.resource_id.as_str();
        match change.action {
            PlanAction::NoOp if !cfg.force => result.resources_unchanged += 1,
            PlanAction::Create | PlanAction::Update | PlanAction::NoOp => {
                let (Some(decl), Some(entry)) = (synth.resources.get(id), synth.resource_template(id))
                else {
                    continue;
                };
                let resource_deps = deps.get(id).map(Vec::as_slice).unwrap_or_default();
                match check_resource(cfg.out_dir, decl, resource_deps, &failed) {
                    Ok(()) => {
                        let hash = planner::hash_desired_state(entry);
                        record_success(&mut ctx, id, decl, hash, &change.action);
                        result.resources_recorded += 1;
                    }
                    Err(error) => {
                        record_failure(&mut ctx, id, decl, &error);
                        failed.insert(id.to_string());
                        result.resources_failed += 1;
                        if cfg.policy.failure == FailurePolicy::StopOnFirst {
                            tracing::error!(stack, resource = id, "stopping after first failure");
                            break;
                        }
                    }
                }
            }
            PlanAction::Destroy | PlanAction::Retain => {
                let retained = change.action == PlanAction::Retain;
                ctx.lock.resources.shift_remove(id);
                if retained {
                    result.resources_retained += 1;
                } else {
                    result.resources_destroyed += 1;
                }
                log_tripwire(
                    cfg.state_dir,
                    stack,
                    tripwire,
                    ProvenanceEvent::ResourceDestroyed {
                        stack: stack.to_string(),
                        resource: id.to_string(),
                        retained,
                    },
                );
            }
        }
    }

    let position: HashMap<&str, usize> = synth
        .order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let rank = |k: &String| position.get(k.as_str()).copied().unwrap_or(usize::MAX);
    lock.resources.sort_by(|k1, _, k2, _| rank(k1).cmp(&rank(k2)));
    lock.generated_at = eventlog::now_iso8601();
    if cfg.policy.lock_file {
        state::save_lock(cfg.state_dir, &lock)?;
    }

    result.total_duration = stack_start.elapsed();
    log_tripwire(
        cfg.state_dir,
        stack,
        tripwire,
        ProvenanceEvent::ApplyCompleted {
            stack: stack.to_string(),
            run_id,
            resources_recorded: result.resources_recorded,
            resources_unchanged: result.resources_unchanged,
            resources_destroyed: result.resources_destroyed,
            resources_failed: result.resources_failed,
            total_seconds: result.total_duration.as_secs_f64(),
        },
    );
    tracing::info!(
        stack,
        recorded = result.resources_recorded,
        unchanged = result.resources_unchanged,
        failed = result.resources_failed,
        "apply complete"
    );
    Ok(result)
}

/// Tear down recorded stacks in reverse dependency order.
///
/// A single stack cannot be destroyed while a stack depending on it is
/// still recorded.
pub fn destroy(cfg: &DestroyConfig) -> Result<Vec<ApplyResult>> {
    let order = resolver::build_stack_order(cfg.app)?;
    let locks = load_locks(cfg.state_dir, &order)?;

    let selected: Vec<String> = match cfg.stack_filter {
        None => order,
        Some(filter) => {
            cfg.app.stack(filter)?;
            for dependent in cfg.app.dependents_of(filter) {
                if locks.get(&dependent).is_some_and(|l| !l.resources.is_empty()) {
                    return Err(Error::Other(format!(
                        "stack '{}' is still required by recorded stack '{}'; destroy it first",
                        filter, dependent
                    )));
                }
            }
            vec![filter.to_string()]
        }
    };

    let plan = planner::plan_destroy(&cfg.app.name, &selected, &locks);
    if cfg.dry_run {
        return Ok(dry_run_results(&plan, &plan.stack_order));
    }

    let mut results = Vec::new();
    for name in &plan.stack_order {
        let start = Instant::now();
        let mut result = ApplyResult {
            stack: name.clone(),
            resources_recorded: 0,
            resources_unchanged: 0,
            resources_destroyed: 0,
            resources_retained: 0,
            resources_failed: 0,
            total_duration: std::time::Duration::ZERO,
        };
        for change in plan.changes.iter().filter(|c| &c.stack == name) {
            let retained = change.action == PlanAction::Retain;
            if retained {
                result.resources_retained += 1;
            } else {
                result.resources_destroyed += 1;
            }
            log_tripwire(
                cfg.state_dir,
                name,
                cfg.policy.tripwire,
                ProvenanceEvent::ResourceDestroyed {
                    stack: name.clone(),
                    resource: change.resource_id.clone(),
                    retained,
                },
            );
        }
        state::remove_lock(cfg.state_dir, name)?;
        result.total_duration = start.elapsed();
        tracing::info!(
            stack = %name,
            destroyed = result.resources_destroyed,
            retained = result.resources_retained,
            "destroy complete"
        );
        results.push(result);
    }
    Ok(results)
}
