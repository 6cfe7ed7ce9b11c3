//! Drift detection: compare written templates to lock hashes.
//!
//! Two levels: the template file as a whole against `template_hash`, then
//! each recorded resource's template entry against its lock hash.

use crate::core::planner;
use crate::core::types::{ResourceStatus, ResourceType, StateLock};
use crate::tripwire::hasher;
use std::path::Path;

/// Pseudo resource id for whole-template findings.
pub const TEMPLATE_ID: &str = "<template>";

/// A single drift finding.
#[derive(Debug, Clone)]
pub struct DriftFinding {
    pub stack: String,
    pub resource_id: String,
    pub resource_type: Option<ResourceType>,
    pub expected_hash: String,
    pub actual_hash: String,
    pub detail: String,
}

/// Check a written template file against its recorded hash.
pub fn check_template_drift(stack: &str, path: &str, expected_hash: &str) -> Option<DriftFinding> {
    let file_path = Path::new(path);
    let finding = |actual: String, detail: String| DriftFinding {
        stack: stack.to_string(),
        resource_id: TEMPLATE_ID.to_string(),
        resource_type: None,
        expected_hash: expected_hash.to_string(),
        actual_hash: actual,
        detail,
    };
    if !file_path.exists() {
        return Some(finding(
            "MISSING".to_string(),
            format!("{} does not exist", path),
        ));
    }
    let actual = hasher::hash_file(file_path).unwrap_or_else(|e| format!("ERROR:{}", e));
    if actual != expected_hash {
        Some(finding(actual, format!("{} content changed", path)))
    } else {
        None
    }
}

fn parse_template(path: &Path) -> Option<serde_json::Value> {
    let text = std::fs::read_to_string(path).ok()?;
    let parsed = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&text).ok()
    } else {
        serde_yaml_ng::from_str(&text).ok()
    };
    if parsed.is_none() {
        tracing::warn!(path = %path.display(), "template is not parseable");
    }
    parsed
}

/// Check every converged or previously drifted resource in a lock against
/// the template on disk.
pub fn detect_drift(lock: &StateLock) -> Vec<DriftFinding> {
    let mut findings = Vec::new();
    let (Some(path), Some(expected)) = (&lock.template_path, &lock.template_hash) else {
        return findings;
    };
    if let Some(finding) = check_template_drift(&lock.stack, path, expected) {
        findings.push(finding);
    }
    let Some(template) = parse_template(Path::new(path)) else {
        return findings;
    };

    for (id, rl) in &lock.resources {
        if !matches!(rl.status, ResourceStatus::Converged | ResourceStatus::Drifted) {
            continue;
        }
        let entry = template.get("Resources").and_then(|r| r.get(id));
        let (actual, detail) = match entry {
            None => ("MISSING".to_string(), "removed from template".to_string()),
            Some(entry) => {
                let hash = planner::hash_desired_state(entry);
                if hash == rl.hash {
                    continue;
                }
                (hash, "template entry changed".to_string())
            }
        };
        findings.push(DriftFinding {
            stack: lock.stack.clone(),
            resource_id: id.clone(),
            resource_type: Some(rl.resource_type),
            expected_hash: rl.hash.clone(),
            actual_hash: actual,
            detail,
        });
    }
    findings
}

/// Mark the resources named by `findings` as drifted so the next plan
/// re-records them. Returns how many entries changed status.
pub fn mark_drifted(lock: &mut StateLock, findings: &[DriftFinding]) -> usize {
    let mut marked = 0;
    for finding in findings {
        if let Some(rl) = lock.resources.get_mut(&finding.resource_id) {
            if rl.status != ResourceStatus::Drifted {
                rl.status = ResourceStatus::Drifted;
                marked += 1;
            }
        }
    }
    marked
}
