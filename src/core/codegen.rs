//! Template synthesis.
//!
//! Grants are compiled into role policies, resources that run as a role wait
//! for that role's policy, and each stack becomes one provider template.

use super::intrinsic;
use super::resolver;
use super::stack::{App, Stack};
use super::types::{Asset, RemovalPolicy, ResourceDecl};
use crate::error::{Error, Result};
use crate::resources::iam;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Template output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemplateFormat {
    #[default]
    Json,
    Yaml,
}

impl TemplateFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

/// A stack rendered to a template.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedStack {
    pub name: String,
    pub template: Value,
    /// Declared resources plus compiled policies
    pub resources: IndexMap<String, ResourceDecl>,
    /// Resource topological order
    pub order: Vec<String>,
    pub dependencies: Vec<String>,
    pub assets: Vec<Asset>,
}

impl SynthesizedStack {
    /// Template entry of one resource.
    pub fn resource_template(&self, id: &str) -> Option<&Value> {
        self.template.get("Resources").and_then(|r| r.get(id))
    }

    pub fn file_name(&self, format: TemplateFormat) -> String {
        format!("{}.template.{}", self.name, format.extension())
    }
}

/// Declared resources with grant policies added and policy ordering applied.
pub fn complete_resources(stack: &Stack) -> Result<IndexMap<String, ResourceDecl>> {
    let mut resources = stack.resources.clone();
    let policies = iam::compile_grants(stack)?;

    let mut policy_of_role: IndexMap<String, String> = IndexMap::new();
    for (policy_id, decl) in &policies {
        let roles = decl.properties.get("Roles").map(intrinsic::references);
        for role in roles.unwrap_or_default() {
            policy_of_role.insert(role, policy_id.clone());
        }
    }

    for decl in resources.values_mut() {
        let refs = intrinsic::references(&Value::Object(decl.properties.clone()));
        let mut waits: Vec<&String> = refs.iter().filter_map(|r| policy_of_role.get(r)).collect();
        waits.sort();
        for policy in waits {
            if !decl.depends_on.contains(policy) {
                decl.depends_on.push(policy.clone());
            }
        }
    }

    for (id, decl) in policies {
        if resources.contains_key(&id) {
            return Err(Error::Duplicate {
                kind: "resource",
                name: format!("{}/{}", stack.name, id),
            });
        }
        resources.insert(id, decl);
    }
    Ok(resources)
}

/// Template entry of one resource descriptor.
pub fn resource_entry(decl: &ResourceDecl) -> Value {
    let mut entry = Map::new();
    entry.insert("Type".to_string(), json!(decl.resource_type.provider_type()));
    if !decl.properties.is_empty() {
        entry.insert("Properties".to_string(), Value::Object(decl.properties.clone()));
    }
    if !decl.depends_on.is_empty() {
        let mut deps = decl.depends_on.clone();
        deps.sort();
        entry.insert("DependsOn".to_string(), json!(deps));
    }
    if decl.removal == RemovalPolicy::Retain {
        let policy = json!(decl.removal.provider_name());
        entry.insert("DeletionPolicy".to_string(), policy.clone());
        entry.insert("UpdateReplacePolicy".to_string(), policy);
    }
    Value::Object(entry)
}

pub fn synth_stack(stack: &Stack) -> Result<SynthesizedStack> {
    let resources = complete_resources(stack)?;
    let order = resolver::build_resource_order(&resources)?;

    let mut template_resources = Map::new();
    for id in &order {
        if let Some(decl) = resources.get(id) {
            template_resources.insert(id.clone(), resource_entry(decl));
        }
    }

    let mut template = Map::new();
    template.insert(
        "AWSTemplateFormatVersion".to_string(),
        json!(TEMPLATE_FORMAT_VERSION),
    );
    if let Some(description) = &stack.description {
        template.insert("Description".to_string(), json!(description));
    }
    template.insert("Resources".to_string(), Value::Object(template_resources));

    if !stack.outputs.is_empty() {
        let mut outputs = Map::new();
        for (id, output) in &stack.outputs {
            let mut entry = Map::new();
            entry.insert("Value".to_string(), output.value.clone());
            if let Some(description) = &output.description {
                entry.insert("Description".to_string(), json!(description));
            }
            if let Some(export) = &output.export_name {
                entry.insert("Export".to_string(), json!({ "Name": export }));
            }
            outputs.insert(id.clone(), Value::Object(entry));
        }
        template.insert("Outputs".to_string(), Value::Object(outputs));
    }

    tracing::debug!(stack = %stack.name, resources = order.len(), "synthesized");
    Ok(SynthesizedStack {
        name: stack.name.clone(),
        template: Value::Object(template),
        resources,
        order,
        dependencies: stack.dependencies.clone(),
        assets: stack.assets.clone(),
    })
}

/// Synthesize every stack, in stack dependency order.
pub fn synth_app(app: &App) -> Result<Vec<SynthesizedStack>> {
    resolver::build_stack_order(app)?
        .iter()
        .map(|name| app.stack(name).and_then(synth_stack))
        .collect()
}

/// Render a template. Output is stable for equal templates.
pub fn render(template: &Value, format: TemplateFormat) -> Result<String> {
    match format {
        TemplateFormat::Json => {
            let mut text = serde_json::to_string_pretty(template)?;
            text.push('\n');
            Ok(text)
        }
        TemplateFormat::Yaml => Ok(serde_yaml_ng::to_string(template)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Access, GrantTarget, ResourceType};
    use crate::resources::iam::{service_role, BASIC_EXECUTION};

    fn stack() -> Stack {
        let mut stack = Stack::new("S");
        stack.description = Some("test stack".to_string());
        stack
            .add("Role", service_role("lambda.amazonaws.com", None, &[BASIC_EXECUTION]))
            .unwrap();
        stack
            .add(
                "Fn",
                ResourceDecl::new(
                    ResourceType::Function,
                    json!({"Role": intrinsic::get_att("Role", "Arn")}),
                ),
            )
            .unwrap();
        stack
            .add(
                "Logs",
                ResourceDecl::new(ResourceType::LogGroup, json!({"RetentionInDays": 1})).retain(),
            )
            .unwrap();
        stack.grant("Fn", GrantTarget::Any, Access::Decrypt);
        stack.add_output("FnArn", intrinsic::get_att("Fn", "Arn"), Some("arn"), Some("FnArn"));
        stack
    }

    #[test]
    fn test_codegen_policy_compiled_and_awaited() {
        let synth = synth_stack(&stack()).unwrap();
        assert!(synth.resources.contains_key("RoleDefaultPolicy"));
        assert_eq!(synth.resources["Fn"].depends_on, vec!["RoleDefaultPolicy"]);
        let pos = |id: &str| synth.order.iter().position(|o| o == id).unwrap();
        assert!(pos("Role") < pos("RoleDefaultPolicy"));
        assert!(pos("RoleDefaultPolicy") < pos("Fn"));
    }

    #[test]
    fn test_codegen_template_shape() {
        let synth = synth_stack(&stack()).unwrap();
        let t = &synth.template;
        assert_eq!(t["AWSTemplateFormatVersion"], TEMPLATE_FORMAT_VERSION);
        assert_eq!(t["Description"], "test stack");
        assert_eq!(t["Resources"]["Fn"]["Type"], "AWS::Lambda::Function");
        assert_eq!(t["Resources"]["Fn"]["DependsOn"], json!(["RoleDefaultPolicy"]));
        assert_eq!(t["Resources"]["Logs"]["DeletionPolicy"], "Retain");
        assert!(t["Resources"]["Role"].get("DeletionPolicy").is_none());
        assert_eq!(t["Outputs"]["FnArn"]["Export"]["Name"], "FnArn");
        assert!(synth.resource_template("Logs").is_some());
    }

    #[test]
    fn test_codegen_policy_id_collision() {
        let mut s = stack();
        s.add("RoleDefaultPolicy", ResourceDecl::new(ResourceType::Policy, json!({})))
            .unwrap();
        assert!(matches!(synth_stack(&s), Err(Error::Duplicate { .. })));
    }

    #[test]
    fn test_codegen_render_stable() {
        let a = render(&synth_stack(&stack()).unwrap().template, TemplateFormat::Json).unwrap();
        let b = render(&synth_stack(&stack()).unwrap().template, TemplateFormat::Json).unwrap();
        assert_eq!(a, b);
        assert!(a.ends_with('\n'));
        let yaml = render(&synth_stack(&stack()).unwrap().template, TemplateFormat::Yaml).unwrap();
        assert!(yaml.contains("AWSTemplateFormatVersion"));
    }

    #[test]
    fn test_codegen_app_in_stack_order() {
        let mut app = App::new("wwapi");
        app.add_stack(Stack::new("Front")).unwrap();
        app.add_stack(stack()).unwrap();
        app.add_dependency("Front", "S").unwrap();
        let synths = synth_app(&app).unwrap();
        let names: Vec<_> = synths.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["S", "Front"]);
        assert_eq!(synths[1].dependencies, vec!["S"]);
        assert_eq!(synths[1].file_name(TemplateFormat::Yaml), "Front.template.yaml");
    }
}
