//! Provisioning units (stacks) and the app that composes them.
//!
//! A [`Stack`] owns its resource descriptors, permission grants, imported
//! parameters, assets, and outputs. An [`App`] owns the stacks and the
//! cross-stack dependency edges.

use super::types::*;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// A named collection of resource declarations deployed together.
#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    pub name: String,
    pub description: Option<String>,
    pub resources: IndexMap<String, ResourceDecl>,
    pub grants: Vec<Grant>,
    /// Parameter names read from other stacks
    pub imported_parameters: Vec<String>,
    pub assets: Vec<Asset>,
    pub outputs: IndexMap<String, StackOutput>,
    /// Stacks that must be fully provisioned first
    pub dependencies: Vec<String>,
}

impl Stack {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            resources: IndexMap::new(),
            grants: Vec::new(),
            imported_parameters: Vec::new(),
            assets: Vec::new(),
            outputs: IndexMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Add a resource under a logical id. Ids are unique per stack.
    pub fn add(&mut self, id: &str, decl: ResourceDecl) -> Result<()> {
        if self.resources.contains_key(id) {
            return Err(Error::Duplicate {
                kind: "resource",
                name: format!("{}/{}", self.name, id),
            });
        }
        tracing::trace!(stack = %self.name, resource = id, kind = %decl.resource_type, "declare");
        self.resources.insert(id.to_string(), decl);
        Ok(())
    }

    pub fn grant(&mut self, principal: &str, target: GrantTarget, access: Access) {
        let grant = Grant {
            principal: principal.to_string(),
            target,
            access,
        };
        if !self.grants.contains(&grant) {
            self.grants.push(grant);
        }
    }

    /// Reference a parameter written by another stack.
    pub fn import_parameter(&mut self, name: &str) -> GrantTarget {
        if !self.imported_parameters.iter().any(|p| p == name) {
            self.imported_parameters.push(name.to_string());
        }
        GrantTarget::ImportedParameter(name.to_string())
    }

    /// Register an asset. Assets with the same id are shared.
    pub fn add_asset(&mut self, asset: Asset) -> Asset {
        if let Some(existing) = self.assets.iter().find(|a| a.id == asset.id) {
            return existing.clone();
        }
        self.assets.push(asset.clone());
        asset
    }

    pub fn add_output(
        &mut self,
        id: &str,
        value: serde_json::Value,
        description: Option<&str>,
        export_name: Option<&str>,
    ) {
        self.outputs.insert(
            id.to_string(),
            StackOutput {
                value,
                description: description.map(str::to_string),
                export_name: export_name.map(str::to_string),
            },
        );
    }

    pub fn resource(&self, id: &str) -> Option<&ResourceDecl> {
        self.resources.get(id)
    }

    pub fn resources_of(
        &self,
        resource_type: ResourceType,
    ) -> impl Iterator<Item = (&String, &ResourceDecl)> {
        self.resources
            .iter()
            .filter(move |(_, d)| d.resource_type == resource_type)
    }

    /// Names of the parameters this stack writes.
    pub fn written_parameters(&self) -> Vec<String> {
        self.resources_of(ResourceType::Parameter)
            .filter_map(|(_, d)| d.prop_str("Name").map(str::to_string))
            .collect()
    }

    /// Role that receives grants made to `principal`: the role itself, or
    /// the execution role of a function.
    pub fn role_of(&self, principal: &str) -> Option<String> {
        let decl = self.resources.get(principal)?;
        match decl.resource_type {
            ResourceType::Role => Some(principal.to_string()),
            ResourceType::Function => {
                let role = decl.properties.get("Role")?;
                let parts = role.get("Fn::GetAtt")?.as_array()?;
                parts.first()?.as_str().map(str::to_string)
            }
            _ => None,
        }
    }
}

/// The composition of all stacks.
#[derive(Debug, Clone, PartialEq)]
pub struct App {
    pub name: String,
    pub stacks: IndexMap<String, Stack>,
}

impl App {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stacks: IndexMap::new(),
        }
    }

    pub fn add_stack(&mut self, stack: Stack) -> Result<()> {
        if self.stacks.contains_key(&stack.name) {
            return Err(Error::Duplicate {
                kind: "stack",
                name: stack.name,
            });
        }
        self.stacks.insert(stack.name.clone(), stack);
        Ok(())
    }

    /// Declare that `dependent` must not be provisioned before `dependency`
    /// has completed.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> Result<()> {
        if !self.stacks.contains_key(dependency) {
            return Err(Error::unknown("stack", dependency));
        }
        let stack = self
            .stacks
            .get_mut(dependent)
            .ok_or_else(|| Error::unknown("stack", dependent))?;
        if !stack.dependencies.iter().any(|d| d == dependency) {
            stack.dependencies.push(dependency.to_string());
        }
        Ok(())
    }

    pub fn stack(&self, name: &str) -> Result<&Stack> {
        self.stacks
            .get(name)
            .ok_or_else(|| Error::unknown("stack", name))
    }

    /// Every stack `name` depends on, directly or transitively.
    pub fn transitive_dependencies(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut pending: Vec<&str> = vec![name];
        while let Some(current) = pending.pop() {
            let Some(stack) = self.stacks.get(current) else {
                continue;
            };
            for dep in &stack.dependencies {
                if seen.insert(dep.clone()) {
                    pending.push(dep);
                }
            }
        }
        seen
    }

    /// Stacks that depend on `name` directly.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.stacks
            .values()
            .filter(|s| s.dependencies.iter().any(|d| d == name))
            .map(|s| s.name.clone())
            .collect()
    }
}
