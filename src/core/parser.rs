//! YAML parsing and validation.
//!
//! Parses `wwapi.yaml` and validates two layers:
//! - configuration values (version, node counts, zone counts, task sizes)
//! - the built resource graph (grants, imported parameters, references,
//!   orders, parameter sizes, identifier formats)

use super::codegen;
use super::resolver;
use super::stack::{App, Stack};
use super::types::*;
use crate::error::{Error, Result};
use crate::resources::parameter;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static LOGICAL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]{0,254}$").expect("static pattern"));

static PARAMETER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-/]+$").expect("static pattern"));

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a wwapi.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<WwapiConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
    parse_config(&content)
}

/// Parse a wwapi.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<WwapiConfig> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// Turn collected errors into a result.
pub fn into_result(errors: Vec<ValidationError>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}

/// Fargate task sizes: CPU units and the memory values allowed with them.
fn fargate_memory_allowed(cpu: u32, memory: u32) -> bool {
    match cpu {
        256 => matches!(memory, 512 | 1024 | 2048),
        512 => (1024..=4096).contains(&memory) && memory % 1024 == 0,
        1024 => (2048..=8192).contains(&memory) && memory % 1024 == 0,
        2048 => (4096..=16384).contains(&memory) && memory % 1024 == 0,
        4096 => (8192..=30720).contains(&memory) && memory % 1024 == 0,
        _ => false,
    }
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &WwapiConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError::new(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        )));
    }
    if config.name.is_empty() {
        errors.push(ValidationError::new("name must not be empty"));
    }

    let backend = &config.backend;
    let frontend = &config.frontend;
    for (field, name) in [
        ("backend.stack_name", &backend.stack_name),
        ("frontend.stack_name", &frontend.stack_name),
    ] {
        if !LOGICAL_ID.is_match(name) {
            errors.push(ValidationError::new(format!(
                "{} '{}' must be alphanumeric and start with a letter",
                field, name
            )));
        }
    }
    if backend.stack_name == frontend.stack_name {
        errors.push(ValidationError::new(format!(
            "backend and frontend share stack name '{}'",
            backend.stack_name
        )));
    }

    let search = &backend.search;
    if search.data_nodes == 0 {
        errors.push(ValidationError::new("search.data_nodes must be at least 1"));
    }
    if search.master_nodes == 1 {
        errors.push(ValidationError::new(
            "search.master_nodes must be 0 (none) or at least 2",
        ));
    }
    if search.volume_size_gb == 0 {
        errors.push(ValidationError::new("search.volume_size_gb must be at least 1"));
    }
    if search.zone_awareness && !(2..=3).contains(&search.availability_zone_count) {
        errors.push(ValidationError::new(format!(
            "search.availability_zone_count must be 2 or 3 with zone awareness, got {}",
            search.availability_zone_count
        )));
    }
    let credentials = &search.credentials;
    if credentials.username.is_empty() {
        errors.push(ValidationError::new("search.credentials.username must not be empty"));
    }
    match credentials.source {
        CredentialSource::Plaintext => {
            if credentials.password.as_deref().unwrap_or_default().is_empty() {
                errors.push(ValidationError::new(
                    "search.credentials.password is required with source: plaintext",
                ));
            }
        }
        CredentialSource::Secret => {
            if credentials.secret_name.is_empty() {
                errors.push(ValidationError::new(
                    "search.credentials.secret_name must not be empty",
                ));
            }
        }
    }

    let indexes = &backend.indexes;
    for (field, name) in [
        ("indexes.paths.name", &indexes.paths.name),
        ("indexes.components.name", &indexes.components.name),
        ("indexes.vector.name", &indexes.vector.name),
        ("indexes.vector_paths", &indexes.vector_paths),
        ("indexes.vector_components", &indexes.vector_components),
    ] {
        if name.is_empty() {
            errors.push(ValidationError::new(format!("{} must not be empty", field)));
        }
    }

    if backend.functions.timeout_seconds == 0 || backend.functions.timeout_seconds > 900 {
        errors.push(ValidationError::new(format!(
            "functions.timeout_seconds must be within 1..=900, got {}",
            backend.functions.timeout_seconds
        )));
    }
    if backend.api.stage.is_empty() {
        errors.push(ValidationError::new("api.stage must not be empty"));
    }

    if !(1..=6).contains(&frontend.max_azs) {
        errors.push(ValidationError::new(format!(
            "frontend.max_azs must be within 1..=6, got {}",
            frontend.max_azs
        )));
    }
    if let Some(nat) = frontend.nat_gateways {
        if nat > frontend.max_azs {
            errors.push(ValidationError::new(format!(
                "frontend.nat_gateways ({}) exceeds max_azs ({})",
                nat, frontend.max_azs
            )));
        }
    }
    if !fargate_memory_allowed(frontend.cpu, frontend.memory_mib) {
        errors.push(ValidationError::new(format!(
            "frontend cpu {} with memory {} MiB is not a valid task size",
            frontend.cpu, frontend.memory_mib
        )));
    }
    if frontend.desired_count == 0 {
        errors.push(ValidationError::new("frontend.desired_count must be at least 1"));
    }
    if frontend.container_port == 0 || frontend.listener_port == 0 {
        errors.push(ValidationError::new("frontend ports must be non-zero"));
    }

    errors
}

/// Validate a built resource graph. Returns a list of errors (empty = valid).
pub fn validate_app(app: &App) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Err(e) = resolver::build_stack_order(app) {
        errors.push(ValidationError::new(format!("stack order: {}", e)));
    }

    for stack in app.stacks.values() {
        validate_stack(stack, &mut errors);
        validate_imports(app, stack, &mut errors);
    }
    errors
}

fn validate_stack(stack: &Stack, errors: &mut Vec<ValidationError>) {
    let name = &stack.name;
    let reported = errors.len();

    for (id, decl) in &stack.resources {
        if !LOGICAL_ID.is_match(id) {
            errors.push(ValidationError::new(format!(
                "{}: logical id '{}' must be alphanumeric and start with a letter",
                name, id
            )));
        }
        if decl.depends_on.iter().any(|d| d == id) {
            errors.push(ValidationError::new(format!(
                "{}: resource '{}' depends on itself",
                name, id
            )));
        }
        if decl.resource_type == ResourceType::Parameter {
            validate_parameter(name, id, decl, errors);
        }
    }

    if let Err(e) = resolver::build_resource_order(&stack.resources) {
        errors.push(ValidationError::new(format!("{}: {}", name, e)));
    }

    for grant in &stack.grants {
        if stack.role_of(&grant.principal).is_none() {
            errors.push(ValidationError::new(format!(
                "{}: grant principal '{}' is not a role or function",
                name, grant.principal
            )));
        }
        match &grant.target {
            GrantTarget::Resource(id) if stack.resource(id).is_none() => {
                errors.push(ValidationError::new(format!(
                    "{}: grant to '{}' targets unknown resource '{}'",
                    name, grant.principal, id
                )));
            }
            GrantTarget::ImportedParameter(param)
                if !stack.imported_parameters.contains(param) =>
            {
                errors.push(ValidationError::new(format!(
                    "{}: grant to '{}' targets parameter '{}' that is not imported",
                    name, grant.principal, param
                )));
            }
            _ => {}
        }
    }

    for id in stack.outputs.keys() {
        if !LOGICAL_ID.is_match(id) {
            errors.push(ValidationError::new(format!(
                "{}: output id '{}' must be alphanumeric",
                name, id
            )));
        }
    }

    // Compiled role policies add resources and edges of their own.
    if errors.len() == reported {
        let completed = codegen::complete_resources(stack)
            .and_then(|resources| resolver::build_resource_order(&resources));
        if let Err(e) = completed {
            errors.push(ValidationError::new(format!(
                "{}: with compiled grants: {}",
                name, e
            )));
        }
    }
}

fn validate_parameter(
    stack: &str,
    id: &str,
    decl: &ResourceDecl,
    errors: &mut Vec<ValidationError>,
) {
    match decl.prop_str("Name") {
        Some(param) if PARAMETER_NAME.is_match(param) => {}
        Some(param) => errors.push(ValidationError::new(format!(
            "{}: parameter '{}' has invalid name '{}'",
            stack, id, param
        ))),
        None => errors.push(ValidationError::new(format!(
            "{}: parameter '{}' has no name",
            stack, id
        ))),
    }
    if let Some(value) = parameter::literal_value(decl) {
        let tier = parameter::tier_of(decl);
        if value.len() > tier.max_bytes() {
            errors.push(ValidationError::new(format!(
                "{}: parameter '{}' value is {} bytes, {} tier allows {}",
                stack,
                id,
                value.len(),
                tier.provider_name(),
                tier.max_bytes()
            )));
        }
    }
}

/// Every imported parameter must be written by a stack this one depends on.
fn validate_imports(app: &App, stack: &Stack, errors: &mut Vec<ValidationError>) {
    let upstream = app.transitive_dependencies(&stack.name);
    for param in &stack.imported_parameters {
        let writer = app
            .stacks
            .values()
            .find(|s| s.written_parameters().contains(param));
        match writer {
            None => errors.push(ValidationError::new(format!(
                "{}: imported parameter '{}' is not written by any stack",
                stack.name, param
            ))),
            Some(w) if !upstream.contains(&w.name) => {
                errors.push(ValidationError::new(format!(
                    "{}: imported parameter '{}' is written by '{}', which is not a dependency",
                    stack.name, param, w.name
                )))
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::intrinsic;
    use crate::resources::parameter::{string_parameter, ParameterTier};
    use serde_json::json;

    fn config(extra: &str) -> WwapiConfig {
        parse_config(&format!("version: \"1.0\"\nname: wwapi\n{}", extra)).unwrap()
    }

    fn messages(errors: &[ValidationError]) -> Vec<String> {
        errors.iter().map(|e| e.message.clone()).collect()
    }

    #[test]
    fn test_parser_default_config_valid() {
        let errors = validate_config(&config(""));
        assert!(errors.is_empty(), "unexpected errors: {:?}", messages(&errors));
    }

    #[test]
    fn test_parser_bad_version() {
        let mut c = config("");
        c.version = "2.0".to_string();
        let errors = validate_config(&c);
        assert!(errors.iter().any(|e| e.message.contains("version")));
    }

    #[test]
    fn test_parser_plaintext_needs_password() {
        let c = config("backend:\n  search:\n    credentials:\n      source: plaintext\n");
        let errors = validate_config(&c);
        assert!(errors.iter().any(|e| e.message.contains("password is required")));
    }

    #[test]
    fn test_parser_collects_all_errors() {
        let c = config(
            "frontend:\n  max_azs: 0\n  cpu: 256\n  memory_mib: 4096\nbackend:\n  search:\n    master_nodes: 1\n",
        );
        let errors = messages(&validate_config(&c));
        assert_eq!(errors.len(), 3, "{:?}", errors);
        assert!(errors.iter().any(|m| m.contains("max_azs")));
        assert!(errors.iter().any(|m| m.contains("task size")));
        assert!(errors.iter().any(|m| m.contains("master_nodes")));
    }

    #[test]
    fn test_parser_nat_exceeds_azs() {
        let c = config("frontend:\n  max_azs: 2\n  nat_gateways: 3\n");
        assert!(validate_config(&c)
            .iter()
            .any(|e| e.message.contains("exceeds max_azs")));
    }

    #[test]
    fn test_parser_fargate_sizes() {
        assert!(fargate_memory_allowed(256, 512));
        assert!(!fargate_memory_allowed(256, 3072));
        assert!(fargate_memory_allowed(1024, 4096));
        assert!(!fargate_memory_allowed(1024, 4000));
        assert!(!fargate_memory_allowed(300, 1024));
    }

    #[test]
    fn test_parser_invalid_yaml() {
        assert!(parse_config("version: [").is_err());
    }

    #[test]
    fn test_parser_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wwapi.yaml");
        std::fs::write(&path, "version: \"1.0\"\nname: from-file\n").unwrap();
        assert_eq!(parse_config_file(&path).unwrap().name, "from-file");
        let err = parse_config_file(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }

    fn writer_stack() -> Stack {
        let mut stack = Stack::new("Back");
        stack
            .add(
                "UrlParam",
                string_parameter("/wwapi/api-gateway-url", json!("https://x"), ParameterTier::Standard),
            )
            .unwrap();
        stack
    }

    fn reader_stack() -> Stack {
        let mut stack = Stack::new("Front");
        stack
            .add("TaskRole", ResourceDecl::new(ResourceType::Role, json!({})))
            .unwrap();
        let target = stack.import_parameter("/wwapi/api-gateway-url");
        stack.grant("TaskRole", target, Access::ParameterRead);
        stack
    }

    #[test]
    fn test_parser_app_valid_with_dependency() {
        let mut app = App::new("wwapi");
        app.add_stack(writer_stack()).unwrap();
        app.add_stack(reader_stack()).unwrap();
        app.add_dependency("Front", "Back").unwrap();
        let errors = validate_app(&app);
        assert!(errors.is_empty(), "{:?}", messages(&errors));
    }

    #[test]
    fn test_parser_import_without_dependency() {
        let mut app = App::new("wwapi");
        app.add_stack(writer_stack()).unwrap();
        app.add_stack(reader_stack()).unwrap();
        let errors = messages(&validate_app(&app));
        assert!(errors.iter().any(|m| m.contains("not a dependency")), "{:?}", errors);
    }

    #[test]
    fn test_parser_import_without_writer() {
        let mut app = App::new("wwapi");
        app.add_stack(reader_stack()).unwrap();
        let errors = messages(&validate_app(&app));
        assert!(errors.iter().any(|m| m.contains("not written by any stack")));
    }

    #[test]
    fn test_parser_grant_to_missing_resource() {
        let mut stack = reader_stack();
        stack.grant("TaskRole", GrantTarget::Resource("Ghost".to_string()), Access::Read);
        stack.grant("Nobody", GrantTarget::Any, Access::Decrypt);
        let mut app = App::new("wwapi");
        app.add_stack(writer_stack()).unwrap();
        app.add_stack(stack).unwrap();
        app.add_dependency("Front", "Back").unwrap();
        let errors = messages(&validate_app(&app));
        assert!(errors.iter().any(|m| m.contains("unknown resource 'Ghost'")));
        assert!(errors.iter().any(|m| m.contains("'Nobody' is not a role")));
    }

    #[test]
    fn test_parser_reference_and_cycle_errors() {
        let mut stack = Stack::new("S");
        stack
            .add(
                "A",
                ResourceDecl::new(ResourceType::LogGroup, json!({"X": intrinsic::reference("B")})),
            )
            .unwrap();
        stack
            .add("B", ResourceDecl::new(ResourceType::LogGroup, json!({})).depends_on("A"))
            .unwrap();
        let mut app = App::new("wwapi");
        app.add_stack(stack).unwrap();
        let errors = messages(&validate_app(&app));
        assert!(errors.iter().any(|m| m.contains("cycle")), "{:?}", errors);
    }

    fn role_and_bucket() -> Stack {
        let mut stack = Stack::new("S");
        stack
            .add(
                "Role",
                crate::resources::iam::service_role("lambda.amazonaws.com", None, &[]),
            )
            .unwrap();
        stack
    }

    #[test]
    fn test_parser_unsupported_grant_reported() {
        let mut stack = role_and_bucket();
        stack
            .add("Param", string_parameter("p", json!("v"), ParameterTier::Standard))
            .unwrap();
        stack.grant("Role", GrantTarget::Resource("Param".to_string()), Access::ReadWrite);
        let mut app = App::new("wwapi");
        app.add_stack(stack).unwrap();
        let errors = messages(&validate_app(&app));
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert!(errors[0].contains("with compiled grants"));
        assert!(errors[0].contains("not supported"));
    }

    #[test]
    fn test_parser_policy_wait_cycle_reported() {
        let mut stack = role_and_bucket();
        stack
            .add(
                "Bucket",
                ResourceDecl::new(
                    ResourceType::Bucket,
                    json!({"Tags": [{"Key": "owner", "Value": intrinsic::get_att("Role", "Arn")}]}),
                ),
            )
            .unwrap();
        assert!(resolver::build_resource_order(&stack.resources).is_ok());
        stack.grant("Role", GrantTarget::Resource("Bucket".to_string()), Access::Read);
        let mut app = App::new("wwapi");
        app.add_stack(stack).unwrap();
        let errors = messages(&validate_app(&app));
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert!(errors[0].contains("with compiled grants"));
        assert!(errors[0].contains("cycle"));
    }

    #[test]
    fn test_parser_parameter_rules() {
        let mut stack = Stack::new("S");
        stack
            .add("Bad", string_parameter("has space", json!("v"), ParameterTier::Standard))
            .unwrap();
        let big = "x".repeat(5000);
        stack
            .add("Big", string_parameter("big", json!(big.clone()), ParameterTier::Standard))
            .unwrap();
        stack
            .add("BigOk", string_parameter("bigok", json!(big), ParameterTier::Advanced))
            .unwrap();
        let mut app = App::new("wwapi");
        app.add_stack(stack).unwrap();
        let errors = messages(&validate_app(&app));
        assert_eq!(errors.len(), 2, "{:?}", errors);
        assert!(errors.iter().any(|m| m.contains("invalid name 'has space'")));
        assert!(errors.iter().any(|m| m.contains("5000 bytes")));
    }

    #[test]
    fn test_parser_logical_id_format() {
        let mut stack = Stack::new("S");
        stack
            .add("bad-id", ResourceDecl::new(ResourceType::LogGroup, json!({})))
            .unwrap();
        let mut app = App::new("wwapi");
        app.add_stack(stack).unwrap();
        assert!(validate_app(&app)
            .iter()
            .any(|e| e.message.contains("logical id 'bad-id'")));
    }

    #[test]
    fn test_parser_into_result() {
        assert!(into_result(Vec::new()).is_ok());
        let err = into_result(vec![ValidationError::new("a"), ValidationError::new("b")]).unwrap_err();
        assert!(err.to_string().starts_with("2 validation error(s)"));
    }
}
