//! Backend stack: object store, shared role and layer, the three functions,
//! search domain, parameters, and the chat gateway.

use crate::core::intrinsic;
use crate::core::stack::Stack;
use crate::core::types::*;
use crate::error::{Error, Result};
use crate::resources::iam::{self, BASIC_EXECUTION};
use crate::resources::lambda::{self, FunctionProps};
use crate::resources::parameter::{string_parameter, ParameterTier};
use crate::resources::{gateway, search, storage};
use crate::tripwire::hasher;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::path::Path;

pub const BUCKET: &str = "WwapiBucket";
pub const SHARED_ROLE: &str = "SharedLambdaRole";
pub const COMMON_LAYER: &str = "CommonLayer";
pub const INGEST_FUNCTION: &str = "WwapiLambda";
pub const INDEX_FUNCTION: &str = "IndexHandlerLambda";
pub const CHAT_FUNCTION: &str = "ChatbotFunction";
pub const DOMAIN: &str = "WwapiOpenSearch";
pub const MASTER_SECRET: &str = "OpenSearchMasterSecret";
pub const API: &str = "ChatbotApi";
pub const API_URL_PARAMETER: &str = "ApiGatewayUrlParameter";

/// Functions sharing code, layer, role, and environment: (id, handler).
const FUNCTIONS: [(&str, &str); 3] = [
    (INGEST_FUNCTION, "s3_function.lambda_handler"),
    (INDEX_FUNCTION, "os_index_function.lambda_handler"),
    (CHAT_FUNCTION, "chat_function.lambda_handler"),
];

/// Directory asset identified by its content hash.
pub(crate) fn directory_asset(id: &str, root: &Path, dir: &Path, kind: AssetKind) -> Result<Asset> {
    let source = root.join(dir);
    let hash = hasher::hash_directory(&source)?;
    tracing::debug!(asset = id, source = %source.display(), %hash, "asset hashed");
    Ok(Asset {
        id: id.to_string(),
        kind,
        source,
        hash,
    })
}

/// Read an index settings file; its contents must be JSON.
fn index_settings(root: &Path, settings: &IndexSettings) -> Result<String> {
    let path = root.join(&settings.settings_file);
    let text = std::fs::read_to_string(&path).map_err(|e| Error::io("read", &path, e))?;
    if let Err(e) = serde_json::from_str::<Value>(&text) {
        return Err(Error::Asset {
            path,
            reason: format!("index settings are not valid JSON: {}", e),
        });
    }
    Ok(text)
}

fn environment(indexes: &IndexesConfig) -> IndexMap<String, String> {
    IndexMap::from([
        ("PATHS_INDEX_NAME".to_string(), indexes.paths.name.clone()),
        ("COMPONENTS_INDEX_NAME".to_string(), indexes.components.name.clone()),
        ("VECTORS_INDEX_NAME".to_string(), indexes.vector.name.clone()),
        ("VECTORS_PATH_INDEX_NAME".to_string(), indexes.vector_paths.clone()),
        (
            "VECTORS_COMPONENTS_INDEX_NAME".to_string(),
            indexes.vector_components.clone(),
        ),
    ])
}

/// Declare the search-domain master credential. Returns the value the
/// domain uses as master password.
fn add_credentials(stack: &mut Stack, config: &SearchConfig) -> Result<Value> {
    let credentials = &config.credentials;
    stack.add(
        "OpenSearchIdParameter",
        string_parameter(
            &credentials.username_parameter,
            json!(credentials.username),
            ParameterTier::Standard,
        ),
    )?;

    let (password, stored) = match credentials.source {
        CredentialSource::Secret => {
            stack.add(MASTER_SECRET, search::master_secret(config))?;
            for (function, _) in FUNCTIONS {
                stack.grant(
                    function,
                    GrantTarget::Resource(MASTER_SECRET.to_string()),
                    Access::SecretRead,
                );
            }
            (
                search::secret_password(MASTER_SECRET),
                credentials.secret_name.clone(),
            )
        }
        CredentialSource::Plaintext => {
            tracing::warn!(
                parameter = %credentials.password_parameter,
                "search master password is stored as plain text"
            );
            let literal = credentials.password.clone().unwrap_or_default();
            (json!(literal), literal)
        }
    };
    stack.add(
        "OpenSearchPasswordParameter",
        string_parameter(
            &credentials.password_parameter,
            json!(stored),
            ParameterTier::Standard,
        ),
    )?;
    Ok(password)
}

/// Build the backend stack. Asset directories and index settings files are
/// resolved against `root`.
pub fn build(config: &WwapiConfig, root: &Path) -> Result<Stack> {
    let backend = &config.backend;
    let functions = &backend.functions;
    let indexes = &backend.indexes;
    let mut stack = Stack::new(&backend.stack_name);
    stack.description = Some(format!("{} backend", config.name));

    stack.add(BUCKET, storage::bucket(&backend.bucket))?;
    stack.add(
        SHARED_ROLE,
        iam::service_role(
            "lambda.amazonaws.com",
            Some("Shared role for multiple Lambda functions"),
            &[BASIC_EXECUTION],
        ),
    )?;

    let layer_asset = stack.add_asset(directory_asset(
        "CommonLayerCode",
        root,
        &functions.layer_dir,
        AssetKind::Directory,
    )?);
    stack.add(
        COMMON_LAYER,
        lambda::layer(
            &layer_asset,
            &functions.runtime,
            "Common libraries for Lambda functions",
        ),
    )?;

    let index_parameters = [
        ("PathParameter", &indexes.paths),
        ("ComponentsParameter", &indexes.components),
        ("VectorParameter", &indexes.vector),
    ];
    for (id, settings) in index_parameters {
        let text = index_settings(root, settings)?;
        stack.add(
            id,
            string_parameter(&settings.name, json!(text), ParameterTier::Advanced),
        )?;
    }

    let master_password = add_credentials(&mut stack, &backend.search)?;

    let code = stack.add_asset(directory_asset(
        "FunctionCode",
        root,
        &functions.code_dir,
        AssetKind::Directory,
    )?);
    let env = environment(indexes);
    for (id, handler) in FUNCTIONS {
        lambda::add_function(
            &mut stack,
            id,
            FunctionProps {
                handler,
                code: &code,
                role: SHARED_ROLE,
                layers: vec![COMMON_LAYER],
                environment: env.clone(),
                settings: functions,
            },
        )?;
    }
    storage::add_object_created_notification(
        &mut stack,
        "WwapiBucketNotifications",
        BUCKET,
        INGEST_FUNCTION,
    )?;

    stack.grant(SHARED_ROLE, GrantTarget::Resource(BUCKET.to_string()), Access::Read);
    stack.grant(
        SHARED_ROLE,
        GrantTarget::Any,
        Access::Actions(vec!["es:ESHttp*".to_string()]),
    );
    stack.grant(SHARED_ROLE, GrantTarget::Any, Access::Decrypt);
    if backend.bedrock {
        stack.grant(
            SHARED_ROLE,
            GrantTarget::Any,
            Access::Actions(vec!["bedrock:*".to_string()]),
        );
    }
    for (id, _) in index_parameters {
        stack.grant(
            INDEX_FUNCTION,
            GrantTarget::Resource(id.to_string()),
            Access::ParameterRead,
        );
    }

    stack.add(DOMAIN, search::domain(&backend.search, master_password))?;
    stack.add(
        "OpenSearchDomainParameter",
        string_parameter(
            &backend.search.domain_parameter,
            search::endpoint(DOMAIN),
            ParameterTier::Standard,
        ),
    )?;
    for (function, _) in FUNCTIONS {
        for parameter in [
            "OpenSearchDomainParameter",
            "OpenSearchPasswordParameter",
            "OpenSearchIdParameter",
        ] {
            stack.grant(
                function,
                GrantTarget::Resource(parameter.to_string()),
                Access::ParameterRead,
            );
        }
        stack.grant(
            function,
            GrantTarget::Resource(DOMAIN.to_string()),
            Access::ReadWrite,
        );
        stack.grant(
            function,
            GrantTarget::Resource(DOMAIN.to_string()),
            Access::IndexReadWrite("*".to_string()),
        );
    }

    let api = &backend.api;
    stack.add(API, gateway::rest_api(api))?;
    gateway::add_route(&mut stack, API, &api.chat_path, "POST", CHAT_FUNCTION)?;
    gateway::add_route(&mut stack, API, &api.reset_index_path, "GET", INDEX_FUNCTION)?;
    let stage = gateway::add_deployment(&mut stack, API, &api.stage)?;
    stack.add(
        API_URL_PARAMETER,
        string_parameter(
            &api.url_parameter,
            gateway::url(API, &stage),
            ParameterTier::Standard,
        ),
    )?;

    stack.add_output(
        "ApiGatewayUrlParameterName",
        intrinsic::reference(API_URL_PARAMETER),
        None,
        Some("ApiGatewayUrlParameterName"),
    );
    stack.add_output("ApiUrl", gateway::url(API, &stage), Some("API Gateway URL"), None);
    stack.add_output("S3Bucket", intrinsic::reference(BUCKET), Some("S3 bucket"), None);
    stack.add_output(
        "ResetIndexApiUrl",
        gateway::route_url(API, &stage, &api.reset_index_path),
        Some("Reset index URL"),
        None,
    );
    stack.add_output(
        "LambdaFunctionArn",
        intrinsic::get_att(INGEST_FUNCTION, "Arn"),
        Some("Lambda Function ARN"),
        None,
    );
    stack.add_output(
        "OpenSearchDomainEndpoint",
        search::endpoint(DOMAIN),
        Some("OpenSearch Domain Endpoint"),
        None,
    );

    tracing::info!(stack = %stack.name, resources = stack.resources.len(), "backend declared");
    Ok(stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::lambda::environment_of;
    use crate::stacks::tests::{config, project};

    #[test]
    fn test_backend_single_ingest_event_source() {
        let dir = project();
        let stack = build(&config(), dir.path()).unwrap();
        let sources = storage::event_sources(&stack);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].bucket, BUCKET);
        assert_eq!(sources[0].function, INGEST_FUNCTION);
        assert_eq!(sources[0].event, storage::OBJECT_CREATED);
    }

    #[test]
    fn test_backend_routes() {
        let dir = project();
        let stack = build(&config(), dir.path()).unwrap();
        let routes: Vec<(String, String, String)> = gateway::routes(&stack)
            .into_iter()
            .map(|r| (r.method, r.path, r.function))
            .collect();
        assert_eq!(
            routes,
            vec![
                ("POST".to_string(), "/chat".to_string(), CHAT_FUNCTION.to_string()),
                ("GET".to_string(), "/resetindex".to_string(), INDEX_FUNCTION.to_string()),
            ]
        );
    }

    #[test]
    fn test_backend_shared_role_permissions() {
        let dir = project();
        let stack = build(&config(), dir.path()).unwrap();
        let set = iam::permission_set(&stack, SHARED_ROLE);
        for expected in [
            Permission::StoreRead,
            Permission::SearchReadWrite,
            Permission::SearchIndexReadWrite,
            Permission::Decrypt,
            Permission::BasicExecution,
            Permission::ParameterRead,
            Permission::SecretRead,
        ] {
            assert!(set.contains(&expected), "missing {:?} in {:?}", expected, set);
        }
    }

    #[test]
    fn test_backend_function_environment() {
        let dir = project();
        let stack = build(&config(), dir.path()).unwrap();
        let functions: Vec<_> = stack.resources_of(ResourceType::Function).collect();
        assert_eq!(functions.len(), 3);
        for (id, decl) in functions {
            let env = environment_of(decl);
            for key in [
                "PATHS_INDEX_NAME",
                "COMPONENTS_INDEX_NAME",
                "VECTORS_INDEX_NAME",
                "VECTORS_PATH_INDEX_NAME",
                "VECTORS_COMPONENTS_INDEX_NAME",
            ] {
                assert!(
                    env.get(key).is_some_and(|v| !v.is_empty()),
                    "{} lacks {}",
                    id,
                    key
                );
            }
            assert_eq!(env["VECTORS_PATH_INDEX_NAME"], "vector_paths");
        }
    }

    #[test]
    fn test_backend_parameters_and_outputs() {
        let dir = project();
        let stack = build(&config(), dir.path()).unwrap();
        let mut written = stack.written_parameters();
        written.sort();
        assert_eq!(
            written,
            vec![
                "/wwapi/api-gateway-url",
                "components",
                "opensearchdomain",
                "opensearchid",
                "opensearchpassword",
                "paths",
                "vector",
            ]
        );
        assert_eq!(
            stack.resources["PathParameter"].prop_str("Tier"),
            Some("Advanced")
        );
        let outputs: Vec<_> = stack.outputs.keys().cloned().collect();
        assert_eq!(
            outputs,
            vec![
                "ApiGatewayUrlParameterName",
                "ApiUrl",
                "S3Bucket",
                "ResetIndexApiUrl",
                "LambdaFunctionArn",
                "OpenSearchDomainEndpoint",
            ]
        );
        assert_eq!(
            stack.outputs["ApiGatewayUrlParameterName"].export_name.as_deref(),
            Some("ApiGatewayUrlParameterName")
        );
    }

    #[test]
    fn test_backend_secret_credentials_by_default() {
        let dir = project();
        let stack = build(&config(), dir.path()).unwrap();
        assert!(stack.resource(MASTER_SECRET).is_some());
        let password = &stack.resources[DOMAIN].properties["AdvancedSecurityOptions"]
            ["MasterUserOptions"]["MasterUserPassword"];
        assert!(password.get("Fn::Join").is_some());
        assert_eq!(
            stack.resources["OpenSearchPasswordParameter"].prop_str("Value"),
            Some("wwapi/opensearch-master")
        );
        assert!(iam::permission_set(&stack, SHARED_ROLE).contains(&Permission::SecretRead));
        assert_eq!(stack.resources[DOMAIN].removal, RemovalPolicy::Retain);
    }

    #[test]
    fn test_backend_plaintext_credentials() {
        let dir = project();
        let mut c = config();
        c.backend.search.credentials.source = CredentialSource::Plaintext;
        c.backend.search.credentials.password = Some("Test1234!".to_string());
        let stack = build(&c, dir.path()).unwrap();
        assert!(stack.resource(MASTER_SECRET).is_none());
        assert_eq!(
            stack.resources[DOMAIN].properties["AdvancedSecurityOptions"]["MasterUserOptions"]
                ["MasterUserPassword"],
            json!("Test1234!")
        );
    }

    #[test]
    fn test_backend_invalid_index_json() {
        let dir = project();
        std::fs::write(dir.path().join("json/index_vector.json"), "{ not json").unwrap();
        let err = build(&config(), dir.path()).unwrap_err();
        assert!(matches!(err, Error::Asset { .. }), "{}", err);
    }

    #[test]
    fn test_backend_missing_code_dir() {
        let dir = project();
        std::fs::remove_dir_all(dir.path().join("lambda/function")).unwrap();
        assert!(build(&config(), dir.path()).is_err());
    }
}
