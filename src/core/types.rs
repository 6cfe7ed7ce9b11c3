//! Types for project configuration, resource descriptors, state locks,
//! plans, and provenance events.
//!
//! Configuration types derive Serialize/Deserialize for YAML roundtripping and
//! JsonSchema for `wwapi schema`. Every configuration field has a default, so
//! a `wwapi.yaml` with only `version` and `name` declares the stock system.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Top-level wwapi.yaml
// ============================================================================

/// Root configuration: the desired state of the chatbot infrastructure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WwapiConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Human-readable application name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Backend provisioning unit
    #[serde(default)]
    pub backend: BackendConfig,

    /// Frontend provisioning unit
    #[serde(default)]
    pub frontend: FrontendConfig,

    /// Recording policy
    #[serde(default)]
    pub policy: Policy,
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BackendConfig {
    /// Stack name
    pub stack_name: String,
    pub bucket: BucketConfig,
    pub functions: FunctionsConfig,
    pub indexes: IndexesConfig,
    pub search: SearchConfig,
    pub api: ApiConfig,
    /// Grant the shared role full model-invocation access
    pub bedrock: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            stack_name: "WwapiStack".to_string(),
            bucket: BucketConfig::default(),
            functions: FunctionsConfig::default(),
            indexes: IndexesConfig::default(),
            search: SearchConfig::default(),
            api: ApiConfig::default(),
            bedrock: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BucketConfig {
    pub versioned: bool,
    pub removal: RemovalPolicy,
    pub auto_delete_objects: bool,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            versioned: true,
            removal: RemovalPolicy::Destroy,
            auto_delete_objects: true,
        }
    }
}

/// Settings shared by every serverless function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FunctionsConfig {
    /// Function code directory, relative to the project root
    pub code_dir: PathBuf,
    /// Shared layer directory, relative to the project root
    pub layer_dir: PathBuf,
    pub runtime: String,
    pub timeout_seconds: u32,
    pub log_retention_days: u32,
    /// Active tracing
    pub tracing: bool,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            code_dir: PathBuf::from("lambda/function"),
            layer_dir: PathBuf::from("lambda/layer"),
            runtime: "python3.9".to_string(),
            timeout_seconds: 300,
            log_retention_days: 1,
            tracing: true,
        }
    }
}

/// Search index names and the settings files stored as parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct IndexesConfig {
    pub paths: IndexSettings,
    pub components: IndexSettings,
    pub vector: IndexSettings,
    pub vector_paths: String,
    pub vector_components: String,
}

impl Default for IndexesConfig {
    fn default() -> Self {
        Self {
            paths: IndexSettings::new("paths", "json/index_paths.json"),
            components: IndexSettings::new("components", "json/index_components.json"),
            vector: IndexSettings::new("vector", "json/index_vector.json"),
            vector_paths: "vector_paths".to_string(),
            vector_components: "vector_components".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IndexSettings {
    /// Index name, also the parameter name holding its settings
    pub name: String,
    /// JSON settings file, relative to the project root
    pub settings_file: PathBuf,
}

impl IndexSettings {
    pub fn new(name: &str, settings_file: &str) -> Self {
        Self {
            name: name.to_string(),
            settings_file: PathBuf::from(settings_file),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SearchConfig {
    pub engine_version: String,
    pub master_nodes: u32,
    pub master_instance_type: String,
    pub data_nodes: u32,
    pub data_instance_type: String,
    pub volume_size_gb: u32,
    pub zone_awareness: bool,
    pub availability_zone_count: u32,
    pub multi_az_with_standby: bool,
    pub credentials: CredentialsConfig,
    /// Parameter holding the domain endpoint
    pub domain_parameter: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            engine_version: "OpenSearch_2.15".to_string(),
            master_nodes: 2,
            master_instance_type: "m6g.large.search".to_string(),
            data_nodes: 2,
            data_instance_type: "m6g.large.search".to_string(),
            volume_size_gb: 10,
            zone_awareness: false,
            availability_zone_count: 2,
            multi_az_with_standby: false,
            credentials: CredentialsConfig::default(),
            domain_parameter: "opensearchdomain".to_string(),
        }
    }
}

/// Search-cluster master user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username: String,
    pub source: CredentialSource,
    /// Secret name when `source: secret`
    pub secret_name: String,
    /// Literal password when `source: plaintext`
    pub password: Option<String>,
    /// Parameter holding the username
    pub username_parameter: String,
    /// Parameter holding the password (plaintext) or the secret name (secret).
    ///
    /// With `source: secret` the stored value is not the password itself:
    /// consumers must resolve it through Secrets Manager (the functions are
    /// granted secret read for this).
    pub password_parameter: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            username: "raguser".to_string(),
            source: CredentialSource::Secret,
            secret_name: "wwapi/opensearch-master".to_string(),
            password: None,
            username_parameter: "opensearchid".to_string(),
            password_parameter: "opensearchpassword".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    #[default]
    Secret,
    Plaintext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ApiConfig {
    pub name: String,
    pub description: String,
    pub stage: String,
    /// Parameter the gateway URL is published under
    pub url_parameter: String,
    pub chat_path: String,
    pub reset_index_path: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            name: "Chatbot Service".to_string(),
            description: "This service serves as a chatbot API.".to_string(),
            stage: "prod".to_string(),
            url_parameter: "/wwapi/api-gateway-url".to_string(),
            chat_path: "chat".to_string(),
            reset_index_path: "resetindex".to_string(),
        }
    }
}

// ============================================================================
// Frontend
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FrontendConfig {
    pub stack_name: String,
    /// Container build context, relative to the project root
    pub build_dir: PathBuf,
    pub cidr: String,
    pub max_azs: u32,
    /// Defaults to one per availability zone
    pub nat_gateways: Option<u32>,
    pub cpu: u32,
    pub memory_mib: u32,
    pub desired_count: u32,
    pub container_port: u16,
    pub listener_port: u16,
    pub public_load_balancer: bool,
    pub architecture: CpuArchitecture,
    pub platform_version: String,
    /// Backend parameter read by the container at runtime
    pub api_url_parameter: String,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            stack_name: "WwapiFrontendStack".to_string(),
            build_dir: PathBuf::from("frontend"),
            cidr: "10.0.0.0/16".to_string(),
            max_azs: 2,
            nat_gateways: None,
            cpu: 256,
            memory_mib: 512,
            desired_count: 1,
            container_port: 8501,
            listener_port: 80,
            public_load_balancer: true,
            architecture: CpuArchitecture::Arm64,
            platform_version: "LATEST".to_string(),
            api_url_parameter: "/wwapi/api-gateway-url".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CpuArchitecture {
    #[default]
    Arm64,
    X86_64,
}

impl CpuArchitecture {
    /// Provider spelling for the task runtime platform.
    pub fn provider_name(self) -> &'static str {
        match self {
            Self::Arm64 => "ARM64",
            Self::X86_64 => "X86_64",
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Recording policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Failure handling
    #[serde(default)]
    pub failure: FailurePolicy,

    /// Append provenance events on every apply
    #[serde(default = "default_true")]
    pub tripwire: bool,

    /// Persist BLAKE3 state after apply
    #[serde(default = "default_true")]
    pub lock_file: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::default(),
            tripwire: true,
            lock_file: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Failure handling strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    StopOnFirst,
    ContinueIndependent,
}

// ============================================================================
// Resource descriptors
// ============================================================================

/// What happens to a resource when its stack is torn down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    #[default]
    Destroy,
    Retain,
}

impl RemovalPolicy {
    pub fn provider_name(self) -> &'static str {
        match self {
            Self::Destroy => "Delete",
            Self::Retain => "Retain",
        }
    }
}

/// Resource type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Bucket,
    BucketNotification,
    Role,
    Policy,
    LayerVersion,
    Function,
    Permission,
    LogGroup,
    SearchDomain,
    Secret,
    Parameter,
    RestApi,
    ApiResource,
    ApiMethod,
    ApiDeployment,
    ApiStage,
    Vpc,
    Subnet,
    InternetGateway,
    GatewayAttachment,
    RouteTable,
    Route,
    RouteTableAssociation,
    ElasticIp,
    NatGateway,
    SecurityGroup,
    Cluster,
    TaskDefinition,
    Service,
    LoadBalancer,
    Listener,
    TargetGroup,
}

impl ResourceType {
    /// Provider type name written into templates.
    pub fn provider_type(self) -> &'static str {
        match self {
            Self::Bucket => "AWS::S3::Bucket",
            Self::BucketNotification => "Custom::S3BucketNotifications",
            Self::Role => "AWS::IAM::Role",
            Self::Policy => "AWS::IAM::Policy",
            Self::LayerVersion => "AWS::Lambda::LayerVersion",
            Self::Function => "AWS::Lambda::Function",
            Self::Permission => "AWS::Lambda::Permission",
            Self::LogGroup => "AWS::Logs::LogGroup",
            Self::SearchDomain => "AWS::OpenSearchService::Domain",
            Self::Secret => "AWS::SecretsManager::Secret",
            Self::Parameter => "AWS::SSM::Parameter",
            Self::RestApi => "AWS::ApiGateway::RestApi",
            Self::ApiResource => "AWS::ApiGateway::Resource",
            Self::ApiMethod => "AWS::ApiGateway::Method",
            Self::ApiDeployment => "AWS::ApiGateway::Deployment",
            Self::ApiStage => "AWS::ApiGateway::Stage",
            Self::Vpc => "AWS::EC2::VPC",
            Self::Subnet => "AWS::EC2::Subnet",
            Self::InternetGateway => "AWS::EC2::InternetGateway",
            Self::GatewayAttachment => "AWS::EC2::VPCGatewayAttachment",
            Self::RouteTable => "AWS::EC2::RouteTable",
            Self::Route => "AWS::EC2::Route",
            Self::RouteTableAssociation => "AWS::EC2::SubnetRouteTableAssociation",
            Self::ElasticIp => "AWS::EC2::EIP",
            Self::NatGateway => "AWS::EC2::NatGateway",
            Self::SecurityGroup => "AWS::EC2::SecurityGroup",
            Self::Cluster => "AWS::ECS::Cluster",
            Self::TaskDefinition => "AWS::ECS::TaskDefinition",
            Self::Service => "AWS::ECS::Service",
            Self::LoadBalancer => "AWS::ElasticLoadBalancingV2::LoadBalancer",
            Self::Listener => "AWS::ElasticLoadBalancingV2::Listener",
            Self::TargetGroup => "AWS::ElasticLoadBalancingV2::TargetGroup",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bucket => "bucket",
            Self::BucketNotification => "bucket_notification",
            Self::Role => "role",
            Self::Policy => "policy",
            Self::LayerVersion => "layer_version",
            Self::Function => "function",
            Self::Permission => "permission",
            Self::LogGroup => "log_group",
            Self::SearchDomain => "search_domain",
            Self::Secret => "secret",
            Self::Parameter => "parameter",
            Self::RestApi => "rest_api",
            Self::ApiResource => "api_resource",
            Self::ApiMethod => "api_method",
            Self::ApiDeployment => "api_deployment",
            Self::ApiStage => "api_stage",
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::InternetGateway => "internet_gateway",
            Self::GatewayAttachment => "gateway_attachment",
            Self::RouteTable => "route_table",
            Self::Route => "route",
            Self::RouteTableAssociation => "route_table_association",
            Self::ElasticIp => "elastic_ip",
            Self::NatGateway => "nat_gateway",
            Self::SecurityGroup => "security_group",
            Self::Cluster => "cluster",
            Self::TaskDefinition => "task_definition",
            Self::Service => "service",
            Self::LoadBalancer => "load_balancer",
            Self::Listener => "listener",
            Self::TargetGroup => "target_group",
        };
        write!(f, "{}", name)
    }
}

/// A single resource descriptor within a stack.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDecl {
    pub resource_type: ResourceType,

    /// Provider property document
    pub properties: serde_json::Map<String, serde_json::Value>,

    /// Explicit ordering edges (logical ids in the same stack)
    pub depends_on: Vec<String>,

    pub removal: RemovalPolicy,
}

impl ResourceDecl {
    pub fn new(resource_type: ResourceType, properties: serde_json::Value) -> Self {
        let properties = match properties {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            resource_type,
            properties,
            depends_on: Vec::new(),
            removal: RemovalPolicy::Destroy,
        }
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        if !self.depends_on.iter().any(|d| d == id) {
            self.depends_on.push(id.to_string());
        }
        self
    }

    pub fn retain(mut self) -> Self {
        self.removal = RemovalPolicy::Retain;
        self
    }

    /// String property lookup.
    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}

// ============================================================================
// Permission grants
// ============================================================================

/// What a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantTarget {
    /// Resource in the same stack, by logical id
    Resource(String),
    /// Parameter written by another stack, by parameter name
    ImportedParameter(String),
    /// All resources (`*`)
    Any,
}

/// Bounded action set of a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
    IndexReadWrite(String),
    ParameterRead,
    SecretRead,
    Decrypt,
    Actions(Vec<String>),
}

/// A principal (role, or function whose role receives it) allowed an access
/// set on a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub principal: String,
    pub target: GrantTarget,
    pub access: Access,
}

/// Classified permission, used to query a role's effective capabilities.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    StoreRead,
    SearchReadWrite,
    SearchIndexReadWrite,
    ParameterRead,
    SecretRead,
    Decrypt,
    BasicExecution,
    Custom(String),
}

// ============================================================================
// Assets and outputs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Zipped and uploaded as an object
    Directory,
    /// Built into a container image by the engine
    DockerImage,
}

/// Local build input, identified by the BLAKE3 hash of its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: String,
    pub kind: AssetKind,
    pub source: PathBuf,
    /// `blake3:{hex}`
    pub hash: String,
}

impl Asset {
    pub fn digest(&self) -> &str {
        self.hash.strip_prefix("blake3:").unwrap_or(&self.hash)
    }

    /// Object key of the staged archive.
    pub fn object_key(&self) -> String {
        format!("{}.zip", self.digest())
    }

    /// File name inside the assembly directory.
    pub fn staged_name(&self) -> String {
        match self.kind {
            AssetKind::Directory => format!("asset.{}.zip", self.digest()),
            AssetKind::DockerImage => format!("asset.{}", self.digest()),
        }
    }
}

/// Deployment output.
#[derive(Debug, Clone, PartialEq)]
pub struct StackOutput {
    pub value: serde_json::Value,
    pub description: Option<String>,
    pub export_name: Option<String>,
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-stack state lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    /// Schema version
    pub schema: String,

    /// Stack name
    pub stack: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// BLAKE3 version
    pub blake3_version: String,

    /// Template written for this stack
    #[serde(default)]
    pub template_path: Option<String>,

    /// Hash of the written template
    #[serde(default)]
    pub template_hash: Option<String>,

    /// Per-resource state
    pub resources: IndexMap<String, ResourceLock>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    /// Resource type
    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    /// Recording status
    pub status: ResourceStatus,

    /// When the resource was last recorded
    #[serde(default)]
    pub applied_at: Option<String>,

    /// BLAKE3 hash of the resource descriptor
    pub hash: String,

    /// Resource-specific details
    #[serde(default)]
    pub details: HashMap<String, serde_yaml_ng::Value>,
}

/// Resource recording status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Converged,
    Failed,
    /// Template entry no longer matches the recorded hash
    Drifted,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "CONVERGED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Drifted => write!(f, "DRIFTED"),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Action to take on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    /// Dropped from the stack but kept in the account
    Retain,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::Retain => write!(f, "RETAIN"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    /// Logical id
    pub resource_id: String,

    /// Owning stack
    pub stack: String,

    pub resource_type: ResourceType,

    pub action: PlanAction,

    /// Human-readable description
    pub description: String,
}

/// Full execution plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// App name
    pub name: String,

    /// Planned changes grouped by stack, in stack order
    pub changes: Vec<PlannedChange>,

    /// Stack dependency order
    pub stack_order: Vec<String>,

    /// Summary counts
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub to_retain: u32,
    pub unchanged: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        stack: String,
        run_id: String,
        wwapi_version: String,
    },
    ResourceRecorded {
        stack: String,
        resource: String,
        action: String,
        hash: String,
    },
    ResourceFailed {
        stack: String,
        resource: String,
        error: String,
    },
    ResourceDestroyed {
        stack: String,
        resource: String,
        retained: bool,
    },
    ApplyCompleted {
        stack: String,
        run_id: String,
        resources_recorded: u32,
        resources_unchanged: u32,
        resources_destroyed: u32,
        resources_failed: u32,
        total_seconds: f64,
    },
    DriftDetected {
        stack: String,
        resource: String,
        expected_hash: String,
        actual_hash: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Apply result
// ============================================================================

/// Result of recording a single stack.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub stack: String,
    pub resources_recorded: u32,
    pub resources_unchanged: u32,
    pub resources_destroyed: u32,
    pub resources_retained: u32,
    pub resources_failed: u32,
    pub total_duration: std::time::Duration,
}

// ============================================================================
// Tests
// ============================================================================
