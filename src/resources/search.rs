//! Search domain, its master-user credential, and access statements.

use super::iam;
use crate::core::intrinsic;
use crate::core::types::{ResourceDecl, ResourceType, SearchConfig};
use serde_json::{json, Value};

const READ_WRITE_ACTIONS: [&str; 6] = [
    "es:ESHttpGet",
    "es:ESHttpHead",
    "es:ESHttpDelete",
    "es:ESHttpPost",
    "es:ESHttpPut",
    "es:ESHttpPatch",
];

/// Secret holding a generated master-user password.
pub fn master_secret(config: &SearchConfig) -> ResourceDecl {
    ResourceDecl::new(
        ResourceType::Secret,
        json!({
            "Name": config.credentials.secret_name,
            "Description": "Search domain master user",
            "GenerateSecretString": {
                "SecretStringTemplate": json!({ "username": config.credentials.username }).to_string(),
                "GenerateStringKey": "password",
                "ExcludeCharacters": "\"@/\\",
                "PasswordLength": 32,
            },
        }),
    )
}

/// Dynamic reference resolving the generated password at deploy time.
pub fn secret_password(secret_id: &str) -> Value {
    intrinsic::join(
        "",
        vec![
            json!("{{resolve:secretsmanager:"),
            intrinsic::reference(secret_id),
            json!(":SecretString:password}}"),
        ],
    )
}

/// Search domain with fine-grained access control and a master user.
///
/// Requests authenticate with basic auth, so the resource policy admits any
/// principal and access control happens inside the domain.
pub fn domain(config: &SearchConfig, master_password: Value) -> ResourceDecl {
    let mut cluster = json!({
        "DedicatedMasterEnabled": config.master_nodes > 0,
        "InstanceCount": config.data_nodes,
        "InstanceType": config.data_instance_type,
        "MultiAZWithStandbyEnabled": config.multi_az_with_standby,
        "ZoneAwarenessEnabled": config.zone_awareness,
    });
    if config.master_nodes > 0 {
        cluster["DedicatedMasterCount"] = json!(config.master_nodes);
        cluster["DedicatedMasterType"] = json!(config.master_instance_type);
    }
    if config.zone_awareness {
        cluster["ZoneAwarenessConfig"] =
            json!({ "AvailabilityZoneCount": config.availability_zone_count });
    }

    ResourceDecl::new(
        ResourceType::SearchDomain,
        json!({
            "EngineVersion": config.engine_version,
            "ClusterConfig": cluster,
            "EBSOptions": {
                "EBSEnabled": true,
                "VolumeSize": config.volume_size_gb,
                "VolumeType": "gp2",
            },
            "NodeToNodeEncryptionOptions": { "Enabled": true },
            "EncryptionAtRestOptions": { "Enabled": true },
            "DomainEndpointOptions": {
                "EnforceHTTPS": true,
                "TLSSecurityPolicy": "Policy-Min-TLS-1-0-2019-07",
            },
            "AdvancedSecurityOptions": {
                "Enabled": true,
                "InternalUserDatabaseEnabled": true,
                "MasterUserOptions": {
                    "MasterUserName": config.credentials.username,
                    "MasterUserPassword": master_password,
                },
            },
            "AccessPolicies": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": "es:ESHttp*",
                    "Effect": "Allow",
                    "Principal": { "AWS": "*" },
                    "Resource": "*",
                }],
            },
        }),
    )
    .retain()
}

pub fn endpoint(domain_id: &str) -> Value {
    intrinsic::get_att(domain_id, "DomainEndpoint")
}

/// HTTP read-write on the whole domain, or on one index pattern.
pub fn read_write_statement(domain_id: &str, index: Option<&String>) -> Value {
    let resources = match index {
        None => vec![
            intrinsic::get_att(domain_id, "Arn"),
            intrinsic::sub(&format!("${{{}.Arn}}/*", domain_id)),
        ],
        Some(index) => vec![
            intrinsic::sub(&format!("${{{}.Arn}}/{}", domain_id, index)),
            intrinsic::sub(&format!("${{{}.Arn}}/{}/*", domain_id, index)),
        ],
    };
    iam::statement(&READ_WRITE_ACTIONS, resources)
}

pub fn secret_read_statement(secret_id: &str) -> Value {
    iam::statement(
        &["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"],
        vec![intrinsic::reference(secret_id)],
    )
}
