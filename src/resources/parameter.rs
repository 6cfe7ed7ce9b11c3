//! Parameter-store string entries.

use super::iam;
use crate::core::types::{ResourceDecl, ResourceType};
use serde_json::{json, Value};

/// Storage tier. Values larger than the standard limit need `Advanced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterTier {
    Standard,
    Advanced,
}

impl ParameterTier {
    pub fn provider_name(self) -> &'static str {
        match self {
            Self::Standard => "Standard",
            Self::Advanced => "Advanced",
        }
    }

    /// Maximum value size in bytes.
    pub fn max_bytes(self) -> usize {
        match self {
            Self::Standard => 4096,
            Self::Advanced => 8192,
        }
    }

    pub fn from_provider_name(name: &str) -> Option<Self> {
        match name {
            "Standard" => Some(Self::Standard),
            "Advanced" => Some(Self::Advanced),
            _ => None,
        }
    }
}

pub fn string_parameter(name: &str, value: Value, tier: ParameterTier) -> ResourceDecl {
    ResourceDecl::new(
        ResourceType::Parameter,
        json!({
            "Name": name,
            "Type": "String",
            "Value": value,
            "Tier": tier.provider_name(),
        }),
    )
}

/// Literal value of a parameter, when it is not an intrinsic.
pub fn literal_value(decl: &ResourceDecl) -> Option<&str> {
    decl.prop_str("Value")
}

pub fn tier_of(decl: &ResourceDecl) -> ParameterTier {
    decl.prop_str("Tier")
        .and_then(ParameterTier::from_provider_name)
        .unwrap_or(ParameterTier::Standard)
}

pub fn read_statement(parameter_arn: Value) -> Value {
    iam::statement(
        &[
            "ssm:DescribeParameters",
            "ssm:GetParameters",
            "ssm:GetParameter",
            "ssm:GetParameterHistory",
        ],
        vec![parameter_arn],
    )
}
