//! Intrinsic-function values for template properties, and reference
//! extraction for implicit ordering.
//!
//! A property that contains `{"Ref": X}`, `{"Fn::GetAtt": [X, ..]}` or a
//! `${X}` / `${X.Attr}` placeholder inside `Fn::Sub` depends on resource `X`.
//! Pseudo parameters (`AWS::Region`, ...) are not resources.

use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::LazyLock;

static SUB_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9:]+)(?:\.[A-Za-z0-9.]+)?\}").expect("static pattern")
});

pub fn reference(id: &str) -> Value {
    json!({ "Ref": id })
}

pub fn get_att(id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id, attribute] })
}

pub fn join(separator: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [separator, parts] })
}

pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

pub fn select(index: u32, list: Value) -> Value {
    json!({ "Fn::Select": [index, list] })
}

/// Availability zones of the deployment region.
pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

/// `arn:${Partition}:{service}:${Region}:${AccountId}:{resource}`.
pub fn arn(service: &str, resource: &str) -> Value {
    sub(&format!(
        "arn:${{AWS::Partition}}:{}:${{AWS::Region}}:${{AWS::AccountId}}:{}",
        service, resource
    ))
}

/// ARN of a parameter-store entry. Names with a leading slash keep a single
/// separator.
pub fn parameter_arn(name: &str) -> Value {
    arn("ssm", &format!("parameter/{}", name.trim_start_matches('/')))
}

/// Logical ids referenced anywhere inside `value`.
pub fn references(value: &Value) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    collect(value, &mut refs);
    refs
}

fn collect(value: &Value, refs: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("Ref") {
                if !is_pseudo(id) {
                    refs.insert(id.clone());
                }
            }
            if let Some(Value::Array(parts)) = map.get("Fn::GetAtt") {
                if let Some(Value::String(id)) = parts.first() {
                    refs.insert(id.clone());
                }
            }
            if let Some(sub) = map.get("Fn::Sub") {
                collect_sub(sub, refs);
            }
            for (key, child) in map {
                if key != "Fn::Sub" {
                    collect(child, refs);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, refs);
            }
        }
        _ => {}
    }
}

fn collect_sub(sub: &Value, refs: &mut BTreeSet<String>) {
    let (template, vars) = match sub {
        Value::String(s) => (s.as_str(), None),
        Value::Array(parts) => match (parts.first(), parts.get(1)) {
            (Some(Value::String(s)), vars) => (s.as_str(), vars.and_then(|v| v.as_object())),
            _ => return,
        },
        _ => return,
    };
    for cap in SUB_PLACEHOLDER.captures_iter(template) {
        let name = &cap[1];
        let shadowed = vars.is_some_and(|v| v.contains_key(name));
        if !shadowed && !is_pseudo(name) {
            refs.insert(name.to_string());
        }
    }
    if let Some(vars) = vars {
        for var in vars.values() {
            collect(var, refs);
        }
    }
}

fn is_pseudo(name: &str) -> bool {
    name.starts_with("AWS::")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsic_ref_and_getatt() {
        let v = json!({
            "Role": get_att("SharedRole", "Arn"),
            "Layers": [reference("CommonLayer")],
        });
        let refs = references(&v);
        assert_eq!(
            refs.into_iter().collect::<Vec<_>>(),
            vec!["CommonLayer", "SharedRole"]
        );
    }

    #[test]
    fn test_intrinsic_pseudo_params_ignored() {
        let v = json!({
            "Region": reference("AWS::Region"),
            "Arn": arn("ssm", "parameter/paths"),
        });
        assert!(references(&v).is_empty());
    }

    #[test]
    fn test_intrinsic_sub_placeholders() {
        let v = sub("arn:${AWS::Partition}:execute-api:${AWS::Region}:${AWS::AccountId}:${ChatbotApi}/${ChatbotApiStage}/POST/chat");
        let refs: Vec<_> = references(&v).into_iter().collect();
        assert_eq!(refs, vec!["ChatbotApi", "ChatbotApiStage"]);
    }

    #[test]
    fn test_intrinsic_sub_attribute_placeholder() {
        let v = sub("${Domain.Arn}/*");
        let refs: Vec<_> = references(&v).into_iter().collect();
        assert_eq!(refs, vec!["Domain"]);
    }

    #[test]
    fn test_intrinsic_sub_escaped_literal_skipped() {
        let v = sub("${!NotAResource}");
        assert!(references(&v).is_empty());
    }

    #[test]
    fn test_intrinsic_sub_vars_shadow_and_recurse() {
        let v = json!({
            "Fn::Sub": ["${Name}-${Bucket}", {"Name": get_att("Api", "RootResourceId")}]
        });
        let refs: Vec<_> = references(&v).into_iter().collect();
        assert_eq!(refs, vec!["Api", "Bucket"]);
    }

    #[test]
    fn test_intrinsic_parameter_arn_single_slash() {
        let v = parameter_arn("/wwapi/api-gateway-url");
        assert_eq!(
            v["Fn::Sub"],
            "arn:${AWS::Partition}:ssm:${AWS::Region}:${AWS::AccountId}:parameter/wwapi/api-gateway-url"
        );
        let v = parameter_arn("paths");
        assert!(v["Fn::Sub"].as_str().unwrap().ends_with("parameter/paths"));
    }

    #[test]
    fn test_intrinsic_join_and_select() {
        let v = select(1, get_azs());
        assert_eq!(v, json!({"Fn::Select": [1, {"Fn::GetAZs": ""}]}));
        let j = join("", vec![json!("https://"), reference("Api")]);
        assert_eq!(references(&j).len(), 1);
    }
}
