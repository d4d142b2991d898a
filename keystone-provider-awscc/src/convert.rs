//! Conversion between Keystone attributes and Cloud Control properties

use std::collections::HashMap;

use heck::{ToSnakeCase, ToUpperCamelCase};
use keystone_core::provider::{ProviderError, ProviderResult};
use keystone_core::resource::{ResourceSpec, Value};
use serde_json::json;

use crate::resources::IRREGULAR_NAMES;

/// snake_case attribute name to the provider's PascalCase property name
pub fn to_provider_name(name: &str) -> String {
    IRREGULAR_NAMES
        .iter()
        .find(|(snake, _)| *snake == name)
        .map(|(_, pascal)| pascal.to_string())
        .unwrap_or_else(|| name.to_upper_camel_case())
}

/// PascalCase property name back to snake_case
pub fn to_keystone_name(name: &str) -> String {
    IRREGULAR_NAMES
        .iter()
        .find(|(_, pascal)| *pascal == name)
        .map(|(snake, _)| snake.to_string())
        .unwrap_or_else(|| name.to_snake_case())
}

/// Desired-state document for a create call
pub fn desired_state(resource: &ResourceSpec) -> ProviderResult<serde_json::Value> {
    let mut keys: Vec<&String> = resource.attributes.keys().collect();
    keys.sort();

    let mut state = serde_json::Map::new();
    for key in keys {
        let value = value_to_json(&resource.attributes[key])
            .map_err(|e| ProviderError::new(format!("{}: {}", key, e)).for_resource(&resource.name))?;
        state.insert(to_provider_name(key), value);
    }
    Ok(serde_json::Value::Object(state))
}

/// Convert a substituted value, renaming nested map keys too
pub fn value_to_json(value: &Value) -> Result<serde_json::Value, String> {
    match value {
        Value::String(s) => Ok(json!(s)),
        Value::Int(i) => Ok(json!(i)),
        Value::Bool(b) => Ok(json!(b)),
        Value::List(items) => items
            .iter()
            .map(value_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
        Value::Map(map) => {
            let mut object = serde_json::Map::new();
            for (k, v) in map {
                object.insert(to_provider_name(k), value_to_json(v)?);
            }
            Ok(serde_json::Value::Object(object))
        }
        Value::ResourceRef(target, attribute) => Err(format!(
            "unresolved reference to {}.{}",
            target, attribute
        )),
    }
}

/// Convert a property value read back from the provider
pub fn json_to_value(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        // Integers that fit i64 stay numeric; anything else keeps its exact text
        serde_json::Value::Number(n) => Some(
            n.as_i64()
                .map(Value::Int)
                .unwrap_or_else(|| Value::String(n.to_string())),
        ),
        serde_json::Value::Array(arr) => {
            Some(Value::List(arr.iter().filter_map(json_to_value).collect()))
        }
        serde_json::Value::Object(object) => Some(Value::Map(
            object
                .iter()
                .filter_map(|(k, v)| json_to_value(v).map(|v| (to_keystone_name(k), v)))
                .collect(),
        )),
        serde_json::Value::Null => None,
    }
}

/// Top-level properties of a resource as snake_case outputs
pub fn outputs_from_properties(props: &serde_json::Value) -> HashMap<String, Value> {
    props
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(k, v)| json_to_value(v).map(|v| (to_keystone_name(k), v)))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::resource::ResourceKind;

    #[test]
    fn test_provider_names() {
        assert_eq!(to_provider_name("cidr_block"), "CidrBlock");
        assert_eq!(to_provider_name("enable_dns_hostnames"), "EnableDnsHostnames");
        assert_eq!(to_provider_name("load_balancer_arn"), "LoadBalancerArn");
        assert_eq!(to_provider_name("vpc_zone_identifier"), "VPCZoneIdentifier");
        assert_eq!(to_provider_name("target_group_arns"), "TargetGroupARNs");
    }

    #[test]
    fn test_keystone_names() {
        assert_eq!(to_keystone_name("VpcId"), "vpc_id");
        assert_eq!(to_keystone_name("InternetGatewayId"), "internet_gateway_id");
        assert_eq!(to_keystone_name("DNSName"), "dns_name");
        assert_eq!(to_keystone_name("TargetGroupARNs"), "target_group_arns");
    }

    #[test]
    fn test_desired_state_renames_nested_keys() {
        let template = ResourceSpec::new("lt", ResourceKind::LaunchTemplate).with_attribute(
            "launch_template_data",
            Value::Map(
                [
                    ("image_id".to_string(), Value::from("ami-123")),
                    (
                        "security_group_ids".to_string(),
                        Value::List(vec![Value::from("sg-1")]),
                    ),
                ]
                .into_iter()
                .collect(),
            ),
        );

        let state = desired_state(&template).unwrap();
        assert_eq!(
            state,
            json!({
                "LaunchTemplateData": {
                    "ImageId": "ami-123",
                    "SecurityGroupIds": ["sg-1"]
                }
            })
        );
    }

    #[test]
    fn test_desired_state_rejects_references() {
        let subnet = ResourceSpec::new("subnet_a", ResourceKind::Subnet)
            .with_attribute("vpc_id", Value::reference("vpc", "id"));

        let err = desired_state(&subnet).unwrap_err();
        assert_eq!(err.resource.as_deref(), Some("subnet_a"));
        assert!(err.message.contains("vpc.id"));
    }

    #[test]
    fn test_non_integer_numbers_keep_their_text() {
        assert_eq!(json_to_value(&json!(300)), Some(Value::Int(300)));
        assert_eq!(json_to_value(&json!(0.5)), Some(Value::String("0.5".to_string())));
        assert_eq!(
            json_to_value(&json!(u64::MAX)),
            Some(Value::String(u64::MAX.to_string()))
        );
    }

    #[test]
    fn test_outputs_from_properties() {
        let props = json!({
            "LoadBalancerArn": "arn:aws:elasticloadbalancing:lb/app/web/1",
            "DNSName": "web-1.ap-northeast-1.elb.amazonaws.com",
            "SecurityGroups": ["sg-1"],
            "LoadBalancerAttributes": null,
            "IpAddressType": "ipv4"
        });

        let outputs = outputs_from_properties(&props);
        assert_eq!(
            outputs["dns_name"],
            Value::from("web-1.ap-northeast-1.elb.amazonaws.com")
        );
        assert_eq!(outputs["security_groups"], Value::List(vec![Value::from("sg-1")]));
        assert!(!outputs.contains_key("load_balancer_attributes"));
        assert_eq!(outputs.len(), 4);
    }
}
