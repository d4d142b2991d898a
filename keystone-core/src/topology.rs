//! Topology - The public web tier Keystone provisions out of the box
//!
//! One network with two public subnets, an internet gateway and default route,
//! an application load balancer in front of an autoscaling group, and the
//! security groups that let only the load balancer reach the instances.

use std::collections::HashMap;

use crate::manifest::Manifest;
use crate::output::OutputRequest;
use crate::resource::{ResourceKind, ResourceSpec, Value};

/// Tunables for the web tier
#[derive(Debug, Clone)]
pub struct WebTierConfig {
    /// Prefix for provider-visible names (load balancer, target group, template)
    pub name_prefix: String,
    pub vpc_cidr: String,
    pub subnet_cidrs: [String; 2],
    pub availability_zones: [String; 2],
    pub image_id: String,
    pub instance_type: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
}

impl Default for WebTierConfig {
    fn default() -> Self {
        Self {
            name_prefix: "keystone".to_string(),
            vpc_cidr: "10.0.0.0/16".to_string(),
            subnet_cidrs: ["10.0.1.0/24".to_string(), "10.0.2.0/24".to_string()],
            availability_zones: [
                "ap-northeast-1a".to_string(),
                "ap-northeast-1c".to_string(),
            ],
            image_id: "ami-0d52744d6551d851e".to_string(),
            instance_type: "t3.micro".to_string(),
            min_size: 1,
            max_size: 2,
            desired_capacity: 2,
        }
    }
}

fn map(entries: &[(&str, Value)]) -> Value {
    Value::Map(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<HashMap<_, _>>(),
    )
}

fn id(target: &str) -> Value {
    Value::reference(target, "id")
}

fn http_ingress(source: (&str, Value)) -> Value {
    map(&[
        ("ip_protocol", Value::from("tcp")),
        ("from_port", Value::Int(80)),
        ("to_port", Value::Int(80)),
        source,
    ])
}

/// Resources of the web tier, in declaration order
pub fn web_tier(config: &WebTierConfig) -> Vec<ResourceSpec> {
    let prefix = &config.name_prefix;
    let mut resources = vec![
        ResourceSpec::new("vpc", ResourceKind::Network)
            .with_attribute("cidr_block", config.vpc_cidr.as_str())
            .with_attribute("enable_dns_hostnames", true)
            .with_attribute("enable_dns_support", true),
        ResourceSpec::new("igw", ResourceKind::InternetGateway),
        ResourceSpec::new("igw_attachment", ResourceKind::GatewayAttachment)
            .with_attribute("vpc_id", id("vpc"))
            .with_attribute("internet_gateway_id", id("igw")),
        ResourceSpec::new("public_route_table", ResourceKind::RouteTable)
            .with_attribute("vpc_id", id("vpc")),
        // Referencing the attachment orders the route after the gateway is attached
        ResourceSpec::new("default_route", ResourceKind::Route)
            .with_attribute("route_table_id", id("public_route_table"))
            .with_attribute("destination_cidr_block", "0.0.0.0/0")
            .with_attribute(
                "gateway_id",
                Value::reference("igw_attachment", "internet_gateway_id"),
            ),
    ];

    for (i, suffix) in ["a", "b"].iter().enumerate() {
        let subnet = format!("public_subnet_{}", suffix);
        resources.push(
            ResourceSpec::new(subnet.clone(), ResourceKind::Subnet)
                .with_attribute("vpc_id", id("vpc"))
                .with_attribute("cidr_block", config.subnet_cidrs[i].as_str())
                .with_attribute("availability_zone", config.availability_zones[i].as_str())
                .with_attribute("map_public_ip_on_launch", true),
        );
        resources.push(
            ResourceSpec::new(
                format!("public_route_{}", suffix),
                ResourceKind::RouteTableAssociation,
            )
            .with_attribute("subnet_id", id(&subnet))
            .with_attribute("route_table_id", id("public_route_table")),
        );
    }

    let subnet_ids = Value::List(vec![id("public_subnet_a"), id("public_subnet_b")]);

    resources.extend([
        ResourceSpec::new("lb_security_group", ResourceKind::SecurityGroup)
            .with_attribute("group_description", "HTTP from the internet to the load balancer")
            .with_attribute("vpc_id", id("vpc"))
            .with_attribute(
                "security_group_ingress",
                Value::List(vec![http_ingress(("cidr_ip", Value::from("0.0.0.0/0")))]),
            ),
        ResourceSpec::new("instance_security_group", ResourceKind::SecurityGroup)
            .with_attribute("group_description", "HTTP from the load balancer to instances")
            .with_attribute("vpc_id", id("vpc")),
        ResourceSpec::new("instance_http_from_lb", ResourceKind::SecurityGroupRule)
            .with_attribute("group_id", id("instance_security_group"))
            .with_attribute("ip_protocol", "tcp")
            .with_attribute("from_port", Value::Int(80))
            .with_attribute("to_port", Value::Int(80))
            .with_attribute("source_security_group_id", id("lb_security_group")),
        ResourceSpec::new("load_balancer", ResourceKind::LoadBalancer)
            .with_attribute("name", format!("{}-alb", prefix))
            .with_attribute("type", "application")
            .with_attribute("scheme", "internet-facing")
            .with_attribute("subnets", subnet_ids.clone())
            .with_attribute("security_groups", Value::List(vec![id("lb_security_group")])),
        ResourceSpec::new("target_group", ResourceKind::TargetGroup)
            .with_attribute("name", format!("{}-tg", prefix))
            .with_attribute("port", Value::Int(80))
            .with_attribute("protocol", "HTTP")
            .with_attribute("target_type", "instance")
            .with_attribute("health_check_path", "/")
            .with_attribute("vpc_id", id("vpc")),
        ResourceSpec::new("http_listener", ResourceKind::Listener)
            .with_attribute("load_balancer_arn", id("load_balancer"))
            .with_attribute("port", Value::Int(80))
            .with_attribute("protocol", "HTTP")
            .with_attribute(
                "default_actions",
                Value::List(vec![map(&[
                    ("type", Value::from("forward")),
                    ("target_group_arn", id("target_group")),
                ])]),
            ),
        ResourceSpec::new("launch_template", ResourceKind::LaunchTemplate)
            .with_attribute("launch_template_name", format!("{}-web", prefix))
            .with_attribute(
                "launch_template_data",
                map(&[
                    ("image_id", Value::from(config.image_id.as_str())),
                    ("instance_type", Value::from(config.instance_type.as_str())),
                    (
                        "security_group_ids",
                        Value::List(vec![id("instance_security_group")]),
                    ),
                ]),
            ),
        ResourceSpec::new("web_autoscaling_group", ResourceKind::AutoscalingGroup)
            .with_attribute("min_size", config.min_size.to_string())
            .with_attribute("max_size", config.max_size.to_string())
            .with_attribute("desired_capacity", config.desired_capacity.to_string())
            .with_attribute("vpc_zone_identifier", subnet_ids)
            .with_attribute("target_group_arns", Value::List(vec![id("target_group")]))
            .with_attribute(
                "launch_template",
                map(&[
                    ("launch_template_id", id("launch_template")),
                    ("version", Value::from("$Latest")),
                ]),
            ),
    ]);

    resources
}

/// Outputs reported after the web tier is up
pub fn web_tier_outputs() -> Vec<OutputRequest> {
    vec![OutputRequest::new("load_balancer", "dns_name")]
}

pub fn web_tier_manifest(config: &WebTierConfig) -> Manifest {
    Manifest::new(web_tier(config), web_tier_outputs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Plan;

    #[test]
    fn web_tier_resolves() {
        let plan = Plan::resolve(web_tier(&WebTierConfig::default())).unwrap();
        let order = plan.order();
        let position = |name: &str| order.iter().position(|n| *n == name).unwrap();

        assert_eq!(order[0], "igw");
        assert!(position("vpc") < position("public_subnet_a"));
        assert!(position("igw_attachment") < position("default_route"));
        assert!(position("lb_security_group") < position("instance_http_from_lb"));
        assert!(position("load_balancer") < position("http_listener"));
        assert!(position("launch_template") < position("web_autoscaling_group"));
        assert_eq!(plan.len(), 17);
    }

    #[test]
    fn every_kind_of_the_topology_is_present() {
        let resources = web_tier(&WebTierConfig::default());
        for kind in ResourceKind::ALL {
            assert!(
                resources.iter().any(|r| r.kind == kind),
                "missing {}",
                kind
            );
        }
    }

    #[test]
    fn prefix_flows_into_provider_names() {
        let config = WebTierConfig {
            name_prefix: "staging".to_string(),
            ..Default::default()
        };
        let resources = web_tier(&config);
        let lb = resources.iter().find(|r| r.name == "load_balancer").unwrap();
        assert_eq!(lb.attributes["name"], Value::from("staging-alb"));
    }

    #[test]
    fn manifest_round_trips_through_json() {
        let manifest = web_tier_manifest(&WebTierConfig::default());
        let json = manifest.to_json().unwrap();
        assert_eq!(Manifest::from_json(&json).unwrap(), manifest);
    }
}
