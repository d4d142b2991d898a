//! Mapping between Keystone resource kinds and CloudFormation resource types

use keystone_core::resource::ResourceKind;

/// CloudFormation type name Cloud Control uses for a kind
pub fn cfn_type_name(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Network => "AWS::EC2::VPC",
        ResourceKind::Subnet => "AWS::EC2::Subnet",
        ResourceKind::InternetGateway => "AWS::EC2::InternetGateway",
        ResourceKind::GatewayAttachment => "AWS::EC2::VPCGatewayAttachment",
        ResourceKind::RouteTable => "AWS::EC2::RouteTable",
        ResourceKind::Route => "AWS::EC2::Route",
        ResourceKind::RouteTableAssociation => "AWS::EC2::SubnetRouteTableAssociation",
        ResourceKind::SecurityGroup => "AWS::EC2::SecurityGroup",
        ResourceKind::SecurityGroupRule => "AWS::EC2::SecurityGroupIngress",
        ResourceKind::LoadBalancer => "AWS::ElasticLoadBalancingV2::LoadBalancer",
        ResourceKind::TargetGroup => "AWS::ElasticLoadBalancingV2::TargetGroup",
        ResourceKind::Listener => "AWS::ElasticLoadBalancingV2::Listener",
        ResourceKind::LaunchTemplate => "AWS::EC2::LaunchTemplate",
        ResourceKind::AutoscalingGroup => "AWS::AutoScaling::AutoScalingGroup",
    }
}

/// Property names whose casing heck cannot derive, as (keystone, CloudFormation)
pub const IRREGULAR_NAMES: &[(&str, &str)] = &[
    ("vpc_zone_identifier", "VPCZoneIdentifier"),
    ("target_group_arns", "TargetGroupARNs"),
    ("dns_name", "DNSName"),
    ("canonical_hosted_zone_id", "CanonicalHostedZoneID"),
];
