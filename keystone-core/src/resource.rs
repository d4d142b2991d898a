//! Resource - Logical resources and the references between them

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{EngineResult, Error, ManifestError};
use crate::state::{Lifecycle, StateSnapshot};

/// Kind of infrastructure a logical resource provisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Subnet,
    InternetGateway,
    GatewayAttachment,
    RouteTable,
    Route,
    RouteTableAssociation,
    SecurityGroup,
    SecurityGroupRule,
    LoadBalancer,
    TargetGroup,
    Listener,
    LaunchTemplate,
    AutoscalingGroup,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 14] = [
        ResourceKind::Network,
        ResourceKind::Subnet,
        ResourceKind::InternetGateway,
        ResourceKind::GatewayAttachment,
        ResourceKind::RouteTable,
        ResourceKind::Route,
        ResourceKind::RouteTableAssociation,
        ResourceKind::SecurityGroup,
        ResourceKind::SecurityGroupRule,
        ResourceKind::LoadBalancer,
        ResourceKind::TargetGroup,
        ResourceKind::Listener,
        ResourceKind::LaunchTemplate,
        ResourceKind::AutoscalingGroup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "internet_gateway",
            ResourceKind::GatewayAttachment => "gateway_attachment",
            ResourceKind::RouteTable => "route_table",
            ResourceKind::Route => "route",
            ResourceKind::RouteTableAssociation => "route_table_association",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::SecurityGroupRule => "security_group_rule",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::TargetGroup => "target_group",
            ResourceKind::Listener => "listener",
            ResourceKind::LaunchTemplate => "launch_template",
            ResourceKind::AutoscalingGroup => "autoscaling_group",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind: {}", s))
    }
}

/// Attribute value of a resource
///
/// Manifests spell references as `${target.attribute}` strings (`from_json` /
/// `to_json`). The serde form used for state files keeps every string literal
/// and tags references as `{"$ref": {"target": .., "attribute": ..}}`; a map
/// whose only key is `$ref` or `$map` is wrapped in `{"$map": ..}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    /// Reference to another resource's output (target logical name, output attribute)
    ResourceRef(String, String),
}

impl Value {
    /// Shorthand for a reference value
    pub fn reference(target: impl Into<String>, attribute: impl Into<String>) -> Self {
        Value::ResourceRef(target.into(), attribute.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a `${target.attribute}` reference string
    fn parse_reference(s: &str) -> Option<Value> {
        let inner = s.strip_prefix("${")?.strip_suffix('}')?;
        let (target, attribute) = inner.split_once('.')?;
        if target.is_empty() || attribute.is_empty() {
            return None;
        }
        Some(Value::reference(target, attribute))
    }

    /// Convert a JSON value, turning `${target.attribute}` strings into references
    pub fn from_json(json: &serde_json::Value) -> Result<Value, ManifestError> {
        match json {
            serde_json::Value::String(s) => {
                Ok(Value::parse_reference(s).unwrap_or_else(|| Value::String(s.clone())))
            }
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| ManifestError::InvalidValue(format!("non-integer number {}", n))),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
                .collect::<Result<HashMap<_, _>, ManifestError>>()
                .map(Value::Map),
            serde_json::Value::Null => Err(ManifestError::InvalidValue("null".to_string())),
        }
    }

    /// Convert to JSON, rendering references back as `${target.attribute}`
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(n) => serde_json::Value::Number((*n).into()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => {
                let obj: serde_json::Map<_, _> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                serde_json::Value::Object(obj)
            }
            Value::ResourceRef(target, attribute) => {
                serde_json::Value::String(format!("${{{}.{}}}", target, attribute))
            }
        }
    }

    fn collect_dependencies(&self, used_in: &str, deps: &mut Vec<Dependency>) {
        match self {
            Value::ResourceRef(target, attribute) => deps.push(Dependency {
                target: target.clone(),
                attribute: attribute.clone(),
                used_in: used_in.to_string(),
            }),
            Value::List(items) => {
                for item in items {
                    item.collect_dependencies(used_in, deps);
                }
            }
            Value::Map(map) => {
                for v in map.values() {
                    v.collect_dependencies(used_in, deps);
                }
            }
            _ => {}
        }
    }

    /// Replace every reference with the referenced resource's recorded output
    fn substitute(&self, owner: &str, snapshot: &StateSnapshot) -> EngineResult<Value> {
        match self {
            Value::ResourceRef(target, attribute) => {
                snapshot
                    .get(target)
                    .filter(|state| state.lifecycle == Lifecycle::Created)
                    .and_then(|state| state.outputs.get(attribute))
                    .cloned()
                    .ok_or_else(|| Error::UnresolvedReference {
                        resource: owner.to_string(),
                        target: target.clone(),
                        attribute: attribute.clone(),
                    })
            }
            Value::List(items) => items
                .iter()
                .map(|v| v.substitute(owner, snapshot))
                .collect::<EngineResult<Vec<_>>>()
                .map(Value::List),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), v.substitute(owner, snapshot)?)))
                .collect::<EngineResult<HashMap<_, _>>>()
                .map(Value::Map),
            _ => Ok(self.clone()),
        }
    }
}

const REF_TAG: &str = "$ref";
const MAP_TAG: &str = "$map";

impl Value {
    /// Persisted form: strings stay literal, references are tagged
    fn to_tagged_json(&self) -> serde_json::Value {
        match self {
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_tagged_json).collect())
            }
            Value::Map(map) => {
                let obj: serde_json::Map<_, _> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_tagged_json()))
                    .collect();
                if obj.len() == 1 && (obj.contains_key(REF_TAG) || obj.contains_key(MAP_TAG)) {
                    tagged(MAP_TAG, serde_json::Value::Object(obj))
                } else {
                    serde_json::Value::Object(obj)
                }
            }
            Value::ResourceRef(target, attribute) => tagged(
                REF_TAG,
                serde_json::json!({ "target": target, "attribute": attribute }),
            ),
            Value::String(s) => serde_json::Value::String(s.clone()),
            other => other.to_json(),
        }
    }

    fn from_tagged_json(json: &serde_json::Value) -> Result<Value, ManifestError> {
        match json {
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Value::from_tagged_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            serde_json::Value::Object(map) if map.len() == 1 => {
                if let Some(reference) = map.get(REF_TAG) {
                    let field = |name: &str| {
                        reference.get(name).and_then(|v| v.as_str()).ok_or_else(|| {
                            ManifestError::InvalidValue(format!("reference without {}", name))
                        })
                    };
                    return Ok(Value::reference(field("target")?, field("attribute")?));
                }
                match map.get(MAP_TAG) {
                    Some(serde_json::Value::Object(inner)) => Value::tagged_map(inner),
                    _ => Value::tagged_map(map),
                }
            }
            serde_json::Value::Object(map) => Value::tagged_map(map),
            other => Value::from_json(other),
        }
    }

    fn tagged_map(map: &serde_json::Map<String, serde_json::Value>) -> Result<Value, ManifestError> {
        map.iter()
            .map(|(k, v)| Ok((k.clone(), Value::from_tagged_json(v)?)))
            .collect::<Result<HashMap<_, _>, ManifestError>>()
            .map(Value::Map)
    }
}

fn tagged(tag: &str, inner: serde_json::Value) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert(tag.to_string(), inner);
    serde_json::Value::Object(obj)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_tagged_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Value::from_tagged_json(&json).map_err(serde::de::Error::custom)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A reference from one resource's attribute to another resource's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Target resource logical name
    pub target: String,
    /// Referenced output attribute (e.g., "id")
    pub attribute: String,
    /// Attribute of the referring resource that holds the reference
    pub used_in: String,
}

/// Desired resource declared by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    /// Logical name, unique within the graph
    pub name: String,
    pub kind: ResourceKind,
    pub attributes: HashMap<String, Value>,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// All references held by this resource, sorted by attribute then target
    pub fn dependencies(&self) -> Vec<Dependency> {
        let mut keys: Vec<&String> = self.attributes.keys().collect();
        keys.sort();

        let mut deps = Vec::new();
        for key in keys {
            self.attributes[key].collect_dependencies(key, &mut deps);
        }
        deps
    }

    /// Logical names this resource references
    pub fn references(&self) -> BTreeSet<String> {
        self.dependencies().into_iter().map(|d| d.target).collect()
    }

    /// Return a copy with every reference replaced by its target's recorded output
    pub fn substitute(&self, snapshot: &StateSnapshot) -> EngineResult<ResourceSpec> {
        let mut attributes = HashMap::with_capacity(self.attributes.len());
        for (key, value) in &self.attributes {
            attributes.insert(key.clone(), value.substitute(&self.name, snapshot)?);
        }
        Ok(ResourceSpec {
            name: self.name.clone(),
            kind: self.kind,
            attributes,
        })
    }
}

/// Check that names are unique and that every reference targets a declared resource
pub fn validate(resources: &[ResourceSpec]) -> EngineResult<()> {
    let mut names = HashSet::new();
    for resource in resources {
        if !names.insert(resource.name.as_str()) {
            return Err(Error::DuplicateResource(resource.name.clone()));
        }
    }

    for resource in resources {
        for target in resource.references() {
            if !names.contains(target.as_str()) {
                return Err(Error::UnknownReference {
                    resource: resource.name.clone(),
                    target,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;

    fn subnet() -> ResourceSpec {
        ResourceSpec::new("subnet_a", ResourceKind::Subnet)
            .with_attribute("vpc_id", Value::reference("vpc", "id"))
            .with_attribute("cidr_block", "10.0.1.0/24")
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
        }
        assert!("bucket".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn reference_strings_become_refs() {
        let value = Value::from_json(&serde_json::json!("${vpc.id}")).unwrap();
        assert_eq!(value, Value::reference("vpc", "id"));

        let value = Value::from_json(&serde_json::json!("${broken}")).unwrap();
        assert_eq!(value, Value::String("${broken}".to_string()));
    }

    #[test]
    fn floats_and_nulls_are_rejected() {
        assert!(Value::from_json(&serde_json::json!(1.5)).is_err());
        assert!(Value::from_json(&serde_json::Value::Null).is_err());
    }

    #[test]
    fn nested_references_are_collected() {
        let listener = ResourceSpec::new("listener", ResourceKind::Listener)
            .with_attribute("load_balancer_arn", Value::reference("lb", "id"))
            .with_attribute(
                "default_actions",
                Value::List(vec![Value::Map(HashMap::from([
                    ("type".to_string(), Value::from("forward")),
                    ("target_group_arn".to_string(), Value::reference("tg", "id")),
                ]))]),
            );

        let deps = listener.dependencies();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].used_in, "default_actions");
        assert_eq!(deps[0].target, "tg");
        assert_eq!(
            listener.references().into_iter().collect::<Vec<_>>(),
            vec!["lb".to_string(), "tg".to_string()]
        );
    }

    #[test]
    fn validate_rejects_unknown_reference() {
        let result = validate(&[subnet()]);
        assert_eq!(
            result,
            Err(Error::UnknownReference {
                resource: "subnet_a".to_string(),
                target: "vpc".to_string(),
            })
        );
    }

    #[test]
    fn validate_rejects_duplicates() {
        let resources = vec![
            ResourceSpec::new("vpc", ResourceKind::Network),
            ResourceSpec::new("vpc", ResourceKind::Network),
        ];
        assert_eq!(
            validate(&resources),
            Err(Error::DuplicateResource("vpc".to_string()))
        );
    }

    #[test]
    fn substitute_requires_created_target() {
        let resources = vec![ResourceSpec::new("vpc", ResourceKind::Network), subnet()];
        let store = StateStore::new(&resources);

        let err = resources[1].substitute(&store.snapshot()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { ref target, .. } if target == "vpc"));

        store
            .transition("vpc", Lifecycle::Creating, None, None)
            .unwrap();
        store
            .transition(
                "vpc",
                Lifecycle::Created,
                Some("vpc-123".to_string()),
                Some(HashMap::from([("id".to_string(), Value::from("vpc-123"))])),
            )
            .unwrap();

        let resolved = resources[1].substitute(&store.snapshot()).unwrap();
        assert_eq!(resolved.attributes["vpc_id"], Value::from("vpc-123"));
        assert_eq!(resolved.attributes["cidr_block"], Value::from("10.0.1.0/24"));
    }

    #[test]
    fn serde_form_tags_references() {
        let json = serde_json::to_value(Value::reference("lb", "dns_name")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "$ref": { "target": "lb", "attribute": "dns_name" } })
        );
        assert_eq!(
            serde_json::from_value::<Value>(json).unwrap(),
            Value::reference("lb", "dns_name")
        );
    }

    #[test]
    fn serde_form_keeps_template_shaped_strings_literal() {
        let outputs = HashMap::from([
            ("tag".to_string(), Value::from("${a.b}")),
            (
                "odd".to_string(),
                Value::Map(HashMap::from([("$ref".to_string(), Value::from("x"))])),
            ),
            (
                "list".to_string(),
                Value::List(vec![Value::from("${vpc.id}"), Value::reference("vpc", "id")]),
            ),
        ]);

        let json = serde_json::to_string(&outputs).unwrap();
        let back: HashMap<String, Value> = serde_json::from_str(&json).unwrap();

        assert_eq!(back, outputs);
        assert_eq!(back["tag"], Value::String("${a.b}".to_string()));
    }
}
