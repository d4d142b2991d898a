//! File-based Provider that records resources in a local JSON file
//!
//! Lets the whole create/rollback cycle run without a cloud account. Every
//! created resource echoes its attributes back as outputs, so references
//! between resources resolve the same way they would against a real API.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use keystone_core::provider::{BoxFuture, CreatedResource, Provider, ProviderError, ProviderResult};
use keystone_core::resource::{ResourceKind, ResourceSpec, Value};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRecord {
    name: String,
    kind: ResourceKind,
    attributes: HashMap<String, Value>,
}

pub struct FileProvider {
    state_file: PathBuf,
    fail_on: HashSet<String>,
    lock: Mutex<()>,
}

impl FileProvider {
    pub const DEFAULT_STATE_FILE: &'static str = ".keystone/provider.json";

    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_STATE_FILE))
    }

    pub fn with_path(state_file: PathBuf) -> Self {
        Self {
            state_file,
            fail_on: HashSet::new(),
            lock: Mutex::new(()),
        }
    }

    /// Make create calls for these logical names fail
    pub fn failing_on(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.fail_on.extend(names);
        self
    }

    fn load_records(&self) -> ProviderResult<BTreeMap<String, FileRecord>> {
        match fs::read_to_string(&self.state_file) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                ProviderError::new(format!(
                    "Failed to parse {}: {}",
                    self.state_file.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(ProviderError::new("Failed to read provider state").with_cause(e)),
        }
    }

    fn save_records(&self, records: &BTreeMap<String, FileRecord>) -> ProviderResult<()> {
        let write = || -> Result<(), std::io::Error> {
            if let Some(parent) = self.state_file.parent() {
                fs::create_dir_all(parent)?;
            }
            let content = serde_json::to_string_pretty(records)?;
            fs::write(&self.state_file, content)
        };
        write().map_err(|e| ProviderError::new("Failed to save provider state").with_cause(e))
    }

    fn create_record(&self, resource: &ResourceSpec) -> ProviderResult<CreatedResource> {
        if self.fail_on.contains(&resource.name) {
            return Err(ProviderError::new("injected failure").for_resource(&resource.name));
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records = self.load_records()?;

        let existing = records
            .iter()
            .find(|(_, r)| r.name == resource.name && r.kind == resource.kind)
            .map(|(id, _)| id.clone());
        let provider_id = match existing {
            Some(id) => {
                debug!("{} already exists as {}", resource.name, id);
                id
            }
            None => {
                let id = provider_id(resource.kind);
                records.insert(
                    id.clone(),
                    FileRecord {
                        name: resource.name.clone(),
                        kind: resource.kind,
                        attributes: resource.attributes.clone(),
                    },
                );
                self.save_records(&records)?;
                id
            }
        };

        Ok(outputs_for(resource, &provider_id))
    }

    fn delete_record(&self, provider_id: &str) -> ProviderResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records = self.load_records()?;
        if records.remove(provider_id).is_none() {
            debug!("{} already deleted", provider_id);
            return Ok(());
        }
        self.save_records(&records)
    }
}

impl Default for FileProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier shaped like the real provider's (e.g., `vpc-1a2b3c4d`)
fn provider_id(kind: ResourceKind) -> String {
    let prefix = match kind {
        ResourceKind::Network => "vpc",
        ResourceKind::Subnet => "subnet",
        ResourceKind::InternetGateway => "igw",
        ResourceKind::GatewayAttachment => "igw-attach",
        ResourceKind::RouteTable => "rtb",
        ResourceKind::Route => "route",
        ResourceKind::RouteTableAssociation => "rtbassoc",
        ResourceKind::SecurityGroup => "sg",
        ResourceKind::SecurityGroupRule => "sgr",
        ResourceKind::LoadBalancer => "lb",
        ResourceKind::TargetGroup => "tg",
        ResourceKind::Listener => "listener",
        ResourceKind::LaunchTemplate => "lt",
        ResourceKind::AutoscalingGroup => "asg",
    };
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

fn outputs_for(resource: &ResourceSpec, provider_id: &str) -> CreatedResource {
    let mut created = CreatedResource::new(provider_id);
    created.outputs = resource.attributes.clone();
    created = created.with_output("arn", format!("arn:keystone:{}:{}", resource.kind, provider_id));
    if resource.kind == ResourceKind::LoadBalancer {
        created = created.with_output(
            "dns_name",
            format!("{}.elb.keystone.local", provider_id),
        );
    }
    created
}

impl Provider for FileProvider {
    fn name(&self) -> &'static str {
        "file"
    }

    fn create(&self, resource: &ResourceSpec) -> BoxFuture<'_, ProviderResult<CreatedResource>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_record(&resource) })
    }

    fn destroy(&self, _kind: ResourceKind, provider_id: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let provider_id = provider_id.to_string();
        Box::pin(async move { self.delete_record(&provider_id) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn provider(dir: &tempfile::TempDir) -> FileProvider {
        FileProvider::with_path(dir.path().join(".keystone/provider.json"))
    }

    #[tokio::test]
    async fn create_echoes_attributes_and_persists() {
        let dir = tempdir().unwrap();
        let provider = provider(&dir);
        let vpc = ResourceSpec::new("vpc", ResourceKind::Network)
            .with_attribute("cidr_block", "10.0.0.0/16");

        let created = provider.create(&vpc).await.unwrap();

        assert!(created.provider_id.starts_with("vpc-"));
        assert_eq!(created.outputs["cidr_block"], Value::from("10.0.0.0/16"));
        assert!(created.outputs.contains_key("arn"));
        assert_eq!(provider.load_records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_is_idempotent_per_logical_name() {
        let dir = tempdir().unwrap();
        let provider = provider(&dir);
        let igw = ResourceSpec::new("igw", ResourceKind::InternetGateway);

        let first = provider.create(&igw).await.unwrap();
        let second = provider.create(&igw).await.unwrap();

        assert_eq!(first.provider_id, second.provider_id);
        assert_eq!(provider.load_records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_balancer_reports_dns_name() {
        let dir = tempdir().unwrap();
        let created = provider(&dir)
            .create(&ResourceSpec::new("web_lb", ResourceKind::LoadBalancer))
            .await
            .unwrap();

        let dns = created.outputs["dns_name"].as_str().unwrap();
        assert!(dns.starts_with(&created.provider_id));
        assert!(dns.ends_with(".elb.keystone.local"));
    }

    #[tokio::test]
    async fn injected_failure_creates_nothing() {
        let dir = tempdir().unwrap();
        let provider = provider(&dir).failing_on(["subnet_b".to_string()]);

        let err = provider
            .create(&ResourceSpec::new("subnet_b", ResourceKind::Subnet))
            .await
            .unwrap_err();

        assert_eq!(err.resource.as_deref(), Some("subnet_b"));
        assert!(err.provider_id.is_none());
        assert!(provider.load_records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn destroy_removes_and_tolerates_missing() {
        let dir = tempdir().unwrap();
        let provider = provider(&dir);
        let created = provider
            .create(&ResourceSpec::new("vpc", ResourceKind::Network))
            .await
            .unwrap();

        provider
            .destroy(ResourceKind::Network, &created.provider_id)
            .await
            .unwrap();
        provider
            .destroy(ResourceKind::Network, &created.provider_id)
            .await
            .unwrap();

        assert!(provider.load_records().unwrap().is_empty());
    }
}
