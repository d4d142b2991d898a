//! Keystone AWS Cloud Control Provider
//!
//! ## Module Structure
//!
//! - `resources` - Resource kind to CloudFormation type mapping
//! - `convert` - Attribute and property name/value conversion
//! - `provider` - AwsccProvider implementation

pub mod convert;
pub mod provider;
pub mod resources;

pub use provider::{AwsccProvider, PollConfig};

use keystone_core::provider::{BoxFuture, CreatedResource, Provider, ProviderResult};
use keystone_core::resource::{ResourceKind, ResourceSpec};

impl Provider for AwsccProvider {
    fn name(&self) -> &'static str {
        "awscc"
    }

    fn create(&self, resource: &ResourceSpec) -> BoxFuture<'_, ProviderResult<CreatedResource>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(resource).await })
    }

    fn destroy(&self, kind: ResourceKind, provider_id: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let provider_id = provider_id.to_string();
        Box::pin(async move { self.delete_resource(kind, &provider_id).await })
    }
}
