//! AWS Cloud Control Provider implementation
//!
//! Creates and deletes resources through the Cloud Control API, polling each
//! request until it settles.

use std::time::Duration;

use aws_config::Region;
use aws_sdk_cloudcontrol::Client as CloudControlClient;
use aws_sdk_cloudcontrol::types::{HandlerErrorCode, OperationStatus, ProgressEvent};
use keystone_core::provider::{CreatedResource, ProviderError, ProviderResult};
use keystone_core::resource::{ResourceKind, ResourceSpec};
use log::{debug, info};

use crate::convert::{desired_state, outputs_from_properties};
use crate::resources::cfn_type_name;

/// How long to wait for a Cloud Control request
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 120,
            delay: Duration::from_secs(5),
        }
    }
}

/// Terminal state of a Cloud Control request
enum Settled {
    Success(String),
    NotFound,
}

/// AWS Cloud Control Provider
pub struct AwsccProvider {
    cloudcontrol_client: CloudControlClient,
    region: String,
    poll: PollConfig,
}

impl AwsccProvider {
    /// Create a new AwsccProvider for the specified region
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self {
            cloudcontrol_client: CloudControlClient::new(&config),
            region: region.to_string(),
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    // =========================================================================
    // Cloud Control API Methods
    // =========================================================================

    /// Get a resource's properties by identifier
    pub async fn cc_get_resource(
        &self,
        type_name: &str,
        identifier: &str,
    ) -> ProviderResult<Option<serde_json::Value>> {
        let result = self
            .cloudcontrol_client
            .get_resource()
            .type_name(type_name)
            .identifier(identifier)
            .send()
            .await;

        match result {
            Ok(response) => {
                if let Some(desc) = response.resource_description()
                    && let Some(props_str) = desc.properties()
                {
                    let props: serde_json::Value = serde_json::from_str(props_str)
                        .map_err(|e| ProviderError::new("Malformed resource properties").with_cause(e))?;
                    Ok(Some(props))
                } else {
                    Ok(None)
                }
            }
            Err(e) => {
                let err_str = format!("{:?}", e);
                if is_not_found(&err_str) {
                    Ok(None)
                } else {
                    Err(ProviderError::new(format!("Failed to get resource: {}", err_str)))
                }
            }
        }
    }

    /// Create a resource and return its identifier once the request succeeds
    pub async fn cc_create_resource(
        &self,
        type_name: &str,
        desired_state: serde_json::Value,
    ) -> ProviderResult<String> {
        let result = self
            .cloudcontrol_client
            .create_resource()
            .type_name(type_name)
            .desired_state(desired_state.to_string())
            .send()
            .await
            .map_err(|e| ProviderError::new(format!("Failed to create resource: {:?}", e)))?;

        let request_token = result
            .progress_event()
            .and_then(|p| p.request_token())
            .ok_or_else(|| ProviderError::new("No request token returned"))?;

        match self.wait_for_operation(request_token).await? {
            Settled::Success(identifier) => Ok(identifier),
            Settled::NotFound => Err(ProviderError::new("Created resource was not found")),
        }
    }

    /// Delete a resource; one that is already gone counts as deleted
    pub async fn cc_delete_resource(
        &self,
        type_name: &str,
        identifier: &str,
    ) -> ProviderResult<()> {
        let result = self
            .cloudcontrol_client
            .delete_resource()
            .type_name(type_name)
            .identifier(identifier)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                let err_str = format!("{:?}", e);
                if is_not_found(&err_str) {
                    debug!("{} {} already deleted", type_name, identifier);
                    return Ok(());
                }
                return Err(ProviderError::new(format!(
                    "Failed to delete resource: {}",
                    err_str
                )));
            }
        };

        if let Some(request_token) = output.progress_event().and_then(|p| p.request_token()) {
            self.wait_for_operation(request_token).await?;
        }

        Ok(())
    }

    /// Poll a request until it settles
    ///
    /// A failed request that already has an identifier reports it as a
    /// partial creation.
    async fn wait_for_operation(&self, request_token: &str) -> ProviderResult<Settled> {
        for _ in 0..self.poll.max_attempts {
            let status = self
                .cloudcontrol_client
                .get_resource_request_status()
                .request_token(request_token)
                .send()
                .await
                .map_err(|e| {
                    ProviderError::new(format!("Failed to get operation status: {:?}", e))
                })?;

            if let Some(progress) = status.progress_event() {
                match progress.operation_status() {
                    Some(OperationStatus::Success) => {
                        return Ok(Settled::Success(
                            progress.identifier().unwrap_or_default().to_string(),
                        ));
                    }
                    Some(OperationStatus::Failed) => {
                        if progress.error_code() == Some(&HandlerErrorCode::NotFound) {
                            return Ok(Settled::NotFound);
                        }
                        let msg = progress.status_message().unwrap_or("Unknown error");
                        return Err(with_partial(
                            ProviderError::new(format!("Operation failed: {}", msg)),
                            progress,
                        ));
                    }
                    Some(OperationStatus::CancelComplete) => {
                        return Err(with_partial(
                            ProviderError::new("Operation was cancelled"),
                            progress,
                        ));
                    }
                    _ => {}
                }
            }
            tokio::time::sleep(self.poll.delay).await;
        }

        Err(ProviderError::new(format!(
            "Operation timed out after {} attempts",
            self.poll.max_attempts
        )))
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Create a resource and read its properties back as outputs
    pub async fn create_resource(&self, resource: ResourceSpec) -> ProviderResult<CreatedResource> {
        let type_name = cfn_type_name(resource.kind);
        let desired = desired_state(&resource)?;

        info!("Creating {} ({})", resource.name, type_name);
        let identifier = self
            .cc_create_resource(type_name, desired)
            .await
            .map_err(|e| e.for_resource(&resource.name))?;

        let props = self
            .cc_get_resource(type_name, &identifier)
            .await
            .map_err(|e| e.for_resource(&resource.name).with_partial_id(&identifier))?;

        let mut created = CreatedResource::new(&identifier);
        if let Some(props) = props {
            created.outputs = outputs_from_properties(&props);
        }
        Ok(created)
    }

    pub async fn delete_resource(&self, kind: ResourceKind, identifier: &str) -> ProviderResult<()> {
        let type_name = cfn_type_name(kind);
        info!("Deleting {} ({})", identifier, type_name);
        self.cc_delete_resource(type_name, identifier)
            .await
            .map_err(|e| e.for_resource(identifier))
    }
}

fn is_not_found(err_str: &str) -> bool {
    err_str.contains("ResourceNotFound") || err_str.contains("NotFound")
}

fn with_partial(error: ProviderError, progress: &ProgressEvent) -> ProviderError {
    match progress.identifier() {
        Some(id) if !id.is_empty() => error.with_partial_id(id),
        _ => error,
    }
}
