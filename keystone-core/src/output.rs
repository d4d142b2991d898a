//! Output - Read designated attributes back after a successful run

use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, Error};
use crate::resource::Value;
use crate::state::StateSnapshot;

/// An output the caller wants reported (e.g., the load balancer's `dns_name`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRequest {
    pub resource: String,
    pub attribute: String,
}

impl OutputRequest {
    pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }
}

/// A resolved output, exactly as the provider reported it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputValue {
    pub resource: String,
    pub attribute: String,
    pub value: Value,
}

/// Resolve the requested outputs from a fully successful snapshot
pub fn extract_outputs(
    snapshot: &StateSnapshot,
    requests: &[OutputRequest],
) -> EngineResult<Vec<OutputValue>> {
    let unavailable = |request: &OutputRequest, reason: &str| Error::OutputNotAvailable {
        resource: request.resource.clone(),
        attribute: request.attribute.clone(),
        reason: reason.to_string(),
    };

    let successful = snapshot.is_successful();
    requests
        .iter()
        .map(|request| {
            if !successful {
                return Err(unavailable(request, "the run did not complete successfully"));
            }
            let state = snapshot
                .get(&request.resource)
                .ok_or_else(|| unavailable(request, "unknown resource"))?;
            let value = state
                .outputs
                .get(&request.attribute)
                .ok_or_else(|| unavailable(request, "attribute was never populated"))?;

            Ok(OutputValue {
                resource: request.resource.clone(),
                attribute: request.attribute.clone(),
                value: value.clone(),
            })
        })
        .collect()
}
