//! Manifest - JSON description of a resource set and the outputs to report
//!
//! References are written as `${name.attribute}` strings:
//!
//! ```json
//! {
//!   "resources": [
//!     { "name": "vpc", "kind": "network", "attributes": { "cidr_block": "10.0.0.0/16" } },
//!     { "name": "subnet_a", "kind": "subnet",
//!       "attributes": { "vpc_id": "${vpc.id}", "cidr_block": "10.0.1.0/24" } }
//!   ],
//!   "outputs": [ { "resource": "subnet_a", "attribute": "id" } ]
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, Error, ManifestError};
use crate::output::OutputRequest;
use crate::plan::Plan;
use crate::resource::{ResourceKind, ResourceSpec, Value};

#[derive(Debug, Serialize, Deserialize)]
struct ManifestDocument {
    resources: Vec<ResourceDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<OutputRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResourceDocument {
    name: String,
    kind: String,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

/// Resources and requested outputs loaded from a manifest
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub resources: Vec<ResourceSpec>,
    pub outputs: Vec<OutputRequest>,
}

impl Manifest {
    pub fn new(resources: Vec<ResourceSpec>, outputs: Vec<OutputRequest>) -> Self {
        Self { resources, outputs }
    }

    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        let document: ManifestDocument = serde_json::from_str(content)?;

        let resources = document
            .resources
            .into_iter()
            .map(|doc| {
                let kind = doc.kind.parse::<ResourceKind>().map_err(|_| ManifestError::UnknownKind {
                    resource: doc.name.clone(),
                    kind: doc.kind.clone(),
                })?;
                let attributes = doc
                    .attributes
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
                    .collect::<Result<HashMap<_, _>, ManifestError>>()?;
                Ok(ResourceSpec {
                    name: doc.name,
                    kind,
                    attributes,
                })
            })
            .collect::<Result<Vec<_>, ManifestError>>()?;

        Ok(Self {
            resources,
            outputs: document.outputs,
        })
    }

    /// Resolve the resources into a Plan and check that every output names one of them
    pub fn plan(&self) -> EngineResult<Plan> {
        let plan = Plan::resolve(self.resources.clone())?;
        if let Some(output) = self
            .outputs
            .iter()
            .find(|output| plan.resource(&output.resource).is_none())
        {
            return Err(Error::UnknownOutput {
                resource: output.resource.clone(),
                attribute: output.attribute.clone(),
            });
        }
        Ok(plan)
    }

    /// Render as pretty JSON; attribute keys come out sorted
    pub fn to_json(&self) -> Result<String, ManifestError> {
        let document = ManifestDocument {
            resources: self
                .resources
                .iter()
                .map(|r| ResourceDocument {
                    name: r.name.clone(),
                    kind: r.kind.to_string(),
                    attributes: r
                        .attributes
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect(),
                })
                .collect(),
            outputs: self.outputs.clone(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }
}
