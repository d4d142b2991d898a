//! Rollback - Best-effort teardown after a failed run
//!
//! Resources are destroyed one at a time in the reverse of the order they were
//! created. A failed destroy is recorded and the controller moves on, so one
//! stuck resource never blocks cleanup of the rest.

use std::cmp::Reverse;

use log::{info, warn};

use crate::error::Error;
use crate::provider::Provider;
use crate::resource::ResourceKind;
use crate::state::{Lifecycle, ResourceState, StateStore};

/// A resource that could not be torn down
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackFailure {
    pub resource: String,
    pub kind: ResourceKind,
    pub provider_id: Option<String>,
    pub error: Error,
}

/// Result of a rollback pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackReport {
    /// Resources confirmed destroyed, in the order they were destroyed
    pub rolled_back: Vec<String>,
    /// Resources that still exist remotely and need manual attention
    pub failures: Vec<RollbackFailure>,
}

impl RollbackReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Tears down everything a run left behind
pub struct RollbackController<'a, P: Provider> {
    provider: &'a P,
}

impl<'a, P: Provider> RollbackController<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self { provider }
    }

    /// Destroy every `Created` resource (and every `Failed` one that holds a
    /// provider identifier), newest first
    pub async fn rollback(&self, store: &StateStore) -> RollbackReport {
        let snapshot = store.snapshot();
        let mut candidates: Vec<&ResourceState> =
            snapshot.iter().filter(|s| s.needs_teardown()).collect();
        candidates.sort_by_key(|s| Reverse(s.sequence));

        let mut report = RollbackReport::default();
        for state in candidates {
            match self.teardown(store, state).await {
                Ok(()) => report.rolled_back.push(state.name.clone()),
                Err(error) => {
                    warn!("Rollback of {} failed: {}", state.name, error);
                    report.failures.push(RollbackFailure {
                        resource: state.name.clone(),
                        kind: state.kind,
                        provider_id: state.provider_id.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            "Rollback finished: {} destroyed, {} remaining",
            report.rolled_back.len(),
            report.failures.len()
        );
        report
    }

    async fn teardown(&self, store: &StateStore, state: &ResourceState) -> Result<(), Error> {
        let Some(provider_id) = state.provider_id.as_deref() else {
            return Err(Error::DestroyFailed {
                resource: state.name.clone(),
                provider_id: String::new(),
                message: "no provider identifier recorded".to_string(),
            });
        };

        info!("Destroying {} ({})", state.name, provider_id);
        match self.provider.destroy(state.kind, provider_id).await {
            Ok(()) => {
                store.transition(&state.name, Lifecycle::RolledBack, None, None)?;
                Ok(())
            }
            Err(e) => {
                if state.lifecycle == Lifecycle::Created {
                    store.transition(&state.name, Lifecycle::Failed, None, None)?;
                }
                Err(Error::DestroyFailed {
                    resource: state.name.clone(),
                    provider_id: provider_id.to_string(),
                    message: e.message,
                })
            }
        }
    }
}
