//! Apply - Execute a Plan against a Provider
//!
//! The engine walks the plan batch by batch. Resources inside a batch have no
//! edges between them, so their create calls are issued concurrently (up to
//! `max_concurrency` at a time) and the whole chunk settles before the next one
//! starts. The first failure stops the run and hands the State Store to the
//! Rollback Controller.

use futures_util::future::join_all;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::plan::Plan;
use crate::provider::Provider;
use crate::rollback::{RollbackController, RollbackReport};
use crate::state::{Lifecycle, StateSnapshot, StateStore};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct ApplyConfig {
    /// Upper bound on concurrent create calls; 1 applies the plan strictly in order
    pub max_concurrency: usize,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every resource was created
    Succeeded,
    /// The run failed and everything it created was torn down
    RolledBack,
    /// The run failed and some resources could not be torn down
    RollbackIncomplete,
}

/// Result of applying a Plan
#[derive(Debug, Clone)]
pub struct ApplyReport {
    /// Final state of every resource
    pub snapshot: StateSnapshot,
    /// Errors that stopped the run
    pub failures: Vec<Error>,
    /// Present whenever rollback ran
    pub rollback: Option<RollbackReport>,
    /// The caller cancelled the run
    pub cancelled: bool,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.outcome() == ApplyOutcome::Succeeded
    }

    /// The run stopped on an engine invariant violation rather than a provider failure
    pub fn has_internal_error(&self) -> bool {
        self.failures.iter().any(Error::is_internal)
    }

    pub fn outcome(&self) -> ApplyOutcome {
        if self.failures.is_empty() && !self.cancelled && self.snapshot.is_successful() {
            return ApplyOutcome::Succeeded;
        }
        match &self.rollback {
            Some(report) if report.is_complete() => ApplyOutcome::RolledBack,
            _ => ApplyOutcome::RollbackIncomplete,
        }
    }
}

/// Engine that creates resources through a Provider
pub struct ApplyEngine<P: Provider> {
    provider: P,
    config: ApplyConfig,
}

impl<P: Provider> ApplyEngine<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: ApplyConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ApplyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Apply a Plan to completion
    pub async fn apply(&self, plan: &Plan) -> ApplyReport {
        self.apply_with_cancel(plan, &CancellationToken::new()).await
    }

    /// Apply a Plan, stopping before the next chunk once `cancel` fires
    ///
    /// Calls already in flight are allowed to finish; afterwards the run is
    /// rolled back exactly as if a resource had failed.
    pub async fn apply_with_cancel(&self, plan: &Plan, cancel: &CancellationToken) -> ApplyReport {
        let resources: Vec<_> = plan.resources().cloned().collect();
        let store = StateStore::new(&resources);
        let chunk_size = self.config.max_concurrency.max(1);

        let mut failures = Vec::new();
        let mut cancelled = false;

        'batches: for (index, batch) in plan.batches().iter().enumerate() {
            for chunk in batch.chunks(chunk_size) {
                if cancel.is_cancelled() {
                    warn!("Apply cancelled before batch {}", index + 1);
                    cancelled = true;
                    break 'batches;
                }

                let results = join_all(
                    chunk
                        .iter()
                        .map(|name| self.create_resource(plan, &store, name)),
                )
                .await;
                for failure in results.into_iter().filter_map(Result::err) {
                    if failure.is_internal() {
                        error!("Engine invariant violated, aborting: {}", failure);
                    }
                    failures.push(failure);
                }

                if !failures.is_empty() {
                    break 'batches;
                }
            }
        }

        let rollback = if failures.is_empty() && !cancelled {
            None
        } else {
            Some(RollbackController::new(&self.provider).rollback(&store).await)
        };

        let report = ApplyReport {
            snapshot: store.snapshot(),
            failures,
            rollback,
            cancelled,
        };
        info!("Apply finished: {:?}", report.outcome());
        report
    }

    /// Substitute, create and record a single resource
    async fn create_resource(&self, plan: &Plan, store: &StateStore, name: &str) -> Result<(), Error> {
        let spec = plan
            .resource(name)
            .ok_or_else(|| Error::UnknownResource(name.to_string()))?;

        let resolved = spec.substitute(&store.snapshot()).map_err(|e| match e {
            Error::UnresolvedReference {
                resource, target, ..
            } => Error::DependencyNotReady { resource, target },
            other => other,
        })?;

        store.transition(name, Lifecycle::Creating, None, None)?;
        info!("Creating {} ({})", name, spec.kind);

        match self.provider.create(&resolved).await {
            Ok(created) => {
                info!("Created {} ({})", name, created.provider_id);
                store.transition(
                    name,
                    Lifecycle::Created,
                    Some(created.provider_id),
                    Some(created.outputs),
                )?;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to create {}: {}", name, e);
                store.transition(name, Lifecycle::Failed, e.provider_id.clone(), None)?;
                Err(Error::CreateFailed {
                    resource: name.to_string(),
                    message: e.message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceKind, ResourceSpec, Value};
    use crate::test_support::ScriptedProvider;
    use std::time::Duration;

    fn resource(name: &str, kind: ResourceKind, deps: &[&str]) -> ResourceSpec {
        deps.iter().fold(ResourceSpec::new(name, kind), |r, dep| {
            r.with_attribute(format!("{}_id", dep), Value::reference(*dep, "id"))
        })
    }

    /// network, two subnets and a gateway on the network, a route table on the
    /// gateway, a security group and a load balancer over both subnets
    fn scenario() -> Plan {
        Plan::resolve(vec![
            resource("vpc", ResourceKind::Network, &[]),
            resource("subnet_1", ResourceKind::Subnet, &["vpc"]),
            resource("subnet_2", ResourceKind::Subnet, &["vpc"]),
            resource("vpc_igw", ResourceKind::InternetGateway, &["vpc"]),
            resource("web_sg", ResourceKind::SecurityGroup, &["vpc"]),
            resource("route_table", ResourceKind::RouteTable, &["vpc", "vpc_igw"]),
            resource(
                "web_lb",
                ResourceKind::LoadBalancer,
                &["subnet_1", "subnet_2", "web_sg"],
            ),
        ])
        .unwrap()
    }

    fn serial() -> ApplyConfig {
        ApplyConfig { max_concurrency: 1 }
    }

    fn lifecycle(report: &ApplyReport, name: &str) -> Lifecycle {
        report.snapshot.get(name).unwrap().lifecycle
    }

    #[tokio::test]
    async fn apply_empty_plan() {
        let engine = ApplyEngine::new(ScriptedProvider::new());
        let report = engine.apply(&Plan::resolve(vec![]).unwrap()).await;

        assert!(report.is_success());
        assert!(report.rollback.is_none());
    }

    #[tokio::test]
    async fn apply_creates_everything_in_order() {
        let plan = scenario();
        let engine = ApplyEngine::new(ScriptedProvider::new()).with_config(serial());

        let report = engine.apply(&plan).await;

        assert_eq!(report.outcome(), ApplyOutcome::Succeeded);
        assert!(report.snapshot.is_successful());
        assert_eq!(engine.provider().created(), plan.order());
        for state in report.snapshot.iter() {
            assert!(state.outputs.contains_key("id"));
            assert!(state.outputs.contains_key("arn"));
        }
    }

    #[tokio::test]
    async fn provider_receives_substituted_attributes() {
        let plan = scenario();
        let engine = ApplyEngine::new(ScriptedProvider::new());
        engine.apply(&plan).await;

        let lb = engine.provider().received("web_lb").unwrap();
        assert_eq!(lb.attributes["subnet_1_id"], Value::from("id-subnet_1"));
        assert_eq!(lb.attributes["web_sg_id"], Value::from("id-web_sg"));
    }

    #[tokio::test]
    async fn failure_rolls_back_in_reverse_creation_order() {
        let plan = scenario();
        let engine =
            ApplyEngine::new(ScriptedProvider::new().failing_create("subnet_2")).with_config(serial());

        let report = engine.apply(&plan).await;

        assert_eq!(report.outcome(), ApplyOutcome::RolledBack);
        assert_eq!(
            engine.provider().calls(),
            vec![
                "create:vpc",
                "create:subnet_1",
                "create:subnet_2",
                "destroy:subnet_1",
                "destroy:vpc",
            ]
        );
        assert_eq!(lifecycle(&report, "vpc"), Lifecycle::RolledBack);
        assert_eq!(lifecycle(&report, "subnet_1"), Lifecycle::RolledBack);
        assert_eq!(lifecycle(&report, "subnet_2"), Lifecycle::Failed);
        for name in ["vpc_igw", "web_sg", "route_table", "web_lb"] {
            assert_eq!(lifecycle(&report, name), Lifecycle::Pending);
        }
        assert_eq!(
            report.failures,
            vec![Error::CreateFailed {
                resource: "subnet_2".to_string(),
                message: "create rejected".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn stuck_rollback_is_reported() {
        let plan = scenario();
        let provider = ScriptedProvider::new()
            .failing_create("subnet_2")
            .failing_destroy("vpc");
        let engine = ApplyEngine::new(provider).with_config(serial());

        let report = engine.apply(&plan).await;

        assert_eq!(report.outcome(), ApplyOutcome::RollbackIncomplete);
        assert_eq!(lifecycle(&report, "subnet_1"), Lifecycle::RolledBack);
        assert_eq!(lifecycle(&report, "vpc"), Lifecycle::Failed);
        let rollback = report.rollback.unwrap();
        assert_eq!(rollback.failures.len(), 1);
        assert_eq!(rollback.failures[0].resource, "vpc");
    }

    #[tokio::test]
    async fn batch_failure_rolls_back_siblings() {
        let plan = scenario();
        let engine = ApplyEngine::new(ScriptedProvider::new().failing_create("subnet_2"))
            .with_config(ApplyConfig { max_concurrency: 8 });

        let report = engine.apply(&plan).await;

        assert_eq!(report.outcome(), ApplyOutcome::RolledBack);
        for name in ["subnet_1", "vpc_igw", "web_sg", "vpc"] {
            assert_eq!(lifecycle(&report, name), Lifecycle::RolledBack);
        }
        assert_eq!(lifecycle(&report, "route_table"), Lifecycle::Pending);
        assert_eq!(lifecycle(&report, "web_lb"), Lifecycle::Pending);

        let destroyed = engine.provider().destroyed();
        assert_eq!(destroyed.len(), 4);
        assert_eq!(destroyed.last().map(String::as_str), Some("vpc"));
    }

    #[tokio::test]
    async fn independent_resources_run_concurrently() {
        let plan = scenario();
        let provider = ScriptedProvider::new().with_delay(Duration::from_millis(20));
        let engine = ApplyEngine::new(provider).with_config(ApplyConfig { max_concurrency: 3 });

        let report = engine.apply(&plan).await;

        assert!(report.is_success());
        assert_eq!(engine.provider().max_in_flight(), 3);
    }

    #[tokio::test]
    async fn partially_created_resource_is_destroyed() {
        let plan = scenario();
        let engine = ApplyEngine::new(ScriptedProvider::new().partially_creating("subnet_1"))
            .with_config(serial());

        let report = engine.apply(&plan).await;

        assert_eq!(report.outcome(), ApplyOutcome::RolledBack);
        assert_eq!(engine.provider().destroyed(), vec!["subnet_1", "vpc"]);
        assert_eq!(lifecycle(&report, "subnet_1"), Lifecycle::RolledBack);
    }

    #[tokio::test]
    async fn cancelled_before_start_creates_nothing() {
        let plan = scenario();
        let engine = ApplyEngine::new(ScriptedProvider::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = engine.apply_with_cancel(&plan, &cancel).await;

        assert!(report.cancelled);
        assert_eq!(report.outcome(), ApplyOutcome::RolledBack);
        assert!(engine.provider().calls().is_empty());
        assert_eq!(report.snapshot.count(Lifecycle::Pending), plan.len());
    }

    #[tokio::test]
    async fn cancel_lets_in_flight_call_finish_then_rolls_back() {
        let plan = scenario();
        let cancel = CancellationToken::new();
        let provider = ScriptedProvider::new().cancelling_on("vpc", cancel.clone());
        let engine = ApplyEngine::new(provider).with_config(serial());

        let report = engine.apply_with_cancel(&plan, &cancel).await;

        assert!(report.cancelled);
        assert_eq!(
            engine.provider().calls(),
            vec!["create:vpc", "destroy:vpc"]
        );
        assert_eq!(lifecycle(&report, "vpc"), Lifecycle::RolledBack);
        assert_eq!(lifecycle(&report, "subnet_1"), Lifecycle::Pending);
    }

    #[tokio::test]
    async fn missing_dependency_output_is_an_internal_error() {
        let plan = Plan::resolve(vec![
            resource("vpc", ResourceKind::Network, &[]),
            ResourceSpec::new("subnet_1", ResourceKind::Subnet)
                .with_attribute("vpc_id", Value::reference("vpc", "no_such_output")),
        ])
        .unwrap();
        let engine = ApplyEngine::new(ScriptedProvider::new()).with_config(serial());

        let report = engine.apply(&plan).await;

        assert!(report.has_internal_error());
        assert_eq!(
            report.failures,
            vec![Error::DependencyNotReady {
                resource: "subnet_1".to_string(),
                target: "vpc".to_string(),
            }]
        );
        assert_eq!(report.outcome(), ApplyOutcome::RolledBack);
        assert_eq!(lifecycle(&report, "vpc"), Lifecycle::RolledBack);
        assert_eq!(lifecycle(&report, "subnet_1"), Lifecycle::Pending);
        assert_eq!(engine.provider().calls(), vec!["create:vpc", "destroy:vpc"]);
    }

    #[tokio::test]
    async fn provider_failure_is_not_internal() {
        let engine = ApplyEngine::new(ScriptedProvider::new().failing_create("vpc"));
        let report = engine.apply(&scenario()).await;

        assert!(!report.failures.is_empty());
        assert!(!report.has_internal_error());
    }
}
