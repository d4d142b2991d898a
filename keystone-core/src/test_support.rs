//! Scripted provider shared by the engine tests

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::provider::{BoxFuture, CreatedResource, Provider, ProviderError, ProviderResult};
use crate::resource::{ResourceKind, ResourceSpec, Value};

/// Provider whose behaviour is fixed per logical name
///
/// Identifiers are `id-<name>` so destroy calls can be traced back to names.
#[derive(Default)]
pub struct ScriptedProvider {
    pub fail_create: HashSet<String>,
    pub partial_create: HashSet<String>,
    pub fail_destroy: HashSet<String>,
    pub delay: Option<Duration>,
    pub cancel_on_create: Option<(String, CancellationToken)>,
    calls: Mutex<Vec<String>>,
    received: Mutex<HashMap<String, ResourceSpec>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_create(mut self, name: &str) -> Self {
        self.fail_create.insert(name.to_string());
        self
    }

    pub fn partially_creating(mut self, name: &str) -> Self {
        self.partial_create.insert(name.to_string());
        self
    }

    pub fn failing_destroy(mut self, name: &str) -> Self {
        self.fail_destroy.insert(name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn cancelling_on(mut self, name: &str, token: CancellationToken) -> Self {
        self.cancel_on_create = Some((name.to_string(), token));
        self
    }

    /// Calls in the order they were issued, as `create:<name>` / `destroy:<name>`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.calls_with_prefix("create:")
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.calls_with_prefix("destroy:")
    }

    fn calls_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.strip_prefix(prefix).map(str::to_string))
            .collect()
    }

    /// Resource as the provider received it (after substitution)
    pub fn received(&self, name: &str) -> Option<ResourceSpec> {
        self.received.lock().unwrap().get(name).cloned()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Provider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn create(&self, resource: &ResourceSpec) -> BoxFuture<'_, ProviderResult<CreatedResource>> {
        let resource = resource.clone();
        Box::pin(async move {
            let name = resource.name.clone();
            self.calls.lock().unwrap().push(format!("create:{}", name));
            self.received
                .lock()
                .unwrap()
                .insert(name.clone(), resource.clone());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some((trigger, token)) = &self.cancel_on_create
                && *trigger == name
            {
                token.cancel();
            }

            let id = format!("id-{}", name);
            if self.fail_create.contains(&name) {
                return Err(ProviderError::new("create rejected").for_resource(name));
            }
            if self.partial_create.contains(&name) {
                return Err(ProviderError::new("stabilization timed out")
                    .for_resource(name)
                    .with_partial_id(id));
            }

            let mut created =
                CreatedResource::new(id).with_output("arn", format!("arn:test:{}", name));
            if resource.kind == ResourceKind::LoadBalancer {
                created = created.with_output(
                    "dns_name",
                    Value::String(format!("{}-1234.elb.example.com", name)),
                );
            }
            Ok(created)
        })
    }

    fn destroy(&self, _kind: ResourceKind, provider_id: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let name = provider_id
            .strip_prefix("id-")
            .unwrap_or(provider_id)
            .to_string();
        Box::pin(async move {
            self.calls.lock().unwrap().push(format!("destroy:{}", name));
            if self.fail_destroy.contains(&name) {
                return Err(ProviderError::new("dependency violation").for_resource(name));
            }
            Ok(())
        })
    }
}
