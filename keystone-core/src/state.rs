//! State - Runtime lifecycle of every logical resource
//!
//! The [`StateStore`] is the only place resource lifecycles change. Each entry
//! sits behind its own lock and the name -> entry map is fixed when the store is
//! built, so resources in the same batch never wait on each other.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, Error};
use crate::resource::{ResourceKind, ResourceSpec, Value};

/// Lifecycle of a logical resource during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Pending,
    Creating,
    Created,
    Failed,
    RolledBack,
}

impl Lifecycle {
    /// Whether the state store accepts a move from `self` to `to`
    pub fn can_transition_to(self, to: Lifecycle) -> bool {
        use Lifecycle::*;
        matches!(
            (self, to),
            (Pending, Creating)
                | (Creating, Created)
                | (Creating, Failed)
                | (Created, RolledBack)
                | (Created, Failed)
                | (Failed, RolledBack)
                | (RolledBack, RolledBack)
        )
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Pending => "pending",
            Lifecycle::Creating => "creating",
            Lifecycle::Created => "created",
            Lifecycle::Failed => "failed",
            Lifecycle::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Runtime record of one logical resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub name: String,
    pub kind: ResourceKind,
    pub lifecycle: Lifecycle,
    /// Identifier assigned by the provider (kept after teardown for auditing)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Populated only while `Created`
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, Value>,
    /// Order in which the resource settled out of `Creating`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl ResourceState {
    pub fn pending(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            lifecycle: Lifecycle::Pending,
            provider_id: None,
            outputs: HashMap::new(),
            sequence: None,
        }
    }

    /// Whether rollback has to tear this resource down
    pub fn needs_teardown(&self) -> bool {
        match self.lifecycle {
            Lifecycle::Created => true,
            Lifecycle::Failed => self.provider_id.is_some(),
            _ => false,
        }
    }
}

/// Immutable view of every resource's state at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    resources: BTreeMap<String, ResourceState>,
}

impl StateSnapshot {
    pub fn from_states(states: impl IntoIterator<Item = ResourceState>) -> Self {
        Self {
            resources: states.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ResourceState> {
        self.resources.get(name)
    }

    /// Iterate in logical name order
    pub fn iter(&self) -> impl Iterator<Item = &ResourceState> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn count(&self, lifecycle: Lifecycle) -> usize {
        self.iter().filter(|s| s.lifecycle == lifecycle).count()
    }

    /// True when every resource is `Created`
    pub fn is_successful(&self) -> bool {
        self.iter().all(|s| s.lifecycle == Lifecycle::Created)
    }

    /// Names of created (or partially created) resources in the order they settled
    pub fn creation_order(&self) -> Vec<String> {
        let mut settled: Vec<&ResourceState> = self
            .iter()
            .filter(|s| s.sequence.is_some())
            .collect();
        settled.sort_by_key(|s| s.sequence);
        settled.into_iter().map(|s| s.name.clone()).collect()
    }

    pub fn into_states(self) -> Vec<ResourceState> {
        self.resources.into_values().collect()
    }
}

/// Synchronized owner of all resource states for a run
#[derive(Debug)]
pub struct StateStore {
    entries: HashMap<String, RwLock<ResourceState>>,
    next_sequence: AtomicU64,
}

impl StateStore {
    /// Build a store with every resource `Pending`
    pub fn new(resources: &[ResourceSpec]) -> Self {
        Self::from_states(
            resources
                .iter()
                .map(|r| ResourceState::pending(r.name.clone(), r.kind)),
        )
    }

    /// Rebuild a store from a previously captured snapshot
    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        Self::from_states(snapshot.into_states())
    }

    fn from_states(states: impl IntoIterator<Item = ResourceState>) -> Self {
        let mut next_sequence = 0;
        let entries = states
            .into_iter()
            .map(|state| {
                if let Some(seq) = state.sequence {
                    next_sequence = next_sequence.max(seq + 1);
                }
                (state.name.clone(), RwLock::new(state))
            })
            .collect();

        Self {
            entries,
            next_sequence: AtomicU64::new(next_sequence),
        }
    }

    fn entry(&self, name: &str) -> EngineResult<&RwLock<ResourceState>> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::UnknownResource(name.to_string()))
    }

    pub fn get(&self, name: &str) -> EngineResult<ResourceState> {
        let entry = self.entry(name)?;
        let state = entry.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.clone())
    }

    /// Atomically move a resource to a new lifecycle
    ///
    /// `provider_id` replaces the recorded identifier when given. `outputs` are
    /// stored only on entering `Created`, where an `id` output is added from the
    /// provider identifier if the provider did not report one.
    pub fn transition(
        &self,
        name: &str,
        to: Lifecycle,
        provider_id: Option<String>,
        outputs: Option<HashMap<String, Value>>,
    ) -> EngineResult<ResourceState> {
        let entry = self.entry(name)?;
        let mut state = entry.write().unwrap_or_else(PoisonError::into_inner);

        let from = state.lifecycle;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                resource: name.to_string(),
                from,
                to,
            });
        }

        if let Some(id) = provider_id {
            state.provider_id = Some(id);
        }

        if from == Lifecycle::Creating {
            state.sequence = Some(self.next_sequence.fetch_add(1, Ordering::SeqCst));
        }

        if to == Lifecycle::Created {
            let mut outputs = outputs.unwrap_or_default();
            if let Some(id) = &state.provider_id {
                outputs
                    .entry("id".to_string())
                    .or_insert_with(|| Value::String(id.clone()));
            }
            state.outputs = outputs;
        } else {
            state.outputs.clear();
        }

        state.lifecycle = to;
        debug!("{}: {} -> {}", name, from, to);
        Ok(state.clone())
    }

    /// Consistent copy of every entry
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::from_states(
            self.entries
                .values()
                .map(|entry| entry.read().unwrap_or_else(PoisonError::into_inner).clone()),
        )
    }
}
