//! State file structures for persisting run state

use serde::{Deserialize, Serialize};

use keystone_core::state::{Lifecycle, ResourceState, StateSnapshot};

/// The state file written after every apply and destroy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Incremented on every write
    pub serial: u64,
    /// Identifies one deployment across writes; a mismatch means a foreign file
    pub lineage: String,
    /// Version of Keystone that last wrote this state
    pub keystone_version: String,
    /// Lifecycle record of every resource of the last run
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            keystone_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.keystone_version = env!("CARGO_PKG_VERSION").to_string();
    }

    /// Replace the recorded resources with a run's final snapshot
    pub fn record(&mut self, snapshot: StateSnapshot) {
        self.resources = snapshot.into_states();
        self.increment_serial();
    }

    pub fn to_snapshot(&self) -> StateSnapshot {
        StateSnapshot::from_states(self.resources.iter().cloned())
    }

    /// Resources that may still exist at the provider
    pub fn live_resources(&self) -> impl Iterator<Item = &ResourceState> {
        self.resources.iter().filter(|r| r.needs_teardown())
    }

    pub fn count(&self, lifecycle: Lifecycle) -> usize {
        self.resources
            .iter()
            .filter(|r| r.lifecycle == lifecycle)
            .count()
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::resource::{ResourceKind, ResourceSpec};
    use keystone_core::state::StateStore;

    fn applied_snapshot() -> StateSnapshot {
        let store = StateStore::new(&[
            ResourceSpec::new("vpc", ResourceKind::Network),
            ResourceSpec::new("subnet_a", ResourceKind::Subnet),
            ResourceSpec::new("lb", ResourceKind::LoadBalancer),
        ]);
        for name in ["vpc", "subnet_a", "lb"] {
            store.transition(name, Lifecycle::Creating, None, None).unwrap();
        }
        store
            .transition("vpc", Lifecycle::Created, Some("vpc-1".to_string()), None)
            .unwrap();
        store
            .transition("subnet_a", Lifecycle::Created, Some("subnet-1".to_string()), None)
            .unwrap();
        store.transition("lb", Lifecycle::Failed, None, None).unwrap();
        store.snapshot()
    }

    #[test]
    fn test_state_file_new() {
        let state = StateFile::new();
        assert_eq!(state.version, StateFile::CURRENT_VERSION);
        assert_eq!(state.serial, 0);
        assert!(!state.lineage.is_empty());
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_record_bumps_serial_and_keeps_lineage() {
        let mut state = StateFile::new();
        let lineage = state.lineage.clone();

        state.record(applied_snapshot());
        state.record(applied_snapshot());

        assert_eq!(state.serial, 2);
        assert_eq!(state.lineage, lineage);
        assert_eq!(state.resources.len(), 3);
    }

    #[test]
    fn test_live_resources_skip_clean_failures() {
        let mut state = StateFile::new();
        state.record(applied_snapshot());

        let live: Vec<&str> = state.live_resources().map(|r| r.name.as_str()).collect();
        assert_eq!(live, vec!["subnet_a", "vpc"]);
        assert_eq!(state.count(Lifecycle::Failed), 1);
    }

    #[test]
    fn test_snapshot_survives_serialization() {
        let mut state = StateFile::new();
        state.record(applied_snapshot());

        let json = serde_json::to_string_pretty(&state).unwrap();
        let deserialized: StateFile = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.lineage, state.lineage);
        assert_eq!(deserialized.to_snapshot(), state.to_snapshot());
        let vpc = deserialized.resources.iter().find(|r| r.name == "vpc").unwrap();
        assert_eq!(vpc.provider_id.as_deref(), Some("vpc-1"));
        assert_eq!(vpc.outputs["id"].as_str(), Some("vpc-1"));
    }
}
