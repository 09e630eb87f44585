//! Process-lifetime registry of runs.
//!
//! A [`RunStore`] maps simulation ids to [`RunState`]s. Readers always get a cloned
//! snapshot; writers go through [`RunStore::update`], which holds the key's shard lock for
//! the duration of the closure. [`RunStore::begin_run`] uses the same lock for the
//! idle-to-running check-and-set, so two concurrent attempts to start the same run can never
//! both succeed.
//!
//! There is no persistence; dropping the store drops every run.

use crate::agentsim::error::SimulationError;
use crate::agentsim::simulation::{RunState, RunStatus};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Keyed, concurrent collection of runs.
#[derive(Debug, Default)]
pub struct RunStore {
    runs: DashMap<String, RunState>,
}

impl RunStore {
    pub fn new() -> Self {
        RunStore::default()
    }

    /// Register a new run. Fails if the id is already taken.
    pub fn insert(&self, state: RunState) -> Result<(), SimulationError> {
        match self.runs.entry(state.simulation_id.clone()) {
            Entry::Occupied(entry) => Err(SimulationError::InvalidConfig(format!(
                "simulation id {} is already in use",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(state);
                Ok(())
            }
        }
    }

    /// Snapshot of one run.
    pub fn get(&self, simulation_id: &str) -> Option<RunState> {
        self.runs.get(simulation_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, simulation_id: &str) -> bool {
        self.runs.contains_key(simulation_id)
    }

    /// Snapshots of every run, oldest first.
    pub fn list(&self) -> Vec<RunState> {
        let mut runs: Vec<RunState> = self.runs.iter().map(|entry| entry.value().clone()).collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Mutate one run in place and bump its `updated_at`.
    pub fn update<F, T>(&self, simulation_id: &str, f: F) -> Result<T, SimulationError>
    where
        F: FnOnce(&mut RunState) -> Result<T, SimulationError>,
    {
        let mut entry = self
            .runs
            .get_mut(simulation_id)
            .ok_or_else(|| SimulationError::NotFound(simulation_id.to_string()))?;
        let result = f(entry.value_mut())?;
        entry.touch();
        Ok(result)
    }

    /// Atomically move an idle run to running and return the snapshot the loop starts from.
    ///
    /// A running run yields [`SimulationError::AlreadyRunning`]; a completed or failed run
    /// yields [`SimulationError::InvalidState`] until it is truncated back to idle.
    pub fn begin_run(&self, simulation_id: &str) -> Result<RunState, SimulationError> {
        self.update(simulation_id, |state| match state.status {
            RunStatus::Idle => {
                state.status = RunStatus::Running;
                state.error = None;
                state.verification_result = None;
                Ok(state.clone())
            }
            RunStatus::Running => Err(SimulationError::AlreadyRunning(
                state.simulation_id.clone(),
            )),
            status => Err(SimulationError::InvalidState {
                simulation_id: state.simulation_id.clone(),
                status,
            }),
        })
    }
}
