use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::checkpoint::{load_checkpoint, write_checkpoint, CheckpointKey, WriteOutcome};
use super::id::RunId;
use crate::config::Config;
use crate::error::{OntoKgError, Result};
use crate::extract::{ChunkRecord, ChunkStore};

pub(crate) const CONFIG_FILE: &str = "config.toml";
pub(crate) const LOGS_DIR: &str = "logs";
pub(crate) const SCENARIOS_DIR: &str = "scenarios";
const LOG_FILE: &str = "run.log";
const GRAPH_DB_FILE: &str = "graph.sqlite";

/// Per-scenario progress. Only ever moves forward one step at a time:
/// `PENDING -> ONTOLOGY_DONE | SKIPPED -> KG_DONE -> EVALUATED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioState {
    Pending,
    OntologyDone,
    #[serde(rename = "SKIPPED")]
    OntologySkipped,
    KgDone,
    Evaluated,
}

impl ScenarioState {
    fn rank(self) -> u8 {
        match self {
            ScenarioState::Pending => 0,
            ScenarioState::OntologyDone | ScenarioState::OntologySkipped => 1,
            ScenarioState::KgDone => 2,
            ScenarioState::Evaluated => 3,
        }
    }

    pub fn can_advance_to(self, next: ScenarioState) -> bool {
        next.rank() == self.rank() + 1
    }

    /// Whether this state is at or past `stage`'s step.
    pub fn reached(self, stage: ScenarioState) -> bool {
        self.rank() >= stage.rank()
    }
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScenarioState::Pending => "PENDING",
            ScenarioState::OntologyDone => "ONTOLOGY_DONE",
            ScenarioState::OntologySkipped => "SKIPPED",
            ScenarioState::KgDone => "KG_DONE",
            ScenarioState::Evaluated => "EVALUATED",
        };
        f.write_str(name)
    }
}

/// Everything a pipeline call needs to know about its run.
///
/// The configuration snapshot is fixed for the lifetime of the run; scenario states
/// change only through [`advance`](Self::advance).
#[derive(Debug)]
pub struct RunContext {
    id: RunId,
    root: PathBuf,
    config: Config,
    scenarios: Mutex<BTreeMap<String, ScenarioState>>,
}

impl RunContext {
    pub(crate) fn new(
        id: RunId,
        root: PathBuf,
        config: Config,
        scenarios: BTreeMap<String, ScenarioState>,
    ) -> Self {
        Self {
            id,
            root,
            config,
            scenarios: Mutex::new(scenarios),
        }
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn scenarios_dir(&self) -> PathBuf {
        self.root.join(SCENARIOS_DIR)
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOGS_DIR).join(LOG_FILE)
    }

    /// Graph database of this run; each run gets its own file.
    pub fn graph_db_path(&self) -> PathBuf {
        self.root.join(GRAPH_DB_FILE)
    }

    /// Make a scenario known to the run (creating its directory) and return its state.
    pub fn register_scenario(&self, scenario: &str) -> Result<ScenarioState> {
        if scenario.is_empty()
            || !scenario
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(OntoKgError::InvalidInput(format!(
                "scenario id '{}' must be non-empty and use only [A-Za-z0-9_-]",
                scenario
            )));
        }
        fs::create_dir_all(self.scenarios_dir().join(scenario))?;
        let mut scenarios = self.scenarios.lock().unwrap();
        Ok(*scenarios
            .entry(scenario.to_string())
            .or_insert(ScenarioState::Pending))
    }

    pub fn state(&self, scenario: &str) -> ScenarioState {
        self.scenarios
            .lock()
            .unwrap()
            .get(scenario)
            .copied()
            .unwrap_or(ScenarioState::Pending)
    }

    pub fn states(&self) -> BTreeMap<String, ScenarioState> {
        self.scenarios.lock().unwrap().clone()
    }

    /// Move a scenario one step forward. Repeating the current state is a no-op; any
    /// other transition is an error.
    pub fn advance(&self, scenario: &str, next: ScenarioState) -> Result<()> {
        let mut scenarios = self.scenarios.lock().unwrap();
        let current = scenarios
            .get(scenario)
            .copied()
            .unwrap_or(ScenarioState::Pending);
        if current == next {
            return Ok(());
        }
        if !current.can_advance_to(next) {
            return Err(OntoKgError::InvalidInput(format!(
                "illegal state transition for scenario {}: {} -> {}",
                scenario, current, next
            )));
        }
        log::info!("[{}] {}: {} -> {}", self.id, scenario, current, next);
        scenarios.insert(scenario.to_string(), next);
        Ok(())
    }

    pub fn checkpoint<T: Serialize>(&self, key: &CheckpointKey, artifact: &T) -> Result<WriteOutcome> {
        write_checkpoint(&self.scenarios_dir(), key, artifact)
    }

    pub fn load_checkpoint<T: DeserializeOwned>(&self, key: &CheckpointKey) -> Result<Option<T>> {
        load_checkpoint(&self.scenarios_dir(), key)
    }

    /// Per-chunk checkpoints of one scenario, for [`crate::extract::Extractor`].
    pub fn chunk_store(&self, scenario: &str) -> ScenarioChunks<'_> {
        ScenarioChunks {
            run: self,
            scenario: scenario.to_string(),
        }
    }
}

pub struct ScenarioChunks<'a> {
    run: &'a RunContext,
    scenario: String,
}

impl ChunkStore for ScenarioChunks<'_> {
    fn load(&self, epoch: usize, chunk: usize) -> Result<Option<ChunkRecord>> {
        self.run
            .load_checkpoint(&CheckpointKey::chunk(&self.scenario, epoch, chunk))
    }

    fn store(&self, epoch: usize, chunk: usize, record: &ChunkRecord) -> Result<()> {
        self.run
            .checkpoint(&CheckpointKey::chunk(&self.scenario, epoch, chunk), record)
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_monotonic_single_steps() {
        use ScenarioState::*;
        assert!(Pending.can_advance_to(OntologyDone));
        assert!(Pending.can_advance_to(OntologySkipped));
        assert!(OntologySkipped.can_advance_to(KgDone));
        assert!(KgDone.can_advance_to(Evaluated));
        assert!(!Pending.can_advance_to(KgDone));
        assert!(!KgDone.can_advance_to(OntologyDone));
        assert!(!OntologyDone.can_advance_to(OntologySkipped));
        assert!(Evaluated.reached(KgDone));
        assert!(!OntologySkipped.reached(KgDone));
    }

    #[test]
    fn state_names() {
        assert_eq!(ScenarioState::OntologySkipped.to_string(), "SKIPPED");
        assert_eq!(
            serde_json::to_string(&ScenarioState::KgDone).unwrap(),
            "\"KG_DONE\""
        );
        assert_eq!(
            serde_json::to_string(&ScenarioState::OntologySkipped).unwrap(),
            "\"SKIPPED\""
        );
    }
}
