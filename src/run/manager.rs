use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::artifact::{OntologyArtifact, OntologyStatus};
use super::checkpoint::{load_checkpoint, verify_checkpoint, CheckpointKey, Stage};
use super::context::{RunContext, ScenarioState, CONFIG_FILE, LOGS_DIR, SCENARIOS_DIR};
use super::id::RunId;
use crate::config::Config;
use crate::error::{OntoKgError, Result};

/// Creates and reopens run directories under a common parent.
///
/// Layout of one run:
///
/// ```text
/// <runs_dir>/<run_id>/
///     config.toml            frozen configuration snapshot
///     logs/run.log
///     scenarios/<scenario>/  ontology.json, kg/epoch-E/chunk-C.json, kg.json, ...
///     graph.sqlite           optional graph sink
/// ```
pub struct RunManager {
    runs_dir: PathBuf,
}

impl RunManager {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.runs_dir())
    }

    /// Create a fresh run with a frozen copy of `config`.
    pub fn create_run(&self, config: &Config) -> Result<RunContext> {
        config.validate()?;
        fs::create_dir_all(&self.runs_dir)?;

        // `create_dir` fails if the directory exists, so concurrent creators can never
        // share a run directory.
        let (id, root) = loop {
            let id = RunId::generate();
            let root = self.runs_dir.join(id.as_str());
            match fs::create_dir(&root) {
                Ok(()) => break (id, root),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    log::debug!("Run id {} taken, generating another", id);
                }
                Err(e) => return Err(e.into()),
            }
        };

        fs::create_dir(root.join(LOGS_DIR))?;
        fs::create_dir(root.join(SCENARIOS_DIR))?;
        let mut snapshot = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(root.join(CONFIG_FILE))?;
        snapshot.write_all(config.to_toml()?.as_bytes())?;
        snapshot.sync_all()?;

        log::info!("Created run {} at {}", id, root.display());
        Ok(RunContext::new(id, root, config.clone(), BTreeMap::new()))
    }

    /// Reopen a run and reconstruct per-scenario progress from the checkpoints on disk.
    ///
    /// Checkpoints that fail their envelope, digest or schema check are renamed to
    /// `*.corrupt` and treated as absent. Leftover temporary files from interrupted
    /// writes are removed.
    pub fn resume_run(path: &Path) -> Result<RunContext> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OntoKgError::InvalidInput(format!("not a run directory: {}", path.display())))?;
        let id = RunId::parse(name)?;
        let config = Config::from_path(&path.join(CONFIG_FILE))?;
        let scenarios_dir = path.join(SCENARIOS_DIR);
        if !scenarios_dir.is_dir() {
            return Err(OntoKgError::InvalidInput(format!(
                "{} has no {} directory",
                path.display(),
                SCENARIOS_DIR
            )));
        }

        let mut found: BTreeMap<String, BTreeSet<Stage>> = BTreeMap::new();
        for entry in fs::read_dir(&scenarios_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(scenario) = entry.file_name().to_str() {
                    found.entry(scenario.to_string()).or_default();
                }
            }
        }

        for entry in WalkDir::new(&scenarios_dir).min_depth(2) {
            let entry = entry.map_err(|e| OntoKgError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file = entry.path();
            let file_name = entry.file_name().to_string_lossy();
            if file_name.starts_with('.') && file_name.ends_with(".tmp") {
                log::debug!("Removing stale temporary file {}", file.display());
                fs::remove_file(file)?;
                continue;
            }
            if !file_name.ends_with(".json") {
                continue;
            }
            let Some(key) = file
                .strip_prefix(&scenarios_dir)
                .ok()
                .and_then(CheckpointKey::from_relative_path)
            else {
                log::warn!("Ignoring unrecognised file {}", file.display());
                continue;
            };
            match verify_checkpoint(file, &key) {
                Ok(()) => {
                    found.entry(key.scenario.clone()).or_default().insert(key.stage);
                }
                Err(e) => {
                    let mut quarantined = OsString::from(file.as_os_str());
                    quarantined.push(".corrupt");
                    log::warn!("{}; moving it to {}", e, PathBuf::from(&quarantined).display());
                    fs::rename(file, &quarantined)?;
                }
            }
        }

        let mut scenarios = BTreeMap::new();
        for (scenario, stages) in found {
            let state = derive_state(&scenarios_dir, &scenario, &stages)?;
            log::info!("[{}] {}: resumed at {}", id, scenario, state);
            scenarios.insert(scenario, state);
        }

        Ok(RunContext::new(id, path.to_path_buf(), config, scenarios))
    }

    /// Resume, insisting that `config` equals the run's frozen snapshot.
    pub fn resume_with_config(path: &Path, config: &Config) -> Result<RunContext> {
        let run = Self::resume_run(path)?;
        if run.config() != config {
            return Err(OntoKgError::ConfigMismatch(run.id().to_string()));
        }
        Ok(run)
    }

    /// Ids of all runs under the runs directory, oldest first.
    pub fn list_runs(&self) -> Result<Vec<RunId>> {
        if !self.runs_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<RunId> = fs::read_dir(&self.runs_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().and_then(|n| RunId::parse(n).ok()))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Longest prefix of the state machine backed by valid checkpoints.
fn derive_state(scenarios_dir: &Path, scenario: &str, stages: &BTreeSet<Stage>) -> Result<ScenarioState> {
    if !stages.contains(&Stage::Ontology) {
        return Ok(ScenarioState::Pending);
    }
    let artifact: Option<OntologyArtifact> =
        load_checkpoint(scenarios_dir, &CheckpointKey::ontology(scenario))?;
    let mut state = match artifact.map(|a| a.status) {
        Some(OntologyStatus::Skipped) => ScenarioState::OntologySkipped,
        Some(_) => ScenarioState::OntologyDone,
        None => return Ok(ScenarioState::Pending),
    };
    if stages.contains(&Stage::Kg) {
        state = ScenarioState::KgDone;
        if stages.contains(&Stage::Evaluation) {
            state = ScenarioState::Evaluated;
        }
    }
    Ok(state)
}
