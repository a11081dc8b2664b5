//! Write-once JSON checkpoints.
//!
//! A checkpoint file is an envelope `{key, sha256, created_at, artifact}`. It is written
//! to a temporary file first and then hard-linked into place, which fails if the target
//! already exists, so two writers can never both succeed and a reader never sees a
//! partial file. Writing the same artifact again is a no-op; writing a different one
//! is a [`OntoKgError::CheckpointConflict`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::artifact::OntologyArtifact;
use crate::error::{OntoKgError, Result};
use crate::eval::EvaluationReport;
use crate::extract::{ChunkRecord, ExtractionReport};
use crate::ontology::ScopeArtifact;
use crate::schema::KnowledgeGraph;

/// Pipeline stage a checkpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Scope,
    Ontology,
    Chunk { epoch: usize, chunk: usize },
    Kg,
    KgReport,
    Evaluation,
}

/// Names one checkpoint of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckpointKey {
    pub scenario: String,
    pub stage: Stage,
}

impl CheckpointKey {
    pub fn new(scenario: &str, stage: Stage) -> Self {
        Self {
            scenario: scenario.to_string(),
            stage,
        }
    }

    pub fn scope(scenario: &str) -> Self {
        Self::new(scenario, Stage::Scope)
    }

    pub fn ontology(scenario: &str) -> Self {
        Self::new(scenario, Stage::Ontology)
    }

    pub fn chunk(scenario: &str, epoch: usize, chunk: usize) -> Self {
        Self::new(scenario, Stage::Chunk { epoch, chunk })
    }

    pub fn kg(scenario: &str) -> Self {
        Self::new(scenario, Stage::Kg)
    }

    pub fn kg_report(scenario: &str) -> Self {
        Self::new(scenario, Stage::KgReport)
    }

    pub fn evaluation(scenario: &str) -> Self {
        Self::new(scenario, Stage::Evaluation)
    }

    /// Stage part of the key, e.g. `kg/epoch-0/chunk-3`.
    pub fn stage_name(&self) -> String {
        match self.stage {
            Stage::Scope => "scope".to_string(),
            Stage::Ontology => "ontology".to_string(),
            Stage::Chunk { epoch, chunk } => format!("kg/epoch-{}/chunk-{}", epoch, chunk),
            Stage::Kg => "kg".to_string(),
            Stage::KgReport => "kg_report".to_string(),
            Stage::Evaluation => "evaluation".to_string(),
        }
    }

    /// File location relative to the run's `scenarios/` directory.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.scenario).join(format!("{}.json", self.stage_name()))
    }

    /// Inverse of [`relative_path`](Self::relative_path).
    pub fn from_relative_path(path: &Path) -> Option<Self> {
        let parts: Vec<&str> = path
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        let (scenario, rest) = parts.split_first()?;
        let stage = match rest {
            ["scope.json"] => Stage::Scope,
            ["ontology.json"] => Stage::Ontology,
            ["kg.json"] => Stage::Kg,
            ["kg_report.json"] => Stage::KgReport,
            ["evaluation.json"] => Stage::Evaluation,
            ["kg", epoch, chunk] => Stage::Chunk {
                epoch: epoch.strip_prefix("epoch-")?.parse().ok()?,
                chunk: chunk.strip_prefix("chunk-")?.strip_suffix(".json")?.parse().ok()?,
            },
            _ => return None,
        };
        Some(Self::new(scenario, stage))
    }

    /// Check that `artifact` has the shape this stage persists.
    fn check_artifact(&self, artifact: &Value) -> std::result::Result<(), serde_json::Error> {
        match self.stage {
            Stage::Scope => ScopeArtifact::deserialize(artifact).map(drop),
            Stage::Ontology => OntologyArtifact::deserialize(artifact).map(drop),
            Stage::Chunk { .. } => ChunkRecord::deserialize(artifact).map(drop),
            Stage::Kg => KnowledgeGraph::deserialize(artifact).map(drop),
            Stage::KgReport => ExtractionReport::deserialize(artifact).map(drop),
            Stage::Evaluation => EvaluationReport::deserialize(artifact).map(drop),
        }
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scenario, self.stage_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    key: String,
    sha256: String,
    created_at: DateTime<Utc>,
    artifact: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// An identical artifact was already checkpointed under this key
    Unchanged,
}

/// Digest of the canonical JSON form (object keys sorted).
fn digest(artifact: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(artifact)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write `artifact` under `key` below `scenarios_dir`, at most once.
pub fn write_checkpoint<T: Serialize>(
    scenarios_dir: &Path,
    key: &CheckpointKey,
    artifact: &T,
) -> Result<WriteOutcome> {
    let artifact = serde_json::to_value(artifact)?;
    let sha256 = digest(&artifact)?;
    let path = scenarios_dir.join(key.relative_path());

    if path.exists() {
        return compare_existing(&path, key, &sha256);
    }

    let parent = path
        .parent()
        .ok_or_else(|| OntoKgError::InvalidInput(format!("bad checkpoint path for {}", key)))?;
    fs::create_dir_all(parent)?;

    let envelope = Envelope {
        key: key.to_string(),
        sha256: sha256.clone(),
        created_at: Utc::now(),
        artifact,
    };
    let tmp = parent.join(format!(".{}.tmp", Uuid::new_v4().simple()));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&serde_json::to_vec_pretty(&envelope)?)?;
        file.sync_all()?;
    }

    let linked = fs::hard_link(&tmp, &path);
    fs::remove_file(&tmp)?;
    match linked {
        Ok(()) => {
            log::debug!("Checkpoint written: {}", key);
            Ok(WriteOutcome::Written)
        }
        // Another writer got there first
        Err(e) if e.kind() == ErrorKind::AlreadyExists => compare_existing(&path, key, &sha256),
        Err(e) => Err(e.into()),
    }
}

fn compare_existing(path: &Path, key: &CheckpointKey, sha256: &str) -> Result<WriteOutcome> {
    let existing = read_envelope(path, key)?;
    if existing.sha256 == sha256 {
        Ok(WriteOutcome::Unchanged)
    } else {
        Err(OntoKgError::CheckpointConflict {
            key: key.to_string(),
        })
    }
}

/// Load the artifact stored under `key`, or `None` if there is no checkpoint.
pub fn load_checkpoint<T: DeserializeOwned>(scenarios_dir: &Path, key: &CheckpointKey) -> Result<Option<T>> {
    let path = scenarios_dir.join(key.relative_path());
    if !path.exists() {
        return Ok(None);
    }
    let envelope = read_envelope(&path, key)?;
    let artifact = serde_json::from_value(envelope.artifact).map_err(|e| OntoKgError::InvalidCheckpoint {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some(artifact))
}

/// Full check of a checkpoint file: envelope, key, digest and artifact shape.
pub fn verify_checkpoint(path: &Path, key: &CheckpointKey) -> Result<()> {
    let envelope = read_envelope(path, key)?;
    key.check_artifact(&envelope.artifact)
        .map_err(|e| OntoKgError::InvalidCheckpoint {
            key: key.to_string(),
            reason: format!("artifact does not match stage schema: {}", e),
        })
}

fn read_envelope(path: &Path, key: &CheckpointKey) -> Result<Envelope> {
    let invalid = |reason: String| OntoKgError::InvalidCheckpoint {
        key: key.to_string(),
        reason,
    };
    let text = fs::read_to_string(path)?;
    let envelope: Envelope = serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?;
    if envelope.key != key.to_string() {
        return Err(invalid(format!("stored under key '{}'", envelope.key)));
    }
    if digest(&envelope.artifact)? != envelope.sha256 {
        return Err(invalid("digest mismatch".to_string()));
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::kg_fixtures::entity;
    use crate::schema::Triple;
    use tempfile::TempDir;

    fn graph(extra: bool) -> KnowledgeGraph {
        let mut kg = KnowledgeGraph::new();
        kg.insert_entity(entity("marie-curie", "Marie Curie", "Scientist"));
        kg.insert_entity(entity("sorbonne", "Sorbonne", "Organization"));
        kg.insert_triple(Triple::new("marie-curie", "affiliatedWith", "sorbonne"));
        if extra {
            kg.insert_entity(entity("pierre-curie", "Pierre Curie", "Scientist"));
        }
        kg
    }

    #[test]
    fn identical_rewrite_is_noop_and_different_conflicts() {
        let dir = TempDir::new().unwrap();
        let key = CheckpointKey::kg("squad-0");
        assert_eq!(write_checkpoint(dir.path(), &key, &graph(false)).unwrap(), WriteOutcome::Written);
        assert_eq!(write_checkpoint(dir.path(), &key, &graph(false)).unwrap(), WriteOutcome::Unchanged);
        let err = write_checkpoint(dir.path(), &key, &graph(true)).unwrap_err();
        assert!(matches!(err, OntoKgError::CheckpointConflict { .. }));

        let loaded: KnowledgeGraph = load_checkpoint(dir.path(), &key).unwrap().unwrap();
        assert_eq!(loaded, graph(false));
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let key = CheckpointKey::chunk("s", 0, 2);
        let record = ChunkRecord::Skipped { attempts: 2, error: "timeout".into() };
        write_checkpoint(dir.path(), &key, &record).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path().join("s/kg/epoch-0"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["chunk-2.json"]);
    }

    #[test]
    fn missing_checkpoint_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<KnowledgeGraph> = load_checkpoint(dir.path(), &CheckpointKey::kg("s")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn tampered_checkpoint_is_invalid() {
        let dir = TempDir::new().unwrap();
        let key = CheckpointKey::kg("s");
        write_checkpoint(dir.path(), &key, &graph(false)).unwrap();
        let path = dir.path().join(key.relative_path());
        let text = fs::read_to_string(&path).unwrap().replace("Sorbonne", "Harvard");
        fs::write(&path, text).unwrap();

        let err = load_checkpoint::<KnowledgeGraph>(dir.path(), &key).unwrap_err();
        assert!(matches!(err, OntoKgError::InvalidCheckpoint { .. }));
        assert!(verify_checkpoint(&path, &key).is_err());
    }

    #[test]
    fn fractional_floats_survive_reload() {
        use crate::llm::{ExtractedEntity, ExtractedTriple, ExtractionOutput};

        let dir = TempDir::new().unwrap();
        let endpoint = |label: &str| ExtractedEntity {
            label: label.to_string(),
            entity_type: "Person".to_string(),
            attributes: Default::default(),
        };
        for (i, confidence) in [0.123f32, 0.1, 0.7, 0.333_333_3, 0.987_654_3].into_iter().enumerate() {
            let record = ChunkRecord::Completed {
                output: ExtractionOutput {
                    triples: vec![ExtractedTriple {
                        subject: endpoint("Marie Curie"),
                        relation: "knows".to_string(),
                        object: endpoint("Pierre Curie"),
                        confidence: Some(confidence),
                    }],
                },
            };
            let key = CheckpointKey::chunk("s", 0, i);
            write_checkpoint(dir.path(), &key, &record).unwrap();
            let path = dir.path().join(key.relative_path());
            verify_checkpoint(&path, &key).unwrap();
            assert_eq!(load_checkpoint::<ChunkRecord>(dir.path(), &key).unwrap(), Some(record.clone()));
            assert_eq!(write_checkpoint(dir.path(), &key, &record).unwrap(), WriteOutcome::Unchanged);
        }

        let triples = (1..200u32)
            .map(|i| ExtractedTriple {
                subject: endpoint(&format!("e{}", i)),
                relation: "knows".to_string(),
                object: endpoint("Pierre Curie"),
                confidence: Some(i as f32 / 7.0),
            })
            .collect();
        let record = ChunkRecord::Completed {
            output: ExtractionOutput { triples },
        };
        let key = CheckpointKey::chunk("s", 1, 0);
        write_checkpoint(dir.path(), &key, &record).unwrap();
        verify_checkpoint(&dir.path().join(key.relative_path()), &key).unwrap();
        assert_eq!(load_checkpoint::<ChunkRecord>(dir.path(), &key).unwrap(), Some(record));
    }

    #[test]
    fn wrong_artifact_shape_fails_verification() {
        let dir = TempDir::new().unwrap();
        let key = CheckpointKey::chunk("s", 0, 0);
        write_checkpoint(dir.path(), &key, &serde_json::json!({"status": "exploded"})).unwrap();
        let path = dir.path().join(key.relative_path());
        assert!(verify_checkpoint(&path, &key).is_err());
    }

    #[test]
    fn key_paths_round_trip() {
        for key in [
            CheckpointKey::scope("a"),
            CheckpointKey::ontology("a"),
            CheckpointKey::chunk("a", 2, 17),
            CheckpointKey::kg("a"),
            CheckpointKey::kg_report("a"),
            CheckpointKey::evaluation("a"),
        ] {
            assert_eq!(CheckpointKey::from_relative_path(&key.relative_path()), Some(key));
        }
        assert_eq!(CheckpointKey::from_relative_path(Path::new("a/notes.json")), None);
        assert_eq!(CheckpointKey::chunk("a", 1, 3).to_string(), "a/kg/epoch-1/chunk-3");
    }
}
