//! Scenario pipeline: scoping and ontology stage, extraction stage, optional hand-off to
//! the graph sink, then evaluation. Each stage checkpoints its artifact and advances the
//! scenario state, so a resumed run continues from the first stage without a checkpoint.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ExtractionConfig;
use crate::error::{OntoKgError, Result};
use crate::eval::{EvaluationReport, Evaluator, LlmQaEvaluator, Question, SquadDataset};
use crate::extract::{ExtractionReport, Extractor};
use crate::llm::LlmClient;
use crate::ontology::{ScopeArtifact, Scoper, Synthesizer};
use crate::run::{CheckpointKey, OntologyArtifact, OntologyStatus, RunContext, ScenarioState};
use crate::schema::{KnowledgeGraph, Ontology};
use crate::sink::{GraphSink, SqliteGraphSink};
use crate::text::chunk_document;
use crate::validate::{validate_kg, validate_ontology};

/// One scenario entry of a scenarios file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioEntry {
    pub id: String,
    /// Domain for ontology synthesis; without one the scenario runs ontology-free.
    #[serde(default)]
    pub domain: Option<String>,
    /// SQuAD topics whose contexts are the chunks and whose questions are evaluated
    #[serde(default)]
    pub squad_titles: Vec<String>,
    /// Plain-text corpora, chunked with the extraction settings
    #[serde(default)]
    pub text_files: Vec<PathBuf>,
}

/// A scenarios file:
///
/// ```toml
/// squad = "eval/train-v2.0.json"
///
/// [[scenario]]
/// id = "fiction"
/// domain = "Fiction Books"
/// squad_titles = ["To_Kill_A_Mockingbird"]
/// ```
///
/// Relative paths are resolved against the file's directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioFile {
    #[serde(default)]
    pub squad: Option<PathBuf>,
    #[serde(default, rename = "scenario")]
    pub scenarios: Vec<ScenarioEntry>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl ScenarioFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            OntoKgError::InvalidInput(format!("Failed to read scenarios file {}: {}", path.display(), e))
        })?;
        let mut file = Self::from_toml_str(&text)?;
        file.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(file)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ScenarioFile = toml::from_str(text)?;
        if file.scenarios.is_empty() {
            return Err(OntoKgError::InvalidInput("scenarios file defines no [[scenario]]".to_string()));
        }
        Ok(file)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Load the texts and questions of every scenario.
    pub fn scenarios(&self, extraction: &ExtractionConfig) -> Result<Vec<Scenario>> {
        let needs_squad = self.scenarios.iter().any(|s| !s.squad_titles.is_empty());
        let dataset = match (&self.squad, needs_squad) {
            (Some(path), true) => Some(SquadDataset::load(&self.resolve_path(path))?),
            (None, true) => {
                return Err(OntoKgError::InvalidInput(
                    "scenarios use squad_titles but no squad dataset is configured".to_string(),
                ))
            }
            _ => None,
        };

        let mut scenarios = Vec::with_capacity(self.scenarios.len());
        for entry in &self.scenarios {
            let mut chunks = Vec::new();
            let mut questions = Vec::new();
            if let Some(dataset) = &dataset {
                if !entry.squad_titles.is_empty() {
                    let benchmark = dataset.benchmark(&entry.squad_titles)?;
                    chunks.extend(benchmark.contexts);
                    questions = benchmark.questions;
                }
            }
            for file in &entry.text_files {
                let text = fs::read_to_string(self.resolve_path(file))?;
                chunks.extend(chunk_document(&text, extraction)?.into_iter().map(|c| c.text));
            }
            if chunks.is_empty() {
                return Err(OntoKgError::InvalidInput(format!(
                    "scenario {} has no text: set squad_titles or text_files",
                    entry.id
                )));
            }
            scenarios.push(Scenario {
                id: entry.id.clone(),
                domain: entry.domain.clone(),
                chunks,
                questions,
            });
        }
        Ok(scenarios)
    }
}

/// Everything one scenario runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub id: String,
    pub domain: Option<String>,
    pub chunks: Vec<String>,
    pub questions: Vec<Question>,
}

/// Where a scenario ended up after [`Pipeline::run_scenario`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioOutcome {
    pub scenario: String,
    pub state: ScenarioState,
    pub ontology_status: OntologyStatus,
    pub entities: usize,
    pub triples: usize,
    pub evaluation: EvaluationReport,
}

pub struct Pipeline {
    llm: Arc<dyn LlmClient>,
    sink: Option<Arc<dyn GraphSink>>,
    evaluator: Option<Arc<dyn Evaluator>>,
}

impl Pipeline {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            sink: None,
            evaluator: None,
        }
    }

    /// Use this sink instead of the run's SQLite database when the sink is enabled.
    pub fn with_sink(mut self, sink: Arc<dyn GraphSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Run every scenario in order, stopping at the first error.
    pub async fn run_all(&self, run: &RunContext, scenarios: &[Scenario]) -> Result<Vec<ScenarioOutcome>> {
        let mut outcomes = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            outcomes.push(self.run_scenario(run, scenario).await?);
        }
        Ok(outcomes)
    }

    /// Drive one scenario through `PENDING -> ONTOLOGY_DONE | SKIPPED -> KG_DONE ->
    /// EVALUATED`, skipping stages whose checkpoints already exist.
    pub async fn run_scenario(&self, run: &RunContext, scenario: &Scenario) -> Result<ScenarioOutcome> {
        let state = run.register_scenario(&scenario.id)?;
        log::info!("[{}] Scenario {} starting at {}", run.id(), scenario.id, state);

        let artifact = if state.reached(ScenarioState::OntologyDone) {
            let artifact: OntologyArtifact = require(run, &CheckpointKey::ontology(&scenario.id))?;
            if (artifact.status == OntologyStatus::Skipped) != scenario.domain.is_none() {
                return Err(OntoKgError::InvalidInput(format!(
                    "scenario {} changed its domain since the run started",
                    scenario.id
                )));
            }
            artifact
        } else {
            self.ontology_stage(run, scenario).await?
        };
        let ontology = artifact.ontology.as_ref();

        let kg = if run.state(&scenario.id).reached(ScenarioState::KgDone) {
            require::<KnowledgeGraph>(run, &CheckpointKey::kg(&scenario.id))?
        } else {
            self.kg_stage(run, scenario, ontology).await?
        };

        let evaluation = if run.state(&scenario.id).reached(ScenarioState::Evaluated) {
            require::<EvaluationReport>(run, &CheckpointKey::evaluation(&scenario.id))?
        } else {
            if run.config().sink.enabled {
                self.hand_off(run, &scenario.id, &kg).await?;
            }
            self.evaluation_stage(run, scenario, &kg).await?
        };

        Ok(ScenarioOutcome {
            scenario: scenario.id.clone(),
            state: run.state(&scenario.id),
            ontology_status: artifact.status,
            entities: kg.entity_count(),
            triples: kg.triple_count(),
            evaluation,
        })
    }

    async fn ontology_stage(&self, run: &RunContext, scenario: &Scenario) -> Result<OntologyArtifact> {
        let config = &run.config().ontology;
        let (artifact, next) = match &scenario.domain {
            None => {
                log::info!("[{}] {}: no domain, skipping ontology synthesis", run.id(), scenario.id);
                (OntologyArtifact::skipped(), ScenarioState::OntologySkipped)
            }
            Some(domain) => {
                let scope = self.scope_stage(run, scenario, domain).await?;
                let synthesizer = Synthesizer::new(self.llm.clone(), config)
                    .for_run(run.id().as_str())
                    .with_competency_questions(scope.competency_questions);
                let artifact = match synthesizer
                    .synthesize_with_report(domain, config.committee_size, config.max_rounds)
                    .await
                {
                    Ok((ontology, rounds)) => OntologyArtifact {
                        status: OntologyStatus::Synthesized,
                        ontology: Some(ontology),
                        rounds,
                        unresolved: Vec::new(),
                    },
                    Err(OntoKgError::OntologyConvergence { rounds, draft, violations })
                        if config.accept_partial && !draft.is_empty() =>
                    {
                        log::warn!(
                            "[{}] {}: ontology did not converge after {} rounds, accepting last valid draft ({} unresolved violations)",
                            run.id(),
                            scenario.id,
                            rounds,
                            violations.len()
                        );
                        OntologyArtifact {
                            status: OntologyStatus::Partial,
                            ontology: Some(*draft),
                            rounds: Vec::new(),
                            unresolved: violations,
                        }
                    }
                    Err(e) => return Err(e),
                };
                (artifact, ScenarioState::OntologyDone)
            }
        };

        if let Some(ontology) = &artifact.ontology {
            let validation = validate_ontology(ontology);
            if !validation.passed {
                return Err(OntoKgError::Conformance(format!(
                    "ontology for scenario {} has {} violations",
                    scenario.id,
                    validation.violations.len()
                )));
            }
            log::info!(
                "[{}] {}: ontology with {} classes, {} properties",
                run.id(),
                scenario.id,
                ontology.class_count(),
                ontology.property_count()
            );
        }

        run.checkpoint(&CheckpointKey::ontology(&scenario.id), &artifact)?;
        run.advance(&scenario.id, next)?;
        Ok(artifact)
    }

    /// Scope documents and competency questions. Checkpointed on their own so a failed
    /// synthesis does not repeat them; the scenario state does not move.
    async fn scope_stage(&self, run: &RunContext, scenario: &Scenario, domain: &str) -> Result<ScopeArtifact> {
        let key = CheckpointKey::scope(&scenario.id);
        if let Some(scope) = run.load_checkpoint::<ScopeArtifact>(&key)? {
            log::info!(
                "[{}] {}: reusing scope with {} competency questions",
                run.id(),
                scenario.id,
                scope.competency_questions.len()
            );
            return Ok(scope);
        }
        let scope = Scoper::new(self.llm.clone(), &run.config().ontology)
            .for_run(run.id().as_str())
            .scope(domain, run.config().ontology.committee_size)
            .await?;
        run.checkpoint(&key, &scope)?;
        Ok(scope)
    }

    async fn kg_stage(
        &self,
        run: &RunContext,
        scenario: &Scenario,
        ontology: Option<&Ontology>,
    ) -> Result<KnowledgeGraph> {
        let config = &run.config().extraction;
        let extractor = Extractor::new(self.llm.clone(), config).for_run(run.id().as_str());
        let store = run.chunk_store(&scenario.id);
        let (kg, report): (KnowledgeGraph, ExtractionReport) = extractor
            .extract_with_store(&scenario.chunks, ontology, config.epochs, Some(&store))
            .await?;

        let validation = validate_kg(&kg, ontology);
        if !validation.passed {
            return Err(OntoKgError::Conformance(format!(
                "knowledge graph for scenario {} has {} violations",
                scenario.id,
                validation.violations.len()
            )));
        }

        log::info!(
            "[{}] {}: {} entities, {} triples, {} rejected, {} chunks skipped",
            run.id(),
            scenario.id,
            kg.entity_count(),
            kg.triple_count(),
            report.rejections.len(),
            report.skipped.len()
        );
        run.checkpoint(&CheckpointKey::kg_report(&scenario.id), &report)?;
        run.checkpoint(&CheckpointKey::kg(&scenario.id), &kg)?;
        run.advance(&scenario.id, ScenarioState::KgDone)?;
        Ok(kg)
    }

    async fn hand_off(&self, run: &RunContext, scenario: &str, kg: &KnowledgeGraph) -> Result<()> {
        let sink: Arc<dyn GraphSink> = match &self.sink {
            Some(sink) => sink.clone(),
            None => Arc::new(SqliteGraphSink::open(&run.graph_db_path()).await?),
        };
        sink.write_graph(run.id(), scenario, kg)
            .await
            .map_err(|e| OntoKgError::external(run.id().as_str(), "sink", 0, e))?;
        Ok(())
    }

    async fn evaluation_stage(
        &self,
        run: &RunContext,
        scenario: &Scenario,
        kg: &KnowledgeGraph,
    ) -> Result<EvaluationReport> {
        let evaluator: Arc<dyn Evaluator> = match &self.evaluator {
            Some(evaluator) => evaluator.clone(),
            None => Arc::new(
                LlmQaEvaluator::new(
                    self.llm.clone(),
                    Duration::from_secs(run.config().llm.timeout_secs),
                    run.config().extraction.concurrency,
                )
                .for_run(run.id().as_str()),
            ),
        };
        let report = evaluator.evaluate(kg, &scenario.questions).await?;
        run.checkpoint(&CheckpointKey::evaluation(&scenario.id), &report)?;
        run.advance(&scenario.id, ScenarioState::Evaluated)?;
        Ok(report)
    }
}

fn require<T: serde::de::DeserializeOwned>(run: &RunContext, key: &CheckpointKey) -> Result<T> {
    run.load_checkpoint(key)?.ok_or_else(|| OntoKgError::InvalidCheckpoint {
        key: key.to_string(),
        reason: "missing although the scenario state says it was written".to_string(),
    })
}
