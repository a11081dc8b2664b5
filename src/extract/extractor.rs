use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::resolve::{resolve_output, Rejection, RejectionReason};
use crate::config::ExtractionConfig;
use crate::error::{OntoKgError, Result};
use crate::llm::prompt::extraction_prompt;
use crate::llm::{parse_response, ExtractionOutput, LlmClient, LlmError, ParseMode, Prompt};
use crate::schema::{KnowledgeGraph, Ontology};

/// Persisted outcome of one chunk in one epoch. Replaying these records through the
/// resolver reproduces the graph exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkRecord {
    Completed { output: ExtractionOutput },
    Skipped { attempts: usize, error: String },
}

/// Per-chunk checkpoint hook. `load` returning a record means the chunk is already done
/// and must not be sent to the model again.
pub trait ChunkStore: Send + Sync {
    fn load(&self, epoch: usize, chunk: usize) -> Result<Option<ChunkRecord>>;
    fn store(&self, epoch: usize, chunk: usize, record: &ChunkRecord) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedChunk {
    pub epoch: usize,
    pub chunk: usize,
    pub attempts: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub completed: usize,
    /// Chunks answered from their checkpoint. Not persisted, so a resumed epoch
    /// reports the same as an uninterrupted one.
    #[serde(skip)]
    pub replayed: usize,
    pub skipped: usize,
    pub accepted: usize,
    pub new_triples: usize,
    pub rejected: usize,
}

/// Everything the extractor did besides growing the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub epochs: Vec<EpochSummary>,
    pub rejections: Vec<Rejection>,
    pub skipped: Vec<SkippedChunk>,
}

impl ExtractionReport {
    pub fn rejection_counts(&self) -> BTreeMap<RejectionReason, usize> {
        let mut counts = BTreeMap::new();
        for rejection in &self.rejections {
            *counts.entry(rejection.reason).or_insert(0) += 1;
        }
        counts
    }
}

/// Chunk-iterative knowledge graph extraction.
///
/// Every epoch walks all chunks in order. Up to `concurrency` chunks are sent to the
/// model at once, but their outputs are merged strictly in chunk order, so the graph
/// only depends on the outputs and not on which call finished first.
pub struct Extractor {
    llm: Arc<dyn LlmClient>,
    chunk_retries: usize,
    concurrency: usize,
    chunk_timeout: Duration,
    min_confidence: f32,
    run_id: String,
}

impl Extractor {
    pub fn new(llm: Arc<dyn LlmClient>, config: &ExtractionConfig) -> Self {
        Self {
            llm,
            chunk_retries: config.chunk_retries,
            concurrency: config.concurrency.max(1),
            chunk_timeout: Duration::from_secs(config.chunk_timeout_secs),
            min_confidence: config.min_confidence,
            run_id: String::new(),
        }
    }

    pub fn for_run(mut self, run_id: &str) -> Self {
        self.run_id = run_id.to_string();
        self
    }

    pub async fn extract(
        &self,
        chunks: &[String],
        ontology: Option<&Ontology>,
        epochs: usize,
    ) -> Result<KnowledgeGraph> {
        self.extract_with_store(chunks, ontology, epochs, None)
            .await
            .map(|(kg, _)| kg)
    }

    /// Extract with optional per-chunk checkpoints. Chunks that `store` already holds are
    /// replayed instead of re-extracted.
    pub async fn extract_with_store(
        &self,
        chunks: &[String],
        ontology: Option<&Ontology>,
        epochs: usize,
        store: Option<&dyn ChunkStore>,
    ) -> Result<(KnowledgeGraph, ExtractionReport)> {
        if epochs == 0 {
            return Err(OntoKgError::InvalidInput("epochs must be at least 1".to_string()));
        }

        let mut kg = KnowledgeGraph::new();
        let mut report = ExtractionReport::default();

        for epoch in 0..epochs {
            let mut summary = EpochSummary {
                epoch,
                ..Default::default()
            };
            let mut failures = Vec::new();

            for window_start in (0..chunks.len()).step_by(self.concurrency) {
                let window_end = (window_start + self.concurrency).min(chunks.len());

                // Prompts see the graph as it was before this window.
                let mut recorded: Vec<Option<ChunkRecord>> = Vec::new();
                let mut prompts: Vec<Prompt> = Vec::new();
                for index in window_start..window_end {
                    let record = match store {
                        Some(store) => store.load(epoch, index)?,
                        None => None,
                    };
                    if record.is_none() {
                        prompts.push(extraction_prompt(&chunks[index], ontology, &kg, epoch, index));
                    }
                    recorded.push(record);
                }

                let mut fresh = join_all(prompts.iter().map(|prompt| self.extract_chunk(prompt)))
                    .await
                    .into_iter();

                for (offset, record) in recorded.into_iter().enumerate() {
                    let index = window_start + offset;
                    let record = match record {
                        Some(record) => {
                            summary.replayed += 1;
                            record
                        }
                        None => {
                            let outcome = fresh.next().ok_or_else(|| {
                                OntoKgError::InvalidInput(format!("missing result for chunk {}", index))
                            })?;
                            let record = outcome.map_err(|e| {
                                OntoKgError::external(&self.run_id, "kg", index, e.into())
                            })?;
                            if let Some(store) = store {
                                store.store(epoch, index, &record)?;
                            }
                            record
                        }
                    };

                    match record {
                        ChunkRecord::Completed { output } => {
                            let resolution =
                                resolve_output(&mut kg, ontology, &output, epoch, index, self.min_confidence);
                            summary.completed += 1;
                            summary.accepted += resolution.accepted;
                            summary.new_triples += resolution.new_triples;
                            summary.rejected += resolution.rejections.len();
                            report.rejections.extend(resolution.rejections);
                        }
                        ChunkRecord::Skipped { attempts, error } => {
                            log::warn!(
                                "Skipping chunk {} in epoch {} after {} attempts: {}",
                                index,
                                epoch,
                                attempts,
                                error
                            );
                            summary.skipped += 1;
                            failures.push(format!("chunk {}: {}", index, error));
                            report.skipped.push(SkippedChunk {
                                epoch,
                                chunk: index,
                                attempts,
                                error,
                            });
                        }
                    }
                }
            }

            log::info!(
                "Epoch {}: {} chunks completed ({} replayed), {} skipped, {} new triples, {} rejected",
                epoch,
                summary.completed,
                summary.replayed,
                summary.skipped,
                summary.new_triples,
                summary.rejected
            );

            if !chunks.is_empty() && summary.completed == 0 {
                return Err(OntoKgError::ExtractionFailed { epoch, failures });
            }
            report.epochs.push(summary);
        }

        Ok((kg, report))
    }

    /// First attempt parses strictly; each retry calls the model again and parses
    /// relaxed. Call failures that outlast the retries become a `Skipped` record; an
    /// unavailable endpoint is returned as an error.
    async fn extract_chunk(&self, prompt: &Prompt) -> std::result::Result<ChunkRecord, LlmError> {
        let attempts = 1 + self.chunk_retries;
        let mut last_error = None;

        for attempt in 0..attempts {
            let mode = if attempt == 0 {
                ParseMode::Strict
            } else {
                ParseMode::Relaxed
            };
            let outcome = self
                .call(prompt)
                .await
                .and_then(|text| parse_response::<ExtractionOutput>(&text, mode));
            match outcome {
                Ok(output) => return Ok(ChunkRecord::Completed { output }),
                Err(e) if e.is_call_failure() => {
                    log::debug!("{} attempt {} failed: {}", prompt.key, attempt + 1, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(ChunkRecord::Skipped {
            attempts,
            error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn call(&self, prompt: &Prompt) -> std::result::Result<String, LlmError> {
        match timeout(self.chunk_timeout, self.llm.complete(prompt)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LlmError::Timeout(format!(
                "{} exceeded {:?}",
                prompt.key, self.chunk_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ReplayClient;
    use crate::schema::ontology_fixtures::science_ontology;
    use crate::validate::validate_kg;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const CHUNKS: [&str; 5] = [
        "Marie Curie worked at the Sorbonne.",
        "Curie was a scientist at the University of Paris.",
        "Pierre Curie also worked at the Sorbonne.",
        "Paul Langevin worked at the Collège de France.",
        "Langevin was a student of Pierre Curie.",
    ];

    const OUTPUTS: [&str; 5] = [
        r#"{"triples": [{"subject": {"name": "Marie Curie", "type": "Person"}, "relation": "affiliatedWith", "object": {"name": "Sorbonne", "type": "Organization"}}]}"#,
        r#"{"triples": [{"subject": {"name": "Curie", "type": "Scientist"}, "relation": "affiliatedWith", "object": {"name": "University of Paris", "type": "Organization"}}]}"#,
        r#"{"triples": [{"subject": {"name": "Pierre Curie", "type": "Scientist"}, "relation": "affiliatedWith", "object": {"name": "Sorbonne", "type": "Organization"}}]}"#,
        r#"{"triples": [{"subject": {"name": "Paul Langevin", "type": "Person"}, "relation": "affiliatedWith", "object": {"name": "Collège de France", "type": "Organization"}}]}"#,
        r#"{"triples": [{"subject": {"name": "Langevin", "type": "Person"}, "relation": "studentOf", "object": {"name": "Pierre Curie", "type": "Scientist"}}]}"#,
    ];

    fn chunks() -> Vec<String> {
        CHUNKS.iter().map(|c| c.to_string()).collect()
    }

    fn replay(epochs: usize) -> ReplayClient {
        let llm = ReplayClient::new();
        for epoch in 0..epochs {
            for (i, output) in OUTPUTS.iter().enumerate() {
                llm.push(&format!("extract/epoch-{}/chunk-{}", epoch, i), *output);
            }
        }
        llm
    }

    fn config(concurrency: usize) -> ExtractionConfig {
        ExtractionConfig {
            concurrency,
            ..Default::default()
        }
    }

    /// Answers later chunks first.
    struct ReversedClient {
        inner: ReplayClient,
    }

    #[async_trait]
    impl LlmClient for ReversedClient {
        async fn complete(&self, prompt: &Prompt) -> std::result::Result<String, LlmError> {
            let chunk: u64 = prompt
                .key
                .rsplit('-')
                .next()
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(5 * (10 - chunk))).await;
            self.inner.complete(prompt).await
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<BTreeMap<(usize, usize), ChunkRecord>>,
    }

    impl ChunkStore for MemoryStore {
        fn load(&self, epoch: usize, chunk: usize) -> Result<Option<ChunkRecord>> {
            Ok(self.records.lock().unwrap().get(&(epoch, chunk)).cloned())
        }

        fn store(&self, epoch: usize, chunk: usize, record: &ChunkRecord) -> Result<()> {
            self.records.lock().unwrap().insert((epoch, chunk), record.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn merges_in_chunk_order_and_records_rejections() {
        let ontology = science_ontology();
        let extractor = Extractor::new(Arc::new(replay(1)), &config(1));
        let (kg, report) = extractor
            .extract_with_store(&chunks(), Some(&ontology), 1, None)
            .await
            .unwrap();

        let marie = kg.entity("marie-curie").unwrap();
        assert_eq!(marie.entity_type, "Scientist");
        assert!(marie.aliases.contains("Curie"));
        assert!(kg.entity("pierre-curie").is_some());
        // studentOf is not declared
        assert_eq!(report.rejection_counts()[&RejectionReason::UnknownRelation], 1);
        assert_eq!(report.rejections[0].chunk, 4);
        assert!(validate_kg(&kg, Some(&ontology)).passed);
        assert_eq!(report.epochs[0].completed, 5);
    }

    #[tokio::test]
    async fn result_independent_of_dispatch_order() {
        let ontology = science_ontology();
        let sequential = Extractor::new(Arc::new(replay(2)), &config(1))
            .extract(&chunks(), Some(&ontology), 2)
            .await
            .unwrap();
        let reversed = Extractor::new(Arc::new(ReversedClient { inner: replay(2) }), &config(5))
            .extract(&chunks(), Some(&ontology), 2)
            .await
            .unwrap();
        assert_eq!(sequential, reversed);
        assert_eq!(
            serde_json::to_string(&sequential).unwrap(),
            serde_json::to_string(&reversed).unwrap()
        );
    }

    #[tokio::test]
    async fn later_epochs_only_grow_the_graph() {
        let ontology = science_ontology();
        let llm = replay(1);
        llm.push(
            "extract/epoch-1/chunk-0",
            r#"{"triples": [{"subject": {"name": "Irène Joliot-Curie", "type": "Scientist"}, "relation": "affiliatedWith", "object": {"name": "Sorbonne", "type": "Organization"}}]}"#,
        );
        for i in 1..5 {
            llm.push(&format!("extract/epoch-1/chunk-{}", i), r#"{"triples": []}"#);
        }
        let extractor = Extractor::new(Arc::new(llm), &config(2));
        let first = extractor.extract(&chunks(), Some(&ontology), 1).await.unwrap();
        let both = extractor.extract(&chunks(), Some(&ontology), 2).await.unwrap();
        assert!(both.is_superset_of(&first));
        assert_eq!(both.triple_count(), first.triple_count() + 1);
    }

    #[tokio::test]
    async fn malformed_chunk_is_retried_relaxed_then_skipped() {
        // chunk 2 needs relaxed parsing, chunk 3 never produces JSON
        let broken = ReplayClient::new();
        for (i, output) in OUTPUTS.iter().enumerate() {
            let key = format!("extract/epoch-0/chunk-{}", i);
            match i {
                2 => broken.push(&key, "Here you go:\n```json\n{\"triples\": []}\n```"),
                3 => broken.push(&key, "I am not sure."),
                _ => broken.push(&key, *output),
            }
        }
        let broken = Arc::new(broken);
        let extractor = Extractor::new(broken.clone(), &config(1));
        let (_, report) = extractor
            .extract_with_store(&chunks(), None, 1, None)
            .await
            .unwrap();

        assert_eq!(broken.call_count("extract/epoch-0/chunk-2"), 2);
        assert_eq!(broken.call_count("extract/epoch-0/chunk-3"), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].chunk, 3);
        assert_eq!(report.epochs[0].completed, 4);
    }

    #[tokio::test]
    async fn epoch_without_completed_chunks_fails() {
        let llm = ReplayClient::new();
        for i in 0..CHUNKS.len() {
            llm.push_error(&format!("extract/epoch-0/chunk-{}", i), LlmError::Timeout("slow".into()));
        }
        let err = Extractor::new(Arc::new(llm), &config(3))
            .extract(&chunks(), None, 1)
            .await
            .unwrap_err();
        match err {
            OntoKgError::ExtractionFailed { epoch, failures } => {
                assert_eq!(epoch, 0);
                assert_eq!(failures.len(), CHUNKS.len());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn resume_after_interruption_matches_uninterrupted_run() {
        let ontology = science_ontology();
        let uninterrupted = Extractor::new(Arc::new(replay(1)), &config(1))
            .extract(&chunks(), Some(&ontology), 1)
            .await
            .unwrap();

        // The endpoint disappears at chunk 3.
        let partial = ReplayClient::new();
        for (i, output) in OUTPUTS.iter().enumerate().take(3) {
            partial.push(&format!("extract/epoch-0/chunk-{}", i), *output);
        }
        let store = MemoryStore::default();
        let err = Extractor::new(Arc::new(partial), &config(1))
            .for_run("run-1")
            .extract_with_store(&chunks(), Some(&ontology), 1, Some(&store))
            .await
            .unwrap_err();
        match err {
            OntoKgError::External { run_id, stage, index, .. } => {
                assert_eq!((run_id.as_str(), stage.as_str(), index), ("run-1", "kg", 3));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.records.lock().unwrap().len(), 3);

        let llm = Arc::new(replay(1));
        let (resumed, report) = Extractor::new(llm.clone(), &config(1))
            .extract_with_store(&chunks(), Some(&ontology), 1, Some(&store))
            .await
            .unwrap();
        assert_eq!(llm.call_count("extract/"), 2);
        assert_eq!(report.epochs[0].replayed, 3);
        assert!(resumed.is_superset_of(&uninterrupted));
        assert_eq!(resumed, uninterrupted);
    }

    #[tokio::test]
    async fn replayed_report_serializes_like_the_fresh_one() {
        let ontology = science_ontology();
        let store = MemoryStore::default();
        let (_, fresh) = Extractor::new(Arc::new(replay(1)), &config(2))
            .extract_with_store(&chunks(), Some(&ontology), 1, Some(&store))
            .await
            .unwrap();

        let llm = Arc::new(ReplayClient::new());
        let (_, replayed) = Extractor::new(llm.clone(), &config(2))
            .extract_with_store(&chunks(), Some(&ontology), 1, Some(&store))
            .await
            .unwrap();

        assert!(llm.calls().is_empty());
        assert_eq!(fresh.epochs[0].replayed, 0);
        assert_eq!(replayed.epochs[0].replayed, CHUNKS.len());
        assert_eq!(
            serde_json::to_value(&fresh).unwrap(),
            serde_json::to_value(&replayed).unwrap()
        );
    }

    #[tokio::test]
    async fn partially_recorded_window_calls_only_missing_chunks() {
        let ontology = science_ontology();
        let store = MemoryStore::default();
        let (full, _) = Extractor::new(Arc::new(replay(1)), &config(2))
            .extract_with_store(&chunks(), Some(&ontology), 1, Some(&store))
            .await
            .unwrap();
        store.records.lock().unwrap().remove(&(0, 1));

        let llm = Arc::new(ReplayClient::new());
        llm.push("extract/epoch-0/chunk-1", OUTPUTS[1]);
        let (resumed, _) = Extractor::new(llm.clone(), &config(2))
            .extract_with_store(&chunks(), Some(&ontology), 1, Some(&store))
            .await
            .unwrap();

        assert_eq!(llm.calls(), vec!["extract/epoch-0/chunk-1".to_string()]);
        assert_eq!(resumed, full);
    }
}
