use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::persona::Persona;
use super::reconcile::{reconcile, restrict_delta, PropertyTieBreak};
use crate::config::OntologyConfig;
use crate::error::{OntoKgError, Result};
use crate::llm::prompt::{proposal_prompt, repair_prompt};
use crate::llm::{parse_response, LlmClient, LlmError, OntologyDelta, ParseMode, Prompt};
use crate::schema::Ontology;
use crate::validate::{validate_ontology, Violation};

/// What happened in one committee round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: usize,
    pub proposals: usize,
    pub failed_proposals: usize,
    pub added_classes: usize,
    pub added_properties: usize,
    pub repaired: bool,
    pub unresolved_violations: usize,
}

/// Drives the multi-round committee process.
///
/// Holds no state between calls and persists nothing; the caller checkpoints the result.
pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    tie_break: PropertyTieBreak,
    proposal_timeout: Duration,
    competency_questions: Vec<String>,
    run_id: String,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, config: &OntologyConfig) -> Self {
        Self {
            llm,
            tie_break: config.property_tie_break,
            proposal_timeout: Duration::from_secs(config.proposal_timeout_secs),
            competency_questions: Vec::new(),
            run_id: String::new(),
        }
    }

    /// Questions every proposal prompt asks the committee to cover.
    pub fn with_competency_questions(mut self, questions: Vec<String>) -> Self {
        self.competency_questions = questions;
        self
    }

    /// Run id reported in external-failure errors.
    pub fn for_run(mut self, run_id: &str) -> Self {
        self.run_id = run_id.to_string();
        self
    }

    pub async fn synthesize(&self, domain: &str, committee_size: usize, max_rounds: usize) -> Result<Ontology> {
        self.synthesize_with_report(domain, committee_size, max_rounds)
            .await
            .map(|(ontology, _)| ontology)
    }

    /// Synthesize an ontology and return per-round summaries alongside it.
    ///
    /// Stops after a round that adds no new classes or properties, or after
    /// `max_rounds`. If the last rounds left violations that the repair step could not
    /// resolve, returns [`OntoKgError::OntologyConvergence`] with the last valid draft.
    pub async fn synthesize_with_report(
        &self,
        domain: &str,
        committee_size: usize,
        max_rounds: usize,
    ) -> Result<(Ontology, Vec<RoundSummary>)> {
        let committee = Persona::committee(committee_size);
        let mut draft = Ontology::new();
        let mut summaries = Vec::new();
        let mut unresolved: Vec<Violation> = Vec::new();
        let mut productive_rounds = 0;

        for round in 1..=max_rounds {
            let mut summary = RoundSummary {
                round,
                proposals: committee.len(),
                ..Default::default()
            };

            let deltas = self.propose(domain, &committee, &draft, round).await?;
            summary.failed_proposals = committee.len() - deltas.len();
            if deltas.is_empty() {
                log::warn!("Round {}: every proposal failed, draft unchanged", round);
                summaries.push(summary);
                continue;
            }

            let mut candidate = reconcile(&draft, &deltas, self.tie_break).ontology;
            let mut validation = validate_ontology(&candidate);
            if !validation.passed {
                log::info!(
                    "Round {}: {} violations after merge, requesting repair",
                    round,
                    validation.violations.len()
                );
                candidate = self.repair(domain, candidate, &validation.violations, round).await?;
                validation = validate_ontology(&candidate);
                summary.repaired = true;
            }

            if !validation.passed {
                log::warn!(
                    "Round {}: {} violations remain after repair, keeping previous draft",
                    round,
                    validation.violations.len()
                );
                summary.unresolved_violations = validation.violations.len();
                unresolved = validation.violations;
                summaries.push(summary);
                continue;
            }

            unresolved.clear();
            productive_rounds += 1;
            summary.added_classes = candidate
                .classes()
                .filter(|c| !draft.has_class(&c.id))
                .count();
            summary.added_properties = candidate
                .properties()
                .filter(|p| draft.property(&p.id).is_none())
                .count();
            let converged = summary.added_classes + summary.added_properties == 0;
            log::info!(
                "Round {}: +{} classes, +{} properties ({} classes, {} properties total)",
                round,
                summary.added_classes,
                summary.added_properties,
                candidate.class_count(),
                candidate.property_count()
            );
            draft = candidate;
            summaries.push(summary);

            if converged {
                log::info!("Ontology converged after {} rounds", round);
                return Ok((draft, summaries));
            }
        }

        if !unresolved.is_empty() || productive_rounds == 0 {
            return Err(OntoKgError::OntologyConvergence {
                rounds: max_rounds,
                draft: Box::new(draft),
                violations: unresolved,
            });
        }

        log::info!("Ontology reached the {}-round limit", max_rounds);
        Ok((draft, summaries))
    }

    /// One proposal per persona, concurrently. Failed or timed-out proposals are dropped;
    /// an unreachable endpoint aborts the round.
    async fn propose(
        &self,
        domain: &str,
        committee: &[Persona],
        draft: &Ontology,
        round: usize,
    ) -> Result<Vec<OntologyDelta>> {
        let prompts: Vec<Prompt> = committee
            .iter()
            .map(|persona| proposal_prompt(domain, *persona, draft, &self.competency_questions, round))
            .collect();
        let outcomes = join_all(prompts.iter().map(|prompt| self.call(prompt))).await;

        let mut deltas = Vec::new();
        for (prompt, outcome) in prompts.iter().zip(outcomes) {
            match outcome.and_then(|text| parse_delta(&text)) {
                Ok(delta) => deltas.push(delta),
                Err(e) if e.is_call_failure() => {
                    log::warn!("Proposal {} skipped: {}", prompt.key, e);
                }
                Err(e) => {
                    return Err(OntoKgError::external(&self.run_id, "ontology", round, e.into()));
                }
            }
        }
        Ok(deltas)
    }

    /// Ask for revisions of the violating classes/properties only and merge them.
    async fn repair(
        &self,
        domain: &str,
        candidate: Ontology,
        violations: &[Violation],
        round: usize,
    ) -> Result<Ontology> {
        let prompt = repair_prompt(domain, &candidate, violations, round);
        match self.call(&prompt).await.and_then(|text| parse_delta(&text)) {
            Ok(delta) => {
                let offending = violations.iter().flat_map(|v| v.ids.iter().cloned()).collect();
                let delta = restrict_delta(delta, &offending);
                Ok(reconcile(&candidate, &[delta], self.tie_break).ontology)
            }
            Err(e) if e.is_call_failure() => {
                log::warn!("Repair {} failed: {}", prompt.key, e);
                Ok(candidate)
            }
            Err(e) => Err(OntoKgError::external(&self.run_id, "ontology", round, e.into())),
        }
    }

    async fn call(&self, prompt: &Prompt) -> std::result::Result<String, LlmError> {
        match timeout(self.proposal_timeout, self.llm.complete(prompt)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LlmError::Timeout(format!(
                "{} exceeded {:?}",
                prompt.key, self.proposal_timeout
            ))),
        }
    }
}

fn parse_delta(text: &str) -> std::result::Result<OntologyDelta, LlmError> {
    parse_response(text, ParseMode::Strict).or_else(|_| parse_response(text, ParseMode::Relaxed))
}
