//! Domain scoping ahead of synthesis. Each committee persona writes a scope document,
//! the documents are merged, and competency questions drawn from the merged scope steer
//! the proposal rounds.

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::persona::Persona;
use crate::config::OntologyConfig;
use crate::error::{OntoKgError, Result};
use crate::llm::prompt::{merge_scope_prompt, questions_prompt, scope_prompt};
use crate::llm::{parse_response, LlmClient, LlmError, ParseMode, Prompt, QuestionList, ScopeText};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDocument {
    pub persona: Persona,
    pub content: String,
}

/// What the scope stage checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeArtifact {
    pub documents: Vec<ScopeDocument>,
    pub merged: String,
    /// Deduplicated, longest first
    pub competency_questions: Vec<String>,
}

pub struct Scoper {
    llm: Arc<dyn LlmClient>,
    call_timeout: Duration,
    run_id: String,
}

impl Scoper {
    pub fn new(llm: Arc<dyn LlmClient>, config: &OntologyConfig) -> Self {
        Self {
            llm,
            call_timeout: Duration::from_secs(config.proposal_timeout_secs),
            run_id: String::new(),
        }
    }

    pub fn for_run(mut self, run_id: &str) -> Self {
        self.run_id = run_id.to_string();
        self
    }

    /// Scope documents, merged scope and competency questions for `domain`.
    ///
    /// Failed or timed-out calls are dropped the way failed proposals are. Without any
    /// scope document the questions are drawn from the domain name alone.
    pub async fn scope(&self, domain: &str, committee_size: usize) -> Result<ScopeArtifact> {
        let committee = Persona::committee(committee_size);

        let prompts: Vec<Prompt> = committee.iter().map(|p| scope_prompt(domain, *p)).collect();
        let documents: Vec<ScopeDocument> = committee
            .iter()
            .zip(self.ask_all::<ScopeText>(&prompts).await?)
            .filter_map(|(persona, text)| {
                let content = text?.content.trim().to_string();
                (!content.is_empty()).then_some(ScopeDocument {
                    persona: *persona,
                    content,
                })
            })
            .collect();
        if documents.is_empty() {
            log::warn!("No scope document for {}; asking for questions from the domain alone", domain);
        }
        let merged = self.merge(domain, &documents).await?;

        let scope = if merged.is_empty() { domain } else { merged.as_str() };
        let prompts: Vec<Prompt> = committee
            .iter()
            .map(|p| questions_prompt(domain, *p, scope))
            .collect();
        let asked = self.ask_all::<QuestionList>(&prompts).await?;
        let generated: Vec<String> = asked.into_iter().flatten().flat_map(|list| list.questions).collect();
        let total = generated.len();
        let competency_questions = deduplicate_questions(generated);
        log::info!(
            "Scoped {} from {} documents: {} competency questions ({} before deduplication)",
            domain,
            documents.len(),
            competency_questions.len(),
            total
        );

        Ok(ScopeArtifact {
            documents,
            merged,
            competency_questions,
        })
    }

    async fn merge(&self, domain: &str, documents: &[ScopeDocument]) -> Result<String> {
        match documents {
            [] => Ok(String::new()),
            [only] => Ok(only.content.clone()),
            _ => {
                let contents: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
                let prompt = merge_scope_prompt(domain, &contents);
                let merged = self
                    .ask_all::<ScopeText>(std::slice::from_ref(&prompt))
                    .await?
                    .into_iter()
                    .flatten()
                    .map(|text| text.content.trim().to_string())
                    .find(|content| !content.is_empty());
                Ok(merged.unwrap_or_else(|| {
                    log::warn!("Scope merge failed, concatenating {} documents", documents.len());
                    documents
                        .iter()
                        .map(|d| format!("[{}]\n{}", d.persona.slug(), d.content))
                        .collect::<Vec<_>>()
                        .join("\n\n")
                }))
            }
        }
    }

    /// Concurrent calls; call failures become `None`, an unreachable endpoint aborts.
    async fn ask_all<T: DeserializeOwned>(&self, prompts: &[Prompt]) -> Result<Vec<Option<T>>> {
        let outcomes = join_all(prompts.iter().map(|prompt| self.call(prompt))).await;
        let mut answers = Vec::with_capacity(prompts.len());
        for (index, (prompt, outcome)) in prompts.iter().zip(outcomes).enumerate() {
            let parsed = outcome.and_then(|text| {
                parse_response::<T>(&text, ParseMode::Strict)
                    .or_else(|_| parse_response::<T>(&text, ParseMode::Relaxed))
            });
            match parsed {
                Ok(answer) => answers.push(Some(answer)),
                Err(e) if e.is_call_failure() => {
                    log::warn!("{} skipped: {}", prompt.key, e);
                    answers.push(None);
                }
                Err(e) => return Err(OntoKgError::external(&self.run_id, "scope", index, e.into())),
            }
        }
        Ok(answers)
    }

    async fn call(&self, prompt: &Prompt) -> std::result::Result<String, LlmError> {
        match timeout(self.call_timeout, self.llm.complete(prompt)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LlmError::Timeout(format!("{} exceeded {:?}", prompt.key, self.call_timeout))),
        }
    }
}

/// Drop questions that differ only in case, spacing, list markers or trailing
/// punctuation, then order the rest longest first. Equal lengths keep their order.
pub fn deduplicate_questions(questions: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for question in questions {
        let question = question
            .trim_start_matches(|c: char| matches!(c, '-' | '*' | '•') || c.is_whitespace())
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let key = question
            .trim_end_matches(|c: char| matches!(c, '?' | '.' | '!') || c.is_whitespace())
            .to_lowercase();
        if !key.is_empty() && seen.insert(key) {
            unique.push(question);
        }
    }
    unique.sort_by_key(|q| Reverse(q.split_whitespace().count()));
    unique
}
