use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::benchmark::Question;
use super::metrics::{mean, score_answer};
use crate::error::{OntoKgError, Result};
use crate::llm::prompt::answer_prompt;
use crate::llm::{parse_response, LlmClient, LlmError, ParseMode, Prompt};
use crate::schema::KnowledgeGraph;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub id: String,
    pub prediction: String,
    pub exact_match: f32,
    pub f1: f32,
    pub is_impossible: bool,
    /// Set when the model call failed and the prediction defaulted to empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Scores of one scenario's graph on its benchmark questions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub questions: usize,
    pub answerable: usize,
    pub failed_calls: usize,
    pub exact_match: f32,
    pub f1: f32,
    pub results: Vec<QuestionResult>,
}

impl EvaluationReport {
    pub fn from_results(results: Vec<QuestionResult>) -> Self {
        let em: Vec<f32> = results.iter().map(|r| r.exact_match).collect();
        let f1: Vec<f32> = results.iter().map(|r| r.f1).collect();
        EvaluationReport {
            questions: results.len(),
            answerable: results.iter().filter(|r| !r.is_impossible).count(),
            failed_calls: results.iter().filter(|r| r.error.is_some()).count(),
            exact_match: mean(&em),
            f1: mean(&f1),
            results,
        }
    }
}

/// Consumes a fully validated graph and scores it.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, kg: &KnowledgeGraph, questions: &[Question]) -> Result<EvaluationReport>;
}

#[derive(Debug, Deserialize)]
struct AnswerOutput {
    #[serde(default)]
    answer: Option<String>,
}

/// Asks the model each question against the graph's facts.
pub struct LlmQaEvaluator {
    llm: Arc<dyn LlmClient>,
    call_timeout: Duration,
    concurrency: usize,
    run_id: String,
}

impl LlmQaEvaluator {
    pub fn new(llm: Arc<dyn LlmClient>, call_timeout: Duration, concurrency: usize) -> Self {
        Self {
            llm,
            call_timeout,
            concurrency: concurrency.max(1),
            run_id: String::new(),
        }
    }

    pub fn for_run(mut self, run_id: &str) -> Self {
        self.run_id = run_id.to_string();
        self
    }

    /// Timeouts and unparseable answers become an empty prediction; an unreachable
    /// endpoint is an error.
    async fn answer(&self, prompt: &Prompt) -> std::result::Result<String, LlmError> {
        let text = match timeout(self.call_timeout, self.llm.complete(prompt)).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(LlmError::Timeout(format!(
                    "{} exceeded {:?}",
                    prompt.key, self.call_timeout
                )))
            }
        };
        match parse_response::<AnswerOutput>(&text, ParseMode::Relaxed) {
            Ok(output) => Ok(output.answer.unwrap_or_default().trim().to_string()),
            // plain-text answers are accepted as-is
            Err(_) if !text.trim_start().starts_with('{') => Ok(text.trim().to_string()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Evaluator for LlmQaEvaluator {
    async fn evaluate(&self, kg: &KnowledgeGraph, questions: &[Question]) -> Result<EvaluationReport> {
        let mut results = Vec::with_capacity(questions.len());

        for (window_index, window) in questions.chunks(self.concurrency).enumerate() {
            let prompts: Vec<Prompt> = window
                .iter()
                .map(|q| answer_prompt(&q.id, &q.question, kg))
                .collect();
            let outcomes = join_all(prompts.iter().map(|p| self.answer(p))).await;

            for (offset, (question, outcome)) in window.iter().zip(outcomes).enumerate() {
                let (prediction, error) = match outcome {
                    Ok(prediction) => (prediction, None),
                    Err(e) if e.is_call_failure() => {
                        log::warn!("Question {} unanswered: {}", question.id, e);
                        (String::new(), Some(e.to_string()))
                    }
                    Err(e) => {
                        let index = window_index * self.concurrency + offset;
                        return Err(OntoKgError::external(&self.run_id, "evaluation", index, e.into()));
                    }
                };
                let (exact_match, f1) = score_answer(&prediction, &question.answers);
                results.push(QuestionResult {
                    id: question.id.clone(),
                    prediction,
                    exact_match,
                    f1,
                    is_impossible: question.is_impossible,
                    error,
                });
            }
        }

        let report = EvaluationReport::from_results(results);
        log::info!(
            "Evaluation: {} questions, EM {:.3}, F1 {:.3} ({} failed calls)",
            report.questions,
            report.exact_match,
            report.f1,
            report.failed_calls
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ReplayClient;
    use crate::schema::kg_fixtures::entity;
    use crate::schema::Triple;

    fn graph() -> KnowledgeGraph {
        let mut kg = KnowledgeGraph::new();
        kg.insert_entity(entity("marie-curie", "Marie Curie", "Scientist"));
        kg.insert_entity(entity("sorbonne", "Sorbonne", "Organization"));
        kg.insert_triple(Triple::new("marie-curie", "affiliatedWith", "sorbonne"));
        kg
    }

    fn questions() -> Vec<Question> {
        vec![
            Question {
                id: "q1".to_string(),
                question: "Where did Curie work?".to_string(),
                answers: vec!["the Sorbonne".to_string()],
                is_impossible: false,
            },
            Question {
                id: "q2".to_string(),
                question: "Who founded Paris?".to_string(),
                answers: vec![],
                is_impossible: true,
            },
            Question {
                id: "q3".to_string(),
                question: "When was Curie born?".to_string(),
                answers: vec!["1867".to_string()],
                is_impossible: false,
            },
        ]
    }

    #[tokio::test]
    async fn scores_json_and_plain_answers() {
        let llm = Arc::new(ReplayClient::new());
        llm.push("answer/q1", r#"{"answer": "Sorbonne"}"#);
        llm.push("answer/q2", r#"{"answer": ""}"#);
        llm.push("answer/q3", "Warsaw");
        let evaluator = LlmQaEvaluator::new(llm.clone(), Duration::from_secs(5), 2);

        let report = evaluator.evaluate(&graph(), &questions()).await.unwrap();
        assert_eq!(report.questions, 3);
        assert_eq!(report.answerable, 2);
        assert_eq!(report.results[0].exact_match, 1.0);
        assert_eq!(report.results[1].exact_match, 1.0);
        assert_eq!(report.results[2].prediction, "Warsaw");
        assert!((report.exact_match - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(llm.call_count("answer/"), 3);
    }

    #[tokio::test]
    async fn failed_call_scores_as_empty_prediction() {
        let llm = Arc::new(ReplayClient::new());
        llm.push("answer/q1", r#"{"answer": "Sorbonne"}"#);
        llm.push("answer/q2", r#"{"answer": ""}"#);
        llm.push_error("answer/q3", LlmError::Timeout("slow".to_string()));
        let evaluator = LlmQaEvaluator::new(llm, Duration::from_secs(5), 8);

        let report = evaluator.evaluate(&graph(), &questions()).await.unwrap();
        assert_eq!(report.failed_calls, 1);
        assert_eq!(report.results[2].prediction, "");
        assert_eq!(report.results[2].f1, 0.0);
    }

    #[tokio::test]
    async fn unavailable_endpoint_is_external_failure() {
        let llm = Arc::new(ReplayClient::new());
        llm.push("answer/q1", r#"{"answer": "Sorbonne"}"#);
        let evaluator = LlmQaEvaluator::new(llm, Duration::from_secs(5), 1).for_run("run-1");

        let err = evaluator.evaluate(&graph(), &questions()).await.unwrap_err();
        match err {
            OntoKgError::External { run_id, stage, index, .. } => {
                assert_eq!(run_id, "run-1");
                assert_eq!(stage, "evaluation");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn empty_report_has_zero_scores() {
        let report = EvaluationReport::from_results(Vec::new());
        assert_eq!(report, EvaluationReport::default());
    }
}
