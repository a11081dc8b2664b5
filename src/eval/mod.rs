//! Question-answering evaluation of extracted graphs: SQuAD data, answer metrics
//! (exact match, token F1) and the LLM-backed evaluator.

pub mod benchmark;
mod evaluator;
pub mod metrics;

pub use benchmark::{Benchmark, Question, SquadDataset};
pub use evaluator::{EvaluationReport, Evaluator, LlmQaEvaluator, QuestionResult};
pub use metrics::{exact_match, f1_score, normalize_answer, score_answer};
