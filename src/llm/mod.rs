//! LLM call interface.
//!
//! The pipeline only needs "prompt in, text out". Everything structured (ontology
//! deltas, extracted triples) is parsed from the text by [`response`], so a model that
//! returns malformed output is handled by the caller's retry policy rather than here.

mod openai;
pub mod prompt;
mod replay;
pub mod response;

pub use openai::OpenAiClient;
pub use prompt::Prompt;
pub use replay::ReplayClient;
pub use response::{
    parse_response, ClassProposal, ExtractedEntity, ExtractedTriple, ExtractionOutput,
    OntologyDelta, ParseMode, PropertyProposal, QuestionList, ScopeText,
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors from a single LLM call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// The call exceeded its timeout
    #[error("LLM call timed out: {0}")]
    Timeout(String),

    /// The model answered, but not with the expected structure
    #[error("Malformed LLM output: {0}")]
    Malformed(String),

    /// The endpoint could not be reached or refused the request
    #[error("LLM unavailable: {0}")]
    Unavailable(String),
}

impl LlmError {
    /// Timeouts and malformed output are per-call failures the caller may retry or skip.
    /// An unavailable endpoint is an external failure and must be propagated.
    pub fn is_call_failure(&self) -> bool {
        matches!(self, LlmError::Timeout(_) | LlmError::Malformed(_))
    }
}

/// A text-completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError>;
}
