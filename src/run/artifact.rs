use serde::{Deserialize, Serialize};

use crate::ontology::RoundSummary;
use crate::schema::Ontology;
use crate::validate::Violation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OntologyStatus {
    /// The committee converged or used up its rounds with a valid draft
    Synthesized,
    /// Did not converge; the last valid draft was accepted
    Partial,
    /// The scenario has no domain and runs without an ontology
    Skipped,
}

/// What the ontology stage checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyArtifact {
    pub status: OntologyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ontology: Option<Ontology>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rounds: Vec<RoundSummary>,
    /// Violations left unresolved when the status is `Partial`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<Violation>,
}

impl OntologyArtifact {
    pub fn skipped() -> Self {
        Self {
            status: OntologyStatus::Skipped,
            ontology: None,
            rounds: Vec::new(),
            unresolved: Vec::new(),
        }
    }
}
