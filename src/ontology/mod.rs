//! Ontology synthesis by a persona committee.
//!
//! The committee first scopes the domain and writes competency questions. Each round,
//! every persona then proposes additions or revisions independently; the proposals are
//! merged by [`reconcile`], validated, and repaired if needed.

mod persona;
pub mod reconcile;
mod scope;
mod synthesizer;

pub use persona::Persona;
pub use reconcile::{reconcile, PropertyTieBreak, Reconciliation};
pub use scope::{deduplicate_questions, ScopeArtifact, ScopeDocument, Scoper};
pub use synthesizer::{RoundSummary, Synthesizer};
