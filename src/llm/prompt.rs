//! Prompt construction. Every prompt carries a stable `key` naming the pipeline step it
//! belongs to (`scope/end-user`, `propose/round-1/domain-expert`,
//! `extract/epoch-0/chunk-3`, ...), which is what replay fixtures and diagnostics key on.

use crate::ontology::Persona;
use crate::schema::{KnowledgeGraph, Ontology, PropertyRange};
use crate::validate::Violation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub key: String,
    pub system: String,
    pub user: String,
}

/// Compact textual rendering of an ontology for inclusion in prompts.
pub fn render_ontology(ontology: &Ontology) -> String {
    let mut out = String::from("Classes:\n");
    for class in ontology.classes() {
        match &class.superclass {
            Some(sup) => out.push_str(&format!("- {} (subClassOf {})\n", class.id, sup)),
            None => out.push_str(&format!("- {}\n", class.id)),
        }
    }
    out.push_str("Properties:\n");
    for property in ontology.properties() {
        let range = match &property.range {
            PropertyRange::Class(id) => id.clone(),
            PropertyRange::Literal(lit) => format!("{:?}", lit).to_lowercase(),
        };
        out.push_str(&format!("- {}: {} -> {}\n", property.id, property.domain, range));
    }
    out
}

/// Entities of the accumulated graph, one per line, so later chunks can refer to them.
pub fn render_entities(kg: &KnowledgeGraph) -> String {
    kg.entities()
        .map(|e| format!("- {} [{}]", e.label, e.entity_type))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn scope_prompt(domain: &str, persona: Persona) -> Prompt {
    Prompt {
        key: format!("scope/{}", persona.slug()),
        system: format!(
            "You are {}. {} Write a scope document for an ontology of the domain: the subject areas it must cover, the kinds of things and relationships in them, and what is out of scope. Answer with a JSON object {{\"content\": \"...\"}}.",
            persona.title(),
            persona.framing()
        ),
        user: format!("Domain: {}", domain),
    }
}

pub fn merge_scope_prompt(domain: &str, documents: &[String]) -> Prompt {
    let listed = documents
        .iter()
        .enumerate()
        .map(|(i, d)| format!("Document {}:\n{}", i + 1, d))
        .collect::<Vec<_>>()
        .join("\n\n");
    Prompt {
        key: "scope/merge".to_string(),
        system: "Merge the scope documents into one. Keep every subject area any of them names and drop repetition. Answer with a JSON object {\"content\": \"...\"}.".to_string(),
        user: format!("Domain: {}\n\n{}", domain, listed),
    }
}

pub fn questions_prompt(domain: &str, persona: Persona, scope: &str) -> Prompt {
    Prompt {
        key: format!("cqs/{}", persona.slug()),
        system: format!(
            "You are {}. {} List competency questions the ontology must be able to answer, each a single self-contained question. Answer with a JSON object {{\"questions\": [\"...\"]}}.",
            persona.title(),
            persona.framing()
        ),
        user: format!("Domain: {}\n\nScope:\n{}", domain, scope),
    }
}

pub fn proposal_prompt(
    domain: &str,
    persona: Persona,
    draft: &Ontology,
    questions: &[String],
    round: usize,
) -> Prompt {
    let mut user = format!("Domain: {}\n\n", domain);
    if !questions.is_empty() {
        user.push_str("Competency questions the ontology must answer:\n");
        for question in questions {
            user.push_str(&format!("- {}\n", question));
        }
        user.push('\n');
    }
    user.push_str(&format!("Current draft ontology:\n{}", render_ontology(draft)));
    Prompt {
        key: format!("propose/round-{}/{}", round, persona.slug()),
        system: format!(
            "You are {}. {} Answer with a JSON object {{\"classes\": [{{\"name\", \"superclass\", \"description\"}}], \"properties\": [{{\"name\", \"domain\", \"range\", \"cardinality\"}}]}} listing only additions or revisions.",
            persona.title(),
            persona.framing()
        ),
        user,
    }
}

pub fn repair_prompt(domain: &str, draft: &Ontology, violations: &[Violation], round: usize) -> Prompt {
    let listed = violations
        .iter()
        .map(|v| format!("- {}", v))
        .collect::<Vec<_>>()
        .join("\n");
    Prompt {
        key: format!("repair/round-{}", round),
        system: format!(
            "You are {}. {} Propose revisions ONLY for the classes and properties named in the violations, as a JSON object with \"classes\" and \"properties\".",
            Persona::OntologyEngineer.title(),
            Persona::OntologyEngineer.framing()
        ),
        user: format!(
            "Domain: {}\n\nDraft ontology:\n{}\nViolations:\n{}",
            domain,
            render_ontology(draft),
            listed
        ),
    }
}

pub fn extraction_prompt(
    chunk: &str,
    ontology: Option<&Ontology>,
    kg: &KnowledgeGraph,
    epoch: usize,
    index: usize,
) -> Prompt {
    let constraint = match ontology {
        Some(ontology) => format!(
            "Use ONLY these entity types and relations.\n{}",
            render_ontology(ontology)
        ),
        None => "Choose concise entity types and relation labels.".to_string(),
    };
    Prompt {
        key: format!("extract/epoch-{}/chunk-{}", epoch, index),
        system: format!(
            "Extract knowledge graph triples from the text. {} Answer with a JSON object {{\"triples\": [{{\"subject\": {{\"name\", \"type\"}}, \"relation\", \"object\": {{\"name\", \"type\"}}, \"confidence\"}}]}}. Reuse the names of known entities when the text refers to them.",
            constraint
        ),
        user: format!("Known entities:\n{}\n\nText:\n{}", render_entities(kg), chunk),
    }
}

pub fn answer_prompt(question_id: &str, question: &str, kg: &KnowledgeGraph) -> Prompt {
    let facts = kg
        .triples()
        .filter_map(|t| {
            let s = kg.entity(&t.subject)?;
            let o = kg.entity(&t.object)?;
            Some(format!("{} {} {}", s.label, t.relation, o.label))
        })
        .collect::<Vec<_>>()
        .join("\n");
    Prompt {
        key: format!("answer/{}", question_id),
        system: "Answer the question using only the facts. Reply with a JSON object {\"answer\": \"...\"} holding the shortest answer span, or an empty string if the facts do not contain the answer.".to_string(),
        user: format!("Facts:\n{}\n\nQuestion: {}", facts, question),
    }
}
