//! Pure merge of extracted triples into a knowledge graph.
//!
//! Every triple is checked completely before the graph is touched, so a rejected triple
//! leaves no trace besides its [`Rejection`] record.

use serde::{Deserialize, Serialize};

use crate::llm::{ExtractedEntity, ExtractedTriple, ExtractionOutput};
use crate::schema::{
    camel_case, label_tokens, normalize_label, pascal_case, Entity, KnowledgeGraph, Ontology,
    Triple,
};

/// Type given to entities extracted without an ontology when the model names none.
const UNTYPED: &str = "Entity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    EmptyLabel,
    LowConfidence,
    UnknownEntityType,
    UnknownRelation,
    IncompatibleRelation,
}

/// A triple the resolver refused, with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub epoch: usize,
    pub chunk: usize,
    pub triple: ExtractedTriple,
    pub reason: RejectionReason,
    pub detail: String,
}

/// Result of merging one chunk's output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkResolution {
    pub accepted: usize,
    pub new_triples: usize,
    pub rejections: Vec<Rejection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub triple: Triple,
    /// `false` when the exact triple was already in the graph
    pub is_new: bool,
}

enum Target {
    Existing(String),
    New,
}

struct Planned {
    label: String,
    entity_type: String,
    target: Target,
    /// Type the entity has after the merge
    resolved_type: String,
}

/// Merge every triple of a chunk's output, in output order.
pub fn resolve_output(
    kg: &mut KnowledgeGraph,
    ontology: Option<&Ontology>,
    output: &ExtractionOutput,
    epoch: usize,
    chunk: usize,
    min_confidence: f32,
) -> ChunkResolution {
    let mut resolution = ChunkResolution::default();
    for extracted in &output.triples {
        match resolve_triple(kg, ontology, extracted, min_confidence) {
            Ok(accepted) => {
                resolution.accepted += 1;
                if accepted.is_new {
                    resolution.new_triples += 1;
                }
            }
            Err((reason, detail)) => {
                log::debug!("Rejected triple in epoch {} chunk {}: {}", epoch, chunk, detail);
                resolution.rejections.push(Rejection {
                    epoch,
                    chunk,
                    triple: extracted.clone(),
                    reason,
                    detail,
                });
            }
        }
    }
    resolution
}

/// Resolve both endpoints of `extracted` against `kg`, validate the relation and, if
/// accepted, merge the entities and insert the triple.
///
/// Entity resolution:
/// - an entity whose label or alias matches (case-insensitive, whitespace-collapsed) and,
///   under an ontology, whose type is compatible is reused; the more specific type wins;
/// - under an ontology, a label that is the whole-token prefix or suffix of exactly one
///   compatible entity's label is merged into it and kept as an alias;
/// - otherwise a new entity is created, with a disambiguated id if needed.
pub fn resolve_triple(
    kg: &mut KnowledgeGraph,
    ontology: Option<&Ontology>,
    extracted: &ExtractedTriple,
    min_confidence: f32,
) -> Result<Accepted, (RejectionReason, String)> {
    if let Some(confidence) = extracted.confidence {
        if confidence < min_confidence {
            return Err((
                RejectionReason::LowConfidence,
                format!("confidence {} below threshold {}", confidence, min_confidence),
            ));
        }
    }

    let subject = plan(kg, ontology, &extracted.subject)?;
    let object = plan(kg, ontology, &extracted.object)?;

    let relation = match ontology {
        Some(ontology) => {
            let relation = camel_case(&extracted.relation);
            if ontology.property(&relation).is_none() {
                return Err((
                    RejectionReason::UnknownRelation,
                    format!("'{}' is not a declared property", extracted.relation),
                ));
            }
            if !ontology.allows_relation(&relation, &subject.resolved_type, &object.resolved_type) {
                return Err((
                    RejectionReason::IncompatibleRelation,
                    format!(
                        "'{}' does not apply to {} -> {}",
                        relation, subject.resolved_type, object.resolved_type
                    ),
                ));
            }
            relation
        }
        None => extracted.relation.split_whitespace().collect::<Vec<_>>().join(" "),
    };
    if relation.is_empty() {
        return Err((RejectionReason::UnknownRelation, "empty relation".to_string()));
    }

    let subject_id = apply(kg, ontology, subject, &extracted.subject);
    // Re-plan against the updated graph so a triple can refer to its own subject.
    let object = plan(kg, ontology, &extracted.object)?;
    let object_id = apply(kg, ontology, object, &extracted.object);

    let triple = Triple::new(subject_id, relation, object_id);
    let is_new = kg.insert_triple(triple.clone());
    Ok(Accepted { triple, is_new })
}

fn plan(
    kg: &KnowledgeGraph,
    ontology: Option<&Ontology>,
    extracted: &ExtractedEntity,
) -> Result<Planned, (RejectionReason, String)> {
    let label = extracted.label.trim().to_string();
    if label.is_empty() {
        return Err((RejectionReason::EmptyLabel, "entity without a label".to_string()));
    }

    let Some(ontology) = ontology else {
        let entity_type = match extracted.entity_type.trim() {
            "" => UNTYPED.to_string(),
            t => t.to_string(),
        };
        let normalized = normalize_label(&label);
        return Ok(match kg.entities().find(|e| e.matches_label(&normalized)) {
            Some(existing) => Planned {
                label,
                resolved_type: existing.entity_type.clone(),
                target: Target::Existing(existing.id.clone()),
                entity_type,
            },
            None => Planned {
                label,
                resolved_type: entity_type.clone(),
                target: Target::New,
                entity_type,
            },
        });
    };

    let entity_type = pascal_case(&extracted.entity_type);
    if !ontology.has_class(&entity_type) {
        return Err((
            RejectionReason::UnknownEntityType,
            format!("'{}' ({}) has undeclared type", label, extracted.entity_type),
        ));
    }

    let matched = exact_match(kg, ontology, &label, &entity_type)
        .or_else(|| partial_match(kg, ontology, &label, &entity_type));

    Ok(match matched {
        Some(existing) => Planned {
            resolved_type: ontology
                .more_specific(&existing.entity_type, &entity_type)
                .unwrap_or(existing.entity_type.as_str())
                .to_string(),
            target: Target::Existing(existing.id.clone()),
            label,
            entity_type,
        },
        None => Planned {
            resolved_type: entity_type.clone(),
            target: Target::New,
            label,
            entity_type,
        },
    })
}

fn exact_match<'a>(
    kg: &'a KnowledgeGraph,
    ontology: &Ontology,
    label: &str,
    entity_type: &str,
) -> Option<&'a Entity> {
    let normalized = normalize_label(label);
    kg.entities()
        .find(|e| e.matches_label(&normalized) && ontology.compatible(&e.entity_type, entity_type))
}

/// "Curie" -> "Marie Curie", only when exactly one compatible entity qualifies.
fn partial_match<'a>(
    kg: &'a KnowledgeGraph,
    ontology: &Ontology,
    label: &str,
    entity_type: &str,
) -> Option<&'a Entity> {
    let tokens = label_tokens(label);
    if tokens.is_empty() {
        return None;
    }
    let mut candidates = kg.entities().filter(|e| {
        if !ontology.compatible(&e.entity_type, entity_type) {
            return false;
        }
        let existing = label_tokens(&e.label);
        existing.len() > tokens.len()
            && (existing.starts_with(&tokens) || existing.ends_with(&tokens))
    });
    let first = candidates.next()?;
    match candidates.next() {
        Some(_) => None,
        None => Some(first),
    }
}

fn apply(
    kg: &mut KnowledgeGraph,
    ontology: Option<&Ontology>,
    planned: Planned,
    extracted: &ExtractedEntity,
) -> String {
    match planned.target {
        Target::Existing(id) => {
            if let Some(entity) = kg.entity_mut(&id) {
                if ontology.is_some() {
                    entity.entity_type = planned.resolved_type;
                }
                let normalized = normalize_label(&planned.label);
                if !entity.matches_label(&normalized) {
                    entity.aliases.insert(planned.label);
                }
                for (key, value) in &extracted.attributes {
                    entity
                        .attributes
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
            }
            id
        }
        Target::New => {
            let id = kg.next_entity_id(&planned.label);
            kg.insert_entity(Entity {
                id: id.clone(),
                label: planned.label,
                entity_type: planned.entity_type,
                aliases: Default::default(),
                attributes: extracted.attributes.clone(),
            });
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ontology_fixtures::science_ontology;
    use crate::validate::validate_kg;
    use std::collections::BTreeMap;

    fn mention(label: &str, entity_type: &str) -> ExtractedEntity {
        ExtractedEntity {
            label: label.to_string(),
            entity_type: entity_type.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    fn extracted(s: (&str, &str), relation: &str, o: (&str, &str)) -> ExtractedTriple {
        ExtractedTriple {
            subject: mention(s.0, s.1),
            relation: relation.to_string(),
            object: mention(o.0, o.1),
            confidence: None,
        }
    }

    #[test]
    fn surname_merges_into_more_specific_entity() {
        let ontology = science_ontology();
        let mut kg = KnowledgeGraph::new();

        let first = ExtractionOutput {
            triples: vec![extracted(("Marie Curie", "Person"), "affiliatedWith", ("Sorbonne", "Organization"))],
        };
        let second = ExtractionOutput {
            triples: vec![extracted(("Curie", "Scientist"), "affiliated with", ("University of Paris", "Organization"))],
        };
        resolve_output(&mut kg, Some(&ontology), &first, 0, 0, 0.0);
        let res = resolve_output(&mut kg, Some(&ontology), &second, 0, 1, 0.0);
        assert_eq!(res.accepted, 1);

        let curies: Vec<_> = kg.entities().filter(|e| e.label.contains("Curie")).collect();
        assert_eq!(curies.len(), 1);
        assert_eq!(curies[0].id, "marie-curie");
        assert_eq!(curies[0].entity_type, "Scientist");
        assert!(curies[0].aliases.contains("Curie"));
        assert_eq!(kg.entity_count(), 3);
        assert_eq!(kg.triple_count(), 2);
        assert!(validate_kg(&kg, Some(&ontology)).passed);
    }

    #[test]
    fn undeclared_relation_is_rejected_without_side_effects() {
        let ontology = science_ontology();
        let mut kg = KnowledgeGraph::new();
        let output = ExtractionOutput {
            triples: vec![extracted(("Entity A", "Person"), "worksAt", ("Entity B", "Organization"))],
        };
        let res = resolve_output(&mut kg, Some(&ontology), &output, 1, 4, 0.0);
        assert_eq!(res.accepted, 0);
        assert_eq!(res.rejections.len(), 1);
        assert_eq!(res.rejections[0].reason, RejectionReason::UnknownRelation);
        assert_eq!((res.rejections[0].epoch, res.rejections[0].chunk), (1, 4));
        assert!(kg.is_empty());
        assert_eq!(kg.triple_count(), 0);
    }

    #[test]
    fn domain_mismatch_is_incompatible() {
        let ontology = science_ontology();
        let mut kg = KnowledgeGraph::new();
        let t = extracted(("Sorbonne", "Organization"), "affiliatedWith", ("Marie Curie", "Person"));
        let err = resolve_triple(&mut kg, Some(&ontology), &t, 0.0).unwrap_err();
        assert_eq!(err.0, RejectionReason::IncompatibleRelation);
    }

    #[test]
    fn undeclared_type_and_low_confidence_are_rejected() {
        let ontology = science_ontology();
        let mut kg = KnowledgeGraph::new();
        let t = extracted(("Mars", "Planet"), "affiliatedWith", ("Sorbonne", "Organization"));
        assert_eq!(
            resolve_triple(&mut kg, Some(&ontology), &t, 0.0).unwrap_err().0,
            RejectionReason::UnknownEntityType
        );

        let mut t = extracted(("Marie Curie", "Person"), "affiliatedWith", ("Sorbonne", "Organization"));
        t.confidence = Some(0.4);
        assert_eq!(
            resolve_triple(&mut kg, Some(&ontology), &t, 0.5).unwrap_err().0,
            RejectionReason::LowConfidence
        );
        assert!(kg.is_empty());
    }

    #[test]
    fn incompatible_types_stay_separate() {
        let ontology = science_ontology();
        let mut kg = KnowledgeGraph::new();
        let t = extracted(("Paris", "Person"), "affiliatedWith", ("Paris", "Organization"));
        let accepted = resolve_triple(&mut kg, Some(&ontology), &t, 0.0).unwrap();
        assert_eq!(accepted.triple, Triple::new("paris", "affiliatedWith", "paris-2"));
        assert_eq!(kg.entity("paris-2").unwrap().entity_type, "Organization");
    }

    #[test]
    fn ambiguous_surname_does_not_merge() {
        let ontology = science_ontology();
        let mut kg = KnowledgeGraph::new();
        for name in ["Marie Curie", "Pierre Curie"] {
            let t = extracted((name, "Scientist"), "affiliatedWith", ("Sorbonne", "Organization"));
            resolve_triple(&mut kg, Some(&ontology), &t, 0.0).unwrap();
        }
        let t = extracted(("Curie", "Person"), "affiliatedWith", ("Sorbonne", "Organization"));
        let accepted = resolve_triple(&mut kg, Some(&ontology), &t, 0.0).unwrap();
        assert_eq!(accepted.triple.subject, "curie");
        assert_eq!(kg.entity_count(), 4);
    }

    #[test]
    fn repeated_triple_is_deduplicated_and_attributes_kept() {
        let ontology = science_ontology();
        let mut kg = KnowledgeGraph::new();
        let mut t = extracted(("Marie Curie", "Person"), "affiliatedWith", ("Sorbonne", "Organization"));
        t.subject.attributes.insert("born".into(), "1867".into());
        assert!(resolve_triple(&mut kg, Some(&ontology), &t, 0.0).unwrap().is_new);

        t.subject.attributes.insert("born".into(), "1900".into());
        t.subject.attributes.insert("died".into(), "1934".into());
        t.subject.label = "  marie   CURIE ".into();
        assert!(!resolve_triple(&mut kg, Some(&ontology), &t, 0.0).unwrap().is_new);

        let curie = kg.entity("marie-curie").unwrap();
        assert_eq!(curie.attributes["born"], "1867");
        assert_eq!(curie.attributes["died"], "1934");
        assert!(curie.aliases.is_empty());
        assert_eq!(kg.triple_count(), 1);
    }

    #[test]
    fn open_extraction_merges_on_label() {
        let mut kg = KnowledgeGraph::new();
        let a = extracted(("Marie Curie", "physicist"), "won", ("Nobel Prize", "award"));
        let b = extracted(("marie curie", "chemist"), "discovered", ("Polonium", ""));
        resolve_triple(&mut kg, None, &a, 0.0).unwrap();
        resolve_triple(&mut kg, None, &b, 0.0).unwrap();
        assert_eq!(kg.entity_count(), 3);
        assert_eq!(kg.entity("marie-curie").unwrap().entity_type, "physicist");
        assert_eq!(kg.entity("polonium").unwrap().entity_type, "Entity");
        assert!(validate_kg(&kg, None).passed);
    }
}
