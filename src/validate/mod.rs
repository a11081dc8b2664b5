//! Conformance validation for ontologies and knowledge graphs.
//!
//! Validators are read-only: they report violations in a deterministic order and leave
//! repair to the caller (the synthesizer asks the committee for a repair, the
//! extractor rejects individual triples).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::schema::{KnowledgeGraph, Ontology, PropertyRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    HierarchyCycle,
    MissingSuperclass,
    MissingDomain,
    MissingRange,
    DanglingSubject,
    DanglingObject,
    UnknownEntityType,
    UnknownRelation,
    IncompatibleRelation,
}

/// A single violation: its kind and the ids involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub ids: Vec<String>,
    pub message: String,
}

impl Violation {
    fn new(kind: ViolationKind, ids: Vec<String>, message: String) -> Self {
        Self { kind, ids, message }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// All ids named by any violation.
    pub fn offending_ids(&self) -> BTreeSet<String> {
        self.violations
            .iter()
            .flat_map(|v| v.ids.iter().cloned())
            .collect()
    }

    pub fn count(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }
}

/// Check hierarchy acyclicity, superclass existence and property domain/range existence.
pub fn validate_ontology(ontology: &Ontology) -> ValidationResult {
    let mut violations = Vec::new();

    for class in ontology.classes() {
        if let Some(sup) = &class.superclass {
            if !ontology.has_class(sup) {
                violations.push(Violation::new(
                    ViolationKind::MissingSuperclass,
                    vec![class.id.clone(), sup.clone()],
                    format!("superclass '{}' of class '{}' is not declared", sup, class.id),
                ));
            }
        }
    }

    violations.extend(find_cycles(ontology));

    for property in ontology.properties() {
        if !ontology.has_class(&property.domain) {
            violations.push(Violation::new(
                ViolationKind::MissingDomain,
                vec![property.id.clone(), property.domain.clone()],
                format!(
                    "domain '{}' of property '{}' is not declared",
                    property.domain, property.id
                ),
            ));
        }
        if let PropertyRange::Class(range) = &property.range {
            if !ontology.has_class(range) {
                violations.push(Violation::new(
                    ViolationKind::MissingRange,
                    vec![property.id.clone(), range.clone()],
                    format!("range '{}' of property '{}' is not declared", range, property.id),
                ));
            }
        }
    }

    ValidationResult::from_violations(violations)
}

/// One violation per distinct cycle, members sorted, reported in class-id order.
fn find_cycles(ontology: &Ontology) -> Vec<Violation> {
    let mut reported: HashSet<Vec<String>> = HashSet::new();
    let mut violations = Vec::new();

    for class in ontology.classes() {
        let mut path: Vec<&str> = vec![class.id.as_str()];
        let mut current = class.superclass.as_deref();
        while let Some(sup) = current {
            if let Some(pos) = path.iter().position(|id| *id == sup) {
                let mut members: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
                members.sort();
                if reported.insert(members.clone()) {
                    violations.push(Violation::new(
                        ViolationKind::HierarchyCycle,
                        members.clone(),
                        format!("circular class hierarchy: {}", members.join(" -> ")),
                    ));
                }
                break;
            }
            match ontology.class(sup) {
                Some(next) => {
                    path.push(next.id.as_str());
                    current = next.superclass.as_deref();
                }
                None => break,
            }
        }
    }

    violations
}

/// Check triple endpoints and, with an ontology, entity types and relation compatibility.
pub fn validate_kg(kg: &KnowledgeGraph, ontology: Option<&Ontology>) -> ValidationResult {
    let mut violations = Vec::new();

    if let Some(ontology) = ontology {
        for entity in kg.entities() {
            if !ontology.has_class(&entity.entity_type) {
                violations.push(Violation::new(
                    ViolationKind::UnknownEntityType,
                    vec![entity.id.clone(), entity.entity_type.clone()],
                    format!(
                        "entity '{}' has undeclared type '{}'",
                        entity.id, entity.entity_type
                    ),
                ));
            }
        }
    }

    for triple in kg.triples() {
        let subject = kg.entity(&triple.subject);
        let object = kg.entity(&triple.object);
        if subject.is_none() {
            violations.push(Violation::new(
                ViolationKind::DanglingSubject,
                vec![triple.subject.clone()],
                format!("triple subject '{}' is not a declared entity", triple.subject),
            ));
        }
        if object.is_none() {
            violations.push(Violation::new(
                ViolationKind::DanglingObject,
                vec![triple.object.clone()],
                format!("triple object '{}' is not a declared entity", triple.object),
            ));
        }
        let (Some(ontology), Some(subject), Some(object)) = (ontology, subject, object) else {
            continue;
        };
        if ontology.property(&triple.relation).is_none() {
            violations.push(Violation::new(
                ViolationKind::UnknownRelation,
                vec![triple.subject.clone(), triple.relation.clone(), triple.object.clone()],
                format!("relation '{}' is not a declared property", triple.relation),
            ));
        } else if !ontology.allows_relation(&triple.relation, &subject.entity_type, &object.entity_type) {
            violations.push(Violation::new(
                ViolationKind::IncompatibleRelation,
                vec![triple.subject.clone(), triple.relation.clone(), triple.object.clone()],
                format!(
                    "relation '{}' does not apply to {} -> {}",
                    triple.relation, subject.entity_type, object.entity_type
                ),
            ));
        }
    }

    ValidationResult::from_violations(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::kg_fixtures::entity;
    use crate::schema::ontology_fixtures::{class, object_property, science_ontology};
    use crate::schema::Triple;

    #[test]
    fn valid_ontology_passes() {
        let result = validate_ontology(&science_ontology());
        assert!(result.passed, "{:?}", result.violations);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn detects_cycle_once() {
        let mut ontology = Ontology::new();
        ontology.insert_class(class("A", Some("B")));
        ontology.insert_class(class("B", Some("C")));
        ontology.insert_class(class("C", Some("A")));
        ontology.insert_class(class("D", Some("A")));
        let result = validate_ontology(&ontology);
        assert!(!result.passed);
        assert_eq!(result.count(ViolationKind::HierarchyCycle), 1);
        assert_eq!(result.violations[0].ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn detects_self_superclass() {
        let mut ontology = Ontology::new();
        ontology.insert_class(class("A", Some("A")));
        let result = validate_ontology(&ontology);
        assert_eq!(result.count(ViolationKind::HierarchyCycle), 1);
    }

    #[test]
    fn detects_missing_superclass_domain_and_range() {
        let mut ontology = Ontology::new();
        ontology.insert_class(class("Person", Some("Agent")));
        ontology.insert_property(object_property("worksAt", "Employee", "Company"));
        let result = validate_ontology(&ontology);
        assert_eq!(result.count(ViolationKind::MissingSuperclass), 1);
        assert_eq!(result.count(ViolationKind::MissingDomain), 1);
        assert_eq!(result.count(ViolationKind::MissingRange), 1);
        let ids = result.offending_ids();
        assert!(ids.contains("Person"));
        assert!(ids.contains("worksAt"));
    }

    #[test]
    fn validation_does_not_mutate() {
        let mut ontology = Ontology::new();
        ontology.insert_class(class("A", Some("A")));
        let before = ontology.clone();
        let _ = validate_ontology(&ontology);
        assert_eq!(ontology, before);
    }

    #[test]
    fn kg_dangling_references() {
        let mut kg = KnowledgeGraph::new();
        kg.insert_entity(entity("a", "A", "Thing"));
        kg.insert_triple(Triple::new("a", "knows", "ghost"));
        let result = validate_kg(&kg, None);
        assert!(!result.passed);
        assert_eq!(result.count(ViolationKind::DanglingObject), 1);
        assert_eq!(result.count(ViolationKind::DanglingSubject), 0);
    }

    #[test]
    fn kg_without_ontology_ignores_types() {
        let mut kg = KnowledgeGraph::new();
        kg.insert_entity(entity("a", "A", "anything"));
        kg.insert_entity(entity("b", "B", "else"));
        kg.insert_triple(Triple::new("a", "whatever", "b"));
        assert!(validate_kg(&kg, None).passed);
    }

    #[test]
    fn kg_type_and_relation_checks() {
        let ontology = science_ontology();
        let mut kg = KnowledgeGraph::new();
        kg.insert_entity(entity("curie", "Curie", "Scientist"));
        kg.insert_entity(entity("sorbonne", "Sorbonne", "Organization"));
        kg.insert_entity(entity("x", "X", "Alien"));
        kg.insert_triple(Triple::new("curie", "affiliatedWith", "sorbonne"));
        kg.insert_triple(Triple::new("curie", "worksAt", "sorbonne"));
        kg.insert_triple(Triple::new("sorbonne", "affiliatedWith", "curie"));
        let result = validate_kg(&kg, Some(&ontology));
        assert_eq!(result.count(ViolationKind::UnknownEntityType), 1);
        assert_eq!(result.count(ViolationKind::UnknownRelation), 1);
        assert_eq!(result.count(ViolationKind::IncompatibleRelation), 1);
    }
}
