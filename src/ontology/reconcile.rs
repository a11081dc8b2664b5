//! Pure reconciliation of a round's committee proposals into the draft ontology.
//!
//! Class conflicts (same id, different superclass) are settled by majority vote; a tie
//! goes to the option that leaves the class shallowest in the hierarchy, then to the
//! lexically smallest option (no superclass sorts first). Property conflicts (same id,
//! different domain/range) are settled by majority vote, with ties resolved by the
//! configured [`PropertyTieBreak`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::llm::OntologyDelta;
use crate::schema::{
    camel_case, pascal_case, Cardinality, LiteralType, Ontology, OntologyClass, OntologyProperty,
    PropertyRange,
};

/// Tie-break policy for properties whose proposals disagree on domain/range with equal
/// vote counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyTieBreak {
    /// Keep the draft's current definition if it is among the tied options, otherwise
    /// fall back to `FirstProposer`.
    #[default]
    KeepExisting,
    /// The tied option proposed by the earliest committee member wins.
    FirstProposer,
    /// The tied option with the deepest domain and range classes wins.
    MostSpecific,
}

/// Outcome of merging one round into a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub ontology: Ontology,
    pub added_classes: Vec<String>,
    pub added_properties: Vec<String>,
    pub revised: Vec<String>,
    pub removed: Vec<String>,
}

impl Reconciliation {
    /// Classes and properties that did not exist in the draft.
    pub fn net_new(&self) -> usize {
        self.added_classes.len() + self.added_properties.len()
    }
}

/// Map a proposed range onto a literal tag or a PascalCase class id.
pub fn parse_range(raw: &str) -> PropertyRange {
    let tag = raw.trim().trim_start_matches("xsd:").to_lowercase();
    match tag.as_str() {
        "string" | "text" => PropertyRange::Literal(LiteralType::String),
        "int" | "integer" => PropertyRange::Literal(LiteralType::Int),
        "float" | "double" | "decimal" | "number" => PropertyRange::Literal(LiteralType::Float),
        "bool" | "boolean" => PropertyRange::Literal(LiteralType::Boolean),
        "date" => PropertyRange::Literal(LiteralType::Date),
        "datetime" => PropertyRange::Literal(LiteralType::DateTime),
        "time" => PropertyRange::Literal(LiteralType::Time),
        _ => PropertyRange::Class(pascal_case(raw)),
    }
}

fn normalize_superclass(raw: Option<&str>) -> Option<String> {
    raw.map(pascal_case).filter(|s| !s.is_empty())
}

struct ClassVote {
    superclass: Option<String>,
    description: String,
}

struct PropertyVote {
    option: (String, PropertyRange),
    cardinality: Option<Cardinality>,
    description: String,
}

/// Keep only the parts of a delta that touch `ids` (used to restrict repair proposals to
/// the violating classes and properties).
pub fn restrict_delta(delta: OntologyDelta, ids: &BTreeSet<String>) -> OntologyDelta {
    let touches = |raw: &str| ids.contains(&pascal_case(raw)) || ids.contains(&camel_case(raw));
    OntologyDelta {
        classes: delta
            .classes
            .into_iter()
            .filter(|c| ids.contains(&pascal_case(&c.name)))
            .collect(),
        properties: delta
            .properties
            .into_iter()
            .filter(|p| ids.contains(&camel_case(&p.name)))
            .collect(),
        remove: delta.remove.into_iter().filter(|r| touches(r.as_str())).collect(),
    }
}

/// Merge `deltas` (in committee order) into `draft`.
pub fn reconcile(draft: &Ontology, deltas: &[OntologyDelta], tie_break: PropertyTieBreak) -> Reconciliation {
    let mut working = draft.clone();

    // One vote per proposal per id; a proposal repeating an id keeps its last entry.
    let mut class_votes: BTreeMap<String, Vec<ClassVote>> = BTreeMap::new();
    let mut property_votes: BTreeMap<String, Vec<PropertyVote>> = BTreeMap::new();
    let mut removal_votes: BTreeMap<String, usize> = BTreeMap::new();

    for delta in deltas {
        let mut classes: BTreeMap<String, ClassVote> = BTreeMap::new();
        for proposal in &delta.classes {
            let id = pascal_case(&proposal.name);
            if id.is_empty() {
                continue;
            }
            classes.insert(
                id,
                ClassVote {
                    superclass: normalize_superclass(proposal.superclass.as_deref()),
                    description: proposal.description.clone().unwrap_or_default(),
                },
            );
        }
        for (id, vote) in classes {
            class_votes.entry(id).or_default().push(vote);
        }

        let mut properties: BTreeMap<String, PropertyVote> = BTreeMap::new();
        for proposal in &delta.properties {
            let id = camel_case(&proposal.name);
            if id.is_empty() {
                continue;
            }
            properties.insert(
                id,
                PropertyVote {
                    option: (pascal_case(&proposal.domain), parse_range(&proposal.range)),
                    cardinality: proposal.cardinality,
                    description: proposal.description.clone().unwrap_or_default(),
                },
            );
        }
        for (id, vote) in properties {
            property_votes.entry(id).or_default().push(vote);
        }

        let removals: BTreeSet<&String> = delta.remove.iter().collect();
        for id in removals {
            *removal_votes.entry(id.trim().to_string()).or_default() += 1;
        }
    }

    // Classes: undisputed winners first, so tie-breaks see as much of the hierarchy as
    // possible.
    let mut tied: Vec<(String, Vec<Option<String>>)> = Vec::new();
    for (id, votes) in &class_votes {
        let options = top_options(votes.iter().map(|v| v.superclass.clone()));
        if options.len() == 1 {
            insert_class(&mut working, draft, id, options[0].clone(), votes);
        } else {
            tied.push((id.clone(), options));
        }
    }
    for (id, options) in tied {
        let winner = options
            .iter()
            .min_by_key(|option| {
                let mut trial = working.clone();
                trial.insert_class(OntologyClass {
                    id: id.clone(),
                    superclass: (*option).clone(),
                    description: String::new(),
                });
                trial.depth(&id).unwrap_or(usize::MAX)
            })
            .cloned()
            .unwrap_or(None);
        insert_class(&mut working, draft, &id, winner, &class_votes[&id]);
    }

    for (id, votes) in &property_votes {
        let options = top_options(votes.iter().map(|v| v.option.clone()));
        let winner = if options.len() == 1 {
            options[0].clone()
        } else {
            break_property_tie(&working, draft.property(id), votes, &options, tie_break)
        };
        let cardinality = votes
            .iter()
            .filter(|v| v.option == winner)
            .find_map(|v| v.cardinality)
            .or_else(|| draft.property(id).map(|p| p.cardinality))
            .unwrap_or_default();
        let description = draft
            .property(id)
            .map(|p| p.description.clone())
            .filter(|d| !d.is_empty())
            .or_else(|| first_description(votes.iter().filter(|v| v.option == winner).map(|v| &v.description)))
            .unwrap_or_default();
        working.insert_property(OntologyProperty {
            id: id.clone(),
            domain: winner.0,
            range: winner.1,
            cardinality,
            description,
        });
    }

    let majority = deltas.len() / 2 + 1;
    for (raw, count) in removal_votes {
        if count < majority {
            continue;
        }
        working.remove_class(&pascal_case(&raw));
        working.remove_property(&camel_case(&raw));
    }

    diff(draft, working)
}

/// Options with the highest vote count, in their natural order.
fn top_options<T: Ord + Clone>(votes: impl Iterator<Item = T>) -> Vec<T> {
    let mut counts: BTreeMap<T, usize> = BTreeMap::new();
    for vote in votes {
        *counts.entry(vote).or_default() += 1;
    }
    let max = counts.values().copied().max().unwrap_or(0);
    counts
        .into_iter()
        .filter(|(_, count)| *count == max)
        .map(|(option, _)| option)
        .collect()
}

fn first_description<'a>(mut descriptions: impl Iterator<Item = &'a String>) -> Option<String> {
    descriptions.find(|d| !d.trim().is_empty()).cloned()
}

fn insert_class(
    working: &mut Ontology,
    draft: &Ontology,
    id: &str,
    superclass: Option<String>,
    votes: &[ClassVote],
) {
    let description = draft
        .class(id)
        .map(|c| c.description.clone())
        .filter(|d| !d.is_empty())
        .or_else(|| {
            first_description(
                votes
                    .iter()
                    .filter(|v| v.superclass == superclass)
                    .map(|v| &v.description),
            )
        })
        .or_else(|| first_description(votes.iter().map(|v| &v.description)))
        .unwrap_or_default();
    working.insert_class(OntologyClass {
        id: id.to_string(),
        superclass,
        description,
    });
}

fn break_property_tie(
    working: &Ontology,
    existing: Option<&OntologyProperty>,
    votes: &[PropertyVote],
    options: &[(String, PropertyRange)],
    tie_break: PropertyTieBreak,
) -> (String, PropertyRange) {
    let first_proposer = || {
        votes
            .iter()
            .map(|v| &v.option)
            .find(|o| options.contains(o))
            .cloned()
            .unwrap_or_else(|| options[0].clone())
    };

    match tie_break {
        PropertyTieBreak::KeepExisting => existing
            .map(|p| (p.domain.clone(), p.range.clone()))
            .filter(|current| options.contains(current))
            .unwrap_or_else(first_proposer),
        PropertyTieBreak::FirstProposer => first_proposer(),
        PropertyTieBreak::MostSpecific => {
            let specificity = |(domain, range): &(String, PropertyRange)| {
                let range_depth = range.class_id().and_then(|r| working.depth(r)).unwrap_or(0);
                working.depth(domain).unwrap_or(0) + range_depth
            };
            let mut best: Option<&(String, PropertyRange)> = None;
            for vote in votes {
                if !options.contains(&vote.option) {
                    continue;
                }
                if best.map_or(true, |b| specificity(&vote.option) > specificity(b)) {
                    best = Some(&vote.option);
                }
            }
            best.cloned().unwrap_or_else(first_proposer)
        }
    }
}

fn diff(draft: &Ontology, ontology: Ontology) -> Reconciliation {
    let mut added_classes = Vec::new();
    let mut added_properties = Vec::new();
    let mut revised = Vec::new();
    let mut removed = Vec::new();

    for class in ontology.classes() {
        match draft.class(&class.id) {
            None => added_classes.push(class.id.clone()),
            Some(old) if old != class => revised.push(class.id.clone()),
            Some(_) => {}
        }
    }
    for property in ontology.properties() {
        match draft.property(&property.id) {
            None => added_properties.push(property.id.clone()),
            Some(old) if old != property => revised.push(property.id.clone()),
            Some(_) => {}
        }
    }
    for class in draft.classes() {
        if !ontology.has_class(&class.id) {
            removed.push(class.id.clone());
        }
    }
    for property in draft.properties() {
        if ontology.property(&property.id).is_none() {
            removed.push(property.id.clone());
        }
    }

    Reconciliation {
        ontology,
        added_classes,
        added_properties,
        revised,
        removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ClassProposal, PropertyProposal};
    use crate::schema::ontology_fixtures::{class, science_ontology};

    fn class_delta(entries: &[(&str, Option<&str>)]) -> OntologyDelta {
        OntologyDelta {
            classes: entries
                .iter()
                .map(|(name, sup)| ClassProposal {
                    name: name.to_string(),
                    superclass: sup.map(str::to_string),
                    description: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn property_delta(name: &str, domain: &str, range: &str) -> OntologyDelta {
        OntologyDelta {
            properties: vec![PropertyProposal {
                name: name.to_string(),
                domain: domain.to_string(),
                range: range.to_string(),
                cardinality: None,
                description: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn majority_vote_decides_superclass() {
        let draft = science_ontology();
        let deltas = vec![
            class_delta(&[("Physicist", Some("Scientist"))]),
            class_delta(&[("Physicist", Some("Scientist"))]),
            class_delta(&[("Physicist", Some("Person"))]),
        ];
        let rec = reconcile(&draft, &deltas, PropertyTieBreak::default());
        assert_eq!(rec.ontology.class("Physicist").unwrap().superclass.as_deref(), Some("Scientist"));
        assert_eq!(rec.added_classes, vec!["Physicist"]);
    }

    #[test]
    fn tie_prefers_flatter_hierarchy() {
        let draft = science_ontology();
        let deltas = vec![
            class_delta(&[("Physicist", Some("Scientist"))]),
            class_delta(&[("Physicist", Some("Agent"))]),
        ];
        let rec = reconcile(&draft, &deltas, PropertyTieBreak::default());
        assert_eq!(rec.ontology.class("Physicist").unwrap().superclass.as_deref(), Some("Agent"));
    }

    #[test]
    fn tie_with_root_option_prefers_root() {
        let draft = science_ontology();
        let deltas = vec![
            class_delta(&[("Event", Some("Thing"))]),
            class_delta(&[("Event", None)]),
        ];
        let rec = reconcile(&draft, &deltas, PropertyTieBreak::default());
        assert_eq!(rec.ontology.class("Event").unwrap().superclass, None);
    }

    #[test]
    fn class_result_independent_of_proposal_order() {
        let draft = science_ontology();
        let a = class_delta(&[("Physicist", Some("Scientist")), ("Lab", Some("Organization"))]);
        let b = class_delta(&[("Physicist", Some("Agent"))]);
        let c = class_delta(&[("Lab", Some("Thing")), ("Physicist", Some("Agent"))]);
        let forward = reconcile(&draft, &[a.clone(), b.clone(), c.clone()], PropertyTieBreak::default());
        let backward = reconcile(&draft, &[c, b, a], PropertyTieBreak::default());
        assert_eq!(forward.ontology, backward.ontology);
    }

    #[test]
    fn names_are_normalized() {
        let deltas = vec![OntologyDelta {
            classes: vec![ClassProposal {
                name: "research institute".to_string(),
                superclass: Some("organization".to_string()),
                description: Some("A place of research".to_string()),
            }],
            properties: vec![PropertyProposal {
                name: "founded on".to_string(),
                domain: "research institute".to_string(),
                range: "xsd:date".to_string(),
                cardinality: Some(Cardinality::One),
                description: None,
            }],
            remove: vec![],
        }];
        let rec = reconcile(&Ontology::new(), &deltas, PropertyTieBreak::default());
        let class = rec.ontology.class("ResearchInstitute").unwrap();
        assert_eq!(class.superclass.as_deref(), Some("Organization"));
        assert_eq!(class.description, "A place of research");
        let property = rec.ontology.property("foundedOn").unwrap();
        assert_eq!(property.domain, "ResearchInstitute");
        assert_eq!(property.range, PropertyRange::Literal(LiteralType::Date));
        assert_eq!(property.cardinality, Cardinality::One);
    }

    #[test]
    fn property_tie_keep_existing() {
        let mut draft = science_ontology();
        draft.insert_class(class("Lab", Some("Organization")));
        let deltas = vec![
            property_delta("affiliatedWith", "Scientist", "Lab"),
            property_delta("affiliatedWith", "Person", "Organization"),
        ];
        let rec = reconcile(&draft, &deltas, PropertyTieBreak::KeepExisting);
        let p = rec.ontology.property("affiliatedWith").unwrap();
        assert_eq!(p.domain, "Person");
        assert!(rec.revised.is_empty());
    }

    #[test]
    fn property_tie_first_proposer_and_most_specific() {
        let mut draft = science_ontology();
        draft.insert_class(class("Lab", Some("Organization")));
        let deltas = vec![
            property_delta("employs", "Organization", "Person"),
            property_delta("employs", "Lab", "Scientist"),
        ];
        let first = reconcile(&draft, &deltas, PropertyTieBreak::FirstProposer);
        assert_eq!(first.ontology.property("employs").unwrap().domain, "Organization");
        let specific = reconcile(&draft, &deltas, PropertyTieBreak::MostSpecific);
        let p = specific.ontology.property("employs").unwrap();
        assert_eq!(p.domain, "Lab");
        assert_eq!(p.range, PropertyRange::Class("Scientist".to_string()));
    }

    #[test]
    fn reproposing_existing_is_not_net_new() {
        let draft = science_ontology();
        let deltas = vec![class_delta(&[("Scientist", Some("Person"))])];
        let rec = reconcile(&draft, &deltas, PropertyTieBreak::default());
        assert_eq!(rec.net_new(), 0);
        assert!(rec.revised.is_empty());
        assert_eq!(rec.ontology, draft);
    }

    #[test]
    fn removal_needs_majority() {
        let draft = science_ontology();
        let remove = OntologyDelta {
            remove: vec!["Agent".to_string()],
            ..Default::default()
        };
        let minority = reconcile(&draft, &[remove.clone(), OntologyDelta::default(), OntologyDelta::default()], PropertyTieBreak::default());
        assert!(minority.ontology.has_class("Agent"));
        let majority = reconcile(&draft, &[remove.clone(), remove], PropertyTieBreak::default());
        assert!(!majority.ontology.has_class("Agent"));
        assert_eq!(majority.removed, vec!["Agent"]);
    }

    #[test]
    fn restrict_delta_keeps_only_offending_ids() {
        let delta = OntologyDelta {
            classes: vec![
                ClassProposal { name: "Agent".into(), superclass: None, description: None },
                ClassProposal { name: "Unrelated".into(), superclass: None, description: None },
            ],
            properties: vec![PropertyProposal {
                name: "works at".into(),
                domain: "Person".into(),
                range: "Organization".into(),
                cardinality: None,
                description: None,
            }],
            remove: vec!["Unrelated".into(), "worksAt".into()],
        };
        let ids: BTreeSet<String> = ["Agent", "worksAt"].iter().map(|s| s.to_string()).collect();
        let restricted = restrict_delta(delta, &ids);
        assert_eq!(restricted.classes.len(), 1);
        assert_eq!(restricted.properties.len(), 1);
        assert_eq!(restricted.remove, vec!["worksAt"]);
    }

    #[test]
    fn parse_range_literals_and_classes() {
        assert_eq!(parse_range("xsd:dateTime"), PropertyRange::Literal(LiteralType::DateTime));
        assert_eq!(parse_range("Integer"), PropertyRange::Literal(LiteralType::Int));
        assert_eq!(parse_range("research lab"), PropertyRange::Class("ResearchLab".to_string()));
    }
}
