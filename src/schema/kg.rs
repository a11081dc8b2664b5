//! Knowledge graph model: entities in a flat id-keyed map, triples as id pairs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::normalize::{normalize_label, slug};

/// A typed entity. `entity_type` is an ontology class id, or a free-form type when no
/// ontology governs extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Every other surface label this entity was merged from.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub aliases: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Entity {
    /// Whether `normalized` (see [`normalize_label`]) matches the label or any alias.
    pub fn matches_label(&self, normalized: &str) -> bool {
        normalize_label(&self.label) == normalized
            || self.aliases.iter().any(|a| normalize_label(a) == normalized)
    }
}

/// A (subject, relation, object) triple over entity ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

impl Triple {
    pub fn new(subject: impl Into<String>, relation: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            relation: relation.into(),
            object: object.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KnowledgeGraphDocument {
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    triples: Vec<Triple>,
}

/// Entities keyed by id and a deduplicated triple set. Ordered collections keep
/// serialization and iteration deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "KnowledgeGraphDocument", into = "KnowledgeGraphDocument")]
pub struct KnowledgeGraph {
    entities: BTreeMap<String, Entity>,
    triples: BTreeSet<Triple>,
}

impl From<KnowledgeGraphDocument> for KnowledgeGraph {
    fn from(doc: KnowledgeGraphDocument) -> Self {
        Self {
            entities: doc.entities.into_iter().map(|e| (e.id.clone(), e)).collect(),
            triples: doc.triples.into_iter().collect(),
        }
    }
}

impl From<KnowledgeGraph> for KnowledgeGraphDocument {
    fn from(kg: KnowledgeGraph) -> Self {
        Self {
            entities: kg.entities.into_values().collect(),
            triples: kg.triples.into_iter().collect(),
        }
    }
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub(crate) fn entity_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn triples(&self) -> impl Iterator<Item = &Triple> {
        self.triples.iter()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn triple_count(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Insert an entity, replacing any entity with the same id.
    pub fn insert_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    /// Insert a triple; returns `false` when the exact triple is already present.
    pub fn insert_triple(&mut self, triple: Triple) -> bool {
        self.triples.insert(triple)
    }

    pub fn contains_triple(&self, triple: &Triple) -> bool {
        self.triples.contains(triple)
    }

    /// Entities whose label or an alias matches the given label after normalization.
    pub fn find_by_label(&self, label: &str) -> Vec<&Entity> {
        let normalized = normalize_label(label);
        self.entities
            .values()
            .filter(|e| e.matches_label(&normalized))
            .collect()
    }

    /// Allocate a fresh, deterministic id for a new entity with this label.
    pub fn next_entity_id(&self, label: &str) -> String {
        let base = slug(label);
        if !self.entities.contains_key(&base) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !self.entities.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// True when every entity and triple of `other` is also present here
    /// (entities compared by id).
    pub fn is_superset_of(&self, other: &KnowledgeGraph) -> bool {
        other.entities.keys().all(|id| self.entities.contains_key(id))
            && other.triples.iter().all(|t| self.triples.contains(t))
    }
}
