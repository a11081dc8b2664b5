//! Ontology model: classes arranged in a single-inheritance forest plus typed properties.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A class in the ontology. `superclass` is a weak reference by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyClass {
    pub id: String,
    #[serde(default)]
    pub superclass: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Literal value types a data property may range over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiteralType {
    String,
    Int,
    Float,
    Boolean,
    Date,
    DateTime,
    Time,
}

/// Range of a property: another class, or a literal type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyRange {
    Class(String),
    Literal(LiteralType),
}

impl PropertyRange {
    pub fn class_id(&self) -> Option<&str> {
        match self {
            PropertyRange::Class(id) => Some(id),
            PropertyRange::Literal(_) => None,
        }
    }
}

/// Cardinality hint for a property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    #[default]
    Many,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyProperty {
    pub id: String,
    pub domain: String,
    pub range: PropertyRange,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub description: String,
}

/// Persisted form: flat class and property lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OntologyDocument {
    #[serde(default)]
    classes: Vec<OntologyClass>,
    #[serde(default)]
    properties: Vec<OntologyProperty>,
}

/// An ontology: classes and properties keyed by id.
///
/// Invariants (superclass forest, resolvable domains/ranges) are not enforced on
/// insertion; they are checked by [`crate::validate::validate_ontology`] so a draft can be
/// temporarily inconsistent while the committee revises it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OntologyDocument", into = "OntologyDocument")]
pub struct Ontology {
    classes: BTreeMap<String, OntologyClass>,
    properties: BTreeMap<String, OntologyProperty>,
}

impl From<OntologyDocument> for Ontology {
    fn from(doc: OntologyDocument) -> Self {
        let mut ontology = Ontology::new();
        for class in doc.classes {
            ontology.insert_class(class);
        }
        for property in doc.properties {
            ontology.insert_property(property);
        }
        ontology
    }
}

impl From<Ontology> for OntologyDocument {
    fn from(ontology: Ontology) -> Self {
        OntologyDocument {
            classes: ontology.classes.into_values().collect(),
            properties: ontology.properties.into_values().collect(),
        }
    }
}

impl Ontology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a class.
    pub fn insert_class(&mut self, class: OntologyClass) -> Option<OntologyClass> {
        self.classes.insert(class.id.clone(), class)
    }

    /// Insert or replace a property.
    pub fn insert_property(&mut self, property: OntologyProperty) -> Option<OntologyProperty> {
        self.properties.insert(property.id.clone(), property)
    }

    pub fn remove_class(&mut self, id: &str) -> Option<OntologyClass> {
        self.classes.remove(id)
    }

    pub fn remove_property(&mut self, id: &str) -> Option<OntologyProperty> {
        self.properties.remove(id)
    }

    pub fn class(&self, id: &str) -> Option<&OntologyClass> {
        self.classes.get(id)
    }

    pub fn property(&self, id: &str) -> Option<&OntologyProperty> {
        self.properties.get(id)
    }

    pub fn has_class(&self, id: &str) -> bool {
        self.classes.contains_key(id)
    }

    pub fn classes(&self) -> impl Iterator<Item = &OntologyClass> {
        self.classes.values()
    }

    pub fn properties(&self) -> impl Iterator<Item = &OntologyProperty> {
        self.properties.values()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.properties.is_empty()
    }

    /// Superclass chain of `id`, nearest first, excluding `id` itself.
    /// Stops at the first missing superclass or at a repeated id (cycle).
    pub fn ancestors(&self, id: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id);
        let mut current = self.classes.get(id).and_then(|c| c.superclass.as_deref());
        while let Some(sup) = current {
            if !seen.insert(sup) {
                break;
            }
            let Some(class) = self.classes.get(sup) else {
                break;
            };
            chain.push(class.id.as_str());
            current = class.superclass.as_deref();
        }
        chain
    }

    /// True when `ancestor` equals `id` or appears in its superclass chain.
    pub fn is_subclass_of(&self, id: &str, ancestor: &str) -> bool {
        id == ancestor || self.ancestors(id).contains(&ancestor)
    }

    /// Two types are compatible when one is equal to or an ancestor of the other.
    pub fn compatible(&self, a: &str, b: &str) -> bool {
        self.is_subclass_of(a, b) || self.is_subclass_of(b, a)
    }

    /// The more specific of two compatible types, or `None` when incompatible.
    pub fn more_specific<'a>(&self, a: &'a str, b: &'a str) -> Option<&'a str> {
        if self.is_subclass_of(a, b) {
            Some(a)
        } else if self.is_subclass_of(b, a) {
            Some(b)
        } else {
            None
        }
    }

    /// Number of superclass hops from `id` to its root, `None` if the chain is cyclic
    /// or `id` is unknown.
    pub fn depth(&self, id: &str) -> Option<usize> {
        let mut seen = HashSet::new();
        let mut depth = 0;
        let mut current = self.classes.get(id)?;
        seen.insert(current.id.as_str());
        while let Some(sup) = current.superclass.as_deref() {
            if !seen.insert(sup) {
                return None;
            }
            current = match self.classes.get(sup) {
                Some(class) => class,
                None => return Some(depth + 1),
            };
            depth += 1;
        }
        Some(depth)
    }

    /// Maximum depth over all classes; cyclic chains count as `usize::MAX`.
    pub fn max_depth(&self) -> usize {
        self.classes
            .keys()
            .map(|id| self.depth(id).unwrap_or(usize::MAX))
            .max()
            .unwrap_or(0)
    }

    /// Whether `relation` is a declared object property applicable to the given
    /// subject/object types (inherited domains and ranges count).
    pub fn allows_relation(&self, relation: &str, subject_type: &str, object_type: &str) -> bool {
        match self.properties.get(relation) {
            Some(property) => {
                let domain_ok = self.is_subclass_of(subject_type, &property.domain);
                let range_ok = match &property.range {
                    PropertyRange::Class(range) => self.is_subclass_of(object_type, range),
                    PropertyRange::Literal(_) => false,
                };
                domain_ok && range_ok
            }
            None => false,
        }
    }
}
