//! Schema model: ontologies (classes, properties, hierarchy) and knowledge graphs
//! (typed entities, labeled triples).
//!
//! Both are stored as flat id-keyed maps; hierarchy and relations are expressed as
//! id references so validation is a plain traversal over ids.

mod kg;
pub mod normalize;
mod ontology;

pub use kg::{Entity, KnowledgeGraph, Triple};
pub use normalize::{camel_case, label_tokens, normalize_label, pascal_case, slug};
pub use ontology::{Cardinality, LiteralType, Ontology, OntologyClass, OntologyProperty, PropertyRange};

#[cfg(test)]
pub(crate) use kg::tests as kg_fixtures;
#[cfg(test)]
pub(crate) use ontology::tests as ontology_fixtures;
