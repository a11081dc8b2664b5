use serde::{Deserialize, Serialize};

/// Fixed set of committee proposal strategies. Each member of a round's committee
/// proposes independently under one of these framings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    DomainExpert,
    OntologyEngineer,
    SkepticalReviewer,
    EndUser,
    DataCurator,
}

impl Persona {
    pub const ALL: [Persona; 5] = [
        Persona::DomainExpert,
        Persona::OntologyEngineer,
        Persona::SkepticalReviewer,
        Persona::EndUser,
        Persona::DataCurator,
    ];

    /// The first `size` personas, clamped to the number of distinct personas.
    pub fn committee(size: usize) -> Vec<Persona> {
        if size > Self::ALL.len() {
            log::warn!(
                "Committee size {} exceeds {} distinct personas; using {}",
                size,
                Self::ALL.len(),
                Self::ALL.len()
            );
        }
        Self::ALL.iter().copied().take(size.max(1)).collect()
    }

    pub fn slug(self) -> &'static str {
        match self {
            Persona::DomainExpert => "domain-expert",
            Persona::OntologyEngineer => "ontology-engineer",
            Persona::SkepticalReviewer => "skeptical-reviewer",
            Persona::EndUser => "end-user",
            Persona::DataCurator => "data-curator",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Persona::DomainExpert => "a domain expert",
            Persona::OntologyEngineer => "an ontology engineer",
            Persona::SkepticalReviewer => "a skeptical reviewer",
            Persona::EndUser => "an end user asking questions about the domain",
            Persona::DataCurator => "a data curator",
        }
    }

    pub fn framing(self) -> &'static str {
        match self {
            Persona::DomainExpert => "Name the concepts and relations practitioners actually rely on.",
            Persona::OntologyEngineer => "Keep the hierarchy a clean single-inheritance tree and give every property a declared domain and range.",
            Persona::SkepticalReviewer => "Challenge redundant or overly deep classes; prefer revising existing classes over adding new ones.",
            Persona::EndUser => "Add what is needed to answer typical questions about the domain.",
            Persona::DataCurator => "Add literal properties (dates, quantities, names) that texts commonly state.",
        }
    }
}
