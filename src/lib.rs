pub mod config;
pub mod error;
pub mod eval;
pub mod extract;
pub mod llm;
pub mod logging;
pub mod ontology;
pub mod pipeline;
pub mod run;
pub mod schema;
pub mod sink;
pub mod text;
pub mod validate;

pub use config::Config;
pub use error::{OntoKgError, Result};
pub use pipeline::{Pipeline, Scenario, ScenarioFile};
pub use run::{RunContext, RunManager, ScenarioState};
