//! Run directories, write-once checkpoints and resumable scenario progress.

mod artifact;
mod checkpoint;
mod context;
mod id;
mod manager;

pub use artifact::{OntologyArtifact, OntologyStatus};
pub use checkpoint::{load_checkpoint, write_checkpoint, CheckpointKey, Stage, WriteOutcome};
pub use context::{RunContext, ScenarioChunks, ScenarioState};
pub use id::RunId;
pub use manager::RunManager;
