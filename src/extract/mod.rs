//! Chunk-iterative knowledge graph extraction.
//!
//! [`Extractor`] handles model calls, retries and epochs; [`resolve`] is the pure merge
//! step that turns extracted triples into graph updates or recorded rejections.

mod extractor;
pub mod resolve;

pub use extractor::{ChunkRecord, ChunkStore, EpochSummary, ExtractionReport, Extractor, SkippedChunk};
pub use resolve::{resolve_output, resolve_triple, ChunkResolution, Rejection, RejectionReason};
