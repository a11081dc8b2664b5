//! Plain-text chunking for extraction input.

mod chunker;

pub use chunker::{chunk_document, chunk_text, estimate_tokens, Chunk};
