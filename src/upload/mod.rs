//! Chunked Upload Module
//!
//! Server-side handling for uploads sent straight to this service:
//! - Unchunked uploads are written directly to their final location
//! - Chunked uploads are stored part by part and reassembled in index order
//!   once the last part has been received
//! - Deleting an upload removes its final artifact and any leftover parts

pub mod assembler;
pub mod types;

pub use assembler::ChunkAssembler;
pub use types::*;
