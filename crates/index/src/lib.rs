pub mod context;
pub mod memory_store;
pub mod merge;
pub mod neo4j_store;
pub mod store;
pub mod writer;

pub use context::{ContextCandidate, ContextRetriever, extract_name_tokens, render_context};
pub use memory_store::MemoryGraphStore;
pub use neo4j_store::Neo4jStore;
pub use store::{GraphEntity, GraphStats, GraphStore, ParticipantLink, TimelineLink};
pub use writer::{GraphWriteError, GraphWriter, WriteStage};
