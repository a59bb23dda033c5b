pub mod chunk;
pub mod chunker;
pub mod reader;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkerConfig};
pub use reader::{FileReader, IngestError};

use std::path::Path;

/// Read a source file and split it into chunks.
pub async fn ingest_file(file_path: &Path, config: ChunkerConfig) -> Result<Vec<Chunk>, IngestError> {
    let content = FileReader::read_file(file_path).await?;

    let chunker = Chunker::new(config);
    let chunks = chunker.split(&content);

    tracing::debug!(
        path = %file_path.display(),
        chars = content.chars().count(),
        chunks = chunks.len(),
        "Split source text"
    );

    Ok(chunks)
}
