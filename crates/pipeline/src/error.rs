use thiserror::Error;

use extract::ExtractionError;
use index::GraphWriteError;
use ingest::IngestError;

/// Errors that abort a run before the chunk loop starts.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingestion(#[from] IngestError),

    #[error("failed to initialise graph schema: {0:#}")]
    Schema(#[source] anyhow::Error),
}

/// Why a single chunk did not commit. Ends the run, but is not returned.
#[derive(Debug, Error)]
pub(crate) enum ChunkError {
    #[error("context lookup failed: {0:#}")]
    Context(#[source] anyhow::Error),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Write(#[from] GraphWriteError),

    #[error("failed to record progress: {0:#}")]
    Progress(#[source] anyhow::Error),
}
