use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("generation call failed: {0:#}")]
    Generation(#[source] anyhow::Error),

    #[error("generation service returned empty content")]
    EmptyResponse,

    #[error("model output is not a JSON object ({reason}): {snippet}")]
    MalformedResponse { reason: String, snippet: String },
}

impl ExtractionError {
    pub(crate) fn malformed(reason: impl ToString, content: &str) -> Self {
        // First 200 characters only
        let snippet: String = content.chars().take(200).collect();
        Self::MalformedResponse {
            reason: reason.to_string(),
            snippet,
        }
    }
}
