pub mod error;
pub mod llm;
pub mod parse;
pub mod prompt;
pub mod schema;
pub mod vocab;

pub use error::ExtractionError;
pub use llm::{GenerationOptions, Generator, OllamaClient, OpenAiClient};
pub use prompt::PromptContext;
pub use schema::{ChunkSummary, Entity, ExtractionResult, PlotEvent, Relationship};
pub use vocab::{EntitySubtype, EntityType, HealthStatus, RelationshipType, TimeOfDay};

use std::sync::Arc;
use tracing::debug;

/// One chunk plus the narrative state carried in from earlier chunks.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub chunk_id: &'a str,
    pub chunk_index: usize,
    pub chunk_text: &'a str,
    pub previous_summary: &'a str,
    pub context_text: &'a str,
    pub known_registry: &'a [String],
    pub active_characters: &'a [String],
}

#[derive(Clone)]
pub struct Extractor {
    generator: Arc<dyn Generator>,
}

impl Extractor {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Extract entities, relationships and events from one chunk.
    ///
    /// Makes exactly one generation call; the only side effect is that call.
    pub async fn extract(
        &self,
        input: &ExtractionInput<'_>,
        options: &GenerationOptions,
    ) -> Result<ExtractionResult, ExtractionError> {
        let prompt = prompt::build_extraction_prompt(&PromptContext {
            chunk_text: input.chunk_text,
            previous_summary: input.previous_summary,
            knowledge_base: input.context_text,
            known_characters: input.known_registry,
            active_characters: input.active_characters,
        });

        let content = self.generator
            .generate(prompt::SYSTEM_PROMPT, &prompt, options)
            .await
            .map_err(ExtractionError::Generation)?;

        let result = parse::parse_response(&content, input.chunk_id, input.chunk_index)?;

        debug!(
            chunk_id = input.chunk_id,
            entities = result.entities.len(),
            relationships = result.relationships.len(),
            events = result.events.len(),
            "Parsed extraction result"
        );

        Ok(result)
    }
}
