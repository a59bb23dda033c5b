use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use extract::{EntitySubtype, ExtractionInput, ExtractionResult, Extractor, GenerationOptions, Generator};
use index::{ContextRetriever, GraphStore, GraphWriter, render_context};
use ingest::{Chunk, Chunker, ChunkerConfig, FileReader};

use crate::error::{ChunkError, PipelineError};
use crate::progress::ProgressTracker;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunker: ChunkerConfig,
    /// Maximum number of known entities rendered into each prompt.
    pub context_limit: usize,
    pub generation: GenerationOptions,
    pub reset_before_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            context_limit: 20,
            generation: GenerationOptions::default(),
            reset_before_run: false,
        }
    }
}

/// Per-run knobs; unset overrides fall back to [`PipelineConfig`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub reset: bool,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub processed_chunks: usize,
    pub skipped_chunks: usize,
}

/// What one chunk hands to the next.
#[derive(Debug, Default)]
struct NarrativeState {
    previous_summary: String,
    active_characters: Vec<String>,
    known_characters: Vec<String>,
}

impl NarrativeState {
    fn absorb(&mut self, result: &ExtractionResult) {
        if !result.next_summary.is_empty() {
            self.previous_summary = result.next_summary.clone();
        }
        if !result.active_characters.is_empty() {
            self.active_characters = result.active_characters.clone();
        }

        let main_characters = result
            .entities
            .iter()
            .filter(|e| e.subtype == EntitySubtype::MainCharacter)
            .map(|e| &e.name);
        for name in result.chunk_summary.main_characters.iter().chain(main_characters) {
            if !self.known_characters.contains(name) {
                self.known_characters.push(name.clone());
            }
        }
    }
}

/// Drives chunks one at a time through retrieve, extract, save and mark.
pub struct Orchestrator {
    config: PipelineConfig,
    store: Arc<dyn GraphStore>,
    retriever: ContextRetriever,
    extractor: Extractor,
    writer: GraphWriter,
    progress: ProgressTracker,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn GraphStore>,
        generator: Arc<dyn Generator>,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            config,
            retriever: ContextRetriever::new(store.clone()),
            writer: GraphWriter::new(store.clone()),
            extractor: Extractor::new(generator),
            store,
            progress,
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Read `source` and process it.
    pub async fn run(&mut self, source: &Path, options: &RunOptions) -> Result<RunResult, PipelineError> {
        let text = FileReader::read_file(source).await?;
        info!(path = %source.display(), chars = text.chars().count(), "Loaded source text");
        self.run_text(&text, options).await
    }

    /// Process `text` chunk by chunk.
    ///
    /// The first chunk that fails ends the run; the counts so far are
    /// returned as a normal result. Only failures before the chunk loop
    /// are returned as errors.
    pub async fn run_text(&mut self, text: &str, options: &RunOptions) -> Result<RunResult, PipelineError> {
        if options.reset || self.config.reset_before_run {
            self.reset().await;
        }

        self.store.init_schema().await.map_err(PipelineError::Schema)?;

        let chunks = Chunker::new(self.config.chunker).split(text);
        let total = chunks.len();
        let generation = self.generation_options(options);
        info!(total, model = %generation.model, temperature = generation.temperature, "Starting run");

        let run_started = Instant::now();
        let mut state = NarrativeState::default();
        let mut result = RunResult::default();

        for chunk in &chunks {
            let index = chunk.sequence_index + 1;

            if self.progress.is_processed(&chunk.chunk_id) {
                result.skipped_chunks += 1;
                debug!(index, total, chunk_id = %chunk.chunk_id, "Skipping processed chunk");
                continue;
            }

            let started = Instant::now();
            let extraction = match self.commit_chunk(chunk, &state, &generation).await {
                Ok(extraction) => extraction,
                Err(e) => {
                    error!(index, total, chunk_id = %chunk.chunk_id, error = %e, "Chunk failed, stopping run");
                    break;
                }
            };

            state.absorb(&extraction);
            result.processed_chunks += 1;

            info!(
                index,
                total,
                chunk_id = %chunk.chunk_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Committed chunk"
            );
        }

        info!(
            processed = result.processed_chunks,
            skipped = result.skipped_chunks,
            elapsed_ms = run_started.elapsed().as_millis() as u64,
            "Run finished"
        );
        Ok(result)
    }

    /// Extract and save `chunk`, then record it as processed.
    async fn commit_chunk(
        &mut self,
        chunk: &Chunk,
        state: &NarrativeState,
        generation: &GenerationOptions,
    ) -> Result<ExtractionResult, ChunkError> {
        let extraction = self.process_chunk(chunk, state, generation).await?;
        self.progress
            .mark(&chunk.chunk_id)
            .await
            .map_err(ChunkError::Progress)?;
        Ok(extraction)
    }

    async fn process_chunk(
        &self,
        chunk: &Chunk,
        state: &NarrativeState,
        generation: &GenerationOptions,
    ) -> Result<ExtractionResult, ChunkError> {
        let candidates = self.retriever
            .fetch_candidates(&chunk.text, self.config.context_limit)
            .await
            .map_err(ChunkError::Context)?;
        let context_text = render_context(&candidates);

        let input = ExtractionInput {
            chunk_id: &chunk.chunk_id,
            chunk_index: chunk.sequence_index,
            chunk_text: &chunk.text,
            previous_summary: &state.previous_summary,
            context_text: &context_text,
            known_registry: &state.known_characters,
            active_characters: &state.active_characters,
        };

        let extraction = self.extractor.extract(&input, generation).await?;
        self.writer.save(&extraction).await?;
        Ok(extraction)
    }

    /// Best effort: a failed wipe is logged and the run goes on.
    async fn reset(&mut self) {
        match self.store.clear().await {
            Ok(()) => info!("Cleared graph store"),
            Err(e) => warn!(error = %e, "Failed to clear graph store, continuing"),
        }
        if let Err(e) = self.progress.reset().await {
            warn!(error = %e, "Failed to reset progress, continuing");
        }
    }

    fn generation_options(&self, options: &RunOptions) -> GenerationOptions {
        GenerationOptions {
            model: options
                .model
                .clone()
                .unwrap_or_else(|| self.config.generation.model.clone()),
            temperature: options.temperature.unwrap_or(self.config.generation.temperature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{MemoryLedger, ProgressLedger};
    use async_trait::async_trait;
    use index::MemoryGraphStore;
    use std::sync::Mutex;

    type Script = Box<dyn Fn(usize) -> anyhow::Result<String> + Send + Sync>;

    /// Answers the n-th call (0-based) from a script and records every prompt.
    struct ScriptedGenerator {
        script: Script,
        calls: Mutex<Vec<(String, GenerationOptions)>>,
    }

    impl ScriptedGenerator {
        fn new(script: impl Fn(usize) -> anyhow::Result<String> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                script: Box::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn empty_objects() -> Arc<Self> {
            Self::new(|_| Ok("{}".to_string()))
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn prompt(&self, n: usize) -> String {
            self.calls.lock().unwrap()[n].0.clone()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, _system: &str, prompt: &str, options: &GenerationOptions) -> anyhow::Result<String> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((prompt.to_string(), options.clone()));
                calls.len() - 1
            };
            (self.script)(n)
        }
    }

    /// One short paragraph per chunk under the test target size.
    fn novel(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| format!("第{}段落内容", i))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            chunker: ChunkerConfig {
                target_size: 10,
                overlap_size: 0,
            },
            ..PipelineConfig::default()
        }
    }

    async fn orchestrator(
        store: Arc<MemoryGraphStore>,
        ledger: Arc<MemoryLedger>,
        generator: Arc<ScriptedGenerator>,
    ) -> Orchestrator {
        let progress = ProgressTracker::load(ledger).await.unwrap();
        Orchestrator::new(config(), store, generator, progress)
    }

    #[tokio::test]
    async fn test_second_run_skips_everything() {
        let store = Arc::new(MemoryGraphStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let text = novel(3);

        let first_gen = ScriptedGenerator::empty_objects();
        let mut first = orchestrator(store.clone(), ledger.clone(), first_gen.clone()).await;
        let result = first.run_text(&text, &RunOptions::default()).await.unwrap();
        assert_eq!(result, RunResult { processed_chunks: 3, skipped_chunks: 0 });
        assert_eq!(first_gen.call_count(), 3);

        let second_gen = ScriptedGenerator::empty_objects();
        let mut second = orchestrator(store, ledger, second_gen.clone()).await;
        let result = second.run_text(&text, &RunOptions::default()).await.unwrap();
        assert_eq!(result, RunResult { processed_chunks: 0, skipped_chunks: 3 });
        assert_eq!(second_gen.call_count(), 0);
    }

    #[tokio::test]
    async fn test_reset_reprocesses_all_chunks() {
        let store = Arc::new(MemoryGraphStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let text = novel(10);

        let mut orch = orchestrator(store.clone(), ledger.clone(), ScriptedGenerator::empty_objects()).await;
        orch.run_text(&text, &RunOptions::default()).await.unwrap();

        let reset = RunOptions {
            reset: true,
            ..RunOptions::default()
        };
        let result = orch.run_text(&text, &reset).await.unwrap();
        assert_eq!(result, RunResult { processed_chunks: 10, skipped_chunks: 0 });
        assert_eq!(ledger.list().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_reset_from_config() {
        let store = Arc::new(MemoryGraphStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let text = novel(2);

        let progress = ProgressTracker::load(ledger.clone()).await.unwrap();
        let mut orch = Orchestrator::new(
            PipelineConfig {
                reset_before_run: true,
                ..config()
            },
            store,
            ScriptedGenerator::empty_objects(),
            progress,
        );

        orch.run_text(&text, &RunOptions::default()).await.unwrap();
        let result = orch.run_text(&text, &RunOptions::default()).await.unwrap();
        assert_eq!(result.processed_chunks, 2);
    }

    #[tokio::test]
    async fn test_failure_stops_the_run() {
        let store = Arc::new(MemoryGraphStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let text = novel(5);

        // The third chunk's extraction fails
        let failing = ScriptedGenerator::new(|n| {
            if n == 2 {
                anyhow::bail!("model crashed")
            }
            Ok("{}".to_string())
        });
        let mut orch = orchestrator(store.clone(), ledger.clone(), failing.clone()).await;
        let result = orch.run_text(&text, &RunOptions::default()).await.unwrap();

        assert_eq!(result, RunResult { processed_chunks: 2, skipped_chunks: 0 });
        assert_eq!(failing.call_count(), 3);
        assert_eq!(ledger.list().await.unwrap().len(), 2);

        let healthy = ScriptedGenerator::empty_objects();
        let mut resumed = orchestrator(store, ledger, healthy.clone()).await;
        let result = resumed.run_text(&text, &RunOptions::default()).await.unwrap();
        assert_eq!(result, RunResult { processed_chunks: 3, skipped_chunks: 2 });
    }

    #[tokio::test]
    async fn test_malformed_output_stops_the_run() {
        let store = Arc::new(MemoryGraphStore::new());
        let ledger = Arc::new(MemoryLedger::new());

        let generator = ScriptedGenerator::new(|_| Ok("I cannot answer that.".to_string()));
        let mut orch = orchestrator(store, ledger.clone(), generator.clone()).await;
        let result = orch.run_text(&novel(3), &RunOptions::default()).await.unwrap();

        assert_eq!(result, RunResult::default());
        assert_eq!(generator.call_count(), 1);
        assert!(ledger.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_graph_write_failure_leaves_chunk_unmarked() {
        let store = Arc::new(MemoryGraphStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        store.fail_writes(true);

        let generator = ScriptedGenerator::new(|_| Ok(r#"{"entities": [{"name": "林玉龙"}]}"#.to_string()));
        let mut orch = orchestrator(store, ledger.clone(), generator).await;
        let result = orch.run_text(&novel(2), &RunOptions::default()).await.unwrap();

        assert_eq!(result.processed_chunks, 0);
        assert!(ledger.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_progress_failure_stops_the_run_with_counts() {
        let store = Arc::new(MemoryGraphStore::new());
        let ledger = Arc::new(MemoryLedger::new());

        // The ledger starts rejecting writes while the second chunk is extracted
        let flaky = ledger.clone();
        let generator = ScriptedGenerator::new(move |n| {
            if n == 1 {
                flaky.fail_writes(true);
            }
            Ok("{}".to_string())
        });
        let mut orch = orchestrator(store, ledger.clone(), generator.clone()).await;

        let result = orch.run_text(&novel(3), &RunOptions::default()).await.unwrap();
        assert_eq!(result, RunResult { processed_chunks: 1, skipped_chunks: 0 });
        assert_eq!(generator.call_count(), 2);
        assert_eq!(ledger.list().await.unwrap().len(), 1);
        assert!(orch.progress().is_processed(&Chunk::new("第0段落内容".to_string(), 0).chunk_id));
        assert!(!orch.progress().is_processed(&Chunk::new("第1段落内容".to_string(), 1).chunk_id));
    }

    #[tokio::test]
    async fn test_summary_and_characters_carry_forward() {
        let store = Arc::new(MemoryGraphStore::new());
        let ledger = Arc::new(MemoryLedger::new());

        let generator = ScriptedGenerator::new(|n| {
            Ok(match n {
                0 => r#"{
                    "chunk_summary": {"content": "相遇", "main_characters": ["袁冠南"]},
                    "entities": [{"name": "萧中慧", "subtype": "MainCharacter"}],
                    "next_summary": "袁冠南与萧中慧相遇",
                    "active_characters": ["袁冠南", "萧中慧"]
                }"#
                .to_string(),
                // Empty summary and cast keep the previous ones
                _ => r#"{"next_summary": "", "active_characters": []}"#.to_string(),
            })
        });
        let mut orch = orchestrator(store, ledger, generator.clone()).await;
        orch.run_text(&novel(3), &RunOptions::default()).await.unwrap();

        let first = generator.prompt(0);
        assert!(first.contains("Previous story summary: (none)"));

        let third = generator.prompt(2);
        assert!(third.contains("Previous story summary: 袁冠南与萧中慧相遇"));
        assert!(third.contains("Active characters: 袁冠南, 萧中慧"));
        assert!(third.contains("Known core characters: 袁冠南, 萧中慧"));
    }

    #[tokio::test]
    async fn test_known_entities_are_offered_as_context() {
        let store = Arc::new(MemoryGraphStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let text = "袁冠南走进客栈\n\n袁冠南，拔刀";

        let generator = ScriptedGenerator::new(|n| {
            Ok(match n {
                0 => r#"{"entities": [{"name": "袁冠南", "subtype": "MainCharacter",
                                       "aliases": ["袁相公"], "description": "书生"}]}"#
                    .to_string(),
                _ => "{}".to_string(),
            })
        });
        let mut orch = orchestrator(store, ledger, generator.clone()).await;
        orch.run_text(text, &RunOptions::default()).await.unwrap();

        assert!(generator.prompt(1).contains("袁冠南 [MainCharacter] (aliases: 袁相公) - 书生"));
    }

    #[tokio::test]
    async fn test_overrides_reach_the_generator() {
        let generator = ScriptedGenerator::empty_objects();
        let mut orch = orchestrator(
            Arc::new(MemoryGraphStore::new()),
            Arc::new(MemoryLedger::new()),
            generator.clone(),
        )
        .await;

        let options = RunOptions {
            reset: false,
            model: Some("qwen2.5:14b".to_string()),
            temperature: Some(0.7),
        };
        orch.run_text(&novel(1), &options).await.unwrap();

        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls[0].1.model, "qwen2.5:14b");
        assert_eq!(calls[0].1.temperature, 0.7);
    }

    #[tokio::test]
    async fn test_missing_source_is_ingestion_error() {
        let mut orch = orchestrator(
            Arc::new(MemoryGraphStore::new()),
            Arc::new(MemoryLedger::new()),
            ScriptedGenerator::empty_objects(),
        )
        .await;

        let err = orch
            .run(Path::new("/nonexistent/novel.txt"), &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Ingestion(_)));
    }
}
