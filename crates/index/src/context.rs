use std::cmp::Reverse;
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use extract::EntitySubtype;

use crate::store::{GraphEntity, GraphStore};

/// Runs of 2 to 6 CJK ideographs, the shape of a character or place name.
static NAME_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x{4E00}-\x{9FFF}]{2,6}").expect("valid name token regex"));

/// Candidate mentions in first-appearance order, without repeats.
pub fn extract_name_tokens(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for m in NAME_TOKEN.find_iter(text) {
        let token = m.as_str();
        if !tokens.iter().any(|t| t == token) {
            tokens.push(token.to_string());
        }
    }
    tokens
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextCandidate {
    pub name: String,
    pub aliases: Vec<String>,
    pub description: Option<String>,
    pub subtype: EntitySubtype,
    pub last_seen_chunk: Option<i64>,
}

impl ContextCandidate {
    pub fn is_main_character(&self) -> bool {
        self.subtype == EntitySubtype::MainCharacter
    }
}

impl From<GraphEntity> for ContextCandidate {
    fn from(entity: GraphEntity) -> Self {
        Self {
            name: entity.name,
            aliases: entity.aliases,
            description: entity.description,
            subtype: entity.subtype.unwrap_or_default(),
            last_seen_chunk: entity.last_seen_chunk,
        }
    }
}

/// Looks up already-known entities mentioned in a chunk so the prompt can
/// reuse their canonical names.
#[derive(Clone)]
pub struct ContextRetriever {
    store: Arc<dyn GraphStore>,
}

impl ContextRetriever {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Main characters first, then most recently seen. An empty result just
    /// means the chunk mentions nobody the graph knows yet.
    pub async fn fetch_candidates(&self, chunk_text: &str, limit: usize) -> Result<Vec<ContextCandidate>> {
        let tokens = extract_name_tokens(chunk_text);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<ContextCandidate> = self.store
            .find_entities_by_name_or_alias(&tokens)
            .await?
            .into_iter()
            .map(ContextCandidate::from)
            .collect();

        candidates.sort_by(|a, b| {
            let key = |c: &ContextCandidate| (!c.is_main_character(), Reverse(c.last_seen_chunk.unwrap_or(-1)));
            key(a).cmp(&key(b)).then_with(|| a.name.cmp(&b.name))
        });
        candidates.truncate(limit);

        debug!(tokens = tokens.len(), candidates = candidates.len(), "Fetched context candidates");
        Ok(candidates)
    }
}

/// One line per entity: `name [subtype] (aliases: a, b) - description`.
pub fn render_context(candidates: &[ContextCandidate]) -> String {
    candidates
        .iter()
        .map(|c| {
            let mut line = format!("{} [{}]", c.name, c.subtype);
            if !c.aliases.is_empty() {
                line.push_str(&format!(" (aliases: {})", c.aliases.join(", ")));
            }
            if let Some(description) = &c.description {
                line.push_str(" - ");
                line.push_str(description);
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
