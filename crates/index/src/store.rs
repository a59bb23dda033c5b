use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use extract::{EntitySubtype, EntityType, HealthStatus, PlotEvent, Relationship};

/// An entity node as stored in the graph.
///
/// Scalar fields are optional because the graph may hold nodes whose fields
/// were never set; the merge rules treat `None` as unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEntity {
    pub name: String,
    pub entity_type: Option<EntityType>,
    pub subtype: Option<EntitySubtype>,
    pub aliases: Vec<String>,
    pub health_status: Option<HealthStatus>,
    pub affiliation: Vec<String>,
    pub description: Option<String>,
    /// Highest chunk sequence index that mentioned this entity.
    pub last_seen_chunk: Option<i64>,
}

impl GraphEntity {
    pub fn is_known_as(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }
}

/// `(entity)-[:PARTICIPATED_IN]->(event)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantLink {
    pub entity_name: String,
    pub chunk_id: String,
    pub order_id: i64,
}

/// `(event)-[:NEXT_EVENT]->(event)` within one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimelineLink {
    pub chunk_id: String,
    pub from_order_id: i64,
    pub to_order_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relation_count: usize,
    pub event_count: usize,
}

/// Persistent graph the pipeline merges into.
///
/// Reads are plain lookups; every write method runs as one transaction.
/// Conflict resolution lives in the writer, so writes store records as given.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create indexes if they do not exist yet.
    async fn init_schema(&self) -> Result<()>;

    /// Remove every node and edge.
    async fn clear(&self) -> Result<()>;

    async fn ping(&self) -> Result<()>;

    /// Entities whose name is one of `names`.
    async fn get_entities(&self, names: &[String]) -> Result<Vec<GraphEntity>>;

    /// Entities whose name or any alias is one of `tokens`.
    async fn find_entities_by_name_or_alias(&self, tokens: &[String]) -> Result<Vec<GraphEntity>>;

    async fn upsert_entities(&self, entities: &[GraphEntity]) -> Result<()>;

    /// Edges whose two endpoints are both named in `names`.
    async fn get_relationships(&self, names: &[String]) -> Result<Vec<Relationship>>;

    /// Edges whose endpoints do not exist are skipped.
    async fn upsert_relationships(&self, relationships: &[Relationship]) -> Result<()>;

    /// Events of one chunk, ordered by `order_id`.
    async fn get_events(&self, chunk_id: &str) -> Result<Vec<PlotEvent>>;

    async fn upsert_events(&self, events: &[PlotEvent]) -> Result<()>;

    /// Idempotent; links to missing nodes are skipped.
    async fn link_participants(&self, links: &[ParticipantLink]) -> Result<()>;

    /// Idempotent; links to missing nodes are skipped.
    async fn link_timeline(&self, links: &[TimelineLink]) -> Result<()>;

    async fn stats(&self) -> Result<GraphStats>;
}
