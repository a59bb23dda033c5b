use serde::{Deserialize, Serialize};

use crate::vocab::{EntitySubtype, EntityType, HealthStatus, RelationshipType, TimeOfDay};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub subtype: EntitySubtype,
    pub aliases: Vec<String>,
    pub health_status: HealthStatus,
    pub affiliation: Vec<String>,
    pub description: Option<String>,
}

impl Entity {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: EntityType::default(),
            subtype: EntitySubtype::default(),
            aliases: Vec::new(),
            health_status: HealthStatus::default(),
            affiliation: Vec::new(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    pub description: Option<String>,
    /// 1 to 10.
    pub strength: Option<u8>,
    pub is_temporary: Option<bool>,
}

impl Relationship {
    pub fn new(source: impl Into<String>, target: impl Into<String>, relationship_type: RelationshipType) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relationship_type,
            description: None,
            strength: None,
            is_temporary: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotEvent {
    pub order_id: i64,
    pub chunk_id: String,
    pub summary: Option<String>,
    pub participants: Vec<String>,
    pub time_of_day: TimeOfDay,
    pub day_sequence: i64,
    pub is_flashback: bool,
    pub atmosphere: Option<String>,
    pub key_dialogue: Option<String>,
    pub timestamp_relative: Option<i64>,
}

impl PlotEvent {
    pub fn new(order_id: i64, chunk_id: impl Into<String>) -> Self {
        Self {
            order_id,
            chunk_id: chunk_id.into(),
            summary: None,
            participants: Vec::new(),
            time_of_day: TimeOfDay::default(),
            day_sequence: 1,
            is_flashback: false,
            atmosphere: None,
            key_dialogue: None,
            timestamp_relative: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub content: String,
    pub main_characters: Vec<String>,
}

/// Everything one extraction call produced for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub chunk_id: String,
    pub chunk_index: usize,
    pub chunk_summary: ChunkSummary,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub events: Vec<PlotEvent>,
    pub next_summary: String,
    pub active_characters: Vec<String>,
}
