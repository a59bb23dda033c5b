use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use extract::{ExtractionResult, PlotEvent, Relationship, RelationshipType};

use crate::merge::{merge_entity, merge_event, merge_relationship};
use crate::store::{GraphEntity, GraphStore, ParticipantLink, TimelineLink};

/// The batch that was being written when the store failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Entities,
    Relationships,
    Events,
    Participants,
    Timeline,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteStage::Entities => "entities",
            WriteStage::Relationships => "relationships",
            WriteStage::Events => "events",
            WriteStage::Participants => "participant links",
            WriteStage::Timeline => "timeline links",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("graph write failed while writing {stage}: {source:#}")]
pub struct GraphWriteError {
    pub stage: WriteStage,
    #[source]
    pub source: anyhow::Error,
}

trait StageContext<T> {
    fn stage(self, stage: WriteStage) -> Result<T, GraphWriteError>;
}

impl<T> StageContext<T> for anyhow::Result<T> {
    fn stage(self, stage: WriteStage) -> Result<T, GraphWriteError> {
        self.map_err(|source| GraphWriteError { stage, source })
    }
}

type RelationshipKey = (String, String, RelationshipType);

fn relationship_key(rel: &Relationship) -> RelationshipKey {
    (rel.source.clone(), rel.target.clone(), rel.relationship_type)
}

/// Merges extraction results into the graph.
///
/// Each batch (entities, relationships, events, participant links, timeline
/// links) is a separate store transaction, written in that order.
#[derive(Clone)]
pub struct GraphWriter {
    store: Arc<dyn GraphStore>,
}

impl GraphWriter {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, result: &ExtractionResult) -> Result<(), GraphWriteError> {
        let chunk_index = result.chunk_index as i64;

        self.write_entities(result, chunk_index).await.stage(WriteStage::Entities)?;
        self.write_relationships(&result.relationships).await.stage(WriteStage::Relationships)?;
        self.write_events(&result.events).await.stage(WriteStage::Events)?;

        if let Some(first) = result.events.first() {
            let chunk_id = first.chunk_id.as_str();
            self.link_participants(chunk_id).await.stage(WriteStage::Participants)?;
            self.link_timeline(chunk_id).await.stage(WriteStage::Timeline)?;
        }

        info!(
            chunk_id = %result.chunk_id,
            entities = result.entities.len(),
            relationships = result.relationships.len(),
            events = result.events.len(),
            "Saved extraction to graph"
        );

        Ok(())
    }

    async fn write_entities(&self, result: &ExtractionResult, chunk_index: i64) -> anyhow::Result<()> {
        if result.entities.is_empty() {
            return Ok(());
        }

        let names: Vec<String> = unique(result.entities.iter().map(|e| e.name.clone()));
        let mut existing: HashMap<String, GraphEntity> = self.store
            .get_entities(&names)
            .await?
            .into_iter()
            .map(|e| (e.name.clone(), e))
            .collect();

        // Duplicate names within one batch fold into a single record
        let mut merged: Vec<GraphEntity> = Vec::with_capacity(names.len());
        let mut positions: HashMap<String, usize> = HashMap::new();

        for incoming in &result.entities {
            match positions.get(&incoming.name) {
                Some(&pos) => {
                    let current = merged[pos].clone();
                    merged[pos] = merge_entity(Some(current), incoming, chunk_index);
                }
                None => {
                    let stored = existing.remove(&incoming.name);
                    positions.insert(incoming.name.clone(), merged.len());
                    merged.push(merge_entity(stored, incoming, chunk_index));
                }
            }
        }

        self.store.upsert_entities(&merged).await
    }

    async fn write_relationships(&self, relationships: &[Relationship]) -> anyhow::Result<()> {
        if relationships.is_empty() {
            return Ok(());
        }

        let endpoints: Vec<String> = unique(
            relationships
                .iter()
                .flat_map(|r| [r.source.clone(), r.target.clone()]),
        );
        let present: HashSet<String> = self.store
            .get_entities(&endpoints)
            .await?
            .into_iter()
            .map(|e| e.name)
            .collect();

        let mut existing: HashMap<RelationshipKey, Relationship> = self.store
            .get_relationships(&endpoints)
            .await?
            .into_iter()
            .map(|r| (relationship_key(&r), r))
            .collect();

        let mut merged: Vec<Relationship> = Vec::new();
        let mut positions: HashMap<RelationshipKey, usize> = HashMap::new();

        for incoming in relationships {
            if !present.contains(&incoming.source) || !present.contains(&incoming.target) {
                debug!(
                    source = %incoming.source,
                    target = %incoming.target,
                    "Dropping relationship with unknown endpoint"
                );
                continue;
            }

            let key = relationship_key(incoming);
            match positions.get(&key) {
                Some(&pos) => {
                    let current = merged[pos].clone();
                    merged[pos] = merge_relationship(Some(current), incoming);
                }
                None => {
                    let stored = existing.remove(&key);
                    positions.insert(key, merged.len());
                    merged.push(merge_relationship(stored, incoming));
                }
            }
        }

        if merged.is_empty() {
            return Ok(());
        }
        self.store.upsert_relationships(&merged).await
    }

    async fn write_events(&self, events: &[PlotEvent]) -> anyhow::Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut existing: HashMap<(String, i64), PlotEvent> = HashMap::new();
        for chunk_id in unique(events.iter().map(|e| e.chunk_id.clone())) {
            for event in self.store.get_events(&chunk_id).await? {
                existing.insert((event.chunk_id.clone(), event.order_id), event);
            }
        }

        let mut merged: Vec<PlotEvent> = Vec::with_capacity(events.len());
        let mut positions: HashMap<(String, i64), usize> = HashMap::new();

        for incoming in events {
            let key = (incoming.chunk_id.clone(), incoming.order_id);
            match positions.get(&key) {
                Some(&pos) => {
                    let current = merged[pos].clone();
                    merged[pos] = merge_event(Some(current), incoming);
                }
                None => {
                    let stored = existing.remove(&key);
                    positions.insert(key, merged.len());
                    merged.push(merge_event(stored, incoming));
                }
            }
        }

        self.store.upsert_events(&merged).await
    }

    /// Link every stored event of the chunk to the entities its participants
    /// name, by exact name or alias.
    async fn link_participants(&self, chunk_id: &str) -> anyhow::Result<()> {
        let events = self.store.get_events(chunk_id).await?;

        let names: Vec<String> = unique(events.iter().flat_map(|e| e.participants.iter().cloned()));
        if names.is_empty() {
            return Ok(());
        }
        let entities = self.store.find_entities_by_name_or_alias(&names).await?;

        let mut links = BTreeSet::new();
        for event in &events {
            for participant in &event.participants {
                for entity in entities.iter().filter(|e| e.is_known_as(participant)) {
                    links.insert(ParticipantLink {
                        entity_name: entity.name.clone(),
                        chunk_id: chunk_id.to_string(),
                        order_id: event.order_id,
                    });
                }
            }
        }

        if links.is_empty() {
            return Ok(());
        }
        let links: Vec<ParticipantLink> = links.into_iter().collect();
        self.store.link_participants(&links).await
    }

    /// Chain the chunk's events in `order_id` order.
    async fn link_timeline(&self, chunk_id: &str) -> anyhow::Result<()> {
        let mut order_ids: Vec<i64> = self.store
            .get_events(chunk_id)
            .await?
            .iter()
            .map(|e| e.order_id)
            .collect();
        order_ids.sort_unstable();
        order_ids.dedup();

        let links: Vec<TimelineLink> = order_ids
            .windows(2)
            .map(|pair| TimelineLink {
                chunk_id: chunk_id.to_string(),
                from_order_id: pair[0],
                to_order_id: pair[1],
            })
            .collect();

        if links.is_empty() {
            return Ok(());
        }
        self.store.link_timeline(&links).await
    }
}

fn unique(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}
