use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::Mutex;

use extract::{PlotEvent, Relationship, RelationshipType};

use crate::store::{GraphEntity, GraphStats, GraphStore, ParticipantLink, TimelineLink};

#[derive(Debug, Default)]
struct MemoryGraph {
    entities: BTreeMap<String, GraphEntity>,
    relationships: BTreeMap<(String, String, RelationshipType), Relationship>,
    events: BTreeMap<(String, i64), PlotEvent>,
    participants: BTreeSet<ParticipantLink>,
    timeline: BTreeSet<TimelineLink>,
}

/// Graph store held in process memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    graph: Mutex<MemoryGraph>,
    fail_writes: AtomicBool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until switched off again.
    pub fn fail_writes(&self, enabled: bool) {
        self.fail_writes.store(enabled, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory graph store is rejecting writes");
        }
        Ok(())
    }

    pub async fn entity(&self, name: &str) -> Option<GraphEntity> {
        self.graph.lock().await.entities.get(name).cloned()
    }

    pub async fn relationship(
        &self,
        source: &str,
        target: &str,
        relationship_type: RelationshipType,
    ) -> Option<Relationship> {
        let key = (source.to_string(), target.to_string(), relationship_type);
        self.graph.lock().await.relationships.get(&key).cloned()
    }

    pub async fn participant_links(&self) -> Vec<ParticipantLink> {
        self.graph.lock().await.participants.iter().cloned().collect()
    }

    pub async fn timeline_links(&self) -> Vec<TimelineLink> {
        self.graph.lock().await.timeline.iter().cloned().collect()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.check_writable()?;
        *self.graph.lock().await = MemoryGraph::default();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get_entities(&self, names: &[String]) -> Result<Vec<GraphEntity>> {
        let graph = self.graph.lock().await;
        Ok(names.iter().filter_map(|n| graph.entities.get(n).cloned()).collect())
    }

    async fn find_entities_by_name_or_alias(&self, tokens: &[String]) -> Result<Vec<GraphEntity>> {
        let graph = self.graph.lock().await;
        Ok(graph
            .entities
            .values()
            .filter(|e| tokens.iter().any(|t| e.is_known_as(t)))
            .cloned()
            .collect())
    }

    async fn upsert_entities(&self, entities: &[GraphEntity]) -> Result<()> {
        self.check_writable()?;
        let mut graph = self.graph.lock().await;
        for entity in entities {
            graph.entities.insert(entity.name.clone(), entity.clone());
        }
        Ok(())
    }

    async fn get_relationships(&self, names: &[String]) -> Result<Vec<Relationship>> {
        let graph = self.graph.lock().await;
        Ok(graph
            .relationships
            .values()
            .filter(|r| names.contains(&r.source) && names.contains(&r.target))
            .cloned()
            .collect())
    }

    async fn upsert_relationships(&self, relationships: &[Relationship]) -> Result<()> {
        self.check_writable()?;
        let mut graph = self.graph.lock().await;
        for rel in relationships {
            if !graph.entities.contains_key(&rel.source) || !graph.entities.contains_key(&rel.target) {
                continue;
            }
            let key = (rel.source.clone(), rel.target.clone(), rel.relationship_type);
            graph.relationships.insert(key, rel.clone());
        }
        Ok(())
    }

    async fn get_events(&self, chunk_id: &str) -> Result<Vec<PlotEvent>> {
        let graph = self.graph.lock().await;
        let mut events: Vec<PlotEvent> = graph
            .events
            .values()
            .filter(|e| e.chunk_id == chunk_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.order_id);
        Ok(events)
    }

    async fn upsert_events(&self, events: &[PlotEvent]) -> Result<()> {
        self.check_writable()?;
        let mut graph = self.graph.lock().await;
        for event in events {
            graph.events.insert((event.chunk_id.clone(), event.order_id), event.clone());
        }
        Ok(())
    }

    async fn link_participants(&self, links: &[ParticipantLink]) -> Result<()> {
        self.check_writable()?;
        let mut graph = self.graph.lock().await;
        for link in links {
            let event_key = (link.chunk_id.clone(), link.order_id);
            if graph.entities.contains_key(&link.entity_name) && graph.events.contains_key(&event_key) {
                graph.participants.insert(link.clone());
            }
        }
        Ok(())
    }

    async fn link_timeline(&self, links: &[TimelineLink]) -> Result<()> {
        self.check_writable()?;
        let mut graph = self.graph.lock().await;
        for link in links {
            let from = (link.chunk_id.clone(), link.from_order_id);
            let to = (link.chunk_id.clone(), link.to_order_id);
            if graph.events.contains_key(&from) && graph.events.contains_key(&to) {
                graph.timeline.insert(link.clone());
            }
        }
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats> {
        let graph = self.graph.lock().await;
        Ok(GraphStats {
            entity_count: graph.entities.len(),
            relation_count: graph.relationships.len(),
            event_count: graph.events.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_entity(name: &str, aliases: &[&str]) -> GraphEntity {
        GraphEntity {
            name: name.to_string(),
            entity_type: None,
            subtype: None,
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            health_status: None,
            affiliation: Vec::new(),
            description: None,
            last_seen_chunk: None,
        }
    }

    #[tokio::test]
    async fn test_lookup_by_alias() {
        let store = MemoryGraphStore::new();
        store
            .upsert_entities(&[graph_entity("袁冠南", &["袁相公"]), graph_entity("萧中慧", &[])])
            .await
            .unwrap();

        let found = store
            .find_entities_by_name_or_alias(&["袁相公".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "袁冠南");
    }

    #[tokio::test]
    async fn test_clear_wipes_everything() {
        let store = MemoryGraphStore::new();
        store.upsert_entities(&[graph_entity("林玉龙", &[])]).await.unwrap();
        store.upsert_events(&[PlotEvent::new(1, "c")]).await.unwrap();

        store.clear().await.unwrap();
        assert_eq!(store.stats().await.unwrap(), GraphStats::default());
    }

    #[tokio::test]
    async fn test_links_to_missing_nodes_are_skipped() {
        let store = MemoryGraphStore::new();
        store.upsert_events(&[PlotEvent::new(1, "c")]).await.unwrap();

        store
            .link_participants(&[ParticipantLink {
                entity_name: "无名氏".to_string(),
                chunk_id: "c".to_string(),
                order_id: 1,
            }])
            .await
            .unwrap();
        store
            .link_timeline(&[TimelineLink {
                chunk_id: "c".to_string(),
                from_order_id: 1,
                to_order_id: 2,
            }])
            .await
            .unwrap();

        assert!(store.participant_links().await.is_empty());
        assert!(store.timeline_links().await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = MemoryGraphStore::new();
        store.fail_writes(true);
        assert!(store.upsert_entities(&[graph_entity("a", &[])]).await.is_err());

        store.fail_writes(false);
        assert!(store.upsert_entities(&[graph_entity("a", &[])]).await.is_ok());
    }
}
