use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{Graph, Query, Row};
use tracing::{debug, info};

use extract::{
    EntitySubtype, EntityType, HealthStatus, PlotEvent, Relationship, RelationshipType, TimeOfDay,
};

use crate::store::{GraphEntity, GraphStats, GraphStore, ParticipantLink, TimelineLink};

const ENTITY_RETURN: &str = r#"
    RETURN e.name AS name,
           coalesce(e.type, '') AS type,
           coalesce(e.subtype, '') AS subtype,
           coalesce(e.aliases, []) AS aliases,
           coalesce(e.health_status, '') AS health_status,
           coalesce(e.affiliation, []) AS affiliation,
           coalesce(e.description, '') AS description,
           coalesce(e.last_seen_chunk, -1) AS last_seen_chunk
"#;

const EVENT_RETURN: &str = r#"
    RETURN ev.order_id AS order_id,
           ev.chunk_id AS chunk_id,
           coalesce(ev.summary, '') AS summary,
           coalesce(ev.participants, []) AS participants,
           coalesce(ev.time_of_day, '') AS time_of_day,
           coalesce(ev.day_sequence, 1) AS day_sequence,
           coalesce(ev.is_flashback, false) AS is_flashback,
           coalesce(ev.atmosphere, '') AS atmosphere,
           coalesce(ev.key_dialogue, '') AS key_dialogue,
           coalesce(ev.timestamp_relative, 0) AS timestamp_relative,
           ev.timestamp_relative IS NOT NULL AS has_timestamp
    ORDER BY ev.order_id
"#;

pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .with_context(|| format!("Failed to connect to Neo4j at {}", uri))?;
        info!(uri, "Connected to Neo4j");
        Ok(Self::new(graph))
    }

    /// Run all queries in one transaction; roll back on the first failure.
    async fn run_in_txn(&self, queries: Vec<Query>) -> Result<()> {
        if queries.is_empty() {
            return Ok(());
        }

        let count = queries.len();
        let mut txn = self.graph.start_txn().await.context("Failed to open transaction")?;
        if let Err(e) = txn.run_queries(queries).await {
            if let Err(rollback) = txn.rollback().await {
                debug!(error = %rollback, "Rollback failed");
            }
            return Err(e).context("Transaction failed");
        }
        txn.commit().await.context("Failed to commit transaction")?;

        debug!(queries = count, "Committed transaction");
        Ok(())
    }

    async fn fetch_rows(&self, query: Query) -> Result<Vec<Row>> {
        let mut stream = self.graph.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn count(&self, cypher: &str) -> Result<usize> {
        let rows = self.fetch_rows(Query::new(cypher.to_string())).await?;
        Ok(rows
            .first()
            .map(|row| row.get::<i64>("count").unwrap_or(0) as usize)
            .unwrap_or(0))
    }
}

/// Stored empty strings stand for "never set".
fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn entity_from_row(row: &Row) -> GraphEntity {
    let label = |key: &str| non_empty(row.get::<String>(key).unwrap_or_default());
    let last_seen: i64 = row.get("last_seen_chunk").unwrap_or(-1);

    GraphEntity {
        name: row.get("name").unwrap_or_default(),
        entity_type: label("type").map(|s| EntityType::from_label_or_default(&s)),
        subtype: label("subtype").map(|s| EntitySubtype::from_label_or_default(&s)),
        aliases: row.get("aliases").unwrap_or_default(),
        health_status: label("health_status").map(|s| HealthStatus::from_label_or_default(&s)),
        affiliation: row.get("affiliation").unwrap_or_default(),
        description: label("description"),
        last_seen_chunk: (last_seen >= 0).then_some(last_seen),
    }
}

fn relationship_from_row(row: &Row) -> Relationship {
    let strength: i64 = row.get("strength").unwrap_or(-1);
    let is_temporary: String = row.get("is_temporary").unwrap_or_default();

    Relationship {
        source: row.get("source").unwrap_or_default(),
        target: row.get("target").unwrap_or_default(),
        relationship_type: RelationshipType::from_label_or_default(
            &row.get::<String>("type").unwrap_or_default(),
        ),
        description: non_empty(row.get("description").unwrap_or_default()),
        strength: u8::try_from(strength).ok().filter(|s| (1..=10).contains(s)),
        is_temporary: is_temporary.parse().ok(),
    }
}

fn event_from_row(row: &Row) -> PlotEvent {
    let has_timestamp: bool = row.get("has_timestamp").unwrap_or(false);

    PlotEvent {
        order_id: row.get("order_id").unwrap_or_default(),
        chunk_id: row.get("chunk_id").unwrap_or_default(),
        summary: non_empty(row.get("summary").unwrap_or_default()),
        participants: row.get("participants").unwrap_or_default(),
        time_of_day: TimeOfDay::from_label_or_default(&row.get::<String>("time_of_day").unwrap_or_default()),
        day_sequence: row.get("day_sequence").unwrap_or(1),
        is_flashback: row.get("is_flashback").unwrap_or(false),
        atmosphere: non_empty(row.get("atmosphere").unwrap_or_default()),
        key_dialogue: non_empty(row.get("key_dialogue").unwrap_or_default()),
        timestamp_relative: has_timestamp.then(|| row.get("timestamp_relative").unwrap_or_default()),
    }
}

fn entity_query(entity: &GraphEntity) -> Query {
    Query::new(
        r#"
        MERGE (e:Entity {name: $name})
        SET e.type = $type,
            e.subtype = $subtype,
            e.aliases = $aliases,
            e.health_status = $health_status,
            e.affiliation = $affiliation,
            e.description = $description,
            e.last_seen_chunk = $last_seen_chunk
        "#
        .to_string(),
    )
    .param("name", entity.name.clone())
    .param("type", entity.entity_type.map(|t| t.as_str()))
    .param("subtype", entity.subtype.map(|t| t.as_str()))
    .param("aliases", entity.aliases.clone())
    .param("health_status", entity.health_status.map(|t| t.as_str()))
    .param("affiliation", entity.affiliation.clone())
    .param("description", entity.description.clone())
    .param("last_seen_chunk", entity.last_seen_chunk)
}

/// The edge type comes from a closed vocabulary, so it is safe to splice in.
fn relationship_query(rel: &Relationship) -> Query {
    let cypher = format!(
        r#"
        MATCH (a:Entity {{name: $source}})
        MATCH (b:Entity {{name: $target}})
        MERGE (a)-[r:{}]->(b)
        SET r.description = $description,
            r.strength = $strength,
            r.is_temporary = $is_temporary
        "#,
        rel.relationship_type.as_str()
    );

    Query::new(cypher)
        .param("source", rel.source.clone())
        .param("target", rel.target.clone())
        .param("description", rel.description.clone())
        .param("strength", rel.strength.map(i64::from))
        .param("is_temporary", rel.is_temporary)
}

fn event_query(event: &PlotEvent) -> Query {
    Query::new(
        r#"
        MERGE (ev:PlotEvent {order_id: $order_id, chunk_id: $chunk_id})
        SET ev.summary = $summary,
            ev.participants = $participants,
            ev.time_of_day = $time_of_day,
            ev.day_sequence = $day_sequence,
            ev.is_flashback = $is_flashback,
            ev.atmosphere = $atmosphere,
            ev.key_dialogue = $key_dialogue,
            ev.timestamp_relative = $timestamp_relative
        "#
        .to_string(),
    )
    .param("order_id", event.order_id)
    .param("chunk_id", event.chunk_id.clone())
    .param("summary", event.summary.clone())
    .param("participants", event.participants.clone())
    .param("time_of_day", event.time_of_day.as_str())
    .param("day_sequence", event.day_sequence)
    .param("is_flashback", event.is_flashback)
    .param("atmosphere", event.atmosphere.clone())
    .param("key_dialogue", event.key_dialogue.clone())
    .param("timestamp_relative", event.timestamp_relative)
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn init_schema(&self) -> Result<()> {
        let statements = [
            "CREATE INDEX entity_name_index IF NOT EXISTS FOR (e:Entity) ON (e.name)",
            "CREATE INDEX plot_event_chunk_index IF NOT EXISTS FOR (ev:PlotEvent) ON (ev.chunk_id)",
            "CREATE FULLTEXT INDEX entity_text_index IF NOT EXISTS FOR (e:Entity) ON EACH [e.name, e.aliases, e.description]",
        ];

        for statement in statements {
            self.graph
                .run(Query::new(statement.to_string()))
                .await
                .with_context(|| format!("Failed to create index: {}", statement))?;
        }

        info!("Neo4j schema ready");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.graph
            .run(Query::new("MATCH (n) DETACH DELETE n".to_string()))
            .await
            .context("Failed to clear graph")?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.fetch_rows(Query::new("RETURN 1 AS ok".to_string()))
            .await
            .context("Neo4j is not reachable")?;
        Ok(())
    }

    async fn get_entities(&self, names: &[String]) -> Result<Vec<GraphEntity>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::new(format!("MATCH (e:Entity) WHERE e.name IN $names {}", ENTITY_RETURN))
            .param("names", names.to_vec());

        let rows = self.fetch_rows(query).await.context("Failed to read entities")?;
        Ok(rows.iter().map(entity_from_row).collect())
    }

    async fn find_entities_by_name_or_alias(&self, tokens: &[String]) -> Result<Vec<GraphEntity>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::new(format!(
            "MATCH (e:Entity) \
             WHERE e.name IN $tokens OR any(a IN coalesce(e.aliases, []) WHERE a IN $tokens) {}",
            ENTITY_RETURN
        ))
        .param("tokens", tokens.to_vec());

        let rows = self.fetch_rows(query).await.context("Failed to look up entities")?;
        Ok(rows.iter().map(entity_from_row).collect())
    }

    async fn upsert_entities(&self, entities: &[GraphEntity]) -> Result<()> {
        self.run_in_txn(entities.iter().map(entity_query).collect()).await
    }

    async fn get_relationships(&self, names: &[String]) -> Result<Vec<Relationship>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::new(
            r#"
            MATCH (a:Entity)-[r]->(b:Entity)
            WHERE a.name IN $names AND b.name IN $names
            RETURN a.name AS source,
                   b.name AS target,
                   type(r) AS type,
                   coalesce(r.description, '') AS description,
                   coalesce(r.strength, -1) AS strength,
                   coalesce(toString(r.is_temporary), '') AS is_temporary
            "#
            .to_string(),
        )
        .param("names", names.to_vec());

        let rows = self.fetch_rows(query).await.context("Failed to read relationships")?;
        Ok(rows.iter().map(relationship_from_row).collect())
    }

    async fn upsert_relationships(&self, relationships: &[Relationship]) -> Result<()> {
        self.run_in_txn(relationships.iter().map(relationship_query).collect()).await
    }

    async fn get_events(&self, chunk_id: &str) -> Result<Vec<PlotEvent>> {
        let query = Query::new(format!("MATCH (ev:PlotEvent {{chunk_id: $chunk_id}}) {}", EVENT_RETURN))
            .param("chunk_id", chunk_id.to_string());

        let rows = self.fetch_rows(query).await.context("Failed to read events")?;
        Ok(rows.iter().map(event_from_row).collect())
    }

    async fn upsert_events(&self, events: &[PlotEvent]) -> Result<()> {
        self.run_in_txn(events.iter().map(event_query).collect()).await
    }

    async fn link_participants(&self, links: &[ParticipantLink]) -> Result<()> {
        let queries = links
            .iter()
            .map(|link| {
                Query::new(
                    r#"
                    MATCH (e:Entity {name: $name})
                    MATCH (ev:PlotEvent {chunk_id: $chunk_id, order_id: $order_id})
                    MERGE (e)-[:PARTICIPATED_IN]->(ev)
                    "#
                    .to_string(),
                )
                .param("name", link.entity_name.clone())
                .param("chunk_id", link.chunk_id.clone())
                .param("order_id", link.order_id)
            })
            .collect();

        self.run_in_txn(queries).await
    }

    async fn link_timeline(&self, links: &[TimelineLink]) -> Result<()> {
        let queries = links
            .iter()
            .map(|link| {
                Query::new(
                    r#"
                    MATCH (a:PlotEvent {chunk_id: $chunk_id, order_id: $from_order_id})
                    MATCH (b:PlotEvent {chunk_id: $chunk_id, order_id: $to_order_id})
                    MERGE (a)-[:NEXT_EVENT]->(b)
                    "#
                    .to_string(),
                )
                .param("chunk_id", link.chunk_id.clone())
                .param("from_order_id", link.from_order_id)
                .param("to_order_id", link.to_order_id)
            })
            .collect();

        self.run_in_txn(queries).await
    }

    async fn stats(&self) -> Result<GraphStats> {
        let entity_count = self.count("MATCH (e:Entity) RETURN count(e) AS count").await?;
        let relation_count = self
            .count("MATCH (:Entity)-[r]->(:Entity) RETURN count(r) AS count")
            .await?;
        let event_count = self.count("MATCH (ev:PlotEvent) RETURN count(ev) AS count").await?;

        Ok(GraphStats {
            entity_count,
            relation_count,
            event_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(String::new()), None);
        assert_eq!(non_empty("剑客".to_string()).as_deref(), Some("剑客"));
    }
}
