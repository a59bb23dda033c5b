//! Conflict resolution between stored graph records and fresh extractions.

use extract::{Entity, PlotEvent, Relationship, TimeOfDay};

use crate::store::GraphEntity;

/// Match-or-create an entity.
///
/// Aliases and affiliation only ever grow. Description and type are filled
/// once. Subtype and health status follow the latest mention unless that
/// mention says `Unknown`.
pub fn merge_entity(existing: Option<GraphEntity>, incoming: &Entity, chunk_index: i64) -> GraphEntity {
    let Some(mut entity) = existing else {
        let mut aliases = Vec::new();
        union_into(&mut aliases, &incoming.aliases, Some(&incoming.name));
        let mut affiliation = Vec::new();
        union_into(&mut affiliation, &incoming.affiliation, None);

        return GraphEntity {
            name: incoming.name.clone(),
            entity_type: Some(incoming.entity_type),
            subtype: Some(incoming.subtype),
            aliases,
            health_status: Some(incoming.health_status),
            affiliation,
            description: incoming.description.clone(),
            last_seen_chunk: Some(chunk_index),
        };
    };

    union_into(&mut entity.aliases, &incoming.aliases, Some(&incoming.name));
    union_into(&mut entity.affiliation, &incoming.affiliation, None);

    if entity.description.is_none() {
        entity.description = incoming.description.clone();
    }
    if entity.entity_type.is_none() {
        entity.entity_type = Some(incoming.entity_type);
    }

    if !incoming.subtype.is_unknown() || entity.subtype.is_none() {
        entity.subtype = Some(incoming.subtype);
    }
    if !incoming.health_status.is_unknown() || entity.health_status.is_none() {
        entity.health_status = Some(incoming.health_status);
    }

    entity.last_seen_chunk = Some(entity.last_seen_chunk.map_or(chunk_index, |seen| seen.max(chunk_index)));
    entity
}

/// Match-or-create an edge keyed by `(source, target, type)`; on match only
/// fields that are still unset are filled.
pub fn merge_relationship(existing: Option<Relationship>, incoming: &Relationship) -> Relationship {
    let Some(mut rel) = existing else {
        return incoming.clone();
    };

    if rel.description.is_none() {
        rel.description = incoming.description.clone();
    }
    rel.strength = rel.strength.or(incoming.strength);
    rel.is_temporary = rel.is_temporary.or(incoming.is_temporary);
    rel
}

/// Match-or-create an event keyed by `(order_id, chunk_id)`; on match only
/// fields that are still unset are filled.
pub fn merge_event(existing: Option<PlotEvent>, incoming: &PlotEvent) -> PlotEvent {
    let Some(mut event) = existing else {
        return incoming.clone();
    };

    if event.summary.is_none() {
        event.summary = incoming.summary.clone();
    }
    if event.participants.is_empty() {
        event.participants = incoming.participants.clone();
    }
    if event.time_of_day == TimeOfDay::Unknown {
        event.time_of_day = incoming.time_of_day;
    }
    if event.atmosphere.is_none() {
        event.atmosphere = incoming.atmosphere.clone();
    }
    if event.key_dialogue.is_none() {
        event.key_dialogue = incoming.key_dialogue.clone();
    }
    event.timestamp_relative = event.timestamp_relative.or(incoming.timestamp_relative);
    event
}

/// Append items not already present, preserving first-seen order.
fn union_into(target: &mut Vec<String>, items: &[String], exclude: Option<&str>) {
    for item in items {
        if Some(item.as_str()) == exclude || target.contains(item) {
            continue;
        }
        target.push(item.clone());
    }
}
