//! Projection of untrusted model output into validated records.
//!
//! The raw response is first read into a `serde_json::Value` tree, then each
//! record is built field by field. Bad enum labels, wrong scalar types and
//! missing optional fields are repaired with defaults; only elements missing
//! their identity fields are dropped. Nothing in here fails except finding
//! no JSON object at all.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ExtractionError;
use crate::schema::{ChunkSummary, Entity, ExtractionResult, PlotEvent, Relationship};
use crate::vocab::{EntitySubtype, EntityType, HealthStatus, RelationshipType, TimeOfDay};

type Object = Map<String, Value>;

/// Parse a model response for one chunk.
pub fn parse_response(
    content: &str,
    chunk_id: &str,
    chunk_index: usize,
) -> Result<ExtractionResult, ExtractionError> {
    if content.trim().is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }

    let root = parse_object(content)?;

    let mut events = parse_events(array_field(&root, "events"), chunk_id);
    repair_day_sequence(&mut events);

    Ok(ExtractionResult {
        chunk_id: chunk_id.to_string(),
        chunk_index,
        chunk_summary: parse_chunk_summary(root.get("chunk_summary")),
        entities: parse_entities(array_field(&root, "entities")),
        relationships: parse_relationships(array_field(&root, "relationships")),
        events,
        next_summary: string_value(root.get("next_summary")).unwrap_or_default(),
        active_characters: string_list(root.get("active_characters")),
    })
}

/// Parse the whole content; failing that, retry once on the span between
/// the first `{` and the last `}`.
fn parse_object(content: &str) -> Result<Object, ExtractionError> {
    let first_error = match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => return Ok(map),
        Ok(other) => format!("top-level value is {}", value_kind(&other)),
        Err(e) => e.to_string(),
    };

    let trimmed = content.trim();
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                debug!("Recovered JSON object from surrounding text");
                return Ok(map);
            }
        }
    }

    Err(ExtractionError::malformed(first_error, content))
}

fn parse_chunk_summary(value: Option<&Value>) -> ChunkSummary {
    match value {
        Some(Value::Object(map)) => ChunkSummary {
            content: string_value(map.get("content")).unwrap_or_default(),
            main_characters: string_list(map.get("main_characters")),
        },
        other => ChunkSummary {
            content: string_value(other).unwrap_or_default(),
            main_characters: Vec::new(),
        },
    }
}

fn parse_entities(items: &[Value]) -> Vec<Entity> {
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|map| {
            let name = string_value(map.get("name"))?;

            Some(Entity {
                entity_type: vocab(map.get("type"), EntityType::from_label, "entity.type"),
                subtype: vocab(map.get("subtype"), EntitySubtype::from_label, "entity.subtype"),
                aliases: string_list(map.get("aliases")),
                health_status: vocab(
                    map.get("health_status"),
                    HealthStatus::from_label,
                    "entity.health_status",
                ),
                affiliation: string_list(map.get("affiliation")),
                description: string_value(map.get("description")),
                name,
            })
        })
        .collect()
}

fn parse_relationships(items: &[Value]) -> Vec<Relationship> {
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|map| {
            let source = string_value(map.get("source"))?;
            let target = string_value(map.get("target"))?;

            Some(Relationship {
                source,
                target,
                relationship_type: vocab(
                    map.get("type"),
                    RelationshipType::from_label,
                    "relationship.type",
                ),
                description: string_value(map.get("description")),
                strength: int_value(map.get("strength")).map(|s| s.clamp(1, 10) as u8),
                is_temporary: bool_value(map.get("is_temporary")),
            })
        })
        .collect()
}

fn parse_events(items: &[Value], chunk_id: &str) -> Vec<PlotEvent> {
    items
        .iter()
        .filter_map(Value::as_object)
        .enumerate()
        .map(|(position, map)| {
            // Position counts event objects only
            let order_id = int_value(map.get("order_id")).unwrap_or(position as i64 + 1);

            PlotEvent {
                order_id,
                chunk_id: chunk_id.to_string(),
                summary: string_value(map.get("summary")),
                participants: string_list(map.get("participants")),
                time_of_day: vocab(map.get("time_of_day"), TimeOfDay::from_label, "event.time_of_day"),
                day_sequence: int_value(map.get("day_sequence")).unwrap_or(1),
                is_flashback: bool_value(map.get("is_flashback")).unwrap_or(false),
                atmosphere: string_value(map.get("atmosphere")),
                key_dialogue: string_value(map.get("key_dialogue")),
                timestamp_relative: int_value(map.get("timestamp_relative")),
            }
        })
        .collect()
}

/// Enforce the day-sequence rule over the chunk's events in `order_id` order.
///
/// A non-flashback Morning directly after a non-flashback Night starts a new
/// day, and the present-time day never runs backwards. Flashbacks keep their
/// own value and do not move the running day.
pub fn repair_day_sequence(events: &mut [PlotEvent]) {
    let mut order: Vec<usize> = (0..events.len()).collect();
    order.sort_by_key(|&i| events[i].order_id);

    let mut current_day: Option<i64> = None;
    let mut last_time: Option<TimeOfDay> = None;

    for i in order {
        let event = &mut events[i];
        if event.is_flashback {
            continue;
        }

        if let Some(day) = current_day {
            let new_day = last_time == Some(TimeOfDay::Night) && event.time_of_day == TimeOfDay::Morning;
            if new_day && event.day_sequence <= day {
                event.day_sequence = day + 1;
            } else if event.day_sequence < day {
                event.day_sequence = day;
            }
        }

        current_day = Some(event.day_sequence);
        if event.time_of_day != TimeOfDay::Unknown {
            last_time = Some(event.time_of_day);
        }
    }
}

fn array_field<'a>(root: &'a Object, key: &str) -> &'a [Value] {
    match root.get(key) {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

fn vocab<T: Default>(value: Option<&Value>, parse: fn(&str) -> Option<T>, field: &str) -> T {
    match value.and_then(Value::as_str) {
        Some(label) => parse(label).unwrap_or_else(|| {
            debug!(field, label, "Replacing unknown enum label with default");
            T::default()
        }),
        None => T::default(),
    }
}

/// Non-blank trimmed string; numbers and booleans are stringified.
fn string_value(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// De-duplicated list; a bare string counts as a one-element list.
fn string_list(value: Option<&Value>) -> Vec<String> {
    let candidates: Vec<String> = match value {
        Some(Value::Array(items)) => items.iter().filter_map(|v| string_value(Some(v))).collect(),
        other => string_value(other).into_iter().collect(),
    };

    let mut result: Vec<String> = Vec::with_capacity(candidates.len());
    for item in candidates {
        if !result.contains(&item) {
            result.push(item);
        }
    }
    result
}

fn int_value(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bool_value(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().to_ascii_lowercase().parse().ok(),
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: &str = "chunk-1";

    fn parse(content: &str) -> ExtractionResult {
        parse_response(content, CHUNK, 3).unwrap()
    }

    #[test]
    fn test_parses_full_response() {
        let result = parse(
            r#"{
                "chunk_summary": {"content": "夜战", "main_characters": ["袁冠南"]},
                "entities": [{"name": "袁冠南", "type": "Person", "subtype": "MainCharacter",
                              "aliases": ["袁相公"], "health_status": "Injured",
                              "affiliation": ["None"], "description": "书生"}],
                "relationships": [{"source": "袁冠南", "target": "萧中慧", "type": "LOVES",
                                   "description": "一见钟情", "strength": 9, "is_temporary": false}],
                "events": [{"order_id": 1, "summary": "客栈夜战", "participants": ["袁冠南"],
                            "time_of_day": "Night", "day_sequence": 2, "is_flashback": false,
                            "atmosphere": "Tense", "key_dialogue": "看刀！"}],
                "next_summary": "二人同行",
                "active_characters": ["袁冠南", "萧中慧"]
            }"#,
        );

        assert_eq!(result.chunk_id, CHUNK);
        assert_eq!(result.chunk_index, 3);
        assert_eq!(result.chunk_summary.main_characters, vec!["袁冠南"]);

        let entity = &result.entities[0];
        assert_eq!(entity.subtype, EntitySubtype::MainCharacter);
        assert_eq!(entity.health_status, HealthStatus::Injured);
        assert_eq!(entity.description.as_deref(), Some("书生"));

        let rel = &result.relationships[0];
        assert_eq!(rel.relationship_type, RelationshipType::Loves);
        assert_eq!(rel.strength, Some(9));
        assert_eq!(rel.is_temporary, Some(false));

        let event = &result.events[0];
        assert_eq!(event.chunk_id, CHUNK);
        assert_eq!(event.time_of_day, TimeOfDay::Night);
        assert_eq!(event.day_sequence, 2);
        assert_eq!(event.key_dialogue.as_deref(), Some("看刀！"));

        assert_eq!(result.next_summary, "二人同行");
        assert_eq!(result.active_characters, vec!["袁冠南", "萧中慧"]);
    }

    #[test]
    fn test_unknown_enums_are_replaced_with_defaults() {
        let result = parse(
            r#"{
                "entities": [{"name": "白马", "type": "Animal", "subtype": "Steed", "health_status": 5}],
                "relationships": [{"source": "张三", "target": "白马", "type": "RIDES"}],
                "events": [{"summary": "策马", "time_of_day": "Dusk"}]
            }"#,
        );

        assert_eq!(result.entities[0].entity_type, EntityType::Person);
        assert_eq!(result.entities[0].subtype, EntitySubtype::Unknown);
        assert_eq!(result.entities[0].health_status, HealthStatus::Unknown);
        assert_eq!(result.relationships[0].relationship_type, RelationshipType::RelatedTo);
        assert_eq!(result.events[0].time_of_day, TimeOfDay::Unknown);
    }

    #[test]
    fn test_elements_without_identity_are_dropped() {
        let result = parse(
            r#"{
                "entities": [{"name": "  "}, {"type": "Item"}, "萧中慧", {"name": "卓天雄"}],
                "relationships": [{"source": "卓天雄"}, {"source": "卓天雄", "target": ""},
                                  {"source": "卓天雄", "target": "袁冠南"}, 42]
            }"#,
        );

        let names: Vec<&str> = result.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["卓天雄"]);
        assert_eq!(result.relationships.len(), 1);
        assert_eq!(result.relationships[0].target, "袁冠南");
    }

    #[test]
    fn test_missing_order_ids_follow_array_position() {
        let result = parse(
            r#"{"events": [{"summary": "一"}, {"summary": "二"}, {"order_id": "7", "summary": "三"}]}"#,
        );

        let ids: Vec<i64> = result.events.iter().map(|e| e.order_id).collect();
        assert_eq!(ids, vec![1, 2, 7]);
    }

    #[test]
    fn test_skipped_event_elements_do_not_use_up_order_ids() {
        let result = parse(r#"{"events": ["junk", {"summary": "一"}, 3, {"summary": "二"}]}"#);

        let ids: Vec<i64> = result.events.iter().map(|e| e.order_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_field_types_are_coerced() {
        let result = parse(
            r#"{
                "entities": [{"name": "萧中慧", "aliases": "慧儿", "affiliation": ["萧府", "萧府", ""]}],
                "relationships": [{"source": "a", "target": "b", "strength": 42, "is_temporary": "TRUE"},
                                  {"source": "a", "target": "c", "strength": "strong"}],
                "events": [{"participants": "萧中慧", "day_sequence": "3"}]
            }"#,
        );

        assert_eq!(result.entities[0].aliases, vec!["慧儿"]);
        assert_eq!(result.entities[0].affiliation, vec!["萧府"]);
        assert_eq!(result.relationships[0].strength, Some(10));
        assert_eq!(result.relationships[0].is_temporary, Some(true));
        assert_eq!(result.relationships[1].strength, None);
        assert_eq!(result.events[0].participants, vec!["萧中慧"]);
        assert_eq!(result.events[0].day_sequence, 3);
        assert!(!result.events[0].is_flashback);
    }

    #[test]
    fn test_recovers_object_from_surrounding_text() {
        let result = parse("Here is the JSON:\n```json\n{\"next_summary\": \"续\"}\n```");
        assert_eq!(result.next_summary, "续");
    }

    #[test]
    fn test_empty_content_is_an_error() {
        let err = parse_response("   \n", CHUNK, 0).unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyResponse));
    }

    #[test]
    fn test_unrecoverable_content_is_an_error() {
        let err = parse_response("{ not json at all }", CHUNK, 0).unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedResponse { .. }));

        let err = parse_response("[1, 2, 3]", CHUNK, 0).unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedResponse { .. }));
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let result = parse("{}");
        assert!(result.entities.is_empty());
        assert!(result.relationships.is_empty());
        assert!(result.events.is_empty());
        assert!(result.next_summary.is_empty());
        assert_eq!(result.chunk_summary, ChunkSummary::default());
    }

    fn event(order_id: i64, time: TimeOfDay, day: i64, flashback: bool) -> PlotEvent {
        PlotEvent {
            time_of_day: time,
            day_sequence: day,
            is_flashback: flashback,
            ..PlotEvent::new(order_id, CHUNK)
        }
    }

    #[test]
    fn test_night_to_morning_advances_day() {
        let mut events = vec![
            event(1, TimeOfDay::Evening, 1, false),
            event(2, TimeOfDay::Night, 1, false),
            event(3, TimeOfDay::Morning, 1, false),
            event(4, TimeOfDay::Noon, 1, false),
        ];
        repair_day_sequence(&mut events);

        let days: Vec<i64> = events.iter().map(|e| e.day_sequence).collect();
        assert_eq!(days, vec![1, 1, 2, 2]);
    }

    #[test]
    fn test_flashback_keeps_day_and_is_ignored() {
        let mut events = vec![
            event(1, TimeOfDay::Night, 3, false),
            event(2, TimeOfDay::Morning, 1, true),
            event(3, TimeOfDay::Morning, 3, false),
        ];
        repair_day_sequence(&mut events);

        let days: Vec<i64> = events.iter().map(|e| e.day_sequence).collect();
        assert_eq!(days, vec![3, 1, 4]);
    }

    #[test]
    fn test_repair_uses_order_id_not_array_order() {
        let mut events = vec![
            event(2, TimeOfDay::Morning, 1, false),
            event(1, TimeOfDay::Night, 1, false),
        ];
        repair_day_sequence(&mut events);

        assert_eq!(events[0].day_sequence, 2);
        assert_eq!(events[1].day_sequence, 1);
    }
}
