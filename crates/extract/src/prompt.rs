use crate::vocab::{EntitySubtype, EntityType, HealthStatus, RelationshipType, TimeOfDay};

const NONE_MARKER: &str = "(none)";

pub const SYSTEM_PROMPT: &str = r#"You are a literary analyst building an event-centric knowledge graph from a Chinese novel.
Data rules:
- JSON keys are snake_case English exactly as given in the schema; values are written in Chinese, except enums and numbers.
- Arrays stay arrays, even with a single element.
- Entity type/subtype, health_status, relationship type and time_of_day must use the allowed enums.
- Every relationship carries strength (integer 1-10) and is_temporary (boolean).
- Infer time_of_day for every event and keep the timeline consistent.
- Always list event participants explicitly.
- Extract the screenwriter dimensions atmosphere and key_dialogue when present.
Respond with a single JSON object and nothing else."#;

/// Everything that varies between chunks.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub chunk_text: &'a str,
    pub previous_summary: &'a str,
    pub knowledge_base: &'a str,
    pub known_characters: &'a [String],
    pub active_characters: &'a [String],
}

pub fn build_schema_guide() -> String {
    format!(
        r#"Use EXACTLY these field names and this structure:
{{
  "chunk_summary": {{"content": "...", "main_characters": ["张三", "李四"]}},
  "entities": [
    {{"name": "张三", "type": "Person", "subtype": "MainCharacter", "aliases": ["三哥"], "health_status": "Healthy", "affiliation": ["None"], "description": "..."}}
  ],
  "relationships": [
    {{"source": "张三", "target": "李四", "type": "RELATED_TO", "description": "父女关系", "strength": 10, "is_temporary": false}}
  ],
  "events": [
    {{"order_id": 1, "summary": "张三在深夜逃亡", "participants": ["张三", "白马"], "time_of_day": "Night", "day_sequence": 1, "is_flashback": false, "atmosphere": "Tense", "key_dialogue": "我不能停下！"}}
  ],
  "next_summary": "1-2 sentences carried into the next chunk",
  "active_characters": ["张三", "李四"]
}}

ALLOWED ENUMS:
- entity.type: {entity_types}
- entity.subtype: {entity_subtypes}
- entity.health_status: {health_statuses}
- relationship.type: {relationship_types}
- event.time_of_day: {times_of_day}

Extract 3-8 key events per chunk with ascending order_id starting at 1; participants must be an array."#,
        entity_types = EntityType::label_list(),
        entity_subtypes = EntitySubtype::label_list(),
        health_statuses = HealthStatus::label_list(),
        relationship_types = RelationshipType::label_list(),
        times_of_day = TimeOfDay::label_list(),
    )
}

pub fn build_extraction_prompt(ctx: &PromptContext<'_>) -> String {
    format!(
        r#"RULES:
- Normalization: an [Existing Knowledge Base] is provided below. If a name or alias in the text matches an entry there, use the knowledge base's standard name as the entity name and append any new epithets or surface forms to aliases. Merge only when role and description roughly agree; otherwise create a new entity.
- Redundancy: events list every participant by standard name.
- Temporal consistency: when time_of_day moves from Night to Morning and the event is not a flashback, increment day_sequence. A flashback keeps day_sequence unchanged and sets is_flashback=true.
- Screenwriter dimensions: extract atmosphere (Tense, Humorous, Melancholic, Romantic, Action-packed, ...) and one key_dialogue line if present.

[Existing Knowledge Base]
{knowledge_base}

Previous story summary: {previous_summary}
Known core characters: {known}
Active characters: {active}

{schema}

CURRENT TEXT:
{chunk_text}

Respond with JSON matching the schema above."#,
        knowledge_base = or_none(ctx.knowledge_base),
        previous_summary = or_none(ctx.previous_summary),
        known = join_or_none(ctx.known_characters),
        active = join_or_none(ctx.active_characters),
        schema = build_schema_guide(),
        chunk_text = ctx.chunk_text,
    )
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() { NONE_MARKER } else { text.trim_end() }
}

fn join_or_none(names: &[String]) -> String {
    if names.is_empty() {
        NONE_MARKER.to_string()
    } else {
        names.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(known: &'a [String], active: &'a [String]) -> PromptContext<'a> {
        PromptContext {
            chunk_text: "袁冠南拔刀而起。",
            previous_summary: "林玉龙夫妇争吵不休。",
            knowledge_base: "袁冠南 [MainCharacter] - 书生",
            known_characters: known,
            active_characters: active,
        }
    }

    #[test]
    fn test_prompt_embeds_all_variable_context() {
        let known = vec!["袁冠南".to_string(), "萧中慧".to_string()];
        let active = vec!["袁冠南".to_string()];
        let prompt = build_extraction_prompt(&context(&known, &active));

        assert!(prompt.contains("袁冠南拔刀而起。"));
        assert!(prompt.contains("Previous story summary: 林玉龙夫妇争吵不休。"));
        assert!(prompt.contains("Known core characters: 袁冠南, 萧中慧"));
        assert!(prompt.contains("Active characters: 袁冠南"));
        assert!(prompt.contains("袁冠南 [MainCharacter] - 书生"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let known = vec!["萧中慧".to_string()];
        let a = build_extraction_prompt(&context(&known, &[]));
        let b = build_extraction_prompt(&context(&known, &[]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_context_renders_none_marker() {
        let prompt = build_extraction_prompt(&PromptContext {
            chunk_text: "text",
            previous_summary: "",
            knowledge_base: "  ",
            known_characters: &[],
            active_characters: &[],
        });

        assert!(prompt.contains("Previous story summary: (none)"));
        assert!(prompt.contains("Active characters: (none)"));
        assert!(prompt.contains("[Existing Knowledge Base]\n(none)"));
    }

    #[test]
    fn test_schema_guide_lists_every_enum() {
        let guide = build_schema_guide();
        assert!(guide.contains("TRAVELLED_TO"));
        assert!(guide.contains("MainCharacter"));
        assert!(guide.contains("Poisoned"));
        assert!(guide.contains("Afternoon"));
        assert!(guide.contains("\"order_id\": 1"));
    }
}
