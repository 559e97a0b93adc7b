//! Structured query classification records and their validation rules.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What the user is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    AskEvents,
    AskEntityFacts,
    AskLocation,
    AskHowTo,
    AskRelationship,
    AskComparison,
    AskCount,
    Smalltalk,
    Other,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::AskEvents => "ASK_EVENTS",
            Intent::AskEntityFacts => "ASK_ENTITY_FACTS",
            Intent::AskLocation => "ASK_LOCATION",
            Intent::AskHowTo => "ASK_HOW_TO",
            Intent::AskRelationship => "ASK_RELATIONSHIP",
            Intent::AskComparison => "ASK_COMPARISON",
            Intent::AskCount => "ASK_COUNT",
            Intent::Smalltalk => "SMALLTALK",
            Intent::Other => "OTHER",
        }
    }
}

/// Category of an extracted entity mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Npc,
    Org,
    Faction,
    Location,
    Item,
    Event,
    #[default]
    Unknown,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Npc => "NPC",
            EntityType::Org => "ORG",
            EntityType::Faction => "FACTION",
            EntityType::Location => "LOCATION",
            EntityType::Item => "ITEM",
            EntityType::Event => "EVENT",
            EntityType::Unknown => "UNKNOWN",
        }
    }
}

/// How retrieval should be biased toward a place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationBiasMode {
    NearNpc,
    SpecificLocation,
    None,
}

/// Requested answer verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerFormat {
    Brief,
    #[default]
    Normal,
    Detailed,
}

/// A named entity the router extracted from the user's message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: EntityType,
}

/// Location bias for retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationBias {
    pub mode: LocationBiasMode,
    #[serde(default)]
    pub location_name: String,
}

fn default_true() -> bool {
    true
}

/// The structured intent record produced by the query router.
///
/// Created fresh per turn. `validated()` must run on every parsed instance
/// before use; enum membership is already enforced by deserialization, the
/// remaining field constraints are applied there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub intent: Intent,
    pub query_text: String,
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default = "default_true")]
    pub needs_retrieval: bool,
    #[serde(default)]
    pub time_window_days: i64,
    #[serde(default)]
    pub time_constraint_text: String,
    pub location_bias: LocationBias,
    #[serde(default)]
    pub answer_format: AnswerFormat,
}

impl QuerySpec {
    /// Apply field-level constraints: trim strings, clamp the time window to
    /// [0, 365], default an empty query text to "unknown", and dedup entities
    /// by case-insensitive name (first occurrence wins).
    pub fn validated(mut self) -> Self {
        self.query_text = self.query_text.trim().to_string();
        if self.query_text.is_empty() {
            self.query_text = "unknown".to_string();
        }
        self.time_constraint_text = self.time_constraint_text.trim().to_string();
        self.time_window_days = self.time_window_days.clamp(0, 365);
        self.location_bias.location_name = self.location_bias.location_name.trim().to_string();

        let mut seen = HashSet::new();
        self.entities = self
            .entities
            .into_iter()
            .map(|mut entity| {
                entity.name = entity.name.trim().to_string();
                entity
            })
            .filter(|entity| seen.insert(entity.name.to_lowercase()))
            .collect();

        self
    }
}

/// Parse a JSON blob into a validated spec. Any schema violation (missing
/// required field, unknown enum value, wrong shape) is an error.
pub fn parse_query_spec(json: &str) -> Result<QuerySpec, serde_json::Error> {
    let spec: QuerySpec = serde_json::from_str(json)?;
    Ok(spec.validated())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "intent": "ASK_EVENTS",
        "query_text": "bandit attacks",
        "location_bias": {"mode": "NEAR_NPC"}
    }"#;

    #[test]
    fn test_defaults() {
        let spec = parse_query_spec(MINIMAL).unwrap();
        assert_eq!(spec.intent, Intent::AskEvents);
        assert!(spec.needs_retrieval);
        assert_eq!(spec.time_window_days, 0);
        assert_eq!(spec.answer_format, AnswerFormat::Normal);
        assert_eq!(spec.location_bias.location_name, "");
        assert!(spec.entities.is_empty());
    }

    #[test]
    fn test_unknown_intent_is_error() {
        let result = parse_query_spec(
            r#"{"intent": "ASK_WEATHER", "query_text": "x",
                "location_bias": {"mode": "NEAR_NPC"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_location_bias_is_error() {
        let result = parse_query_spec(r#"{"intent": "OTHER", "query_text": "x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_time_window_clamped() {
        for (raw, expected) in [(-5, 0), (0, 0), (14, 14), (9000, 365)] {
            let json = format!(
                r#"{{"intent": "ASK_EVENTS", "query_text": "x",
                    "time_window_days": {raw},
                    "location_bias": {{"mode": "NEAR_NPC"}}}}"#
            );
            let spec = parse_query_spec(&json).unwrap();
            assert_eq!(spec.time_window_days, expected);
        }
    }

    #[test]
    fn test_empty_query_text_defaults_to_unknown() {
        let spec = parse_query_spec(
            r#"{"intent": "SMALLTALK", "query_text": "   ",
                "location_bias": {"mode": "NONE"}}"#,
        )
        .unwrap();
        assert_eq!(spec.query_text, "unknown");
    }

    #[test]
    fn test_entities_trimmed_and_deduped() {
        let spec = parse_query_spec(
            r#"{"intent": "ASK_ENTITY_FACTS", "query_text": "Iron Guard",
                "entities": [
                    {"name": " Iron Guard ", "type": "ORG"},
                    {"name": "iron guard", "type": "FACTION"},
                    {"name": "Port Valor", "type": "LOCATION"}
                ],
                "location_bias": {"mode": "NEAR_NPC"}}"#,
        )
        .unwrap();
        assert_eq!(spec.entities.len(), 2);
        assert_eq!(spec.entities[0].name, "Iron Guard");
        assert_eq!(spec.entities[0].entity_type, EntityType::Org);
        assert_eq!(spec.entities[1].name, "Port Valor");
    }

    #[test]
    fn test_entity_type_defaults_to_unknown() {
        let spec = parse_query_spec(
            r#"{"intent": "ASK_ENTITY_FACTS", "query_text": "x",
                "entities": [{"name": "Sunleaf"}],
                "location_bias": {"mode": "NEAR_NPC"}}"#,
        )
        .unwrap();
        assert_eq!(spec.entities[0].entity_type, EntityType::Unknown);
    }

    #[test]
    fn test_roundtrip_serialization_uses_wire_names() {
        let spec = parse_query_spec(MINIMAL).unwrap();
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["intent"], "ASK_EVENTS");
        assert_eq!(json["location_bias"]["mode"], "NEAR_NPC");
        assert_eq!(json["answer_format"], "NORMAL");
    }
}
