//! Intent Classifier (§4.8): the fast path's `complete_json` call that
//! ranks candidate intents against the live tool catalog plus few-shots.

use serde::{Deserialize, Serialize};

use crate::gateway::{CallOptions, LlmGateway, LlmRole};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentCandidate {
    #[serde(rename = "intent")]
    pub name: String,
    pub confidence: f32,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

pub type RankedIntents = Vec<IntentCandidate>;

#[derive(Debug, Clone, Default)]
pub struct FeedbackExample {
    pub situation: String,
    pub chosen_intent_or_tool: String,
    pub correction: String,
}

fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["intents"],
        "properties": {
            "intents": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["intent", "confidence", "parameters"],
                }
            }
        }
    })
}

fn fallback() -> RankedIntents {
    vec![IntentCandidate { name: "general.conversation".to_string(), confidence: 1.0, parameters: serde_json::json!({}) }]
}

pub struct IntentClassifier<'a> {
    gateway: &'a LlmGateway,
}

impl<'a> IntentClassifier<'a> {
    pub fn new(gateway: &'a LlmGateway) -> Self {
        Self { gateway }
    }

    /// `classify(message, room_context, keyword_hints, feedback_examples)`.
    /// On malformed output, returns a single `general.conversation` candidate.
    pub async fn classify(
        &self,
        message: &str,
        room_context: Option<&str>,
        known_intents: &[String],
        keyword_hints: &[String],
        feedback_examples: &[FeedbackExample],
    ) -> RankedIntents {
        let prompt = build_prompt(message, room_context, known_intents, keyword_hints, feedback_examples);
        let options = CallOptions { system: "You classify user intents for a home assistant.".to_string(), ..Default::default() };

        match self.gateway.complete_json(LlmRole::Intent, &prompt, &schema(), options).await {
            Ok(value) => parse_candidates(&value),
            Err(_) => fallback(),
        }
    }
}

fn build_prompt(
    message: &str,
    room_context: Option<&str>,
    known_intents: &[String],
    keyword_hints: &[String],
    feedback_examples: &[FeedbackExample],
) -> String {
    let mut prompt = String::new();
    prompt.push_str("Known intents: ");
    prompt.push_str(&known_intents.join(", "));
    prompt.push('\n');
    if !keyword_hints.is_empty() {
        prompt.push_str("Known entities/rooms: ");
        prompt.push_str(&keyword_hints.join(", "));
        prompt.push('\n');
    }
    if let Some(room) = room_context {
        prompt.push_str(&format!("Current room: {room}\n"));
    }
    for example in feedback_examples {
        prompt.push_str(&format!(
            "Example: \"{}\" -> {} (correction: {})\n",
            example.situation, example.chosen_intent_or_tool, example.correction
        ));
    }
    prompt.push_str(&format!("User message: {message}\n"));
    prompt.push_str("Respond with JSON: {\"intents\": [{\"intent\": string, \"confidence\": number, \"parameters\": object}]} ranked by confidence descending, 1 to 3 entries.");
    prompt
}

fn parse_candidates(value: &serde_json::Value) -> RankedIntents {
    let Some(array) = value.get("intents").and_then(|v| v.as_array()) else { return fallback() };
    let mut candidates: RankedIntents = array
        .iter()
        .filter_map(|v| serde_json::from_value::<IntentCandidate>(v.clone()).ok())
        .collect();
    if candidates.is_empty() {
        return fallback();
    }
    candidates.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(3);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_candidates_sorts_by_confidence_descending() {
        let value = serde_json::json!({"intents": [
            {"intent": "a", "confidence": 0.2, "parameters": {}},
            {"intent": "b", "confidence": 0.9, "parameters": {}},
        ]});
        let ranked = parse_candidates(&value);
        assert_eq!(ranked[0].name, "b");
        assert_eq!(ranked[1].name, "a");
    }

    #[test]
    fn parse_candidates_falls_back_on_empty() {
        let value = serde_json::json!({"intents": []});
        let ranked = parse_candidates(&value);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].name, "general.conversation");
    }

    #[test]
    fn parse_candidates_truncates_to_three() {
        let value = serde_json::json!({"intents": [
            {"intent": "a", "confidence": 0.1, "parameters": {}},
            {"intent": "b", "confidence": 0.2, "parameters": {}},
            {"intent": "c", "confidence": 0.3, "parameters": {}},
            {"intent": "d", "confidence": 0.4, "parameters": {}},
        ]});
        assert_eq!(parse_candidates(&value).len(), 3);
    }
}
