//! Extraction record schema, the model prompt, and the tolerant decoder.
//!
//! Model output is untrusted: it may be wrapped in markdown fences,
//! surrounded by prose, or contain trailing commas. Everything that reads
//! extractor output goes through [`decode_tolerant`] — never a bare strict
//! parse. Tolerance is cheaper than retry.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prompt prefix for the extraction call. Specifies the required JSON
/// schema, pins defaults for missing fields, and forbids markdown fences.
/// The caller still never assumes the model obeyed.
pub const EXTRACTION_PROMPT: &str = "\
You are a meeting assistant. From the transcript below, extract structured \
meeting artifacts.

Respond with ONLY a valid JSON object (no markdown fences, no commentary) \
matching this exact schema:

{
  \"action_items\": [{\"task\": \"...\", \"owner\": \"...\", \"deadline\": \"...\"}],
  \"follow_up_email\": \"a short follow-up email summarizing outcomes\",
  \"summary\": \"2-3 sentence meeting summary\",
  \"open_questions\": [\"questions raised but not answered\"],
  \"proposed_solutions\": [\"solutions proposed during the meeting\"]
}

Rules:
1. If a field has no content, use an empty array (or empty string for \
follow_up_email and summary). Never omit a key.
2. If an action item's owner or deadline is unknown, use \"unassigned\" and \
\"none\".
3. Do NOT wrap the JSON in markdown code fences.

Transcript:";

/// One extracted action item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub deadline: String,
}

/// The extraction record stored in a meeting's `action_items` column.
/// All non-required fields default to empty on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    #[serde(default)]
    pub action_items: Vec<ActionItem>,
    #[serde(default)]
    pub follow_up_email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proposed_solutions: Vec<String>,
}

impl ExtractionRecord {
    /// Serialize for storage. The record is written as a unit.
    pub fn to_stored(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Parse a stored `action_items` blob, defaulting every field on any
    /// parse failure — stored data never takes a request down.
    pub fn from_stored(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

/// The extractor returned text the tolerant decoder could not salvage.
#[derive(Debug, Error)]
#[error("could not decode extractor output: {0}")]
pub struct DecodeError(pub String);

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").unwrap())
}

/// Decode possibly-malformed model output into an extraction record.
///
/// 1. Trim and strip every triple-backtick fence (with optional `json` tag).
/// 2. Attempt a strict parse; return on success.
/// 3. Otherwise take the substring between the first `{` and the last `}`.
/// 4. Remove trailing commas before `}` or `]`.
/// 5. Strict-parse the cleaned candidate; propagate failure.
pub fn decode_tolerant(raw: &str) -> Result<ExtractionRecord, DecodeError> {
    let cleaned = raw.trim().replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();

    if let Ok(record) = serde_json::from_str::<ExtractionRecord>(cleaned) {
        return Ok(record);
    }

    let start = cleaned.find('{');
    let end = cleaned.rfind('}');
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => {
            log::warn!(
                "extractor output has no JSON object: {}",
                crate::providers::truncate_body(raw)
            );
            return Err(DecodeError("no JSON object found".to_string()));
        }
    };

    let candidate = &cleaned[start..=end];
    let repaired = trailing_comma_re().replace_all(candidate, "$1");

    serde_json::from_str::<ExtractionRecord>(&repaired).map_err(|e| {
        log::warn!(
            "extractor output unrecoverable ({}): {}",
            e,
            crate::providers::truncate_body(raw)
        );
        DecodeError(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ExtractionRecord {
        ExtractionRecord {
            action_items: vec![ActionItem {
                task: "x".into(),
                owner: "y".into(),
                deadline: "z".into(),
            }],
            follow_up_email: "hi".into(),
            summary: String::new(),
            open_questions: vec![],
            proposed_solutions: vec![],
        }
    }

    #[test]
    fn test_round_trip() {
        let record = sample_record();
        let serialized = serde_json::to_string(&record).unwrap();
        let decoded = decode_tolerant(&serialized).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_fenced_output() {
        let raw = "```json\n{\"action_items\":[{\"task\":\"x\",\"owner\":\"y\",\"deadline\":\"z\"}],\"follow_up_email\":\"hi\"}\n```";
        let decoded = decode_tolerant(raw).unwrap();
        assert_eq!(decoded, sample_record());
    }

    #[test]
    fn test_fenced_with_trailing_commas() {
        // A fenced object with trailing commas in both the array element
        // and the top level — the combination models emit most often.
        let raw = "```json\n{\"action_items\":[{\"task\":\"x\",\"owner\":\"y\",\"deadline\":\"z\",}],\"follow_up_email\":\"hi\",}\n```";
        let decoded = decode_tolerant(raw).unwrap();
        assert_eq!(decoded.action_items.len(), 1);
        assert_eq!(decoded.action_items[0].task, "x");
        assert_eq!(decoded.action_items[0].owner, "y");
        assert_eq!(decoded.action_items[0].deadline, "z");
        assert_eq!(decoded.follow_up_email, "hi");
    }

    #[test]
    fn test_surrounding_prose() {
        let raw = "Sure! Here is the extraction:\n{\"action_items\":[],\"follow_up_email\":\"ok\"}\nLet me know if you need more.";
        let decoded = decode_tolerant(raw).unwrap();
        assert_eq!(decoded.follow_up_email, "ok");
        assert!(decoded.action_items.is_empty());
    }

    #[test]
    fn test_missing_optional_fields_default_empty() {
        let decoded = decode_tolerant("{\"action_items\":[],\"follow_up_email\":\"\"}").unwrap();
        assert!(decoded.summary.is_empty());
        assert!(decoded.open_questions.is_empty());
        assert!(decoded.proposed_solutions.is_empty());
    }

    #[test]
    fn test_no_json_fails() {
        assert!(decode_tolerant("I could not process that meeting.").is_err());
        assert!(decode_tolerant("").is_err());
    }

    #[test]
    fn test_inverted_braces_fail() {
        assert!(decode_tolerant("} nothing here {").is_err());
    }

    #[test]
    fn test_unsalvageable_propagates_failure() {
        assert!(decode_tolerant("{\"action_items\": [unquoted]}").is_err());
    }

    #[test]
    fn test_from_stored_defaults_on_garbage() {
        let record = ExtractionRecord::from_stored("not json at all");
        assert_eq!(record, ExtractionRecord::default());

        let record = ExtractionRecord::from_stored("{}");
        assert!(record.action_items.is_empty());
        assert!(record.follow_up_email.is_empty());
    }

    #[test]
    fn test_stored_round_trip() {
        let record = sample_record();
        assert_eq!(ExtractionRecord::from_stored(&record.to_stored()), record);
    }
}
