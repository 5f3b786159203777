//! Keyword and participant extraction over raw transcript text.
//!
//! Pure functions. The output is inherently noisy — downstream insight
//! computation treats overlap, not exact match, as signal.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

/// Fixed stop-word set: determiners, pronouns, auxiliaries, conjunctions,
/// and a short hand-curated list of conversational filler.
const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "and", "any", "are", "because",
    "been", "before", "being", "below", "between", "both", "but", "can", "could", "did",
    "does", "doing", "down", "during", "each", "few", "for", "from", "further", "had",
    "has", "have", "having", "her", "here", "hers", "herself", "him", "himself", "his",
    "how", "into", "its", "itself", "just", "more", "most", "myself", "nor", "not",
    "now", "off", "once", "only", "other", "our", "ours", "out", "over", "own", "same",
    "she", "should", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "then", "there", "these", "they", "this", "those", "through", "too", "under",
    "until", "very", "was", "were", "what", "when", "where", "which", "while", "who",
    "whom", "why", "will", "with", "would", "you", "your", "yours",
    // conversational filler
    "going", "gonna", "know", "like", "want", "think", "make", "said", "look", "come",
    "lets", "still", "well", "yeah", "okay", "right", "really", "thing", "things",
    "kind", "sort", "mean", "actually", "basically", "maybe", "need", "good", "great",
    "talk", "talking", "saying", "getting", "time", "today", "also", "much",
];

fn stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

/// Top-20 content tokens of `text` by descending frequency.
///
/// Normalization: lowercase, every character outside `[a-z0-9 \t\n]`
/// replaced with a space, tokens shorter than 4 characters and stop-words
/// dropped. Ties break alphabetically so the ranking is deterministic.
pub fn keywords(text: &str) -> Vec<String> {
    let normalized: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == ' ' || c == '\t' || c == '\n' {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in normalized.split_whitespace() {
        if token.len() > 3 && !stop_words().contains(token) {
            *counts.entry(token).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(20)
        .map(|(token, _)| token.to_string())
        .collect()
}

fn attendees_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)attendees?\s*:\s*([^\n]+)").unwrap())
}

fn speaker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-z]{2,15}):").unwrap())
}

/// Lowercase first-name tokens mentioned in `text`.
///
/// Two heuristics, unioned and deduplicated:
/// (a) an "Attendees:" line, split on `,;&`, first whitespace token per
///     entry, length 2–19 retained;
/// (b) speaker prefixes (`name:` at the start of a line).
pub fn people(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();

    if let Some(caps) = attendees_re().captures(text) {
        let list = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        for entry in list.split([',', ';', '&']) {
            let first = entry.split_whitespace().next().unwrap_or("");
            let name = first.to_lowercase();
            if (2..=19).contains(&name.len()) && seen.insert(name.clone()) {
                names.push(name);
            }
        }
    }

    for line in text.to_lowercase().lines() {
        if let Some(caps) = speaker_re().captures(line.trim_start()) {
            let name = caps[1].to_string();
            // The attendees label itself matches the speaker shape
            if name == "attendees" || name == "attendee" {
                continue;
            }
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_ranked_by_frequency() {
        let text = "Dashboard dashboard DASHBOARD authentication authentication deploy";
        let kws = keywords(text);
        assert_eq!(kws[0], "dashboard");
        assert_eq!(kws[1], "authentication");
        assert!(kws.contains(&"deploy".to_string()));
    }

    #[test]
    fn test_keywords_drop_short_and_stop_words() {
        let kws = keywords("the and was a to of bug fix API");
        // "bug", "fix", "API" are all ≤ 3 chars; stop-words are filtered
        assert!(kws.is_empty());
    }

    #[test]
    fn test_keywords_punctuation_normalized() {
        let kws = keywords("migration, migration; migration! rollout?");
        assert_eq!(kws[0], "migration");
        assert!(kws.contains(&"rollout".to_string()));
    }

    #[test]
    fn test_keywords_cap_at_twenty() {
        let text = (0..40)
            .map(|i| format!("token{:02}", i))
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(keywords(&text).len(), 20);
    }

    #[test]
    fn test_keywords_deterministic_tie_break() {
        let first = keywords("zebra apple zebra apple mango mango");
        let second = keywords("zebra apple zebra apple mango mango");
        assert_eq!(first, second);
        // Equal counts order alphabetically
        assert_eq!(first, vec!["apple", "mango", "zebra"]);
    }

    #[test]
    fn test_people_from_attendees_line() {
        let names = people("Attendees: Sarah Smith, John; Mike & Ana\n\nNotes follow.");
        assert_eq!(names, vec!["sarah", "john", "mike", "ana"]);
    }

    #[test]
    fn test_people_from_speaker_prefixes() {
        let text = "sarah: the redesign is done\njohn: I'll fix the bug\nsarah: great";
        let names = people(text);
        assert_eq!(names, vec!["sarah", "john"]);
    }

    #[test]
    fn test_people_union_dedup() {
        let text = "Attendees: Sarah, John\n\nSarah: hello\nMike: hi there";
        let names = people(text);
        assert_eq!(names, vec!["sarah", "john", "mike"]);
    }

    #[test]
    fn test_people_excludes_attendees_label_and_length_bounds() {
        let text = "Attendees: X, Supercalifragilisticname Jones\n\nnotes";
        let names = people(text);
        // "x" too short, the long name exceeds 19 chars, and the label line
        // itself must not register as a speaker
        assert!(names.is_empty());
    }
}
