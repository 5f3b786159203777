//! Insight cards and the what-changed diff.
//!
//! Given a focal meeting and the user's prior meetings (strictly older,
//! newest first), compute up to six insight cards plus a pairwise diff
//! against the single most recent prior. Everything here is pure over its
//! inputs.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::db::DbMeeting;
use crate::extraction::ExtractionRecord;

use super::keywords::{keywords, people};

/// Phrases that signal the meeting refers back to earlier work.
const FOLLOW_UP_PHRASES: &[&str] = &[
    "follow up",
    "following up",
    "last time",
    "previously",
    "as discussed",
    "we agreed",
    "circling back",
    "checking in on",
    "update on",
];

const MAX_SHARED_TOPICS: usize = 6;
const MAX_RELATED_MEETINGS: usize = 5;
const MAX_UNRESOLVED_ITEMS: usize = 5;
const MAX_PARTICIPANTS: usize = 5;
const MAX_NEW_TOPICS: usize = 8;
const MAX_RECURRING_SOLUTIONS: usize = 5;
const HINT_SNIPPET_CHARS: usize = 150;
const MAX_MEMORY_HINTS: usize = 3;

// ─────────────────────────────────────────────────────────────────────
// Card types
// ─────────────────────────────────────────────────────────────────────

/// A prior meeting sharing topics with the focal one.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedMeeting {
    pub meeting_id: String,
    pub title: String,
    pub date: String,
    pub shared: Vec<String>,
}

/// An action item from a prior meeting that still echoes in the focal one.
#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedItem {
    pub task: String,
    pub owner: String,
    pub source_meeting_id: String,
    pub source_meeting_title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecurringParticipant {
    pub name: String,
    pub meeting_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecurringSolution {
    pub current: String,
    pub prior: String,
    pub prior_meeting_title: String,
}

/// One entry in the insights response. The `type` tag carries the card kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InsightCard {
    RepeatedTopics {
        title: String,
        shared_topics: Vec<String>,
        meetings: Vec<RelatedMeeting>,
    },
    UnresolvedItems {
        title: String,
        items: Vec<UnresolvedItem>,
    },
    FollowUpSignals {
        title: String,
        phrases: Vec<String>,
    },
    RecurringParticipants {
        title: String,
        participants: Vec<RecurringParticipant>,
    },
    NewTopics {
        title: String,
        topics: Vec<String>,
    },
    RecurringSolutions {
        title: String,
        solutions: Vec<RecurringSolution>,
    },
}

/// The pairwise comparison of the focal meeting against its most recent
/// predecessor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WhatChanged {
    pub has_prior: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_meeting_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_meeting_title: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub new_action_items: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resolved_since_last: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub new_solutions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped_solutions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub new_questions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resolved_questions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub new_topics: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped_topics: Vec<String>,
}

/// A memory hint linking recent live keywords to a prior meeting.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryHint {
    pub meeting_id: String,
    pub title: String,
    pub date: String,
    pub shared_topics: Vec<String>,
    pub snippet: String,
}

// ─────────────────────────────────────────────────────────────────────
// Computation
// ─────────────────────────────────────────────────────────────────────

fn meeting_title(m: &DbMeeting) -> String {
    m.title.clone().unwrap_or_else(|| "Untitled meeting".to_string())
}

/// Compute the insight cards for `focal` against `prior` (strictly older
/// meetings, newest first, focal excluded). Empty when there is no prior.
pub fn compute_insights(focal: &DbMeeting, prior: &[DbMeeting]) -> Vec<InsightCard> {
    if prior.is_empty() {
        return Vec::new();
    }

    let focal_kws = keywords(&focal.raw_notes);
    let focal_kw_set: HashSet<&str> = focal_kws.iter().map(String::as_str).collect();
    let focal_lower = focal.raw_notes.to_lowercase();

    let prior_keywords: Vec<Vec<String>> =
        prior.iter().map(|m| keywords(&m.raw_notes)).collect();

    let mut cards = Vec::new();

    if let Some(card) = repeated_topics(&focal_kw_set, prior, &prior_keywords) {
        cards.push(card);
    }
    if let Some(card) = unresolved_items(&focal_lower, prior) {
        cards.push(card);
    }
    if let Some(card) = follow_up_signals(&focal_lower) {
        cards.push(card);
    }
    if let Some(card) = recurring_participants(focal, prior) {
        cards.push(card);
    }
    if let Some(card) = new_topics(&focal_kws, &prior_keywords) {
        cards.push(card);
    }
    if let Some(card) = recurring_solutions(focal, prior) {
        cards.push(card);
    }

    cards
}

/// Prior meetings sharing ≥ 2 keyword tokens with the focal one.
fn repeated_topics(
    focal_kws: &HashSet<&str>,
    prior: &[DbMeeting],
    prior_keywords: &[Vec<String>],
) -> Option<InsightCard> {
    let mut all_shared: Vec<String> = Vec::new();
    let mut related = Vec::new();

    for (meeting, kws) in prior.iter().zip(prior_keywords) {
        let mut shared: Vec<String> = kws
            .iter()
            .filter(|k| focal_kws.contains(k.as_str()))
            .cloned()
            .collect();
        if shared.len() < 2 {
            continue;
        }
        shared.sort();

        for token in &shared {
            if !all_shared.contains(token) {
                all_shared.push(token.clone());
            }
        }
        if related.len() < MAX_RELATED_MEETINGS {
            related.push(RelatedMeeting {
                meeting_id: meeting.id.clone(),
                title: meeting_title(meeting),
                date: meeting.created_at.clone(),
                shared,
            });
        }
    }

    if related.is_empty() {
        return None;
    }
    all_shared.truncate(MAX_SHARED_TOPICS);
    Some(InsightCard::RepeatedTopics {
        title: "Topics carried over from earlier meetings".to_string(),
        shared_topics: all_shared,
        meetings: related,
    })
}

/// Prior action items whose keywords still appear in the focal transcript.
///
/// Intentionally lossy: a single keyword of the task appearing anywhere in
/// the current text marks the item as possibly unresolved.
fn unresolved_items(focal_lower: &str, prior: &[DbMeeting]) -> Option<InsightCard> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut items = Vec::new();

    'outer: for meeting in prior {
        let record = ExtractionRecord::from_stored(&meeting.action_items);
        for item in &record.action_items {
            let normalized = item.task.trim().to_lowercase();
            if normalized.is_empty() || seen.contains(&normalized) {
                continue;
            }
            let task_kws = keywords(&item.task);
            if task_kws.iter().any(|k| focal_lower.contains(k.as_str())) {
                seen.insert(normalized);
                items.push(UnresolvedItem {
                    task: item.task.clone(),
                    owner: item.owner.clone(),
                    source_meeting_id: meeting.id.clone(),
                    source_meeting_title: meeting_title(meeting),
                });
                if items.len() >= MAX_UNRESOLVED_ITEMS {
                    break 'outer;
                }
            }
        }
    }

    if items.is_empty() {
        return None;
    }
    Some(InsightCard::UnresolvedItems {
        title: "Possibly unresolved items".to_string(),
        items,
    })
}

/// Fixed follow-up phrases found verbatim in the focal transcript.
fn follow_up_signals(focal_lower: &str) -> Option<InsightCard> {
    let phrases: Vec<String> = FOLLOW_UP_PHRASES
        .iter()
        .filter(|p| focal_lower.contains(**p))
        .map(|p| p.to_string())
        .collect();

    if phrases.is_empty() {
        return None;
    }
    Some(InsightCard::FollowUpSignals {
        title: "Follow-up references".to_string(),
        phrases,
    })
}

/// Participants the focal meeting shares with prior meetings, counted per
/// prior meeting and reported with the focal meeting included (+1).
fn recurring_participants(focal: &DbMeeting, prior: &[DbMeeting]) -> Option<InsightCard> {
    let focal_people: HashSet<String> = people(&focal.raw_notes).into_iter().collect();
    if focal_people.is_empty() {
        return None;
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for meeting in prior {
        for name in people(&meeting.raw_notes) {
            if focal_people.contains(&name) {
                *counts.entry(name).or_insert(0) += 1;
            }
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let participants: Vec<RecurringParticipant> = ranked
        .into_iter()
        .take(MAX_PARTICIPANTS)
        .map(|(name, count)| RecurringParticipant {
            name: titlecase(&name),
            meeting_count: count + 1,
        })
        .collect();

    if participants.is_empty() {
        return None;
    }
    Some(InsightCard::RecurringParticipants {
        title: "Recurring participants".to_string(),
        participants,
    })
}

/// Focal keywords that appear in no prior meeting's keyword set.
fn new_topics(focal_kws: &[String], prior_keywords: &[Vec<String>]) -> Option<InsightCard> {
    let prior_set: HashSet<&str> = prior_keywords
        .iter()
        .flat_map(|kws| kws.iter().map(String::as_str))
        .collect();

    let topics: Vec<String> = focal_kws
        .iter()
        .filter(|k| !prior_set.contains(k.as_str()))
        .take(MAX_NEW_TOPICS)
        .cloned()
        .collect();

    if topics.is_empty() {
        return None;
    }
    Some(InsightCard::NewTopics {
        title: "New topics".to_string(),
        topics,
    })
}

/// Focal proposed solutions that keyword-overlap (≥ 2) with a prior one.
fn recurring_solutions(focal: &DbMeeting, prior: &[DbMeeting]) -> Option<InsightCard> {
    let focal_record = ExtractionRecord::from_stored(&focal.action_items);
    if focal_record.proposed_solutions.is_empty() {
        return None;
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut solutions = Vec::new();

    'outer: for current in &focal_record.proposed_solutions {
        let normalized = current.trim().to_lowercase();
        if normalized.is_empty() || seen.contains(&normalized) {
            continue;
        }
        let current_kws: HashSet<String> = keywords(current).into_iter().collect();

        for meeting in prior {
            let record = ExtractionRecord::from_stored(&meeting.action_items);
            for prior_solution in &record.proposed_solutions {
                let overlap = keywords(prior_solution)
                    .iter()
                    .filter(|k| current_kws.contains(*k))
                    .count();
                if overlap >= 2 {
                    seen.insert(normalized.clone());
                    solutions.push(RecurringSolution {
                        current: current.clone(),
                        prior: prior_solution.clone(),
                        prior_meeting_title: meeting_title(meeting),
                    });
                    if solutions.len() >= MAX_RECURRING_SOLUTIONS {
                        break 'outer;
                    }
                    // One pairing per current solution
                    continue 'outer;
                }
            }
        }
    }

    if solutions.is_empty() {
        return None;
    }
    Some(InsightCard::RecurringSolutions {
        title: "Recurring solutions".to_string(),
        solutions,
    })
}

/// Diff the focal meeting against the single most recent prior.
/// `most_recent_prior` is `None` for a user's first meeting.
pub fn compute_what_changed(
    focal: &DbMeeting,
    most_recent_prior: Option<&DbMeeting>,
) -> WhatChanged {
    let Some(prior) = most_recent_prior else {
        return WhatChanged::default();
    };

    let focal_record = ExtractionRecord::from_stored(&focal.action_items);
    let prior_record = ExtractionRecord::from_stored(&prior.action_items);

    let focal_tasks: Vec<String> = focal_record
        .action_items
        .iter()
        .map(|a| a.task.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    let prior_tasks: Vec<String> = prior_record
        .action_items
        .iter()
        .map(|a| a.task.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    let normalize = |items: &[String]| -> Vec<String> {
        items
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    };
    let focal_solutions = normalize(&focal_record.proposed_solutions);
    let prior_solutions = normalize(&prior_record.proposed_solutions);
    let focal_questions = normalize(&focal_record.open_questions);
    let prior_questions = normalize(&prior_record.open_questions);

    let focal_topics = keywords(&focal.raw_notes);
    let prior_topics = keywords(&prior.raw_notes);

    WhatChanged {
        has_prior: true,
        prior_meeting_id: Some(prior.id.clone()),
        prior_meeting_title: Some(meeting_title(prior)),
        new_action_items: set_difference(&focal_tasks, &prior_tasks),
        resolved_since_last: set_difference(&prior_tasks, &focal_tasks),
        new_solutions: set_difference(&focal_solutions, &prior_solutions),
        dropped_solutions: set_difference(&prior_solutions, &focal_solutions),
        new_questions: set_difference(&focal_questions, &prior_questions),
        resolved_questions: set_difference(&prior_questions, &focal_questions),
        new_topics: set_difference(&focal_topics, &prior_topics),
        dropped_topics: set_difference(&prior_topics, &focal_topics),
    }
}

/// Memory hints for an active session: prior meetings sharing ≥ 2 keywords
/// with the recent live context, each with a snippet of the first sentence
/// containing a shared keyword.
pub fn compute_memory_hints(live_context: &str, candidates: &[DbMeeting]) -> Vec<MemoryHint> {
    let live_kws: HashSet<String> = keywords(live_context).into_iter().collect();
    if live_kws.is_empty() {
        return Vec::new();
    }

    let mut hints = Vec::new();
    for meeting in candidates {
        let mut shared: Vec<String> = keywords(&meeting.raw_notes)
            .into_iter()
            .filter(|k| live_kws.contains(k))
            .collect();
        if shared.len() < 2 {
            continue;
        }
        shared.sort();

        let snippet = first_sentence_with_keyword(&meeting.raw_notes, &shared);
        hints.push(MemoryHint {
            meeting_id: meeting.id.clone(),
            title: meeting_title(meeting),
            date: meeting.created_at.clone(),
            shared_topics: shared,
            snippet,
        });
        if hints.len() >= MAX_MEMORY_HINTS {
            break;
        }
    }
    hints
}

// ─────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────

/// Elements of `a` not present in `b`, order preserved, deduplicated.
fn set_difference(a: &[String], b: &[String]) -> Vec<String> {
    let b_set: HashSet<&str> = b.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    a.iter()
        .filter(|x| !b_set.contains(x.as_str()))
        .filter(|x| seen.insert(x.as_str()))
        .cloned()
        .collect()
}

/// Uppercase the first letter of a lowercase name.
fn titlecase(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// First sentence of `text` containing any of `shared` (case-insensitive),
/// truncated to the snippet budget with an ellipsis when longer.
fn first_sentence_with_keyword(text: &str, shared: &[String]) -> String {
    for sentence in text.split(['.', '!', '?', '\n']) {
        let trimmed = sentence.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.to_lowercase();
        if shared.iter().any(|k| lower.contains(k.as_str())) {
            return truncate_snippet(trimmed);
        }
    }
    String::new()
}

fn truncate_snippet(s: &str) -> String {
    if s.chars().count() <= HINT_SNIPPET_CHARS {
        return s.to_string();
    }
    let truncated: String = s.chars().take(HINT_SNIPPET_CHARS).collect();
    format!("{}…", truncated)
}
