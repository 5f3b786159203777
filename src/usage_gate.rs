//! Per-user usage gating against plan limits.
//!
//! Two separate policies: the extract counter (lifetime cap for free,
//! monthly cap for paid plans) and the meeting-storage cap (free keeps at
//! most 3 persisted meetings). `consume` must be called only after a
//! successful extraction — a failed extraction does not count.

use serde::Serialize;

use crate::db::{current_month_key, DbError, DbUser, Store};

/// Free-plan cap on persisted meetings.
const FREE_MEETING_CAP: i64 = 3;

/// Subscription plans. Unknown plan strings degrade to `Free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Free,
    Ltd,
    Fltd,
    SubBasic,
    SubPro,
}

impl Plan {
    pub fn from_str(plan: &str) -> Self {
        match plan {
            "ltd" => Plan::Ltd,
            "fltd" => Plan::Fltd,
            "sub_basic" => Plan::SubBasic,
            "sub_pro" => Plan::SubPro,
            _ => Plan::Free,
        }
    }

    /// Lifetime extract cap (free plan only).
    fn lifetime_cap(self) -> Option<i64> {
        match self {
            Plan::Free => Some(5),
            _ => None,
        }
    }

    /// Monthly extract cap (paid plans).
    fn monthly_cap(self) -> Option<i64> {
        match self {
            Plan::Free => None,
            Plan::Ltd | Plan::SubBasic => Some(50),
            Plan::Fltd | Plan::SubPro => Some(100),
        }
    }
}

/// Result of an extract-quota check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCheck {
    pub allowed: bool,
    pub used: i64,
    pub max: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Check the user's extract quota without consuming it.
///
/// Free plans sum extracts across all months; paid plans read the
/// current-month counter, lazily creating its row.
pub fn check(store: &Store, user: &DbUser) -> Result<UsageCheck, DbError> {
    let plan = Plan::from_str(&user.plan);

    if let Some(cap) = plan.lifetime_cap() {
        let used = store.sum_usage_all_time(&user.id)?;
        let allowed = used < cap;
        return Ok(UsageCheck {
            allowed,
            used,
            max: cap,
            message: (!allowed).then(|| {
                format!(
                    "Free plan limit reached ({} extracts). Upgrade to continue.",
                    cap
                )
            }),
        });
    }

    let cap = plan.monthly_cap().unwrap_or(i64::MAX);
    let month = current_month_key();
    store.ensure_usage_row(&user.id, &month)?;
    let used = store
        .get_usage(&user.id, &month)?
        .map(|u| u.extracts)
        .unwrap_or(0);
    let allowed = used < cap;
    Ok(UsageCheck {
        allowed,
        used,
        max: cap,
        message: (!allowed).then(|| {
            format!(
                "Monthly extract limit reached ({} extracts). Resets next month.",
                cap
            )
        }),
    })
}

/// Consume one extract: atomic upsert-and-increment on the current month.
/// Call only on successful extraction.
pub fn consume(store: &Store, user: &DbUser) -> Result<(), DbError> {
    store.increment_usage(&user.id, &current_month_key())
}

/// Whether the user may persist one more meeting. Checked before any work
/// that would create a meeting record (downloads, transcription).
pub fn check_meeting_quota(store: &Store, user: &DbUser) -> Result<Option<String>, DbError> {
    if Plan::from_str(&user.plan) != Plan::Free {
        return Ok(None);
    }
    let count = store.count_meetings_owned(&user.id)?;
    if count < FREE_MEETING_CAP {
        return Ok(None);
    }
    Ok(Some(format!(
        "Free plan allows up to {} saved meetings. Upgrade to continue.",
        FREE_MEETING_CAP
    )))
}
