//! Cross-meeting intelligence: keyword analysis, insight cards, and the
//! what-changed diff. All computation here is pure over its inputs and
//! deterministic for fixed transcript content.

pub mod insights;
pub mod keywords;

pub use insights::{compute_insights, compute_what_changed, InsightCard, WhatChanged};
pub use keywords::{keywords, people};
