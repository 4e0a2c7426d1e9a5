//! Deterministic progress rules.
//!
//! Kept free of I/O so the transition logic can be tested directly; the
//! SQLite layer applies these inside its write transaction.

use chrono::{DateTime, Utc};

use super::{Priority, ProgressStatus, ResearchProgress};
use crate::workflow::{self, CategoryRef};

/// Percentage of `checklist` covered by `tools_used`, rounded to one decimal.
pub fn coverage_percentage(tools_used: &[String], checklist: &[&str]) -> f64 {
    if checklist.is_empty() {
        return 0.0;
    }
    let covered = checklist
        .iter()
        .filter(|tool| tools_used.iter().any(|used| used == *tool))
        .count();
    let raw = 100.0 * covered as f64 / checklist.len() as f64;
    (raw * 10.0).round() / 10.0
}

/// Apply one invocation of `tool` to `current`.
///
/// Only successful uses of checklist tools count. Status never moves
/// backwards and `reviewed` is only reachable through an explicit review.
pub fn apply_tool_use(
    current: &ResearchProgress,
    checklist: &[&str],
    tool: &str,
    success: bool,
    now: DateTime<Utc>,
) -> ResearchProgress {
    let mut next = current.clone();
    next.last_activity = Some(now);

    if !success || !checklist.contains(&tool) {
        return next;
    }

    if !next.tools_used.iter().any(|t| t == tool) {
        next.tools_used.push(tool.to_string());
    }

    let coverage = coverage_percentage(&next.tools_used, checklist);
    next.completion_percentage = next.completion_percentage.max(coverage);

    let earned = if coverage >= 100.0 {
        ProgressStatus::Completed
    } else {
        ProgressStatus::InProgress
    };
    next.status = next.status.max(earned);
    next
}

/// True when every category of `act` is completed or reviewed in `rows`.
pub fn is_act_complete(act: &str, rows: &[ResearchProgress]) -> bool {
    let Some(act) = workflow::find_act(act) else {
        return false;
    };
    act.categories.iter().all(|category| {
        rows.iter().any(|row| {
            row.research_act == act.name
                && row.research_category == category.name
                && row.status.is_done()
        })
    })
}

/// Recommendation derived from the current progress table.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationDraft {
    pub next_act: String,
    pub next_category: String,
    pub tools: Vec<String>,
    pub priority: Priority,
    pub reasoning: String,
}

/// Pick the first unstarted category in catalog order.
///
/// Categories with no progress row count as unstarted.
pub fn next_recommendation(
    rows: &[ResearchProgress],
    current_act: Option<&str>,
) -> Option<RecommendationDraft> {
    let candidate: CategoryRef = workflow::categories().find(|c| {
        rows.iter()
            .find(|row| {
                row.research_act == c.act.name && row.research_category == c.category.name
            })
            .map(|row| row.status == ProgressStatus::NotStarted)
            .unwrap_or(true)
    })?;

    let current_pos = current_act.and_then(workflow::act_position);
    let candidate_pos = workflow::act_position(candidate.act.name);
    let priority = match (current_pos, candidate_pos) {
        (Some(cur), Some(next)) if cur == next => Priority::High,
        (Some(cur), Some(next)) if next == cur + 1 => Priority::Medium,
        (None, _) => Priority::Medium,
        _ => Priority::Low,
    };

    let reasoning = match current_act {
        Some(act) if act == candidate.act.name => format!(
            "{} has not been started yet and is the next category in the {} act.",
            candidate.category.title, candidate.act.title
        ),
        Some(act) => format!(
            "{} is the earliest unstarted category; current work is in the {} act.",
            candidate.category.title, act
        ),
        None => format!(
            "{} is the earliest unstarted category in the workflow.",
            candidate.category.title
        ),
    };

    Some(RecommendationDraft {
        next_act: candidate.act.name.to_string(),
        next_category: candidate.category.name.to_string(),
        tools: candidate.checklist().into_iter().map(String::from).collect(),
        priority,
        reasoning,
    })
}
