//! Work items - the durable, uniquely-keyed unit of enrichment work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;
use crate::extract::normalize::{normalize_language, normalize_word};

/// Identity of a work item: normalized word plus language tag.
///
/// Two candidates that normalize to the same key are the same
/// piece of work, regardless of which document they came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkKey {
    /// Canonical word form (see [`normalize_word`])
    pub word: String,

    /// Lowercased language tag, e.g. `fr` or `pt-br`
    pub language: String,
}

impl WorkKey {
    /// Build a key from raw text, normalizing both parts.
    pub fn parse(raw_word: &str, raw_language: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            word: normalize_word(raw_word)?,
            language: normalize_language(raw_language)?,
        })
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.language, self.word)
    }
}

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    #[default]
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl WorkStatus {
    /// Succeeded and Failed admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkStatus::Succeeded | WorkStatus::Failed)
    }

    /// Whether `self -> next` respects the monotonic lifecycle.
    ///
    /// Pending -> InProgress -> {Succeeded | Pending | Failed}.
    pub fn can_transition_to(&self, next: WorkStatus) -> bool {
        matches!(
            (self, next),
            (WorkStatus::Pending, WorkStatus::InProgress)
                | (WorkStatus::InProgress, WorkStatus::Succeeded)
                | (WorkStatus::InProgress, WorkStatus::Pending)
                | (WorkStatus::InProgress, WorkStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Pending => "pending",
            WorkStatus::InProgress => "in_progress",
            WorkStatus::Succeeded => "succeeded",
            WorkStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable unit of work.
///
/// Created on first sighting of a key, never deleted. Mutated only
/// through the checkpoint store so the transition history stays
/// monotonic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(flatten)]
    pub key: WorkKey,

    pub status: WorkStatus,

    /// Attempts started (incremented on claim)
    pub attempt_count: u32,

    /// Most recent failure, kept after success or force-retry for audit
    pub last_error: Option<String>,

    /// Earliest instant a requeued item may be claimed again
    #[serde(default)]
    pub retry_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// Create a new pending item.
    pub fn new(key: WorkKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            status: WorkStatus::Pending,
            attempt_count: 0,
            last_error: None,
            retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a worker may claim this item at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == WorkStatus::Pending && self.retry_at.map_or(true, |at| at <= now)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pending -> InProgress, charging one attempt.
    pub(crate) fn claim(&mut self, now: DateTime<Utc>) {
        self.status = WorkStatus::InProgress;
        self.attempt_count += 1;
        self.retry_at = None;
        self.updated_at = now;
    }

    /// InProgress -> Succeeded.
    pub fn succeed(&mut self, now: DateTime<Utc>) {
        self.status = WorkStatus::Succeeded;
        self.retry_at = None;
        self.updated_at = now;
    }

    /// InProgress -> Pending, eligible again at `retry_at`.
    pub fn requeue(&mut self, error: impl Into<String>, retry_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = WorkStatus::Pending;
        self.last_error = Some(error.into());
        self.retry_at = Some(retry_at);
        self.updated_at = now;
    }

    /// InProgress -> Failed (terminal).
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = WorkStatus::Failed;
        self.last_error = Some(error.into());
        self.retry_at = None;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalizes_case_and_composition() {
        let decomposed = WorkKey::parse("Pe\u{0301}che", "FR").unwrap();
        let composed = WorkKey::parse("péche", "fr").unwrap();
        assert_eq!(decomposed, composed);
        assert_eq!(composed.to_string(), "fr:péche");
    }

    #[test]
    fn test_transitions_are_monotonic() {
        use WorkStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Succeeded));
        assert!(InProgress.can_transition_to(Pending));
        assert!(InProgress.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(InProgress));
        assert!(!Succeeded.can_transition_to(Succeeded));
    }

    #[test]
    fn test_claim_charges_attempt() {
        let now = Utc::now();
        let mut item = WorkItem::new(WorkKey::parse("chat", "fr").unwrap(), now);
        assert!(item.is_claimable(now));

        item.claim(now);
        assert_eq!(item.status, WorkStatus::InProgress);
        assert_eq!(item.attempt_count, 1);
        assert!(!item.is_claimable(now));
    }

    #[test]
    fn test_requeued_item_waits_for_retry_at() {
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(30);
        let mut item = WorkItem::new(WorkKey::parse("chien", "fr").unwrap(), now);
        item.claim(now);
        item.requeue("rate limited", later, now);

        assert!(!item.is_claimable(now));
        assert!(item.is_claimable(later));
        assert_eq!(item.last_error.as_deref(), Some("rate limited"));
    }
}
