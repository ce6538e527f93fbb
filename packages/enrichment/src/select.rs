//! Selector - cross-document deduplication into one ordered work list.
//!
//! Pure function: identical inputs always yield identical output
//! order, which resume testing relies on. It never touches the
//! checkpoint store.

use std::collections::HashSet;

use indexmap::IndexSet;
use serde::Serialize;
use tracing::trace;

use crate::types::candidate::Candidate;
use crate::types::work::WorkKey;

/// Keys that must not be scheduled again.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    /// Keys with a result already in the record store
    pub enriched: HashSet<WorkKey>,

    /// Keys Succeeded in the checkpoint
    pub succeeded: HashSet<WorkKey>,

    /// Keys terminally Failed in the checkpoint
    pub failed: HashSet<WorkKey>,

    /// Schedule failed keys anyway
    pub force_retry: bool,
}

impl Exclusions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enriched(mut self, keys: impl IntoIterator<Item = WorkKey>) -> Self {
        self.enriched.extend(keys);
        self
    }

    pub fn with_succeeded(mut self, keys: impl IntoIterator<Item = WorkKey>) -> Self {
        self.succeeded.extend(keys);
        self
    }

    pub fn with_failed(mut self, keys: impl IntoIterator<Item = WorkKey>) -> Self {
        self.failed.extend(keys);
        self
    }

    pub fn with_force_retry(mut self, force: bool) -> Self {
        self.force_retry = force;
        self
    }
}

/// Counters describing what the selector dropped and why.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelectionStats {
    pub seen: usize,
    pub invalid: usize,
    pub duplicates: usize,
    pub already_enriched: usize,
    pub already_succeeded: usize,
    pub failed_skipped: usize,
}

/// Ordered, duplicate-free work list.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub keys: Vec<WorkKey>,
    pub stats: SelectionStats,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Distinct valid keys in first-occurrence order.
///
/// Used to ask the record store which keys already exist before
/// calling [`select`].
pub fn distinct_keys<'a>(candidates: impl IntoIterator<Item = &'a Candidate>) -> Vec<WorkKey> {
    let keys: IndexSet<WorkKey> = candidates.into_iter().filter_map(|c| c.key().ok()).collect();
    keys.into_iter().collect()
}

/// Merge candidates into the work list for this run.
///
/// First occurrence wins; enriched and succeeded keys are always
/// dropped; failed keys are dropped unless `force_retry` is set.
pub fn select(candidates: impl IntoIterator<Item = Candidate>, exclusions: &Exclusions) -> Selection {
    let mut stats = SelectionStats::default();
    let mut seen: HashSet<WorkKey> = HashSet::new();
    let mut keys = Vec::new();

    for candidate in candidates {
        stats.seen += 1;

        let key = match candidate.key() {
            Ok(key) => key,
            Err(e) => {
                trace!(document = %candidate.document, line = candidate.line, error = %e, "skipping candidate");
                stats.invalid += 1;
                continue;
            }
        };

        if !seen.insert(key.clone()) {
            stats.duplicates += 1;
            continue;
        }

        if exclusions.enriched.contains(&key) {
            stats.already_enriched += 1;
        } else if exclusions.succeeded.contains(&key) {
            stats.already_succeeded += 1;
        } else if exclusions.failed.contains(&key) && !exclusions.force_retry {
            stats.failed_skipped += 1;
        } else {
            keys.push(key);
        }
    }

    Selection { keys, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn doc(id: &str, words: &[&str]) -> Vec<Candidate> {
        words
            .iter()
            .enumerate()
            .map(|(i, w)| Candidate::new(*w, id, "fr").at_line(i + 1))
            .collect()
    }

    fn key(word: &str) -> WorkKey {
        WorkKey::parse(word, "fr").unwrap()
    }

    fn words(selection: &Selection) -> Vec<&str> {
        selection.keys.iter().map(|k| k.word.as_str()).collect()
    }

    #[test]
    fn test_overlapping_documents_dedupe() {
        let mut candidates = doc("A", &["chat", "chien"]);
        candidates.extend(doc("B", &["chien", "oiseau"]));

        let selection = select(candidates, &Exclusions::new());
        assert_eq!(words(&selection), vec!["chat", "chien", "oiseau"]);
        assert_eq!(selection.stats.duplicates, 1);
    }

    #[test]
    fn test_normalized_forms_dedupe() {
        let candidates = doc("A", &["École", "e\u{0301}cole", "ÉCOLE,"]);
        let selection = select(candidates, &Exclusions::new());
        assert_eq!(words(&selection), vec!["école"]);
    }

    #[test]
    fn test_same_word_different_language_is_distinct() {
        let candidates = vec![
            Candidate::new("chat", "A", "fr"),
            Candidate::new("chat", "A", "en"),
        ];
        assert_eq!(select(candidates, &Exclusions::new()).len(), 2);
    }

    #[test]
    fn test_already_enriched_excluded() {
        let exclusions = Exclusions::new().with_enriched([key("chat")]);
        let selection = select(doc("A", &["chat", "chien"]), &exclusions);
        assert_eq!(words(&selection), vec!["chien"]);
        assert_eq!(selection.stats.already_enriched, 1);
    }

    #[test]
    fn test_failed_excluded_unless_forced() {
        let exclusions = Exclusions::new().with_failed([key("xyz123")]);
        let selection = select(doc("A", &["xyz123", "chat"]), &exclusions);
        assert_eq!(words(&selection), vec!["chat"]);
        assert_eq!(selection.stats.failed_skipped, 1);

        let forced = exclusions.with_force_retry(true);
        let selection = select(doc("A", &["xyz123", "chat"]), &forced);
        assert_eq!(words(&selection), vec!["xyz123", "chat"]);
    }

    #[test]
    fn test_succeeded_never_rescheduled_even_when_forced() {
        let exclusions = Exclusions::new()
            .with_succeeded([key("chat")])
            .with_force_retry(true);
        let selection = select(doc("A", &["chat"]), &exclusions);
        assert!(selection.is_empty());
        assert_eq!(selection.stats.already_succeeded, 1);
    }

    #[test]
    fn test_invalid_candidates_skipped_silently() {
        let selection = select(doc("A", &["", "42", "chat", "..."]), &Exclusions::new());
        assert_eq!(words(&selection), vec!["chat"]);
        assert_eq!(selection.stats.invalid, 3);
        assert_eq!(selection.stats.seen, 4);
    }

    #[test]
    fn test_distinct_keys_preserves_order() {
        let candidates = doc("A", &["oiseau", "chat", "oiseau", "1"]);
        let keys = distinct_keys(&candidates);
        assert_eq!(keys, vec![key("oiseau"), key("chat")]);
    }

    proptest! {
        #[test]
        fn prop_selection_is_deterministic_and_unique(
            raw in proptest::collection::vec("[a-cA-C]{1,3}", 0..40)
        ) {
            let refs: Vec<&str> = raw.iter().map(String::as_str).collect();
            let first = select(doc("A", &refs), &Exclusions::new());
            let second = select(doc("A", &refs), &Exclusions::new());
            prop_assert_eq!(&first.keys, &second.keys);

            let unique: HashSet<&WorkKey> = first.keys.iter().collect();
            prop_assert_eq!(unique.len(), first.keys.len());

            let expected: IndexSet<String> = raw.iter().map(|w| w.to_lowercase()).collect();
            let got: Vec<String> = first.keys.iter().map(|k| k.word.clone()).collect();
            prop_assert_eq!(got, expected.into_iter().collect::<Vec<_>>());
        }
    }
}
