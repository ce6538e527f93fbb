//! Parallel workers against one checkpoint.

mod common;

use std::time::Duration;

use common::{fast_config, key, word_list, Harness};
use enrichment::{MockEnricher, ServiceError, WorkStatus};

const WORDS: [&str; 12] = [
    "chat", "chien", "oiseau", "poisson", "cheval", "vache", "mouton", "cochon", "lapin", "souris",
    "canard", "renard",
];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_workers_enrich_each_word_once() {
    let harness = Harness::new(MockEnricher::new().with_delay(Duration::from_millis(10)))
        .with_config(fast_config().with_concurrency(4));

    let summary = harness
        .run(vec![
            word_list("a.txt", &WORDS[..8]),
            word_list("b.txt", &WORDS[4..]),
        ])
        .await;

    assert_eq!(summary.succeeded, WORDS.len());
    assert_eq!(summary.processed, WORDS.len());
    assert_eq!(harness.records.len(), WORDS.len());
    assert_eq!(harness.records.write_calls(), WORDS.len());
    for word in WORDS {
        assert_eq!(harness.enricher.text_calls(word), 1, "{word}");
        assert_eq!(harness.enricher.image_calls(word), 1, "{word}");
    }

    let max = harness.enricher.max_concurrency();
    assert!(max > 1, "workers never overlapped");
    assert!(max <= 4, "more calls in flight than workers: {max}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_retries_do_not_duplicate_records() {
    let enricher = MockEnricher::new()
        .fail_text_times("chat", 2, ServiceError::RateLimited { retry_after: None })
        .fail_image("lapin", ServiceError::Network("reset".into()))
        .reject("xyz", ServiceError::InvalidInput("not a word".into()));
    let harness = Harness::new(enricher).with_config(fast_config().with_concurrency(3));

    let mut words = WORDS.to_vec();
    words.push("xyz");
    let summary = harness.run(vec![word_list("a.txt", &words)]).await;

    assert_eq!(summary.succeeded, WORDS.len());
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.pending_remaining, 0);
    assert_eq!(harness.records.len(), WORDS.len());
    assert_eq!(harness.records.write_calls(), WORDS.len());

    let chat = harness.item("chat").await;
    assert_eq!(chat.status, WorkStatus::Succeeded);
    assert_eq!(chat.attempt_count, 3);
    assert_eq!(harness.item("lapin").await.attempt_count, 2);
    assert!(!harness.records.keys().contains(&key("xyz")));
}

#[tokio::test]
async fn test_record_store_outage_is_retried() {
    let harness = Harness::new(MockEnricher::new());
    harness.records.fail_next_writes(1);

    let summary = harness.run(vec![word_list("a.txt", &["chat"])]).await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(harness.item("chat").await.attempt_count, 2);
    assert_eq!(harness.records.write_calls(), 2);
    assert_eq!(harness.records.len(), 1);
}
