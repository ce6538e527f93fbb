//! Checkpoint snapshot format.
//!
//! JSON Lines: one header, one line per work item in first-sighting
//! order, one trailer carrying the item count and a SHA-256 digest of
//! the item lines. A missing trailer means the write was cut short.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{CheckpointError, CheckpointResult};
use crate::types::work::{WorkItem, WorkStatus};

pub const FORMAT: &str = "enrichment-checkpoint";
pub const VERSION: u32 = 1;

/// Identity and baseline of the run that last wrote the checkpoint.
///
/// Lets a reader in another process compute throughput and ETA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMarker {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,

    /// Items claimable when Running began
    pub total: usize,

    /// Terminal items already present when Running began
    pub baseline_terminal: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Header {
    format: String,
    version: u32,
    written_at: DateTime<Utc>,
    run: Option<RunMarker>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Trailer {
    end: bool,
    count: usize,
    sha256: String,
}

/// Number of items per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn tally<'a>(items: impl IntoIterator<Item = &'a WorkItem>) -> Self {
        let mut counts = Self::default();
        for item in items {
            match item.status {
                WorkStatus::Pending => counts.pending += 1,
                WorkStatus::InProgress => counts.in_progress += 1,
                WorkStatus::Succeeded => counts.succeeded += 1,
                WorkStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.succeeded + self.failed
    }

    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Point-in-time copy of every work item.
#[derive(Debug, Clone)]
pub struct CheckpointSnapshot {
    pub items: Vec<WorkItem>,
    pub run: Option<RunMarker>,
    pub taken_at: DateTime<Utc>,
}

impl CheckpointSnapshot {
    pub fn counts(&self) -> StatusCounts {
        StatusCounts::tally(&self.items)
    }

    /// Failed items, for operator inspection.
    pub fn failed(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter().filter(|i| i.status == WorkStatus::Failed)
    }
}

/// Serialize items into the on-disk format.
pub fn encode(items: &[WorkItem], run: Option<&RunMarker>, written_at: DateTime<Utc>) -> CheckpointResult<Vec<u8>> {
    let mut out = Vec::new();
    let header = Header {
        format: FORMAT.to_string(),
        version: VERSION,
        written_at,
        run: run.cloned(),
    };
    serde_json::to_writer(&mut out, &header)?;
    out.push(b'\n');

    let mut hasher = Sha256::new();
    for item in items {
        let mut line = serde_json::to_vec(item)?;
        line.push(b'\n');
        hasher.update(&line);
        out.extend_from_slice(&line);
    }

    let trailer = Trailer {
        end: true,
        count: items.len(),
        sha256: format!("{:x}", hasher.finalize()),
    };
    serde_json::to_writer(&mut out, &trailer)?;
    out.push(b'\n');

    Ok(out)
}

/// Parse and validate a snapshot. Any defect is a corruption error.
pub fn decode(path: &Path, bytes: &[u8]) -> CheckpointResult<(Vec<WorkItem>, Option<RunMarker>)> {
    let corrupt = |line: usize, reason: String| CheckpointError::Corruption {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let text = std::str::from_utf8(bytes).map_err(|e| corrupt(0, format!("not UTF-8: {e}")))?;
    let body = text
        .strip_suffix('\n')
        .ok_or_else(|| corrupt(0, "missing final newline (truncated write)".to_string()))?;

    let lines: Vec<&str> = body.split('\n').collect();
    if lines.len() < 2 {
        return Err(corrupt(lines.len(), "missing end marker (truncated write)".to_string()));
    }

    let header: Header =
        serde_json::from_str(lines[0]).map_err(|e| corrupt(1, format!("invalid header: {e}")))?;
    if header.format != FORMAT {
        return Err(corrupt(1, format!("unexpected format {:?}", header.format)));
    }
    if header.version != VERSION {
        return Err(corrupt(1, format!("unsupported version {}", header.version)));
    }

    let last = lines.len() - 1;
    let trailer: Trailer = serde_json::from_str(lines[last])
        .map_err(|_| corrupt(last + 1, "missing end marker (truncated write)".to_string()))?;
    if !trailer.end {
        return Err(corrupt(last + 1, "end marker not set".to_string()));
    }

    let mut hasher = Sha256::new();
    let mut items = Vec::with_capacity(last.saturating_sub(1));
    let mut keys = HashSet::new();

    for (idx, line) in lines[1..last].iter().enumerate() {
        let line_no = idx + 2;
        if serde_json::from_str::<Trailer>(line).is_ok() {
            return Err(corrupt(line_no, "data after end marker".to_string()));
        }
        let item: WorkItem = serde_json::from_str(line)
            .map_err(|e| corrupt(line_no, format!("unreadable record: {e}")))?;
        if !keys.insert(item.key.clone()) {
            return Err(corrupt(line_no, format!("duplicate key {}", item.key)));
        }
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
        items.push(item);
    }

    if trailer.count != items.len() {
        return Err(corrupt(
            last + 1,
            format!("end marker expects {} records, found {}", trailer.count, items.len()),
        ));
    }
    let digest = format!("{:x}", hasher.finalize());
    if trailer.sha256 != digest {
        return Err(corrupt(last + 1, "digest mismatch".to_string()));
    }

    Ok((items, header.run))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::work::WorkKey;

    fn items() -> Vec<WorkItem> {
        let now = Utc::now();
        ["chat", "chien", "oiseau"]
            .iter()
            .map(|w| WorkItem::new(WorkKey::parse(w, "fr").unwrap(), now))
            .collect()
    }

    fn path() -> &'static Path {
        Path::new("test.checkpoint.jsonl")
    }

    fn reason(err: CheckpointError) -> String {
        match err {
            CheckpointError::Corruption { reason, .. } => reason,
            other => panic!("expected corruption, got {other}"),
        }
    }

    #[test]
    fn test_encode_decode() {
        let marker = RunMarker {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            total: 3,
            baseline_terminal: 0,
        };
        let original = items();
        let bytes = encode(&original, Some(&marker), Utc::now()).unwrap();
        let (decoded, run) = decode(path(), &bytes).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded[2].key.word, "oiseau");
        assert_eq!(run, Some(marker));
    }

    #[test]
    fn test_empty_snapshot() {
        let bytes = encode(&[], None, Utc::now()).unwrap();
        let (decoded, run) = decode(path(), &bytes).unwrap();
        assert!(decoded.is_empty());
        assert!(run.is_none());
    }

    #[test]
    fn test_truncation_is_detected_at_every_cut() {
        let bytes = encode(&items(), None, Utc::now()).unwrap();
        for cut in 0..bytes.len() {
            let result = decode(path(), &bytes[..cut]);
            assert!(result.is_err(), "truncation at byte {cut} went unnoticed");
        }
    }

    #[test]
    fn test_tampered_record_fails_digest() {
        let bytes = encode(&items(), None, Utc::now()).unwrap();
        let text = String::from_utf8(bytes).unwrap().replace("\"chien\"", "\"chiot\"");
        let err = decode(path(), text.as_bytes()).unwrap_err();
        assert_eq!(reason(err), "digest mismatch");
    }

    #[test]
    fn test_dropped_record_fails_count() {
        let bytes = encode(&items(), None, Utc::now()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let kept: Vec<&str> = text.lines().enumerate().filter(|(i, _)| *i != 2).map(|(_, l)| l).collect();
        let err = decode(path(), format!("{}\n", kept.join("\n")).as_bytes()).unwrap_err();
        assert!(reason(err).contains("expects 3 records"));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let bytes = encode(&items(), None, Utc::now()).unwrap();
        let text = String::from_utf8(bytes).unwrap().replacen("\"version\":1", "\"version\":9", 1);
        let err = decode(path(), text.as_bytes()).unwrap_err();
        assert!(reason(err).contains("unsupported version"));
    }

    #[test]
    fn test_counts() {
        let mut all = items();
        let now = Utc::now();
        all[0].claim(now);
        all[0].succeed(now);
        all[1].claim(now);
        let counts = StatusCounts::tally(&all);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.in_progress, 1);
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.terminal(), 1);
        assert_eq!(counts.total(), 3);
    }
}
