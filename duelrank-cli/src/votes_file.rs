/// JSONL vote logs: one `VoteEvent` object per line.
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use duelrank_core::VoteEvent;

/// Read a vote log. Blank lines are skipped; any other bad line is an error.
pub fn read_vote_log(path: &Path) -> Result<Vec<VoteEvent>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open vote log {}", path.display()))?;

    let mut votes = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let vote: VoteEvent = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid vote", path.display(), number + 1))?;
        votes.push(vote);
    }
    Ok(votes)
}

/// Append votes to a log, creating the file if needed.
pub fn append_votes(path: &Path, votes: &[VoteEvent]) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut writer = BufWriter::new(file);
    for vote in votes {
        serde_json::to_writer(&mut writer, vote)?;
        writer.write_all(b"\n")?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use duelrank_core::{Segment, VoterId};

    fn vote(winner: i64, loser: i64, segment: Segment) -> VoteEvent {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        VoteEvent::new(winner, loser, VoterId::new("v"), segment, ts)
    }

    #[test]
    fn test_append_then_read_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("votes.jsonl");

        append_votes(&path, &[vote(2, 1, Segment::Male)]).unwrap();
        append_votes(
            &path,
            &[vote(1, 3, Segment::Female), vote(3, 2, Segment::Unspecified)],
        )
        .unwrap();

        let votes = read_vote_log(&path).unwrap();
        assert_eq!(votes.len(), 3);
        assert_eq!(votes[0], vote(2, 1, Segment::Male));
        assert_eq!(votes[0].item_a, 1);
        assert_eq!(votes[2].segment, Segment::Unspecified);
    }

    #[test]
    fn test_handwritten_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("votes.jsonl");
        std::fs::write(
            &path,
            "{\"item_a\":4,\"item_b\":7,\"winner\":7,\"voter\":\"abc\",\"segment\":\"female\",\"timestamp\":\"2024-05-01T12:00:00Z\"}\n\n",
        )
        .unwrap();

        let votes = read_vote_log(&path).unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].loser(), 4);
        assert_eq!(votes[0].voter, VoterId::new("abc"));
        assert_eq!(votes[0].segment, Segment::Female);
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("votes.jsonl");
        append_votes(&path, &[vote(1, 2, Segment::Male)]).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"not json\n")
            .unwrap();

        let err = read_vote_log(&path).unwrap_err();
        assert!(format!("{err}").contains(":2:"), "{err}");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_vote_log(&dir.path().join("missing.jsonl")).is_err());
    }
}
