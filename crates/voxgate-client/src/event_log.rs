//! Append-only JSON-lines event log.
//!
//! Several producers may append concurrently. Each record is written with a
//! single `write_all` on an `O_APPEND` handle so lines never interleave.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use voxgate_core::EventRecord;

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &EventRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut line = serde_json::to_vec(record).map_err(io::Error::other)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)
    }

    /// Every parseable record, oldest first. Unparseable lines are skipped.
    pub fn read_all(&self) -> io::Result<Vec<EventRecord>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use voxgate_core::VoiceSource;

    fn record(session: &str, success: bool) -> EventRecord {
        EventRecord {
            timestamp: Utc::now(),
            session_id: session.into(),
            event: "stop".into(),
            text_length: 5,
            backend: success.then(|| "scripted".to_string()),
            voice_id: None,
            voice_source: VoiceSource::Default,
            agent_id: None,
            duration_ms: success.then_some(100),
            success,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("nested/events.jsonl"));

        log.append(&record("a", true)).unwrap();
        log.append(&record("b", false)).unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.ends_with('\n'));

        let records = log.read_all().unwrap();
        assert_eq!(records[0].session_id, "a");
        assert!(!records[1].success);
        assert_eq!(records[1].error.as_deref(), Some("boom"));
    }

    #[test]
    fn garbage_lines_are_skipped_when_reading() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        fs::write(log.path(), "{not json\n").unwrap();
        log.append(&record("a", true)).unwrap();

        assert_eq!(log.read_all().unwrap().len(), 1);
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EventLog::new(dir.path().join("none.jsonl")).read_all().unwrap().is_empty());
    }
}
