//! Append-only JSONL provenance log, one file per stack.

use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use crate::error::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_epoch(secs)
}

fn format_epoch(secs: u64) -> String {
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let (hours, minutes, seconds) = (time_secs / 3600, (time_secs % 3600) / 60, time_secs % 60);

    let mut year = 1970i64;
    let mut remaining = days as i64;
    loop {
        let year_days = if is_leap(year) { 366 } else { 365 };
        if remaining < year_days {
            break;
        }
        remaining -= year_days;
        year += 1;
    }
    let february = if is_leap(year) { 29 } else { 28 };
    let month_days = [31, february, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 12;
    for (i, &len) in month_days.iter().enumerate() {
        if remaining < len {
            month = i + 1;
            break;
        }
        remaining -= len;
    }

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        remaining + 1,
        hours,
        minutes,
        seconds
    )
}

fn is_leap(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

/// Run id from the wall clock, `r-{12 hex}`.
pub fn generate_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

pub fn event_log_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("events.jsonl")
}

/// Append an event to the stack's log.
pub fn append_event(state_dir: &Path, stack: &str, event: ProvenanceEvent) -> Result<()> {
    let path = event_log_path(state_dir, stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io("create", parent, e))?;
    }

    let line = serde_json::to_string(&TimestampedEvent {
        ts: now_iso8601(),
        event,
    })?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| Error::io("open", &path, e))?;
    writeln!(file, "{}", line).map_err(|e| Error::io("write", &path, e))
}

/// Every event recorded for a stack, oldest first. A missing log is empty.
pub fn read_events(state_dir: &Path, stack: &str) -> Result<Vec<TimestampedEvent>> {
    let path = event_log_path(state_dir, stack);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path).map_err(|e| Error::io("read", &path, e))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eventlog_now_iso8601_shape() {
        let ts = now_iso8601();
        assert_eq!(ts.len(), 20);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[10..11], "T");
    }

    #[test]
    fn test_eventlog_format_epoch_known_dates() {
        assert_eq!(format_epoch(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_epoch(951_782_400), "2000-02-29T00:00:00Z");
        assert_eq!(format_epoch(1_771_250_400), "2026-02-16T14:00:00Z");
        assert_eq!(format_epoch(1_798_761_599), "2026-12-31T23:59:59Z");
    }

    #[test]
    fn test_eventlog_is_leap() {
        assert!(is_leap(2000));
        assert!(!is_leap(1900));
        assert!(is_leap(2024));
        assert!(!is_leap(2026));
    }

    #[test]
    fn test_eventlog_run_id() {
        let id = generate_run_id();
        assert!(id.starts_with("r-"));
        assert_eq!(id.len(), 14);
    }

    #[test]
    fn test_eventlog_path() {
        let p = event_log_path(Path::new("/state"), "WwapiStack");
        assert_eq!(p, PathBuf::from("/state/WwapiStack/events.jsonl"));
    }

    #[test]
    fn test_eventlog_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_events(dir.path(), "S").unwrap().is_empty());
        append_event(
            dir.path(),
            "S",
            ProvenanceEvent::ApplyStarted {
                stack: "S".to_string(),
                run_id: "r-abc".to_string(),
                wwapi_version: "0.3.0".to_string(),
            },
        )
        .unwrap();
        for i in 0..2 {
            append_event(
                dir.path(),
                "S",
                ProvenanceEvent::ResourceRecorded {
                    stack: "S".to_string(),
                    resource: format!("R{}", i),
                    action: "create".to_string(),
                    hash: "blake3:x".to_string(),
                },
            )
            .unwrap();
        }
        let events = read_events(dir.path(), "S").unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0].event,
            ProvenanceEvent::ApplyStarted { .. }
        ));
        let raw = std::fs::read_to_string(event_log_path(dir.path(), "S")).unwrap();
        assert!(raw.lines().all(|l| l.contains("\"ts\"")));
    }
}
