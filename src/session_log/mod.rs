//! Append-only session log (`session-log.txt`)
//!
//! One line per entry: `[<rfc3339>] Session <n>: <message>`. Lines that do not
//! match are kept in the file but skipped by [`SessionLog::entries`].

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use crate::config::ProjectPaths;
use crate::error::{BuilderError, Result};
use crate::store::FileLock;

static ENTRY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(?P<at>[^\]]+)\] Session (?P<n>\d+): (?P<msg>.*)$").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEntry {
    pub at: DateTime<Utc>,
    pub session: u32,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SessionLog {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl SessionLog {
    pub fn open(paths: &ProjectPaths, lock_timeout: Duration) -> Self {
        Self {
            path: paths.session_log(),
            lock_path: paths.session_log_lock(),
            lock_timeout,
        }
    }

    /// Append one entry; newlines in `message` are folded into spaces
    pub fn append(&self, session: u32, message: &str) -> Result<SessionEntry> {
        let message = message.split_whitespace().collect::<Vec<_>>().join(" ");
        if message.is_empty() {
            return Err(BuilderError::validation(None, "log message is empty"));
        }
        let entry = SessionEntry {
            at: Utc::now(),
            session,
            message,
        };

        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| BuilderError::io(&self.path, err))?;
        writeln!(
            file,
            "[{}] Session {}: {}",
            entry.at.to_rfc3339_opts(SecondsFormat::Secs, true),
            entry.session,
            entry.message
        )
        .and_then(|_| file.sync_all())
        .map_err(|err| BuilderError::io(&self.path, err))?;
        tracing::debug!(session, "Appended session log entry");
        Ok(entry)
    }

    pub fn entries(&self) -> Result<Vec<SessionEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BuilderError::io(&self.path, err)),
        };
        Ok(content
            .lines()
            .filter_map(|line| {
                let caps = ENTRY_LINE.captures(line)?;
                Some(SessionEntry {
                    at: DateTime::parse_from_rfc3339(&caps["at"]).ok()?.with_timezone(&Utc),
                    session: caps["n"].parse().ok()?,
                    message: caps["msg"].to_string(),
                })
            })
            .collect())
    }

    /// Highest session number so far, or 1 for an empty log
    pub fn current_session_number(&self) -> Result<u32> {
        Ok(self.last_session()?.unwrap_or(1))
    }

    pub fn next_session_number(&self) -> Result<u32> {
        Ok(self.last_session()?.map_or(1, |n| n + 1))
    }

    fn last_session(&self) -> Result<Option<u32>> {
        Ok(self.entries()?.iter().map(|e| e.session).max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn entries_round_trip_and_numbering() {
        let dir = tempdir().unwrap();
        let log = SessionLog::open(&ProjectPaths::new(dir.path()), Duration::from_secs(1));
        assert_eq!(log.next_session_number().unwrap(), 1);

        log.append(1, "initialised feature list").unwrap();
        log.append(2, "feature 0 passing\nfeature 1 started").unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("session-log.txt"))
            .unwrap()
            .write_all(b"free-form note from a human\n")
            .unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].message, "feature 0 passing feature 1 started");
        assert_eq!(log.current_session_number().unwrap(), 2);
        assert_eq!(log.next_session_number().unwrap(), 3);
    }

    #[test]
    fn blank_message_is_rejected() {
        let dir = tempdir().unwrap();
        let log = SessionLog::open(&ProjectPaths::new(dir.path()), Duration::from_secs(1));
        assert!(log.append(1, "  \n ").is_err());
    }
}
