//! Loop audit log
//!
//! One CSV row per loop tick: placement ticks that opened a new time
//! window log as `new_window`, reconciliation ticks as `update`. The file
//! is append-only across controller restarts.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use tracing::warn;

const HEADER: &str = "timestamp,type,running_pipelines,waiting_pipelines";

/// Kind of loop tick being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    NewWindow,
    Update,
}

impl TickKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::NewWindow => "new_window",
            Self::Update => "update",
        }
    }
}

pub struct AuditLog {
    writer: BufWriter<File>,
}

impl AuditLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_new = file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(file);
        if is_new {
            writeln!(writer, "{HEADER}")?;
        }
        Ok(Self { writer })
    }

    /// Append one row; failures are logged, never propagated into a loop.
    pub fn record(&mut self, kind: TickKind, running: usize, waiting: usize) {
        let timestamp = Utc::now().timestamp_millis() as f64 / 1000.0;
        let result = writeln!(
            self.writer,
            "{:.3},{},{},{}",
            timestamp,
            kind.as_str(),
            running,
            waiting
        )
        .and_then(|_| self.writer.flush());
        if let Err(e) = result {
            warn!("Failed to append audit row: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_header_written_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n_pipelines.csv");

        {
            let mut log = AuditLog::open(&path).unwrap();
            log.record(TickKind::NewWindow, 0, 3);
        }
        {
            let mut log = AuditLog::open(&path).unwrap();
            log.record(TickKind::Update, 2, 1);
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].contains("new_window,0,3"));
        assert!(lines[2].contains("update,2,1"));
    }
}
