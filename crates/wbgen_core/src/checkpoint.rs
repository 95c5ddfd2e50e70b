use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

/// Durable record of identifiers the publish loop has finished with.
pub trait CheckpointLog {
    fn contains(&self, id: &str) -> bool;
    fn record(&mut self, id: &str) -> Result<()>;
}

/// Append-only text file, one identifier per line.
#[derive(Debug)]
pub struct ProcessedLog {
    path: PathBuf,
    processed: HashSet<String>,
    writer: Option<File>,
    needs_newline: bool,
}

impl ProcessedLog {
    /// Reads the whole log; a missing file is an empty log.
    pub fn open(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => String::new(),
            Err(error) => {
                return Err(error).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let processed = content
            .lines()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .collect::<HashSet<_>>();
        info!(
            path = %path.display(),
            processed = processed.len(),
            "loaded checkpoint log"
        );
        Ok(Self {
            path: path.to_path_buf(),
            processed,
            writer: None,
            // a killed process can leave a partial last line
            needs_newline: !content.is_empty() && !content.ends_with('\n'),
        })
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    fn writer(&mut self) -> Result<&mut File> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("failed to open {}", self.path.display()))?;
            self.writer = Some(file);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("checkpoint writer unavailable"))
    }
}

impl CheckpointLog for ProcessedLog {
    fn contains(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    fn record(&mut self, id: &str) -> Result<()> {
        if self.processed.contains(id) {
            return Ok(());
        }
        let path = self.path.clone();
        let separator = if self.needs_newline { "\n" } else { "" };
        let writer = self.writer()?;
        writeln!(writer, "{separator}{id}")
            .with_context(|| format!("failed to append to {}", path.display()))?;
        writer
            .sync_data()
            .with_context(|| format!("failed to sync {}", path.display()))?;
        self.needs_newline = false;
        self.processed.insert(id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_an_empty_log() {
        let temp = tempdir().expect("tempdir");
        let log = ProcessedLog::open(&temp.path().join("cache").join("processed.txt"))
            .expect("open");
        assert!(log.is_empty());
        assert!(!log.contains("Q1"));
    }

    #[test]
    fn records_survive_reopen() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("cache").join("processed.txt");

        let mut log = ProcessedLog::open(&path).expect("open");
        log.record("Q1").expect("record");
        log.record("Q2").expect("record");
        assert!(log.contains("Q1"));
        drop(log);

        assert_eq!(fs::read_to_string(&path).expect("read"), "Q1\nQ2\n");
        let reopened = ProcessedLog::open(&path).expect("reopen");
        assert_eq!(reopened.len(), 2);
        assert!(reopened.contains("Q2"));
    }

    #[test]
    fn duplicate_records_append_once() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("processed.txt");
        let mut log = ProcessedLog::open(&path).expect("open");
        log.record("Q7").expect("record");
        log.record("Q7").expect("record");
        assert_eq!(fs::read_to_string(&path).expect("read"), "Q7\n");
    }

    #[test]
    fn blank_lines_and_whitespace_are_ignored() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("processed.txt");
        fs::write(&path, "Q1\n\n  Q2  \r\n").expect("seed");
        let log = ProcessedLog::open(&path).expect("open");
        assert_eq!(log.len(), 2);
        assert!(log.contains("Q2"));
    }

    #[test]
    fn partial_last_line_is_terminated_before_append() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("processed.txt");
        fs::write(&path, "Q1\nQ2").expect("seed");
        let mut log = ProcessedLog::open(&path).expect("open");
        log.record("Q3").expect("record");
        assert_eq!(fs::read_to_string(&path).expect("read"), "Q1\nQ2\nQ3\n");
    }

    #[test]
    fn appends_after_existing_content() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("processed.txt");
        fs::write(&path, "Q1\n").expect("seed");
        let mut log = ProcessedLog::open(&path).expect("open");
        log.record("Q3").expect("record");
        assert_eq!(fs::read_to_string(&path).expect("read"), "Q1\nQ3\n");
    }
}
