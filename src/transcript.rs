//! # Transcript Log
//!
//! Appends one line per translated segment to a daily text file:
//!
//! ```text
//! logs/transcripts_20250101.txt
//! [2025-01-01T12:00:00.123456+00:00] en->no: hei verden
//! ```
//!
//! Files are keyed by UTC day and opened in append mode for every line. Each line is
//! written with a single `write_all`, so lines from concurrent sessions do not interleave.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::SinkError;

/// Destination for transcript lines.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn append(&self, src_lang: &str, tgt_lang: &str, text: &str) -> Result<(), SinkError>;

    /// Where today's lines are going, for display to clients.
    fn location(&self) -> String;
}

/// Daily transcript files under a log directory.
#[derive(Debug, Clone)]
pub struct FileTranscriptLog {
    dir: PathBuf,
}

impl FileTranscriptLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[cfg(test)]
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Log file for the given UTC day.
    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("transcripts_{}.txt", day.format("%Y%m%d")))
    }

    pub fn current_path(&self) -> PathBuf {
        self.path_for(Utc::now().date_naive())
    }

    /// Create the log directory ahead of the first write.
    pub async fn ensure_dir(&self) -> Result<(), SinkError> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }
}

/// `[<ISO8601 UTC>] <src>-><tgt>: <text>\n`
pub fn format_line(timestamp: DateTime<Utc>, src_lang: &str, tgt_lang: &str, text: &str) -> String {
    format!("[{}] {}->{}: {}\n", timestamp.to_rfc3339(), src_lang, tgt_lang, text)
}

#[async_trait]
impl TranscriptSink for FileTranscriptLog {
    async fn append(&self, src_lang: &str, tgt_lang: &str, text: &str) -> Result<(), SinkError> {
        let now = Utc::now();
        let line = format_line(now, src_lang, tgt_lang, text);

        self.ensure_dir().await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(now.date_naive()))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    fn location(&self) -> String {
        self.current_path().display().to_string()
    }
}
