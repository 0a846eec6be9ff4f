//! Input sources: where raw records come from.
//!
//! A source turns some external store into keyed line records. The engine
//! only ever sees the trait, so storage details stay out of the pipeline.

use std::fs;

use bytes::Bytes;
use glob::glob;
use tracing::info;

use common::{PipelineError, Record};

/// External collaborator supplying raw `(key, line)` records.
pub trait InputSource {
    fn fetch_records(&self) -> Result<Vec<Record>, PipelineError>;
}

/// Reads every file matching a glob pattern and yields one record per
/// line, keyed `<path>:<line-number>`.
///
/// A pattern that matches nothing yields zero records; only an invalid
/// pattern or an unreadable file is `SourceUnavailable`.
pub struct FileSource {
    pattern: String,
}

impl FileSource {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

impl InputSource for FileSource {
    fn fetch_records(&self) -> Result<Vec<Record>, PipelineError> {
        let paths = glob(&self.pattern).map_err(|err| PipelineError::SourceUnavailable {
            reason: format!("bad glob pattern `{}`: {err}", self.pattern),
        })?;

        let mut records = Vec::new();
        let mut files = 0usize;

        for entry in paths {
            let path = entry.map_err(|err| PipelineError::SourceUnavailable {
                reason: format!("failed to walk `{}`: {err}", self.pattern),
            })?;
            if path.is_dir() {
                continue;
            }

            let contents = fs::read(&path).map_err(|err| PipelineError::SourceUnavailable {
                reason: format!("failed to read `{}`: {err}", path.display()),
            })?;

            let name = path.display().to_string();
            for (line_no, line) in lines(&contents).enumerate() {
                records.push(Record::new(
                    format!("{name}:{line_no}"),
                    Bytes::copy_from_slice(line),
                ));
            }
            files += 1;
        }

        info!(files, records = records.len(), "fetched input records");
        Ok(records)
    }
}

/// In-memory source, used by tests and demos.
pub struct MemorySource {
    name: String,
    lines: Vec<Bytes>,
}

impl MemorySource {
    pub fn new<I, L>(name: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Bytes>,
    {
        Self {
            name: name.into(),
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl InputSource for MemorySource {
    fn fetch_records(&self) -> Result<Vec<Record>, PipelineError> {
        Ok(self
            .lines
            .iter()
            .enumerate()
            .map(|(line_no, line)| Record::new(format!("{}:{line_no}", self.name), line.clone()))
            .collect())
    }
}

/// Split file contents on newlines, tolerating CRLF and a trailing
/// newline on the last line.
fn lines(contents: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut lines: Vec<&[u8]> = contents.split(|byte| *byte == b'\n').collect();
    if matches!(lines.last(), Some(last) if last.is_empty()) {
        lines.pop();
    }
    lines
        .into_iter()
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}
