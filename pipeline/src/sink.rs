//! Result sinks: where the final mapping goes.

use std::collections::BTreeMap;
use std::io::{self, Write};

use common::PipelineError;

/// External collaborator accepting the final aggregated mapping.
pub trait ResultSink {
    fn publish(&mut self, counts: &BTreeMap<String, u64>) -> Result<(), PipelineError>;
}

/// Writes the mapping to stdout as key-sorted `word count` lines, one per
/// word. The part-file format of a batch job, pointed at a terminal.
pub struct StdoutSink;

impl ResultSink for StdoutSink {
    fn publish(&mut self, counts: &BTreeMap<String, u64>) -> Result<(), PipelineError> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        write_counts(&mut out, counts).map_err(|err| PipelineError::Sink(err.to_string()))
    }
}

/// `BTreeMap` iteration order gives the key-sorted output for free.
pub fn write_counts<W: Write>(out: &mut W, counts: &BTreeMap<String, u64>) -> io::Result<()> {
    for (word, total) in counts {
        writeln!(out, "{word} {total}")?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_written_key_sorted() {
        let mut counts = BTreeMap::new();
        counts.insert("the".to_string(), 2);
        counts.insert("cat".to_string(), 2);
        counts.insert("sat".to_string(), 1);

        let mut out = Vec::new();
        write_counts(&mut out, &counts).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "cat 2\nsat 1\nthe 2\n");
    }

    #[test]
    fn empty_mapping_writes_nothing() {
        let mut out = Vec::new();
        write_counts(&mut out, &BTreeMap::new()).unwrap();
        assert!(out.is_empty());
    }
}
