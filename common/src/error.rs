//! Error taxonomy for the pipeline engine.
//!
//! Task-level failures travel as plain [`anyhow::Error`] values and are
//! contained at the worker pool boundary; the variants here are the classes
//! that change policy somewhere (retry vs skip vs abort) or decide the
//! process exit code. Fatal variants surface as `Err` from the orchestrator,
//! everything else is reported inside the run report.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The input source could not be read at all. Fatal, no retry.
    #[error("input source unavailable: {reason}")]
    SourceUnavailable { reason: String },

    /// A record's bytes are not valid UTF-8. The record is deterministically
    /// broken, so retrying is pointless; a run-level flag decides whether the
    /// record is skipped and logged or the task fails.
    #[error("record `{key}` is not valid UTF-8")]
    RecordDecode { key: String },

    /// A reduce input failed to parse as a non-negative count. This is an
    /// invariant violation in the mapper/shuffler contract, not a runtime
    /// condition, and aborts the run.
    #[error("invalid aggregate input for key `{key}`: `{value}`")]
    InvalidAggregateInput { key: String, value: String },

    /// Memory or similar resource limit hit. Fatal, unrecoverable.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The result sink rejected the final mapping.
    #[error("result sink error: {0}")]
    Sink(String),
}

impl PipelineError {
    /// Whether this error class may not be retried under any policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::SourceUnavailable { .. }
                | PipelineError::InvalidAggregateInput { .. }
                | PipelineError::ResourceExhausted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classes() {
        assert!(PipelineError::SourceUnavailable {
            reason: "no such file".into()
        }
        .is_fatal());
        assert!(PipelineError::InvalidAggregateInput {
            key: "the".into(),
            value: "-1".into()
        }
        .is_fatal());
        assert!(!PipelineError::RecordDecode {
            key: "input.txt:3".into()
        }
        .is_fatal());
    }

    #[test]
    fn decode_error_survives_anyhow_roundtrip() {
        // The engine downcasts task failures to pick a policy, so the
        // variant must be recoverable from an anyhow chain.
        let err: anyhow::Error = PipelineError::RecordDecode {
            key: "input.txt:3".into(),
        }
        .into();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::RecordDecode { key }) => assert_eq!(key, "input.txt:3"),
            other => panic!("unexpected downcast: {other:?}"),
        }
    }
}
