//! Error types for the analysis pipeline.
//!
//! Fatal invariant breaches (duplicate span ids, multi-parent spans, an
//! empty population passed to `profile()`, an unmatched L4 prefix) surface
//! as [`TprofError`] variants and are propagated with `?` all the way to the
//! CLI. Missing-parent references are *not* an error variant: they are the
//! one recoverable condition and are handled in-place by setting
//! [`crate::trace::Status::SPAN_DROP`] (see `spec.md` §7).

use thiserror::Error;

/// Errors surfaced by the `Gather`/`App` external interface boundary.
#[derive(Debug, Error)]
pub enum GatherError {
    #[error("trace {0} not found")]
    TraceNotFound(String),
    #[error("gather backend error: {0}")]
    Backend(String),
    #[error("timed out waiting for gather backend")]
    Timeout,
}

/// Errors surfaced by the analysis pipeline.
#[derive(Debug, Error)]
pub enum TprofError {
    #[error("malformed trace {trace_id}: duplicate span id {span_id}")]
    DuplicateSpanId { trace_id: String, span_id: String },

    #[error("malformed trace {trace_id}: span {span_id} has {count} parent references, expected exactly one")]
    MultipleParents {
        trace_id: String,
        span_id: String,
        count: usize,
    },

    #[error("cannot profile an empty trace-id population")]
    EmptyPopulation,

    #[error("no L4 prefix found for L3 candidate span path {span_path:?}")]
    UnmatchedPrefix { span_path: Vec<String> },

    #[error("structural signature mismatch while diffing norm/tail trees at node {node}")]
    DiffShapeMismatch { node: String },

    #[error("gather error: {0}")]
    Gather(#[from] GatherError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TprofError>;
