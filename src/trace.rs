//! Canonical in-memory trace representation (`spec.md` §3, component C1).

use crate::config::AbbrevMap;
use crate::error::{Result, TprofError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Synthetic root span id every [`Trace`] is rooted at.
pub const MASTER_SPAN_NAME: &str = "THEMASTERSPAN";

/// A single anomaly bit. Currently only one is defined: a referenced parent
/// span was missing from the trace and got rewritten to the master span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status(u8);

impl Status {
    pub const SPAN_DROP: Status = Status(1);

    pub fn set(&mut self, bit: Status) {
        self.0 |= bit.0;
    }

    pub fn contains(&self, bit: Status) -> bool {
        self.0 & bit.0 != 0
    }

    pub fn any(&self) -> bool {
        self.0 != 0
    }
}

/// A raw span record as received from a [`crate::gather::Gather`]
/// implementation, before abbreviation and master-span synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSpan {
    pub span_id: String,
    pub service_name: String,
    pub operation_name: String,
    /// Nanoseconds, unix epoch.
    pub start_time: i64,
    pub end_time: i64,
    /// Parent span ids. Empty means "attach to master span" (no error);
    /// more than one is a fatal [`TprofError::MultipleParents`].
    pub references: Vec<String>,
}

/// An immutable span. Exactly one parent reference except for the master
/// span, which has none. Children are observable sorted by start time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub service: String,
    pub operation: String,
    pub start_time: i64,
    pub end_time: i64,
    pub refs: Vec<String>,
    pub children: Vec<String>,
}

impl Span {
    /// `service` if `operation` is empty, else `service:operation`.
    pub fn func_name(&self) -> String {
        if self.operation.is_empty() {
            self.service.clone()
        } else {
            format!("{}:{}", self.service, self.operation)
        }
    }

    pub fn parent(&self) -> Option<&str> {
        self.refs.first().map(|s| s.as_str())
    }
}

/// Splits `"service:operation"` back into its parts, the inverse of
/// [`Span::func_name`].
pub fn split_func_name(func_name: &str) -> (&str, &str) {
    match func_name.split_once(':') {
        Some((serv, op)) => (serv, op),
        None => (func_name, ""),
    }
}

/// A tree of spans representing one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,
    pub root: String,
    pub spans: BTreeMap<String, Span>,
    /// `max(end_time) - min(start_time)` over `spans`.
    pub t: i64,
    pub status: Status,
}

impl Trace {
    pub const GOOD: &'static str = "Good_Traces";
    pub const ERRONEOUS: &'static str = "Erroneous_Traces";

    /// Builds a [`Trace`] from raw span records: normalizes names through
    /// `abbrev`, synthesizes the master span spanning `[min(start),
    /// max(end)]`, and fills in `children` lists sorted by start time.
    ///
    /// # Errors
    /// Fatal on a duplicate span id or a span with more than one parent
    /// reference. A reference to a span id absent from this trace is
    /// recoverable: it is rewritten to the master span and
    /// [`Status::SPAN_DROP`] is set.
    pub fn from_raw_spans(trace_id: String, raw_spans: Vec<RawSpan>, abbrev: &AbbrevMap) -> Result<Trace> {
        let mut spans: BTreeMap<String, Span> = BTreeMap::new();
        let mut very_start = i64::MAX;
        let mut very_end = i64::MIN;
        let all_span_ids: std::collections::HashSet<&str> =
            raw_spans.iter().map(|s| s.span_id.as_str()).collect();
        let mut status = Status::default();

        for raw in &raw_spans {
            if spans.contains_key(&raw.span_id) {
                return Err(TprofError::DuplicateSpanId {
                    trace_id,
                    span_id: raw.span_id.clone(),
                });
            }
            if raw.references.len() > 1 {
                return Err(TprofError::MultipleParents {
                    trace_id,
                    span_id: raw.span_id.clone(),
                    count: raw.references.len(),
                });
            }

            let refs = if raw.references.is_empty() {
                vec![MASTER_SPAN_NAME.to_string()]
            } else {
                let parent = &raw.references[0];
                if all_span_ids.contains(parent.as_str()) {
                    vec![parent.clone()]
                } else {
                    status.set(Status::SPAN_DROP);
                    vec![MASTER_SPAN_NAME.to_string()]
                }
            };

            very_start = very_start.min(raw.start_time);
            very_end = very_end.max(raw.end_time);

            spans.insert(
                raw.span_id.clone(),
                Span {
                    service: abbreviate(&raw.service_name, abbrev),
                    operation: abbreviate(&raw.operation_name, abbrev),
                    start_time: raw.start_time,
                    end_time: raw.end_time,
                    refs,
                    children: Vec::new(),
                },
            );
        }

        if raw_spans.is_empty() {
            very_start = 0;
            very_end = 0;
        }

        spans.insert(
            MASTER_SPAN_NAME.to_string(),
            Span {
                service: MASTER_SPAN_NAME.to_string(),
                operation: String::new(),
                start_time: very_start,
                end_time: very_end,
                refs: Vec::new(),
                children: Vec::new(),
            },
        );

        // Assign children, sorted by start time.
        let child_ids: Vec<String> = spans.keys().cloned().collect();
        for child_id in child_ids {
            if child_id == MASTER_SPAN_NAME {
                continue;
            }
            let parent_id = spans[&child_id].parent().unwrap().to_string();
            spans.get_mut(&parent_id).unwrap().children.push(child_id);
        }
        let starts: BTreeMap<String, i64> = spans
            .iter()
            .map(|(id, s)| (id.clone(), s.start_time))
            .collect();
        for span in spans.values_mut() {
            span.children.sort_by_key(|id| starts[id]);
        }

        Ok(Trace {
            trace_id,
            root: MASTER_SPAN_NAME.to_string(),
            spans,
            t: very_end - very_start,
            status,
        })
    }

    pub fn status_str(&self) -> &'static str {
        if self.status.any() {
            Trace::ERRONEOUS
        } else {
            Trace::GOOD
        }
    }

    pub fn master_span(&self) -> &Span {
        &self.spans[&self.root]
    }
}

fn abbreviate(name: &str, abbrev: &AbbrevMap) -> String {
    abbrev.get(name).cloned().unwrap_or_else(|| name.to_string())
}
