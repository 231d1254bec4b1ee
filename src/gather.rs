//! External interfaces: the trace-source boundary (`Gather`) and the
//! deployment-specific request classifier (`App`), plus a deterministic
//! in-memory `Gather` used by tests and demos (`spec.md` §6).

use crate::config::AbbrevMap;
use crate::error::{GatherError, Result};
use crate::trace::{RawSpan, Trace};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// `service name -> operations to search`. An empty operation list means
/// "all operations"; an empty map means "all services".
pub type ServiceOperations = BTreeMap<String, Vec<String>>;

/// The trace-source boundary. A production implementation talks to a Jaeger
/// query service over gRPC; [`InMemoryGather`] below serves pre-built traces
/// for tests and demos.
#[async_trait]
pub trait Gather: Send + Sync {
    async fn find_trace_ids(
        &self,
        services: &ServiceOperations,
        t_start: i64,
        t_end: i64,
        depth: u32,
    ) -> Result<Vec<String>>;

    async fn get_trace(&self, trace_id: &str) -> Result<Trace>;
}

/// Deployment-specific hooks: how to classify a trace's request type and
/// what tail cutoff to analyze at.
pub trait App: Send + Sync {
    fn tail_cutoff(&self) -> u8 {
        90
    }

    fn abbrev(&self) -> &AbbrevMap;

    /// Classifies a trace by request type, e.g. by the first segment of the
    /// root child's service name (`"checkout_service"` -> `"checkout"`).
    fn trace_req_type(&self, trace: &Trace) -> String;
}

/// An `App` that classifies by the service name of the trace's first child
/// span, splitting on `_` and keeping the first segment - mirrors the
/// reference application's default classifier.
pub struct DefaultApp {
    pub abbrev: AbbrevMap,
}

impl DefaultApp {
    pub fn new(abbrev: AbbrevMap) -> Self {
        Self { abbrev }
    }
}

impl App for DefaultApp {
    fn abbrev(&self) -> &AbbrevMap {
        &self.abbrev
    }

    fn trace_req_type(&self, trace: &Trace) -> String {
        let first_child = trace
            .spans
            .get(&trace.root)
            .and_then(|root| root.children.first());
        match first_child.and_then(|id| trace.spans.get(id)) {
            Some(span) => span
                .service
                .split('_')
                .next()
                .unwrap_or("Unknown_request_type")
                .to_string(),
            None => "Unknown_request_type".to_string(),
        }
    }
}

/// A deterministic, in-process `Gather` backed by a fixed map of pre-built
/// traces. Used by tests, demos, and as the HTTP proxy's local overlay.
pub struct InMemoryGather {
    abbrev: AbbrevMap,
    traces: RwLock<HashMap<String, Trace>>,
}

impl InMemoryGather {
    pub fn new(abbrev: AbbrevMap) -> Self {
        Self {
            abbrev,
            traces: RwLock::new(HashMap::new()),
        }
    }

    /// Ingests a raw trace, normalizing span names through the abbreviation
    /// map and synthesizing its master span.
    pub fn insert_raw(&self, trace_id: impl Into<String>, raw_spans: Vec<RawSpan>) -> Result<()> {
        let trace_id = trace_id.into();
        let trace = Trace::from_raw_spans(trace_id.clone(), raw_spans, &self.abbrev)?;
        self.traces.write().unwrap().insert(trace_id, trace);
        Ok(())
    }

    pub fn insert(&self, trace: Trace) {
        self.traces.write().unwrap().insert(trace.trace_id.clone(), trace);
    }

    pub fn trace_ids(&self) -> Vec<String> {
        self.traces.read().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl Gather for InMemoryGather {
    async fn find_trace_ids(
        &self,
        _services: &ServiceOperations,
        t_start: i64,
        t_end: i64,
        depth: u32,
    ) -> Result<Vec<String>> {
        let traces = self.traces.read().unwrap();
        let mut ids: Vec<String> = traces
            .values()
            .filter(|t| {
                let start = t.master_span().start_time;
                start >= t_start && start <= t_end
            })
            .map(|t| t.trace_id.clone())
            .collect();
        ids.sort();
        ids.truncate(depth as usize);
        Ok(ids)
    }

    async fn get_trace(&self, trace_id: &str) -> Result<Trace> {
        self.traces
            .read()
            .unwrap()
            .get(trace_id)
            .cloned()
            .ok_or_else(|| GatherError::TraceNotFound(trace_id.to_string()).into())
    }
}
