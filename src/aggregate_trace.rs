//! Synthesizes a Jaeger-compatible "aggregate trace" for a single layer 4
//! finding: a template trace built from mean durations rather than a real
//! recorded trace, with the offending (sub)span relabeled and highlighted
//! (`spec.md` §4.8, grounded on `web_app/report.py`'s `generate_aggregate_trace`).

use crate::arrow::{ArrowMap, Superscript};
use crate::stats::Stat;
use crate::trace::split_func_name;
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// Fixed epoch (microseconds since Unix epoch) every synthesized span's
/// `startTime` is offset from, matching the original tool's constant.
const BASE_TIME_MICROS: i64 = 1_617_233_601_000_000;

#[derive(Debug, Clone, Serialize)]
pub struct JaegerReference {
    #[serde(rename = "refType")]
    pub ref_type: &'static str,
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JaegerSpan {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
    pub flags: u32,
    #[serde(rename = "operationName")]
    pub operation_name: String,
    pub references: Vec<JaegerReference>,
    #[serde(rename = "startTime")]
    pub start_time: i64,
    pub duration: i64,
    #[serde(rename = "processID")]
    pub process_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JaegerProcess {
    #[serde(rename = "serviceName")]
    pub service_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JaegerTraceData {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    pub spans: Vec<JaegerSpan>,
    pub processes: BTreeMap<String, JaegerProcess>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JaegerDocument {
    pub data: Vec<JaegerTraceData>,
}

/// Names injected in place of the real service name for the highlighted
/// (sub)span, so the visualization calls it out regardless of its real
/// identity.
const PROBLEMATIC_SPAN: &str = "PROBLEMATIC_SPAN";
const PROBLEMATIC_SUBSPAN: &str = "PROBLEMATIC_SUBSPAN";

struct Builder<'a> {
    trace_id: &'a str,
    arrows: &'a ArrowMap,
    stats: &'a [(String, Stat)],
    inv_abbrev: &'a BTreeMap<String, String>,
    prob_subspan: &'a str,
    proc: BTreeMap<String, String>,
}

impl<'a> Builder<'a> {
    fn inv_abbrev(&self, serv: &str, op: &str) -> (String, String) {
        (
            self.inv_abbrev.get(serv).cloned().unwrap_or_else(|| serv.to_string()),
            self.inv_abbrev.get(op).cloned().unwrap_or_else(|| op.to_string()),
        )
    }

    fn span_id_for(&self, span_path: &str, root_name: &str) -> Option<String> {
        if span_path == format!("{root_name}~") {
            return None;
        }
        let hash = Sha1::digest(span_path.as_bytes());
        Some(hex::encode(hash)[..16].to_string())
    }

    fn get_proc(&self, service_name: &str) -> Option<String> {
        self.proc
            .iter()
            .find(|(_, name)| name.as_str() == service_name)
            .map(|(pid, _)| pid.clone())
    }

    fn span_or_subspan_time(&self, name: &str) -> f64 {
        self.stats
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.mean)
            .unwrap_or(0.0)
    }

    fn generate_span(
        &mut self,
        span_id: &str,
        parent_id: Option<&str>,
        span_path: &str,
        span_start_time: i64,
        span_time: f64,
        highlight: bool,
    ) -> JaegerSpan {
        let segments: Vec<&str> = span_path.split('~').filter(|s| !s.is_empty()).collect();
        let span_name = *segments.last().expect("span path has at least one segment");
        let (serv, op) = split_func_name(span_name);
        let (full_serv, full_op) = self.inv_abbrev(serv, op);

        let references = match parent_id {
            Some(pid) => vec![JaegerReference {
                ref_type: "CHILD_OF",
                trace_id: self.trace_id.to_string(),
                span_id: pid.to_string(),
            }],
            None => Vec::new(),
        };

        let process_id = if highlight {
            let pid = format!("p{}", self.proc.len() + 1);
            let label = if span_path.ends_with("FullSpan") {
                PROBLEMATIC_SPAN
            } else {
                PROBLEMATIC_SUBSPAN
            };
            self.proc.insert(pid.clone(), label.to_string());
            pid
        } else {
            match self.get_proc(&full_serv) {
                Some(pid) => pid,
                None => {
                    let pid = format!("p{}", self.proc.len() + 1);
                    self.proc.insert(pid.clone(), full_serv.clone());
                    pid
                }
            }
        };

        JaegerSpan {
            trace_id: self.trace_id.to_string(),
            span_id: span_id.to_string(),
            flags: 1,
            operation_name: full_op,
            references,
            start_time: BASE_TIME_MICROS + (span_start_time as f64 / 1000.0).round() as i64,
            duration: (span_time / 1000.0).round() as i64,
            process_id,
        }
    }

    fn generate_spans(
        &mut self,
        span_start_time: i64,
        span_path: &str,
        parent_id: Option<&str>,
        root_name: &str,
        out: &mut Vec<JaegerSpan>,
    ) {
        let span_id = self.span_id_for(span_path, root_name);
        let span_time = self.span_or_subspan_time(&format!("{span_path}FullSpan"));
        if let Some(sid) = &span_id {
            let span = self.generate_span(sid, parent_id, span_path, span_start_time, span_time, false);
            out.push(span);
        }

        let events = match self.arrows.get(span_path) {
            Some(e) => e,
            None => return,
        };

        let mut child_start_idx: BTreeMap<String, usize> = BTreeMap::new();
        let mut start_time: Vec<i64> = vec![0];
        let mut subspan_idx = 0usize;

        let prob_prefix_end = self.prob_subspan.rfind('~').map(|i| i + 1).unwrap_or(0);
        let prob_prefix = self.prob_subspan[..prob_prefix_end].to_string();
        let prob_idx_part = self.prob_subspan[prob_prefix_end..].to_string();

        for (idx, event) in events.iter().enumerate() {
            match event.superscript {
                Superscript::Forward | Superscript::Terminate => {
                    let subspan_start_time = *start_time.last().unwrap();
                    let subspan_dur = self.span_or_subspan_time(&format!("{span_path}{subspan_idx}"));
                    start_time.push(subspan_start_time + subspan_dur.round() as i64);

                    if prob_prefix == span_path
                        && (prob_idx_part == "FullSpan" || prob_idx_part.parse::<usize>() == Ok(subspan_idx))
                    {
                        let prob_sid = self.span_id_for(self.prob_subspan, root_name);
                        if let Some(sid) = prob_sid {
                            let parent_sid = span_id.clone();
                            let span = self.generate_span(
                                &sid,
                                parent_sid.as_deref(),
                                self.prob_subspan,
                                span_start_time + subspan_start_time,
                                subspan_dur,
                                true,
                            );
                            out.push(span);
                        }
                    }

                    if event.superscript == Superscript::Forward {
                        child_start_idx.insert(event.name.clone(), idx);
                        let child_path = format!("{span_path}{}~", event.name);
                        self.generate_spans(
                            span_start_time + *start_time.last().unwrap(),
                            &child_path,
                            span_id.as_deref(),
                            root_name,
                            out,
                        );
                    }
                    subspan_idx += 1;
                    if event.superscript == Superscript::Terminate {
                        break;
                    }
                }
                Superscript::Receive => {
                    let child_full = self.span_or_subspan_time(&format!("{}FullSpan", event.name));
                    let base = child_start_idx.get(&event.name).map(|&i| start_time[i]).unwrap_or(0);
                    start_time.push(base + child_full.round() as i64);
                }
                Superscript::Begin => {}
            }
        }
    }
}

/// Builds the Jaeger-compatible JSON document for one layer 4 finding.
/// `stats` is the "whole" or "tail" subspan stat list from that layer 4
/// group, `prob_subspan_name` the path+index name of the offending
/// (sub)span to highlight.
pub fn generate(
    arrows: &ArrowMap,
    stats: &[(String, Stat)],
    trace_id: &str,
    prob_subspan_name: &str,
    root_name: &str,
    inv_abbrev: &BTreeMap<String, String>,
) -> JaegerDocument {
    let mut builder = Builder {
        trace_id,
        arrows,
        stats,
        inv_abbrev,
        prob_subspan: prob_subspan_name,
        proc: BTreeMap::new(),
    };
    let mut spans = Vec::new();
    builder.generate_spans(0, &format!("{root_name}~"), None, root_name, &mut spans);

    let processes = builder
        .proc
        .into_iter()
        .map(|(pid, name)| (pid, JaegerProcess { service_name: name }))
        .collect();

    JaegerDocument {
        data: vec![JaegerTraceData {
            trace_id: trace_id.to_string(),
            spans,
            processes,
        }],
    }
}
