//! Layer 4: groups traces by event-arrow signature (the exact call/return
//! order against relabeled, path-qualified span names) and profiles each
//! group by splitting every parent span into subspans - "FullSpan" for the
//! whole call plus one entry per gap between consecutive forward/terminate
//! events (`spec.md` §4.4).

use crate::arrow::{add_func_name_to_arrows, arrows, Arrow, ArrowMap, Superscript};
use crate::config::Config;
use crate::error::Result;
use crate::gather::Gather;
use crate::signature::relabel_by_path;
use crate::stats::{diff_sorted_by_mean_desc, Stat};
use crate::trace::Trace;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct Layer4Profile {
    pub length: usize,
    pub traces: Vec<String>,
    pub whole: Vec<(String, Stat)>,
    pub norm: Vec<(String, Stat)>,
    pub tail: Vec<(String, Stat)>,
    pub diff: Vec<(String, Stat)>,
    /// Event structure of a single representative trace, used by the report
    /// engine to synthesize the aggregate-trace JSON visualization.
    pub arrows: BTreeMap<String, Vec<Arrow>>,
}

pub async fn group(gather: &dyn Gather, trace_ids: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for trace_id in trace_ids {
        let trace = gather.get_trace(trace_id).await?;
        let key = event_signature(&trace);
        groups.entry(key).or_default().push(trace_id.clone());
    }
    Ok(groups)
}

pub async fn profile(gather: &dyn Gather, config: &Config, trace_ids: &[String]) -> Result<Layer4Profile> {
    let mut traces = Vec::with_capacity(trace_ids.len());
    for id in trace_ids {
        traces.push(gather.get_trace(id).await?);
    }
    traces.sort_by_key(|t| t.t);
    let cutoff = config.cutoff_index(traces.len());

    let whole = sorted_subspan_stats(collect_subspan_durations(&traces))?;
    let norm = sorted_subspan_stats(collect_subspan_durations(&traces[..cutoff]))?;
    let tail = sorted_subspan_stats(collect_subspan_durations(&traces[cutoff..]))?;
    let diff = diff_sorted_by_mean_desc(&norm, &tail);

    let relabeled = relabel_by_path(&traces[0]);
    let raw_arrows = arrows(&relabeled);
    let arrows = add_func_name_to_arrows(&relabeled, &raw_arrows);

    Ok(Layer4Profile {
        length: trace_ids.len(),
        traces: trace_ids.to_vec(),
        whole,
        norm,
        tail,
        diff,
        arrows,
    })
}

/// A deterministic JSON signature of the relabeled event structure: for each
/// parent path, the ordered `(src, superscript)` pairs of its arrows. Two
/// traces with the same structural signature but different call/return
/// interleaving land in different layer 4 groups.
fn event_signature(trace: &Trace) -> String {
    let relabeled = relabel_by_path(trace);
    let raw_arrows = arrows(&relabeled);
    let named = add_func_name_to_arrows(&relabeled, &raw_arrows);
    let for_json: BTreeMap<&str, Vec<(&str, Superscript)>> = named
        .iter()
        .map(|(span_name, events)| {
            (
                span_name.as_str(),
                events.iter().map(|a| (a.src.as_str(), a.superscript)).collect(),
            )
        })
        .collect();
    serde_json::to_string(&for_json).expect("event signature serialization is infallible")
}

fn is_full_span(name: &str) -> bool {
    name.ends_with("FullSpan")
}

fn collect_subspan_durations(traces: &[Trace]) -> BTreeMap<String, Vec<i64>> {
    let mut out: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for trace in traces {
        let relabeled = relabel_by_path(trace);
        for (span_id, span) in &relabeled.spans {
            if *span_id == relabeled.root {
                continue;
            }
            let full_name = format!("{}FullSpan", span.func_name());
            out.entry(full_name).or_default().push(span.end_time - span.start_time);
        }

        let raw_arrows = arrows(&relabeled);
        let named: ArrowMap = add_func_name_to_arrows(&relabeled, &raw_arrows);
        for (path, events) in &named {
            for (idx, dur) in subspans_of(events) {
                out.entry(format!("{path}{idx}")).or_default().push(dur);
            }
        }
    }
    out
}

/// Splits one parent's arrow timeline into consecutive `(index, duration)`
/// chunks, each ending at a `forward` or `terminate` event.
fn subspans_of(events: &[Arrow]) -> Vec<(usize, i64)> {
    let mut out = Vec::new();
    let mut prev_time: i64 = 0;
    let mut idx = 0usize;
    for arrow in events {
        if matches!(arrow.superscript, Superscript::Forward | Superscript::Terminate) {
            out.push((idx, arrow.time - prev_time));
            idx += 1;
        }
        prev_time = arrow.time;
        if arrow.superscript == Superscript::Terminate {
            break;
        }
    }
    out
}

fn sorted_subspan_stats(durations: BTreeMap<String, Vec<i64>>) -> Result<Vec<(String, Stat)>> {
    let mut out = Vec::with_capacity(durations.len());
    for (name, values) in durations {
        out.push((name, Stat::from_samples(&values)?));
    }
    out.sort_by(|a, b| {
        let key_a = if is_full_span(&a.0) { 0.0 } else { a.1.mean };
        let key_b = if is_full_span(&b.0) { 0.0 } else { b.1.mean };
        key_b.partial_cmp(&key_a).unwrap()
    });
    Ok(out)
}
