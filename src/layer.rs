//! Shared machinery between layer 1 (status grouping) and layer 2
//! (request-type grouping): both group a trace-id population into buckets
//! and then run the identical "operation profile" computation over each
//! bucket (`spec.md` §4.1/§4.2, the `AnalyzeFunctions` base in the original
//! tool).

use crate::arrow::{arrows, self_time};
use crate::config::Config;
use crate::error::Result;
use crate::gather::Gather;
use crate::stats::{diff_sorted_by_mean_desc, Stat};
use crate::trace::Trace;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-function duration stats, all-time and self-time, over a trace-id
/// population split into `norm`/`tail` at the configured cutoff.
#[derive(Debug, Clone, Serialize)]
pub struct OperationProfile {
    pub length: usize,
    pub traces: Vec<String>,

    /// Sorted descending by `mean * count`.
    pub all_operation: Vec<(String, Stat)>,
    pub norm_operation: Vec<(String, Stat)>,
    pub tail_operation: Vec<(String, Stat)>,
    pub diff_operation: Vec<(String, Stat)>,

    pub all_operation_self: Vec<(String, Stat)>,
    pub norm_operation_self: Vec<(String, Stat)>,
    pub tail_operation_self: Vec<(String, Stat)>,
    pub diff_operation_self: Vec<(String, Stat)>,

    pub trace99: String,
    pub trace99_left: Option<String>,
    pub trace99_right: Option<String>,
}

/// Fetches every trace in `trace_ids`, sorts by duration, and computes the
/// all/norm/tail/diff operation (and self-time) stat lists plus the trace
/// nearest the 99th percentile.
pub async fn profile_operations(gather: &dyn Gather, config: &Config, trace_ids: &[String]) -> Result<OperationProfile> {
    let mut traces = Vec::with_capacity(trace_ids.len());
    for id in trace_ids {
        traces.push(gather.get_trace(id).await?);
    }
    traces.sort_by_key(|t| t.t);

    let cutoff = config.cutoff_index(traces.len());
    let idx_99 = (0.99 * traces.len() as f64).floor() as usize;
    let idx_99 = idx_99.min(traces.len() - 1);

    let trace99 = traces[idx_99].trace_id.clone();
    let (trace99_left, trace99_right) = if traces.len() > 100 {
        (
            Some(traces[idx_99 - 1].trace_id.clone()),
            Some(traces[idx_99 + 1].trace_id.clone()),
        )
    } else {
        (None, None)
    };

    let all_operation = calc_operation(&traces)?;
    let norm_operation = calc_operation(&traces[..cutoff])?;
    let tail_operation = calc_operation(&traces[cutoff..])?;
    let diff_operation = diff_sorted_by_mean_desc(&norm_operation, &tail_operation);

    let all_operation_self = calc_operation_self(&traces)?;
    let norm_operation_self = calc_operation_self(&traces[..cutoff])?;
    let tail_operation_self = calc_operation_self(&traces[cutoff..])?;
    let diff_operation_self = diff_sorted_by_mean_desc(&norm_operation_self, &tail_operation_self);

    Ok(OperationProfile {
        length: trace_ids.len(),
        traces: trace_ids.to_vec(),
        all_operation,
        norm_operation,
        tail_operation,
        diff_operation,
        all_operation_self,
        norm_operation_self,
        tail_operation_self,
        diff_operation_self,
        trace99,
        trace99_left,
        trace99_right,
    })
}

fn calc_operation(traces: &[Trace]) -> Result<Vec<(String, Stat)>> {
    let mut samples: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for trace in traces {
        for span_id in arrows(trace).keys() {
            let span = &trace.spans[span_id];
            samples
                .entry(span.func_name())
                .or_default()
                .push(span.end_time - span.start_time);
        }
    }
    sorted_stats(samples)
}

fn calc_operation_self(traces: &[Trace]) -> Result<Vec<(String, Stat)>> {
    let mut samples: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for trace in traces {
        let all_arrows = arrows(trace);
        for (span_id, span_arrows) in &all_arrows {
            let span = &trace.spans[span_id];
            samples.entry(span.func_name()).or_default().push(self_time(span_arrows));
        }
    }
    sorted_stats(samples)
}

fn sorted_stats(samples: BTreeMap<String, Vec<i64>>) -> Result<Vec<(String, Stat)>> {
    let mut out = Vec::with_capacity(samples.len());
    for (name, values) in samples {
        out.push((name, Stat::from_samples(&values)?));
    }
    out.sort_by(|a, b| b.1.weighted().partial_cmp(&a.1.weighted()).unwrap());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AbbrevMap;
    use crate::gather::InMemoryGather;
    use crate::trace::RawSpan;

    fn raw(id: &str, serv: &str, start: i64, end: i64, refs: &[&str]) -> RawSpan {
        RawSpan {
            span_id: id.to_string(),
            service_name: serv.to_string(),
            operation_name: String::new(),
            start_time: start,
            end_time: end,
            references: refs.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn profile_computes_all_and_self_stats() {
        let gather = InMemoryGather::new(AbbrevMap::new());
        for i in 0..10 {
            gather
                .insert_raw(
                    format!("t{i}"),
                    vec![
                        raw("a", "svcA", 0, 100, &[]),
                        raw("b", "svcB", 10, 10 + i, &["a"]),
                    ],
                )
                .unwrap();
        }
        let ids: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
        let config = Config::new();
        let profile = profile_operations(&gather, &config, &ids).await.unwrap();
        assert_eq!(profile.length, 10);
        assert!(profile.all_operation.iter().any(|(n, _)| n == "svcA"));
        assert!(profile.all_operation_self.iter().any(|(n, _)| n == "svcA"));
    }
}
