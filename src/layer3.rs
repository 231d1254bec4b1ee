//! Layer 3: groups traces by structural [`Signature`] and builds an
//! aggregate span tree per group, carrying per-node duration stats plus two
//! positional diagnostics - `child_diff` (gap before the n-th child to
//! start, by start order) and `end_diff` (gap between the last child's end
//! and the parent's end) - then diffs the norm and tail trees (`spec.md`
//! §4.3).

use crate::config::Config;
use crate::error::{Result, TprofError};
use crate::gather::Gather;
use crate::signature::Signature;
use crate::stats::Stat;
use crate::trace::Trace;
use serde::Serialize;
use std::collections::BTreeMap;

/// A node in the aggregate span tree: per-invocation duration stats, one
/// `child_diff` entry per structural child position (ordered by start time,
/// not identity), and the `end_diff` gap.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateNode {
    pub name: String,
    pub children: Vec<AggregateNode>,
    pub stats: Stat,
    pub child_diff: Vec<Stat>,
    pub end_diff: Stat,
}

#[derive(Debug, Clone, Serialize)]
pub struct Layer3Profile {
    pub length: usize,
    pub traces: Vec<String>,
    pub overall: AggregateNode,
    pub norm: Option<AggregateNode>,
    pub tail: Option<AggregateNode>,
    pub diff: Option<AggregateNode>,
}

pub async fn group(gather: &dyn Gather, trace_ids: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for trace_id in trace_ids {
        let trace = gather.get_trace(trace_id).await?;
        let key = Signature::of(&trace, &trace.root).group_key();
        groups.entry(key).or_default().push(trace_id.clone());
    }
    Ok(groups)
}

pub async fn profile(gather: &dyn Gather, config: &Config, trace_ids: &[String]) -> Result<Layer3Profile> {
    let mut traces = Vec::with_capacity(trace_ids.len());
    for id in trace_ids {
        traces.push(gather.get_trace(id).await?);
    }
    traces.sort_by_key(|t| t.t);

    let overall = build_structure(&traces)?;
    if trace_ids.len() == 1 {
        return Ok(Layer3Profile {
            length: trace_ids.len(),
            traces: trace_ids.to_vec(),
            overall,
            norm: None,
            tail: None,
            diff: None,
        });
    }

    let cutoff = config.cutoff_index(traces.len());
    let norm = build_structure(&traces[..cutoff])?;
    let tail = build_structure(&traces[cutoff..])?;
    let diff = diff_tree(&norm, &tail)?;

    Ok(Layer3Profile {
        length: trace_ids.len(),
        traces: trace_ids.to_vec(),
        overall,
        norm: Some(norm),
        tail: Some(tail),
        diff: Some(diff),
    })
}

struct RawNode {
    name: String,
    children: Vec<RawNode>,
    durations: Vec<i64>,
    child_diff: Vec<Vec<i64>>,
    end_diff: Vec<i64>,
}

/// A span's "identity order" children: by function name, then structural
/// signature, then start time - the order under which the same structural
/// child occupies the same position across every trace in a group.
fn identity_order_children(trace: &Trace, span_id: &str) -> Vec<String> {
    let span = &trace.spans[span_id];
    let mut children = span.children.clone();
    children.sort_by_key(|id| {
        let child = &trace.spans[id];
        (
            child.func_name(),
            Signature::of(trace, id).group_key(),
            child.start_time,
        )
    });
    children
}

fn build_template(trace: &Trace, span_id: &str) -> RawNode {
    let identity_children = identity_order_children(trace, span_id);
    let children: Vec<RawNode> = identity_children.iter().map(|c| build_template(trace, c)).collect();
    let n = children.len();
    RawNode {
        name: trace.spans[span_id].func_name(),
        children,
        durations: Vec::new(),
        child_diff: vec![Vec::new(); n],
        end_diff: Vec::new(),
    }
}

fn fill_template(template: &mut RawNode, trace: &Trace, span_id: &str) {
    let span = &trace.spans[span_id];
    template.durations.push(span.end_time - span.start_time);

    let mut prev_time = span.start_time;
    for (c, child_id) in span.children.iter().enumerate() {
        let child = &trace.spans[child_id];
        template.child_diff[c].push(child.start_time - prev_time);
        prev_time = child.start_time;
    }
    match span.children.last() {
        Some(last_id) => {
            let last_child = &trace.spans[last_id];
            template.end_diff.push(span.end_time - last_child.end_time);
        }
        None => template.end_diff.push(0),
    }

    let identity_children = identity_order_children(trace, span_id);
    for (i, child_id) in identity_children.iter().enumerate() {
        fill_template(&mut template.children[i], trace, child_id);
    }
}

fn calculate(raw: RawNode) -> Result<AggregateNode> {
    let stats = Stat::from_samples(&raw.durations)?;
    let end_diff = Stat::from_samples(&raw.end_diff)?;
    let mut child_diff = Vec::with_capacity(raw.child_diff.len());
    for gaps in &raw.child_diff {
        child_diff.push(Stat::from_samples(gaps)?);
    }
    let mut children = Vec::with_capacity(raw.children.len());
    for child in raw.children {
        children.push(calculate(child)?);
    }
    children.sort_by(|a, b| b.stats.mean.partial_cmp(&a.stats.mean).unwrap());
    Ok(AggregateNode {
        name: raw.name,
        children,
        stats,
        child_diff,
        end_diff,
    })
}

fn build_structure(traces: &[Trace]) -> Result<AggregateNode> {
    let mut template = build_template(&traces[0], &traces[0].root);
    for trace in traces {
        fill_template(&mut template, trace, &trace.root);
    }
    calculate(template)
}

/// Elementwise `tail - norm` over two isomorphic aggregate trees, matching
/// children by name and dropping any tail child absent from norm.
fn diff_tree(norm: &AggregateNode, tail: &AggregateNode) -> Result<AggregateNode> {
    if norm.name != tail.name {
        return Err(TprofError::DiffShapeMismatch { node: tail.name.clone() });
    }
    let norm_index: BTreeMap<&str, &AggregateNode> =
        norm.children.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut children = Vec::new();
    for tail_child in &tail.children {
        if let Some(norm_child) = norm_index.get(tail_child.name.as_str()) {
            children.push(diff_tree(norm_child, tail_child)?);
        }
    }
    children.sort_by(|a, b| b.stats.mean.partial_cmp(&a.stats.mean).unwrap());

    let child_diff = tail
        .child_diff
        .iter()
        .zip(norm.child_diff.iter())
        .map(|(t, n)| *t - *n)
        .collect();

    Ok(AggregateNode {
        name: tail.name.clone(),
        children,
        stats: tail.stats - norm.stats,
        child_diff,
        end_diff: tail.end_diff - norm.end_diff,
    })
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
    async fn identical_structure_traces_group_together() {
        let gather = InMemoryGather::new(AbbrevMap::new());
        gather
            .insert_raw("t1", vec![raw("a", "svcA", 0, 100, &[]), raw("b", "svcB", 10, 20, &["a"])])
            .unwrap();
        gather
            .insert_raw("t2", vec![raw("a", "svcA", 0, 200, &[]), raw("b", "svcB", 50, 60, &["a"])])
            .unwrap();
        let groups = group(&gather, &["t1".to_string(), "t2".to_string()]).await.unwrap();
        assert_eq!(groups.len(), 1);
    }

    #[tokio::test]
    async fn diff_is_zero_when_norm_equals_tail() {
        let gather = InMemoryGather::new(AbbrevMap::new());
        for i in 0..4 {
            gather
                .insert_raw(
                    format!("t{i}"),
                    vec![raw("a", "svcA", 0, 100, &[]), raw("b", "svcB", 10, 20, &["a"])],
                )
                .unwrap();
        }
        let ids: Vec<String> = (0..4).map(|i| format!("t{i}")).collect();
        let config = Config::new().with_tail_cutoff(50);
        let profile = profile(&gather, &config, &ids).await.unwrap();
        let diff = profile.diff.unwrap();
        assert_eq!(diff.stats.mean, 0.0);
        assert_eq!(diff.children[0].stats.mean, 0.0);
    }

    #[tokio::test]
    async fn single_trace_profile_has_no_norm_tail_diff() {
        let gather = InMemoryGather::new(AbbrevMap::new());
        gather.insert_raw("t1", vec![raw("a", "svcA", 0, 100, &[])]).unwrap();
        let config = Config::new();
        let profile = profile(&gather, &config, &["t1".to_string()]).await.unwrap();
        assert!(profile.norm.is_none());
        assert!(profile.tail.is_none());
        assert!(profile.diff.is_none());
    }

    #[tokio::test]
    async fn end_diff_reflects_gap_after_last_child() {
        let gather = InMemoryGather::new(AbbrevMap::new());
        gather
            .insert_raw("t1", vec![raw("a", "svcA", 0, 100, &[]), raw("b", "svcB", 10, 20, &["a"])])
            .unwrap();
        let config = Config::new();
        let profile = profile(&gather, &config, &["t1".to_string()]).await.unwrap();
        // span a ends at 100, last (only) child b ends at 20: end_diff == 80.
        assert_eq!(profile.overall.end_diff.mean, 80.0);
    }
}
