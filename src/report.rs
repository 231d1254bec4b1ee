//! Turns a completed 4-layer [`pipeline::ResultNode`] tree into a ranked list
//! of bug reports, each pinpointing a specific subspan and carrying a
//! synthesized aggregate-trace visualization (`spec.md` §4.7/§4.8, grounded
//! on `web_app/report.py`'s `Report` class).

use crate::aggregate_trace::{self, JaegerDocument};
use crate::config::Config;
use crate::layer::OperationProfile;
use crate::layer3::AggregateNode;
use crate::layer4::Layer4Profile;
use crate::pipeline::{LayerResult, ResultNode};
use crate::stats::Stat;
use crate::trace::MASTER_SPAN_NAME;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;

/// Which positional diagnostic at a layer 3 node the finding points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum L3Mode {
    /// The whole span itself is suspicious (a childless node).
    Fs,
    /// Children as a group start late relative to the parent (a `child_diff` gap).
    Csl,
    /// The parent runs long after its last child finishes (the `end_diff` gap).
    Lpl,
}

#[derive(Debug, Clone, Serialize)]
pub struct L1Finding {
    pub serv: String,
    pub op: String,
    pub op_count: usize,
    pub req_count: usize,
    pub op_dur: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct L2Finding {
    pub is_tail: bool,
    pub req_type: String,
    pub tail_scale: Option<f64>,
    pub l2_group_length: usize,
    pub req_dur: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct L3Finding {
    pub l3_group_idx: usize,
    pub l3_group_length: usize,
    pub span_path: Vec<String>,
    pub l3_mode: L3Mode,
    pub num_of_child: usize,
    pub child_idx: Option<usize>,
    pub diff_dur: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct L4Finding {
    pub l4_group_idx: usize,
    pub l4_group_length: usize,
    pub subspan_idx: String,
    pub subspan_dur: f64,
    pub subspan_pct: f64,
    pub l4_count_pct: f64,
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BugReport {
    pub l1: L1Finding,
    pub l2: L2Finding,
    pub l3: L3Finding,
    pub l4: L4Finding,
}

/// A bare name/children tree (no stats), used only to disambiguate which of
/// several structurally-identical matched paths a layer 4 finding belongs to.
#[derive(Debug, Clone)]
struct SubTree {
    name: String,
    children: Vec<SubTree>,
}

impl SubTree {
    fn from_node(node: &AggregateNode) -> SubTree {
        SubTree {
            name: node.name.clone(),
            children: node.children.iter().map(SubTree::from_node).collect(),
        }
    }

    fn to_paths(&self, prefix: &str) -> Vec<String> {
        let path = format!("{prefix}{}~", self.name);
        let mut out = vec![path.clone()];
        for child in &self.children {
            out.extend(child.to_paths(&path));
        }
        out
    }
}

#[derive(Debug, Clone)]
struct DiffCandidate {
    l3_idx: usize,
    span_path: Vec<String>,
    sub_tree: SubTree,
    num_of_child: usize,
    kind: L3Mode,
    child_idx: Option<usize>,
    diff_weighted: f64,
}

fn find_stat<'a>(list: &'a [(String, Stat)], name: &str) -> Option<&'a Stat> {
    list.iter().find(|(n, _)| n == name).map(|(_, s)| s)
}

/// Strips every `[n]` sibling-index suffix from a `~`-joined path, so
/// structurally-equivalent paths compare equal regardless of which sibling
/// instance produced them.
fn strip_idx(path: &str) -> String {
    path.split('~')
        .filter(|s| !s.is_empty())
        .map(|seg| match seg.find('[') {
            Some(i) => &seg[..i],
            None => seg,
        })
        .map(|seg| format!("{seg}~"))
        .collect()
}

fn operation_profile(result: &LayerResult) -> Option<&OperationProfile> {
    match result {
        LayerResult::Status(p) | LayerResult::ReqType(p) => Some(p),
        _ => None,
    }
}

/// Walks a 4-layer result tree to produce ranked bug reports. Carries the
/// report's own SHA-1-identified trace id counter for the aggregate-trace
/// JSON it synthesizes per layer 4 finding.
pub struct Report<'a> {
    config: &'a Config,
    inv_abbrev: BTreeMap<String, String>,
    agg_traces: RefCell<BTreeMap<String, JaegerDocument>>,
}

impl<'a> Report<'a> {
    pub fn new(config: &'a Config) -> Self {
        let inv_abbrev = config.abbrev.iter().map(|(k, v)| (v.clone(), k.clone())).collect();
        Report {
            config,
            inv_abbrev,
            agg_traces: RefCell::new(BTreeMap::new()),
        }
    }

    /// Generates the ranked bug report list for `result_nodes` (the output of
    /// [`crate::pipeline::run`]), along with every aggregate-trace JSON
    /// document it synthesized along the way, keyed by the trace id embedded
    /// in each [`L4Finding::trace_id`].
    pub fn generate(&self, result_nodes: &[ResultNode]) -> (Vec<BugReport>, BTreeMap<String, JaegerDocument>) {
        let good = result_nodes.iter().find(|n| n.group_name == crate::trace::Trace::GOOD);
        let Some(good) = good else {
            return (Vec::new(), self.agg_traces.borrow().clone());
        };
        let Some(l1_profile) = operation_profile(&good.result) else {
            return (Vec::new(), self.agg_traces.borrow().clone());
        };

        let root_request_count = find_stat(&l1_profile.all_operation, MASTER_SPAN_NAME)
            .map(|s| s.count)
            .unwrap_or(l1_profile.length);

        let mut bugs = l1_profile.all_operation_self.clone();
        bugs.retain(|(name, _)| name != MASTER_SPAN_NAME);

        let mut results = Vec::new();
        for (bug_name, stat) in bugs.into_iter().take(self.config.fan_out.l1) {
            let (serv, op) = crate::trace::split_func_name(&bug_name);
            let l1 = L1Finding {
                serv: serv.to_string(),
                op: op.to_string(),
                op_count: stat.count,
                req_count: l1_profile.length,
                op_dur: stat.mean,
            };
            results.extend(self.layer2(&good.children, &bug_name, root_request_count, &l1));
        }
        (results, self.agg_traces.borrow().clone())
    }

    fn layer2(&self, children: &[ResultNode], bug_to_find: &str, root_request_count: usize, l1: &L1Finding) -> Vec<BugReport> {
        let mut known: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut results = Vec::new();

        let mut by_tail: Vec<&ResultNode> = children.iter().collect();
        by_tail.sort_by(|a, b| tail_metric(a, bug_to_find).partial_cmp(&tail_metric(b, bug_to_find)).unwrap().reverse());

        for node in by_tail {
            if known.len() >= self.config.fan_out.l2 {
                break;
            }
            let Some(profile) = operation_profile(&node.result) else { continue };
            let (Some(tail), Some(norm)) = (
                find_stat(&profile.tail_operation_self, bug_to_find),
                find_stat(&profile.norm_operation_self, bug_to_find),
            ) else {
                continue;
            };
            if norm.mean <= 0.0 || tail.mean <= self.config.tail_multiple * norm.mean {
                continue;
            }
            known.insert(node.group_name.clone());
            let req_dur = find_stat(&profile.all_operation, MASTER_SPAN_NAME).map(|s| s.p99).unwrap_or(0.0);
            let l2 = L2Finding {
                is_tail: true,
                req_type: node.group_name.clone(),
                tail_scale: Some(tail.mean / norm.mean),
                l2_group_length: profile.length,
                req_dur,
            };
            results.extend(self.layer3(&node.children, bug_to_find, true, root_request_count, l1, &l2));
        }

        let mut by_all: Vec<&ResultNode> = children.iter().filter(|n| !known.contains(&n.group_name)).collect();
        by_all.sort_by(|a, b| all_metric(a, bug_to_find).partial_cmp(&all_metric(b, bug_to_find)).unwrap().reverse());

        let mut taken = 0;
        for node in by_all {
            if taken >= self.config.fan_out.l2 {
                break;
            }
            let Some(profile) = operation_profile(&node.result) else { continue };
            let Some(_all) = find_stat(&profile.all_operation_self, bug_to_find) else { continue };
            taken += 1;
            let req_dur = find_stat(&profile.all_operation, MASTER_SPAN_NAME).map(|s| s.mean).unwrap_or(0.0);
            let l2 = L2Finding {
                is_tail: false,
                req_type: node.group_name.clone(),
                tail_scale: None,
                l2_group_length: profile.length,
                req_dur,
            };
            results.extend(self.layer3(&node.children, bug_to_find, false, root_request_count, l1, &l2));
        }
        results
    }

    fn layer3(
        &self,
        l3_groups: &[ResultNode],
        bug_to_find: &str,
        is_tail: bool,
        root_request_count: usize,
        l1: &L1Finding,
        l2: &L2Finding,
    ) -> Vec<BugReport> {
        let mut candidates: Vec<(usize, DiffCandidate)> = Vec::new();
        let mut group_lengths: Vec<usize> = Vec::with_capacity(l3_groups.len());

        for (l3_idx, node) in l3_groups.iter().enumerate() {
            let LayerResult::Structure(profile) = &node.result else { continue };
            group_lengths.push(profile.length);
            let source_tree = if is_tail { profile.tail.as_ref() } else { Some(&profile.overall) };
            let Some(source_tree) = source_tree else { continue };
            let mut path = Vec::new();
            let mut found = Vec::new();
            find_spans(source_tree, bug_to_find, &mut path, &mut found);
            for mut c in found {
                c.l3_idx = l3_idx;
                candidates.push((l3_idx, c));
            }
        }
        candidates.sort_by(|a, b| a.1.diff_weighted.partial_cmp(&b.1.diff_weighted).unwrap().reverse());

        let mut results = Vec::new();
        let mut taken = 0;
        for (l3_idx, cand) in candidates {
            if taken >= self.config.fan_out.l3 {
                break;
            }
            let Some(node) = l3_groups.get(l3_idx) else { continue };
            taken += 1;
            let l3 = L3Finding {
                l3_group_idx: l3_idx + 1,
                l3_group_length: group_lengths[l3_idx],
                span_path: cand.span_path.clone(),
                l3_mode: cand.kind,
                num_of_child: cand.num_of_child,
                child_idx: cand.child_idx,
                diff_dur: cand.diff_weighted,
            };
            results.extend(self.layer4(&node.children, &cand.span_path, &cand.sub_tree, is_tail, root_request_count, l1, l2, &l3));
        }
        results
    }

    fn layer4(
        &self,
        l4_groups: &[ResultNode],
        span_path: &[String],
        sub_tree: &SubTree,
        is_tail: bool,
        root_request_count: usize,
        l1: &L1Finding,
        l2: &L2Finding,
        l3: &L3Finding,
    ) -> Vec<BugReport> {
        struct Candidate {
            l4_idx: usize,
            subspan_idx: String,
            subspan_name: String,
            subspan_dur: f64,
            subspan_pct: f64,
            count: usize,
            metric: f64,
            group_length: usize,
        }

        let mut candidates: Vec<Candidate> = Vec::new();

        for (l4_idx, node) in l4_groups.iter().enumerate() {
            let LayerResult::EventSignature(profile) = &node.result else { continue };
            let stats_list: &[(String, Stat)] = if is_tail { &profile.tail } else { &profile.whole };

            let mut matched: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (name, _) in stats_list {
                let mut parts: Vec<&str> = name.split('~').collect();
                if parts.last() != Some(&"FullSpan") {
                    continue;
                }
                parts.pop();
                if parts.len() < span_path.len() {
                    continue;
                }
                let is_match = parts
                    .iter()
                    .zip(span_path.iter())
                    .all(|(seg, comp)| seg.starts_with(comp.as_str()));
                if !is_match {
                    continue;
                }
                let matched_path: String = parts[..span_path.len()].iter().map(|s| format!("{s}~")).collect();
                let sub_segments = &parts[span_path.len() - 1..];
                let sub_path: String = sub_segments.iter().map(|s| format!("{s}~")).collect();
                matched.entry(matched_path).or_default().push(strip_idx(&sub_path));
            }

            let matched_prefixes: Vec<String> = if matched.len() <= 1 {
                matched.into_keys().collect()
            } else {
                let mut ideal = sub_tree.to_paths("");
                ideal.sort();
                matched
                    .into_iter()
                    .filter_map(|(path, mut subs)| {
                        subs.sort();
                        if subs == ideal {
                            Some(path)
                        } else {
                            None
                        }
                    })
                    .collect()
            };

            for matched_path in matched_prefixes {
                let (subspan_idx, subspan_name) = match l3.l3_mode {
                    L3Mode::Csl => {
                        let idx = match l3.child_idx {
                            Some(i) => i,
                            None => continue,
                        };
                        (idx.to_string(), format!("{matched_path}{idx}"))
                    }
                    L3Mode::Lpl => {
                        let max_idx = stats_list
                            .iter()
                            .filter_map(|(n, _)| n.strip_prefix(matched_path.as_str()).and_then(|rest| rest.parse::<usize>().ok()))
                            .max();
                        match max_idx {
                            Some(i) => (i.to_string(), format!("{matched_path}{i}")),
                            None => continue,
                        }
                    }
                    L3Mode::Fs => ("FullSpan".to_string(), format!("{matched_path}FullSpan")),
                };

                let Some(subspan_stat) = find_stat(stats_list, &subspan_name) else { continue };
                let Some(span_stat) = find_stat(stats_list, &format!("{matched_path}FullSpan")) else { continue };
                if span_stat.mean <= 0.0 {
                    continue;
                }
                let metric = subspan_stat.mean * subspan_stat.mean * subspan_stat.count as f64 / span_stat.mean;
                candidates.push(Candidate {
                    l4_idx,
                    subspan_idx,
                    subspan_name,
                    subspan_dur: subspan_stat.mean,
                    subspan_pct: subspan_stat.mean / span_stat.mean,
                    count: subspan_stat.count,
                    metric,
                    group_length: profile.length,
                });
            }
        }

        candidates.sort_by(|a, b| a.metric.partial_cmp(&b.metric).unwrap().reverse());

        let mut results = Vec::new();
        for cand in candidates.into_iter().take(self.config.fan_out.l4) {
            let LayerResult::EventSignature(profile) = &l4_groups[cand.l4_idx].result else {
                continue;
            };
            let stats_list: &[(String, Stat)] = if is_tail { &profile.tail } else { &profile.whole };
            let trace_id = self.next_trace_id();
            let doc = aggregate_trace::generate(
                &profile.arrows,
                stats_list,
                &trace_id,
                &cand.subspan_name,
                MASTER_SPAN_NAME,
                &self.inv_abbrev,
            );
            self.agg_traces.borrow_mut().insert(trace_id.clone(), doc);

            results.push(BugReport {
                l1: l1.clone(),
                l2: l2.clone(),
                l3: l3.clone(),
                l4: L4Finding {
                    l4_group_idx: cand.l4_idx + 1,
                    l4_group_length: cand.group_length,
                    subspan_idx: cand.subspan_idx,
                    subspan_dur: cand.subspan_dur,
                    subspan_pct: cand.subspan_pct,
                    l4_count_pct: cand.count as f64 / root_request_count.max(1) as f64,
                    trace_id,
                },
            });
        }
        results
    }

    fn next_trace_id(&self) -> String {
        let len = self.agg_traces.borrow().len();
        (len + 1).to_string()
    }
}

fn tail_metric(node: &ResultNode, bug_to_find: &str) -> f64 {
    operation_profile(&node.result)
        .and_then(|p| find_stat(&p.tail_operation_self, bug_to_find))
        .map(|s| s.weighted())
        .unwrap_or(0.0)
}

fn all_metric(node: &ResultNode, bug_to_find: &str) -> f64 {
    operation_profile(&node.result)
        .and_then(|p| find_stat(&p.all_operation_self, bug_to_find))
        .map(|s| s.weighted())
        .unwrap_or(0.0)
}

/// Depth-first walk of a layer 3 aggregate tree (the tail subtree for a tail
/// pass, the overall subtree otherwise), collecting one candidate per
/// positional diagnostic (`child_diff` gap or `end_diff`) at every node whose
/// name matches `bug_to_find`, including repeated matches at different
/// depths.
fn find_spans(node: &AggregateNode, bug_to_find: &str, path: &mut Vec<String>, out: &mut Vec<DiffCandidate>) {
    path.push(node.name.clone());

    if node.name == bug_to_find {
        let sub_tree = SubTree::from_node(node);
        if node.children.is_empty() {
            out.push(DiffCandidate {
                l3_idx: 0,
                span_path: path.clone(),
                sub_tree: sub_tree.clone(),
                num_of_child: 0,
                kind: L3Mode::Fs,
                child_idx: None,
                diff_weighted: node.stats.weighted(),
            });
        } else {
            for (idx, cd) in node.child_diff.iter().enumerate() {
                out.push(DiffCandidate {
                    l3_idx: 0,
                    span_path: path.clone(),
                    sub_tree: sub_tree.clone(),
                    num_of_child: node.children.len(),
                    kind: L3Mode::Csl,
                    child_idx: Some(idx),
                    diff_weighted: cd.weighted(),
                });
            }
            out.push(DiffCandidate {
                l3_idx: 0,
                span_path: path.clone(),
                sub_tree: sub_tree.clone(),
                num_of_child: node.children.len(),
                kind: L3Mode::Lpl,
                child_idx: None,
                diff_weighted: node.end_diff.weighted(),
            });
        }
    }

    for child in &node.children {
        find_spans(child, bug_to_find, path, out);
    }
    path.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AbbrevMap;
    use crate::gather::{DefaultApp, InMemoryGather};
    use crate::pipeline;
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
    async fn generate_produces_only_steady_state_reports_without_tail_signal() {
        let gather = InMemoryGather::new(AbbrevMap::new());
        for i in 0..10 {
            gather
                .insert_raw(
                    format!("t{i}"),
                    vec![raw("a", "svcA", 0, 100, &[]), raw("b", "svcB", 10, 20, &["a"])],
                )
                .unwrap();
        }
        let ids: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
        let app = DefaultApp::new(AbbrevMap::new());
        let config = Config::new();
        let nodes = pipeline::run(&gather, &app, &config, ids).await.unwrap();

        let report = Report::new(&config);
        let (bugs, traces) = report.generate(&nodes);
        // identical traces carry no tail signal, so the tail pass never fires,
        // but the steady pass still ranks where time is spent overall.
        assert!(!bugs.is_empty());
        assert!(bugs.iter().all(|b| !b.l2.is_tail));
        assert!(!traces.is_empty());
    }

    #[tokio::test]
    async fn generate_flags_a_slow_tail_subspan() {
        let gather = InMemoryGather::new(AbbrevMap::new());
        for i in 0..20 {
            let b_end = if i < 18 { 20 } else { 500 };
            gather
                .insert_raw(
                    format!("t{i}"),
                    vec![raw("a", "svcA", 0, 600, &[]), raw("b", "svcB", 10, b_end, &["a"])],
                )
                .unwrap();
        }
        let ids: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();
        let app = DefaultApp::new(AbbrevMap::new());
        let config = Config::new();
        let nodes = pipeline::run(&gather, &app, &config, ids).await.unwrap();

        let report = Report::new(&config);
        let (bugs, traces) = report.generate(&nodes);
        assert!(!bugs.is_empty());
        assert!(!traces.is_empty());
        assert!(bugs.iter().any(|b| b.l1.serv == "svcB" || b.l1.serv == "svcA"));
    }

    #[test]
    fn strip_idx_removes_bracket_suffixes() {
        assert_eq!(strip_idx("THEMASTERSPAN~svcA~svcB[1]~"), "THEMASTERSPAN~svcA~svcB~");
    }

    #[test]
    fn find_spans_matches_repeated_names_at_every_depth() {
        let leaf = AggregateNode {
            name: "svcB".into(),
            children: Vec::new(),
            stats: Stat::from_samples(&[10]).unwrap(),
            child_diff: Vec::new(),
            end_diff: Stat::from_samples(&[0]).unwrap(),
        };
        let root = AggregateNode {
            name: "THEMASTERSPAN".into(),
            children: vec![leaf.clone(), leaf],
            stats: Stat::from_samples(&[100]).unwrap(),
            child_diff: vec![Stat::from_samples(&[5]).unwrap(), Stat::from_samples(&[5]).unwrap()],
            end_diff: Stat::from_samples(&[0]).unwrap(),
        };
        let mut path = Vec::new();
        let mut out = Vec::new();
        find_spans(&root, "svcB", &mut path, &mut out);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| matches!(c.kind, L3Mode::Fs)));
    }
}
