//! Structural signatures used to group traces at layer 3, and the relabeling
//! pass that assigns deterministic `[n]` suffixes and root-to-node paths used
//! at layer 4 (`spec.md` §4.3/§4.4).

use crate::trace::{RawSpan, Trace};
use serde::Serialize;
use std::collections::BTreeMap;

/// Recursive `(func_name, sorted children)` signature of a span subtree.
/// Two traces with the same signature have the same call structure.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Signature {
    pub name: String,
    pub children: Vec<Signature>,
}

impl Signature {
    pub fn of(trace: &Trace, span_id: &str) -> Signature {
        let span = &trace.spans[span_id];
        let mut children: Vec<Signature> = span
            .children
            .iter()
            .map(|c| Signature::of(trace, c))
            .collect();
        children.sort();
        Signature {
            name: span.func_name(),
            children,
        }
    }

    /// Canonical JSON string used as a hash-map group key, matching the
    /// `json.dumps(identifier)` grouping key of the original tool.
    pub fn group_key(&self) -> String {
        serde_json::to_string(self).expect("Signature serialization is infallible")
    }
}

/// Relabels every non-root span of `trace` by appending `[n]` to the n-th
/// repeated occurrence of a function name among siblings (ordered by start
/// time), then renames each span to its full `~`-joined root-to-node path
/// (e.g. `"THEMASTERSPAN~A~B[1]~"`). Used before arrow/subspan extraction at
/// layer 4 so that sibling calls to the same function are distinguishable.
pub fn relabel_by_path(trace: &Trace) -> Trace {
    let mut display_name: BTreeMap<String, String> = BTreeMap::new();
    assign_sibling_indices(trace, &trace.root, &mut display_name);

    let mut path: BTreeMap<String, String> = BTreeMap::new();
    build_paths(trace, &trace.root, String::new(), &display_name, &mut path);

    let mut raw_spans = Vec::with_capacity(trace.spans.len() - 1);
    for (span_id, span) in &trace.spans {
        if *span_id == trace.root {
            continue;
        }
        raw_spans.push(RawSpan {
            span_id: span_id.clone(),
            service_name: path[span_id].clone(),
            operation_name: String::new(),
            start_time: span.start_time,
            end_time: span.end_time,
            references: span.refs.clone(),
        });
    }

    let mut relabeled = Trace::from_raw_spans(trace.trace_id.clone(), raw_spans, &BTreeMap::new())
        .expect("relabeling a valid trace cannot introduce duplicate ids or multi-parents");
    relabeled.t = trace.t;
    relabeled
}

fn assign_sibling_indices(trace: &Trace, span_id: &str, display_name: &mut BTreeMap<String, String>) {
    let span = &trace.spans[span_id];
    let mut index: BTreeMap<String, u32> = BTreeMap::new();
    for child_id in &span.children {
        let child = &trace.spans[child_id];
        let base = child.func_name();
        let count = index.entry(base.clone()).or_insert(0);
        let name = if *count == 0 {
            base.clone()
        } else {
            format!("{}[{}]", base, count)
        };
        *count += 1;
        display_name.insert(child_id.clone(), name);
        assign_sibling_indices(trace, child_id, display_name);
    }
}

fn build_paths(
    trace: &Trace,
    span_id: &str,
    prefix: String,
    display_name: &BTreeMap<String, String>,
    out: &mut BTreeMap<String, String>,
) {
    let span = &trace.spans[span_id];
    let segment = if span_id == trace.root {
        trace.root.clone()
    } else {
        display_name[span_id].clone()
    };
    let path = format!("{}{}~", prefix, segment);
    out.insert(span_id.to_string(), path.clone());
    for child_id in &span.children {
        build_paths(trace, child_id, path.clone(), display_name, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AbbrevMap;

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

    #[test]
    fn identical_structure_traces_share_a_signature() {
        let t1 = Trace::from_raw_spans(
            "t1".into(),
            vec![
                raw("a", "svcA", 0, 100, &[]),
                raw("b", "svcB", 10, 20, &["a"]),
            ],
            &AbbrevMap::new(),
        )
        .unwrap();
        let t2 = Trace::from_raw_spans(
            "t2".into(),
            vec![
                raw("x", "svcA", 0, 200, &[]),
                raw("y", "svcB", 50, 60, &["x"]),
            ],
            &AbbrevMap::new(),
        )
        .unwrap();
        assert_eq!(
            Signature::of(&t1, &t1.root).group_key(),
            Signature::of(&t2, &t2.root).group_key()
        );
    }

    #[test]
    fn different_child_count_breaks_signature_equality() {
        let t1 = Trace::from_raw_spans(
            "t1".into(),
            vec![
                raw("a", "svcA", 0, 100, &[]),
                raw("b", "svcB", 10, 20, &["a"]),
            ],
            &AbbrevMap::new(),
        )
        .unwrap();
        let t2 = Trace::from_raw_spans(
            "t2".into(),
            vec![
                raw("a", "svcA", 0, 100, &[]),
                raw("b", "svcB", 10, 20, &["a"]),
                raw("c", "svcC", 30, 40, &["a"]),
            ],
            &AbbrevMap::new(),
        )
        .unwrap();
        assert_ne!(
            Signature::of(&t1, &t1.root).group_key(),
            Signature::of(&t2, &t2.root).group_key()
        );
    }

    #[test]
    fn relabel_indexes_repeated_sibling_names() {
        let t = Trace::from_raw_spans(
            "t1".into(),
            vec![
                raw("a", "svcA", 0, 100, &[]),
                raw("b1", "svcB", 10, 20, &["a"]),
                raw("b2", "svcB", 30, 40, &["a"]),
            ],
            &AbbrevMap::new(),
        )
        .unwrap();
        let relabeled = relabel_by_path(&t);
        let names: Vec<&str> = relabeled.spans.values().map(|s| s.service.as_str()).collect();
        assert!(names.iter().any(|n| *n == "THEMASTERSPAN~svcA~svcB~"));
        assert!(names.iter().any(|n| *n == "THEMASTERSPAN~svcA~svcB[1]~"));
    }
}
