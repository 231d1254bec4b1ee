//! Cross-cutting invariants and boundary cases from the testable-properties
//! list: arrow shape, master span extent, single-trace/leaf-span boundary
//! behavior, and subspan-sum/self-time bounds.

use tprof::arrow::{arrows, self_time, Superscript};
use tprof::config::{AbbrevMap, Config};
use tprof::gather::InMemoryGather;
use tprof::layer3;
use tprof::trace::{RawSpan, Trace};

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
fn arrow_count_is_two_plus_two_per_child() {
    let spans = vec![
        raw("a", "A", 0, 100, &[]),
        raw("b", "B", 10, 20, &["a"]),
        raw("c", "C", 30, 40, &["a"]),
        raw("d", "D", 50, 60, &["a"]),
    ];
    let trace = Trace::from_raw_spans("t1".into(), spans, &AbbrevMap::new()).unwrap();
    let all = arrows(&trace);
    assert_eq!(all["a"].len(), 2 + 2 * 3);
    assert_eq!(all["a"].first().unwrap().superscript, Superscript::Begin);
    assert_eq!(all["a"].last().unwrap().superscript, Superscript::Terminate);
}

#[test]
fn self_time_is_bounded_by_span_duration() {
    let spans = vec![raw("a", "A", 0, 100, &[]), raw("b", "B", 10, 90, &["a"])];
    let trace = Trace::from_raw_spans("t1".into(), spans, &AbbrevMap::new()).unwrap();
    let all = arrows(&trace);
    let t = self_time(&all["a"]);
    assert!(t >= 0 && t <= 100);
}

#[test]
fn master_span_spans_min_start_to_max_end() {
    let spans = vec![raw("a", "A", 5, 50, &[]), raw("b", "B", 2, 30, &[])];
    let trace = Trace::from_raw_spans("t1".into(), spans, &AbbrevMap::new()).unwrap();
    assert_eq!(trace.master_span().start_time, 2);
    assert_eq!(trace.master_span().end_time, 50);
    assert_eq!(trace.t, 48);
}

#[tokio::test]
async fn single_trace_l3_group_has_only_overall_with_unit_counts() {
    let gather = InMemoryGather::new(AbbrevMap::new());
    gather
        .insert_raw("t1", vec![raw("a", "A", 0, 100, &[]), raw("b", "B", 10, 20, &["a"])])
        .unwrap();
    let config = Config::new();
    let profile = layer3::profile(&gather, &config, &["t1".to_string()]).await.unwrap();

    assert!(profile.norm.is_none());
    assert!(profile.tail.is_none());
    assert!(profile.diff.is_none());
    assert_eq!(profile.overall.stats.count, 1);
    assert_eq!(profile.overall.stats.stddev, 0.0);
}

#[tokio::test]
async fn leaf_span_has_zero_end_diff() {
    let gather = InMemoryGather::new(AbbrevMap::new());
    gather.insert_raw("t1", vec![raw("a", "A", 0, 100, &[])]).unwrap();
    let config = Config::new();
    let profile = layer3::profile(&gather, &config, &["t1".to_string()]).await.unwrap();
    let a = profile.overall.children.iter().find(|c| c.name == "A").unwrap();
    assert_eq!(a.end_diff.mean, 0.0);
    assert!(a.children.is_empty());
}
