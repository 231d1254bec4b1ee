//! Scenario 3: excess tail latency accumulates after the last child returns
//! (`end_diff` growth), which the report engine classifies LPL.

use tprof::config::{AbbrevMap, Config};
use tprof::gather::InMemoryGather;
use tprof::layer3;
use tprof::trace::RawSpan;

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
async fn tail_excess_after_last_child_shows_up_as_end_diff() {
    let gather = InMemoryGather::new(AbbrevMap::new());
    let mut ids = Vec::new();
    for i in 0..100 {
        let id = format!("t{i}");
        let a_end = if i < 90 { 2 } else { 11 };
        gather
            .insert_raw(id.clone(), vec![raw("a", "A", 0, a_end, &[]), raw("b", "B", 0, 1, &["a"])])
            .unwrap();
        ids.push(id);
    }
    let config = Config::new().with_tail_cutoff(90);
    let profile = layer3::profile(&gather, &config, &ids).await.unwrap();

    let diff = profile.diff.unwrap();
    let a_diff = diff.children.iter().find(|c| c.name == "A").unwrap();
    // `A`'s own duration grows from 2ns to 11ns across norm/tail while its
    // child `B` stays fixed at [0,1): almost all of that 9ns gap shows up as
    // `end_diff` (the gap after the last child returns), not as `B`'s stats.
    assert!(a_diff.end_diff.mean > 5.0);
}
