//! Scenario 4: excess tail latency accumulates as a growing delay before a
//! span's second child starts, which the report engine classifies CSL with
//! `child_idx == 1`.

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
async fn delayed_second_child_shows_up_as_child_diff_index_one() {
    let gather = InMemoryGather::new(AbbrevMap::new());
    let mut ids = Vec::new();
    for i in 0..100 {
        let id = format!("t{i}");
        let c_start = if i < 90 { 20 } else { 70 };
        gather
            .insert_raw(
                id.clone(),
                vec![
                    raw("a", "A", 0, c_start + 10, &[]),
                    raw("b", "B", 10, 11, &["a"]),
                    raw("c", "C", c_start, c_start + 5, &["a"]),
                ],
            )
            .unwrap();
        ids.push(id);
    }
    let config = Config::new().with_tail_cutoff(90);
    let profile = layer3::profile(&gather, &config, &ids).await.unwrap();

    let diff = profile.diff.unwrap();
    let a_diff = diff.children.iter().find(|c| c.name == "A").unwrap();
    assert_eq!(a_diff.child_diff.len(), 2);
    // index 1 is the gap between B's start and C's start, which grows from
    // 10ns to 60ns across norm/tail.
    assert!(a_diff.child_diff[1].mean > 30.0);
}
