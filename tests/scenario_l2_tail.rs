//! Scenario 5: two request types share a hot operation H; only the type
//! whose tail mean self-time for H exceeds 4x its norm mean gets flagged
//! `is_tail` by the report engine.

use tprof::config::{AbbrevMap, Config};
use tprof::gather::{DefaultApp, InMemoryGather};
use tprof::pipeline;
use tprof::report::Report;
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
async fn only_the_blown_up_request_type_is_flagged_tail() {
    let gather = InMemoryGather::new(AbbrevMap::new());
    let mut ids = Vec::new();

    // checkout_* traces: H (shared op) blows up in the tail.
    for i in 0..20 {
        let id = format!("checkout{i}");
        let h_end = if i < 18 { 20 } else { 300 };
        gather
            .insert_raw(id.clone(), vec![raw("checkout_service", "checkout", 0, 400, &[]), raw("H", "op", 10, h_end, &["checkout_service"])])
            .unwrap();
        ids.push(id);
    }
    // billing_* traces: H stays flat.
    for i in 0..20 {
        let id = format!("billing{i}");
        gather
            .insert_raw(id.clone(), vec![raw("billing_service", "billing", 0, 400, &[]), raw("H", "op", 10, 30, &["billing_service"])])
            .unwrap();
        ids.push(id);
    }

    let app = DefaultApp::new(AbbrevMap::new());
    let config = Config::new();
    let nodes = pipeline::run(&gather, &app, &config, ids).await.unwrap();

    let report = Report::new(&config);
    let (bugs, _traces) = report.generate(&nodes);

    assert!(bugs.iter().any(|b| b.l2.req_type == "checkout" && b.l2.is_tail));
    assert!(!bugs.iter().any(|b| b.l2.req_type == "billing" && b.l2.is_tail));
}
