//! Builds a trace population where one service occasionally runs very long,
//! then walks the report engine's output to show how a tail-latency bug gets
//! pinpointed down to a specific subspan.

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

#[tokio::main]
async fn main() -> tprof::Result<()> {
    let gather = InMemoryGather::new(AbbrevMap::new());
    for i in 0..40 {
        let slow = i >= 36;
        let payment_end = if slow { 2000 } else { 200 };
        gather.insert_raw(
            format!("t{i}"),
            vec![
                raw("a", "checkout_service", 0, payment_end + 50, &[]),
                raw("b", "payment_service", 10, payment_end, &["a"]),
            ],
        )?;
    }

    let app = DefaultApp::new(AbbrevMap::new());
    let config = Config::new();
    let nodes = pipeline::run(&gather, &app, &config, gather.trace_ids()).await?;

    let report = Report::new(&config);
    let (bugs, agg_traces) = report.generate(&nodes);

    println!("found {} bug report(s)", bugs.len());
    for bug in &bugs {
        println!(
            "{}{} is {:.0}x slower in the tail at layer 3 path {:?} ({:?})",
            bug.l1.serv,
            if bug.l1.op.is_empty() { String::new() } else { format!(":{}", bug.l1.op) },
            bug.l2.tail_scale.unwrap_or(1.0),
            bug.l3.span_path,
            bug.l3.l3_mode,
        );
        println!("  aggregate trace id: {}", bug.l4.trace_id);
    }
    println!("synthesized {} aggregate-trace document(s)", agg_traces.len());
    Ok(())
}
