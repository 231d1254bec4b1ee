//! Runs the 4-layer pipeline over a handful of synthetic traces and prints
//! the resulting group tree.

use tprof::config::{AbbrevMap, Config};
use tprof::gather::{DefaultApp, InMemoryGather};
use tprof::pipeline;
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
    for i in 0..20 {
        gather.insert_raw(
            format!("t{i}"),
            vec![
                raw("a", "checkout_service", 0, 500, &[]),
                raw("b", "payment_service", 10, 200, &["a"]),
                raw("c", "inventory_service", 210, 250, &["a"]),
            ],
        )?;
    }

    let app = DefaultApp::new(AbbrevMap::new());
    let config = Config::new();
    let nodes = pipeline::run(&gather, &app, &config, gather.trace_ids()).await?;

    for l1 in &nodes {
        println!("{} ({} traces)", l1.group_name, l1.children.len());
        for l2 in &l1.children {
            println!("  {}", l2.group_name);
        }
    }
    Ok(())
}
