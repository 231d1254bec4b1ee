//! Benchmarks layer 3's aggregate-tree construction over a population of
//! structurally-identical traces.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;
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

fn bench_profile(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let gather = InMemoryGather::new(AbbrevMap::new());
    let mut ids = Vec::new();
    for i in 0..500 {
        let id = format!("t{i}");
        gather
            .insert_raw(
                id.clone(),
                vec![
                    raw("a", "svcA", 0, 1000, &[]),
                    raw("b", "svcB", 10, 100 + (i % 50), &["a"]),
                    raw("c", "svcC", 110, 900, &["a"]),
                ],
            )
            .unwrap();
        ids.push(id);
    }
    let config = Config::new();

    c.bench_function("layer3_profile_500_traces", |b| {
        b.iter(|| rt.block_on(layer3::profile(black_box(&gather), black_box(&config), black_box(&ids))).unwrap())
    });
}

criterion_group!(benches, bench_profile);
criterion_main!(benches);
