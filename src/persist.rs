//! Writes analysis output to disk: one plain-text report per group at every
//! layer (`results/layer{1..4}-<key>/<n>.txt`), a full-tree JSON snapshot
//! (`results/ret.json`, this crate's equivalent of the original tool's
//! `ret.p` pickle), and the aggregate-trace JSON documents the report engine
//! synthesized (`spec.md` §6, grounded on `tprof.py`'s `output_file`/
//! `output_file_layer_1_2`).

use crate::aggregate_trace::JaegerDocument;
use crate::error::Result;
use crate::pipeline::{LayerResult, ResultNode};
use crate::report::BugReport;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Writes the full persisted output tree under `base_dir`: per-layer text
/// reports, the `ret.json` tree snapshot, the ranked bug reports, and every
/// aggregate-trace JSON document.
pub fn write_results(
    base_dir: &Path,
    nodes: &[ResultNode],
    bugs: &[BugReport],
    agg_traces: &BTreeMap<String, JaegerDocument>,
) -> Result<()> {
    let results_dir = base_dir.join("results");
    fs::create_dir_all(&results_dir)?;

    write_layer(&results_dir, nodes, 1)?;

    fs::write(results_dir.join("ret.json"), serde_json::to_string_pretty(nodes)?)?;
    fs::write(results_dir.join("bug_reports.json"), serde_json::to_string_pretty(bugs)?)?;

    let traces_dir = results_dir.join("aggregate_traces");
    fs::create_dir_all(&traces_dir)?;
    for (trace_id, doc) in agg_traces {
        fs::write(traces_dir.join(format!("{trace_id}.json")), serde_json::to_string_pretty(doc)?)?;
    }
    Ok(())
}

/// Writes one directory per group at this layer (`layer{n}-<key>`), a
/// `<n>.txt` plain-text rendering of its profile, and recurses into the next
/// layer for each group's children. Layers 1/2 key by group name; layers 3/4
/// key by ordinal index, matching the original tool's `use_idx` table.
fn write_layer(results_dir: &Path, nodes: &[ResultNode], layer: u8) -> Result<()> {
    for (idx, node) in nodes.iter().enumerate() {
        let key = if layer <= 2 { node.group_name.clone() } else { idx.to_string() };
        let dir = results_dir.join(format!("layer{layer}-{key}"));
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("0.txt"), render(&node.result))?;
        write_layer(&dir, &node.children, layer + 1)?;
    }
    Ok(())
}

fn render(result: &LayerResult) -> String {
    match result {
        LayerResult::Status(p) | LayerResult::ReqType(p) => format!("{p:#?}"),
        LayerResult::Structure(p) => format!("{p:#?}"),
        LayerResult::EventSignature(p) => format!("{p:#?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AbbrevMap, Config};
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
    async fn write_results_creates_ret_json_and_layer_dirs() {
        let gather = InMemoryGather::new(AbbrevMap::new());
        gather
            .insert_raw("t1", vec![raw("a", "svcA", 0, 10, &[]), raw("b", "svcB", 1, 2, &["a"])])
            .unwrap();
        let app = DefaultApp::new(AbbrevMap::new());
        let config = Config::new();
        let nodes = pipeline::run(&gather, &app, &config, vec!["t1".to_string()]).await.unwrap();

        let tmp = std::env::temp_dir().join(format!("tprof-persist-test-{}", std::process::id()));
        write_results(&tmp, &nodes, &[], &BTreeMap::new()).unwrap();
        assert!(tmp.join("results/ret.json").exists());
        assert!(tmp.join("results/layer1-Good_Traces/0.txt").exists());
        let _ = fs::remove_dir_all(&tmp);
    }
}
