//! Layer 1: partitions a trace-id population by [`Trace::status_str`]
//! (`Good_Traces` vs `Erroneous_Traces`) and profiles each bucket
//! (`spec.md` §4.1).

use crate::config::Config;
use crate::error::Result;
use crate::gather::Gather;
use crate::layer::{profile_operations, OperationProfile};
use std::collections::BTreeMap;

pub async fn group(gather: &dyn Gather, trace_ids: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for trace_id in trace_ids {
        let trace = gather.get_trace(trace_id).await?;
        groups
            .entry(trace.status_str().to_string())
            .or_default()
            .push(trace_id.clone());
    }
    Ok(groups)
}

pub async fn profile(gather: &dyn Gather, config: &Config, trace_ids: &[String]) -> Result<OperationProfile> {
    profile_operations(gather, config, trace_ids).await
}
