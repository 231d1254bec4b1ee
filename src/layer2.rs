//! Layer 2: partitions a trace-id population by [`App::trace_req_type`] and
//! profiles each bucket with the same operation-stat machinery as layer 1
//! (`spec.md` §4.1).

use crate::config::Config;
use crate::error::Result;
use crate::gather::{App, Gather};
use crate::layer::{profile_operations, OperationProfile};
use std::collections::BTreeMap;

pub async fn group(gather: &dyn Gather, app: &dyn App, trace_ids: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for trace_id in trace_ids {
        let trace = gather.get_trace(trace_id).await?;
        let req_type = app.trace_req_type(&trace);
        groups.entry(req_type).or_default().push(trace_id.clone());
    }
    Ok(groups)
}

pub async fn profile(gather: &dyn Gather, config: &Config, trace_ids: &[String]) -> Result<OperationProfile> {
    profile_operations(gather, config, trace_ids).await
}
