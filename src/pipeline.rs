//! Drives the four-layer analysis recursively: group the current trace-id
//! population, profile each bucket, then recurse into the next layer with
//! that bucket's trace ids (`spec.md` §2, the original tool's
//! `process_in_layer`).

use crate::config::Config;
use crate::error::Result;
use crate::gather::{App, Gather};
use crate::layer::OperationProfile;
use crate::layer1;
use crate::layer2;
use crate::layer3::{self, Layer3Profile};
use crate::layer4::{self, Layer4Profile};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub enum LayerResult {
    Status(OperationProfile),
    ReqType(OperationProfile),
    Structure(Layer3Profile),
    EventSignature(Layer4Profile),
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultNode {
    pub group_name: String,
    pub result: LayerResult,
    pub children: Vec<ResultNode>,
}

/// Runs the full 4-layer pipeline over `trace_ids`, returning one
/// [`ResultNode`] per layer-1 group (`Good_Traces`/`Erroneous_Traces`).
pub async fn run(gather: &dyn Gather, app: &dyn App, config: &Config, trace_ids: Vec<String>) -> Result<Vec<ResultNode>> {
    build_layer1(gather, app, config, trace_ids).await
}

async fn build_layer1(gather: &dyn Gather, app: &dyn App, config: &Config, trace_ids: Vec<String>) -> Result<Vec<ResultNode>> {
    let groups = layer1::group(gather, &trace_ids).await?;
    let mut nodes = Vec::with_capacity(groups.len());
    for (name, ids) in groups {
        let result = layer1::profile(gather, config, &ids).await?;
        let children = build_layer2(gather, app, config, ids).await?;
        nodes.push(ResultNode {
            group_name: name,
            result: LayerResult::Status(result),
            children,
        });
    }
    Ok(nodes)
}

async fn build_layer2(gather: &dyn Gather, app: &dyn App, config: &Config, trace_ids: Vec<String>) -> Result<Vec<ResultNode>> {
    let groups = layer2::group(gather, app, &trace_ids).await?;
    let mut nodes = Vec::with_capacity(groups.len());
    for (name, ids) in groups {
        let result = layer2::profile(gather, config, &ids).await?;
        let children = build_layer3(gather, config, ids).await?;
        nodes.push(ResultNode {
            group_name: name,
            result: LayerResult::ReqType(result),
            children,
        });
    }
    Ok(nodes)
}

async fn build_layer3(gather: &dyn Gather, config: &Config, trace_ids: Vec<String>) -> Result<Vec<ResultNode>> {
    let groups = layer3::group(gather, &trace_ids).await?;
    let mut nodes = Vec::with_capacity(groups.len());
    for (name, ids) in groups {
        let result = layer3::profile(gather, config, &ids).await?;
        let children = build_layer4(gather, config, ids).await?;
        nodes.push(ResultNode {
            group_name: name,
            result: LayerResult::Structure(result),
            children,
        });
    }
    Ok(nodes)
}

async fn build_layer4(gather: &dyn Gather, config: &Config, trace_ids: Vec<String>) -> Result<Vec<ResultNode>> {
    let groups = layer4::group(gather, &trace_ids).await?;
    let mut nodes = Vec::with_capacity(groups.len());
    for (name, ids) in groups {
        let result = layer4::profile(gather, config, &ids).await?;
        nodes.push(ResultNode {
            group_name: name,
            result: LayerResult::EventSignature(result),
            children: Vec::new(),
        });
    }
    Ok(nodes)
}
