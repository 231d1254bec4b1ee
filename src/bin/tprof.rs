//! CLI driver: loads a population of raw traces from a JSON file, runs the
//! 4-layer pipeline and report engine, and either persists the results to
//! disk or serves the aggregate-trace JSON over HTTP (`spec.md` §6).

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tprof::config::{AbbrevMap, Config};
use tprof::gather::{DefaultApp, InMemoryGather};
use tprof::http_proxy::{self, ProxyState};
use tprof::persist;
use tprof::pipeline;
use tprof::report::Report;
use tprof::trace::RawSpan;

#[derive(Parser)]
#[command(name = "tprof", about = "Distributed-tracing performance analyzer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline and report engine over a trace population, writing
    /// results under `<output>/results/`.
    Analyze {
        /// JSON file: `{trace_id: [RawSpan, ...], ...}`.
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
    /// Run the pipeline and report engine, then serve the synthesized
    /// aggregate-trace JSON over HTTP, forwarding everything else upstream.
    Serve {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        upstream: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

fn load_gather(input: &PathBuf) -> anyhow::Result<InMemoryGather> {
    let raw = std::fs::read_to_string(input)?;
    let traces: BTreeMap<String, Vec<RawSpan>> = serde_json::from_str(&raw)?;
    let gather = InMemoryGather::new(AbbrevMap::new());
    for (trace_id, spans) in traces {
        gather.insert_raw(trace_id, spans)?;
    }
    Ok(gather)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Analyze { input, output } => {
            let gather = load_gather(&input)?;
            let app = DefaultApp::new(AbbrevMap::new());
            let config = Config::new();
            let trace_ids = gather.trace_ids();
            tracing::info!(count = trace_ids.len(), "running pipeline");
            let nodes = pipeline::run(&gather, &app, &config, trace_ids).await?;

            let report = Report::new(&config);
            let (bugs, agg_traces) = report.generate(&nodes);
            tracing::info!(bugs = bugs.len(), "report generated");

            persist::write_results(&output, &nodes, &bugs, &agg_traces)?;
        }
        Command::Serve { input, upstream, port } => {
            let gather = load_gather(&input)?;
            let app = DefaultApp::new(AbbrevMap::new());
            let config = Config::new();
            let trace_ids = gather.trace_ids();
            let nodes = pipeline::run(&gather, &app, &config, trace_ids).await?;

            let report = Report::new(&config);
            let (_bugs, agg_traces) = report.generate(&nodes);

            let state = ProxyState::new(agg_traces, upstream);
            let router = http_proxy::router(state);
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
            tracing::info!(%port, "serving aggregate-trace proxy");
            axum::serve(listener, router).await?;
        }
    }
    Ok(())
}
