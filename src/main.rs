mod config;
mod constants;
mod error;
mod messages;
mod session;
mod simulator;

use crate::config::Args;
use crate::simulator::{run_batch, BatchSummary};
use clap::Parser;
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Arc::new(args.into_config()?);

    constants::print_banner();
    log::info!(
        "🌐 Starting nodes {}..{} against {} (wire={:?}, timestamp={:?})",
        config.range.start,
        config.range.end,
        config.url,
        config.wire_format,
        config.timestamp_format
    );

    if config.range.is_empty() {
        log::warn!("No nodes in {}..{}, nothing to run", config.range.start, config.range.end);
    }

    let outcomes = run_batch(Arc::clone(&config)).await;
    let summary = BatchSummary::from_outcomes(&outcomes);

    log::info!(
        "Batch finished: nodes={} failed={} close_cmd={} peer_closed={} errors={} routes={} hi={}",
        summary.nodes,
        summary.failed_to_connect,
        summary.closed_by_command,
        summary.closed_by_peer,
        summary.transport_errors,
        summary.routes_sent,
        summary.hi_replies
    );

    Ok(())
}
