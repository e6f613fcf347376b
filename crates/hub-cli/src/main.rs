//! `agentsmith-hub` process entrypoint: loads the process config, wires a
//! KV client, initializes logging, and drives the leader campaign and
//! reconciliation loop described in spec §4.3.
//!
//! Parsing component/project declarations from the on-disk config root is
//! an external collaborator this binary does not implement (spec §1's
//! "YAML/XML parsers for component definitions" is explicitly out of
//! scope), so the reconciliation loop here runs against
//! [`demo::DemoProjectSource`], a loopback-backed [`hub_cluster::ProjectSource`]
//! that is enough to exercise the leader/reconcile/stats machinery
//! end-to-end against a real KV store without inventing a config format.

mod config;
mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use hub_kv::{InMemoryKv, KvClient, ResilientClient, ResilientConfig};
use tracing::info;

use config::ProcessConfig;
use demo::DemoProjectSource;

#[derive(Parser)]
#[command(name = "agentsmith-hub", about = "AgentSmith-HUB cluster node")]
struct Cli {
    #[arg(long, default_value = "hub.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the leader campaign (if enabled) and the reconciliation loop
    /// until interrupted.
    Run,
    /// Runs exactly one reconciliation pass and exits.
    ReconcileOnce,
    /// Prints the current leader advertisement and this node's actual
    /// project map.
    ShowStatus,
}

fn init_logging(filter: &str) {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match ProcessConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(1);
        }
    };
    init_logging(&config.log_filter);

    let exit_code = match run(cli.command, config).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(command: Command, config: ProcessConfig) -> anyhow::Result<()> {
    // No concrete production KV backend client library ships in this
    // workspace (none is named anywhere in scope); `InMemoryKv` behind the
    // same resilience wrapper a real backend would sit behind is the
    // honest placeholder until one is wired in.
    let client = Arc::new(ResilientClient::new(InMemoryKv::new(), ResilientConfig::default()));

    match command {
        Command::Run => run_node(client, config).await,
        Command::ReconcileOnce => reconcile_once(client, config).await,
        Command::ShowStatus => show_status(client, config).await,
    }
}

async fn run_node(client: Arc<ResilientClient<InMemoryKv>>, config: ProcessConfig) -> anyhow::Result<()> {
    let cancel = hub_core::context::Cancellation::new();

    let leader_handle = if config.leader.enabled {
        let client = client.clone();
        let node_id = config.node_id.clone();
        let cancel = cancel.clone();
        let ttl = Duration::from_secs(config.leader.ready_ttl_secs);
        let refresh = Duration::from_millis(config.leader.refresh_interval_ms);
        Some(tokio::spawn(async move {
            let _ = hub_cluster::run_leader_campaign(client, node_id, ttl, refresh, cancel).await;
        }))
    } else {
        None
    };

    let membership_handle = {
        let client = client.clone();
        let node_id = config.node_id.clone();
        let address = config.announced_address.clone();
        let cancel = cancel.clone();
        let interval = Duration::from_millis(config.membership_interval_ms);
        tokio::spawn(async move {
            let _ = hub_cluster::run_membership_announcer(client, node_id, address, interval, cancel).await;
        })
    };

    let reconciler = hub_cluster::ProjectReconciler::new(
        client.clone(),
        config.node_id.clone(),
        Arc::new(DemoProjectSource::new()),
        Duration::from_secs(10),
    );

    let stats = hub_stats::DailyCollector::new(
        client.clone(),
        config.node_id.clone(),
        hub_core::keys::retention::DEFAULT_DAILY_RETENTION_DAYS,
    );

    let mut reconcile_ticker = tokio::time::interval(config.reconcile_interval());
    let mut stats_ticker = tokio::time::interval(Duration::from_secs(10));
    info!(node = %config.node_id, "agentsmith-hub node starting");
    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = reconcile_ticker.tick() => {
                if let Err(e) = reconciler.reconcile_once().await {
                    tracing::warn!(error = %e, "reconciliation pass failed");
                }
            }
            _ = stats_ticker.tick() => {
                if let Err(e) = collect_stats_tick(&stats, &reconciler).await {
                    tracing::warn!(error = %e, "stats collection tick failed");
                }
            }
        }
    }

    cancel.cancel();
    if let Some(handle) = leader_handle {
        let _ = handle.await;
    }
    let _ = membership_handle.await;
    Ok(())
}

/// Drains every running project's component counters into today's daily
/// stats hash. Mirrors the collector/reconciler split from spec §4.4: the
/// reconciler owns which projects are running, the collector only reads
/// their counters.
async fn collect_stats_tick<C: hub_kv::KvClient>(
    stats: &hub_stats::DailyCollector<C>,
    reconciler: &hub_cluster::ProjectReconciler<C>,
) -> hub_core::error::Result<()> {
    let deltas: Vec<hub_stats::ComponentDelta> = reconciler
        .running_snapshot()
        .iter()
        .flat_map(|project| {
            let project_id = project.id.clone();
            project
                .counters()
                .into_iter()
                .map(move |(kind, component_id, pns, counter)| hub_stats::ComponentDelta {
                    project_id: project_id.clone(),
                    component_type: kind.as_str(),
                    component_id,
                    pns,
                    delta: counter.take_delta(),
                })
        })
        .collect();
    stats.record_tick(&deltas).await
}

async fn reconcile_once(client: Arc<ResilientClient<InMemoryKv>>, config: ProcessConfig) -> anyhow::Result<()> {
    let reconciler = hub_cluster::ProjectReconciler::new(
        client,
        config.node_id.clone(),
        Arc::new(DemoProjectSource::new()),
        Duration::from_secs(10),
    );
    let report = reconciler.reconcile_once().await?;
    println!(
        "started={:?} stopped={:?} failed={:?}",
        report.started, report.stopped, report.failed
    );
    Ok(())
}

async fn show_status(client: Arc<ResilientClient<InMemoryKv>>, config: ProcessConfig) -> anyhow::Result<()> {
    let leader = hub_cluster::current_leader(client.as_ref()).await?;
    println!("leader: {leader:?}");
    let actual = client
        .hash_get_all(&hub_core::keys::proj_actual(&config.node_id))
        .await?;
    println!("actual[{}]: {actual:?}", config.node_id);
    let members = hub_cluster::members(client.as_ref()).await?;
    println!("members: {members:?}");
    Ok(())
}
