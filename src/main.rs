//! # swsync
//!
//! Command-line entry point for the SWAPI → CMS sync.
//!
//! ## Usage
//!
//! ```bash
//! swsync --config ./config/swsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `swsync run` | Sync every configured resource into the CMS |
//! | `swsync check` | Authenticate against the CMS and print the session uid |
//!
//! ## Exit status
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Run finished, nothing failed |
//! | 1 | Run finished, some items or pages failed |
//! | 2 | Run aborted (bad config, auth failure, protocol violation) |

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::warn;

use swapi_odoo_sync::assets::SwimgClient;
use swapi_odoo_sync::config::{self, Config};
use swapi_odoo_sync::gateway::TargetGateway;
use swapi_odoo_sync::logging::init_tracing;
use swapi_odoo_sync::models::{PipelineState, Resource, RunReport, UpsertOutcome};
use swapi_odoo_sync::pipeline::{Pipeline, PipelineOptions};
use swapi_odoo_sync::progress::ProgressMode;
use swapi_odoo_sync::rpc::memory::InMemoryCms;
use swapi_odoo_sync::rpc::odoo::OdooJsonRpc;
use swapi_odoo_sync::rpc::{CmsRpc, Credentials};
use swapi_odoo_sync::source::SwapiClient;

/// Sync Star Wars API data into an Odoo-style CMS.
///
/// All commands read a TOML configuration file. See
/// `config/swsync.example.toml` for every option.
#[derive(Parser)]
#[command(name = "swsync", version, about = "Sync SWAPI planets and people into an Odoo CMS")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/swsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync.
    ///
    /// Pages through each resource, fetches character images, and upserts
    /// every item by its external key. Safe to rerun.
    Run {
        /// Write into an in-memory CMS instead of the configured one.
        #[arg(long)]
        dry_run: bool,

        /// Fail items whose image cannot be fetched instead of writing them
        /// without one.
        #[arg(long)]
        strict_images: bool,

        /// Items processed at once (overrides `[pipeline].concurrency`).
        #[arg(long)]
        concurrency: Option<usize>,

        /// Sync only these resources (repeatable): `planets`, `people`.
        #[arg(long = "resource", value_parser = parse_resource)]
        resources: Vec<Resource>,

        /// Print the full run report as JSON on stdout.
        #[arg(long)]
        json: bool,

        /// Progress on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Authenticate against the CMS and print the uid.
    Check,
}

fn parse_resource(s: &str) -> Result<Resource, String> {
    Resource::parse(s).ok_or_else(|| format!("unknown resource '{}' (planets, people)", s))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing("swapi_odoo_sync=info") {
        eprintln!("warning: {:#}", e);
    }

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Check => run_check(&cfg).await,
        Commands::Run {
            dry_run,
            strict_images,
            concurrency,
            resources,
            json,
            progress,
        } => {
            let mut options = PipelineOptions::from_config(&cfg);
            if strict_images {
                options.strict_images = true;
            }
            if let Some(n) = concurrency {
                anyhow::ensure!(n >= 1, "--concurrency must be at least 1");
                options.concurrency = n;
            }
            if !resources.is_empty() {
                options.resources = Resource::ALL
                    .into_iter()
                    .filter(|r| resources.contains(r))
                    .collect();
            }
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            run_sync(&cfg, options, dry_run, json, progress).await
        }
    }
}

fn credentials(cfg: &Config) -> Credentials {
    Credentials::new(&cfg.odoo.db, &cfg.odoo.username, &cfg.odoo.password)
}

async fn run_check(cfg: &Config) -> anyhow::Result<ExitCode> {
    let rpc = OdooJsonRpc::new(&cfg.odoo)?;
    let gateway = TargetGateway::new(Arc::new(rpc), &cfg.odoo.external_key_field);
    let session = gateway
        .authenticate(&credentials(cfg))
        .await
        .with_context(|| format!("login to {} failed", cfg.odoo.url))?;
    println!("authenticated {}@{} (uid {})", cfg.odoo.username, session.db, session.uid);
    println!("ok");
    Ok(ExitCode::SUCCESS)
}

async fn run_sync(
    cfg: &Config,
    options: PipelineOptions,
    dry_run: bool,
    json: bool,
    progress: ProgressMode,
) -> anyhow::Result<ExitCode> {
    let rpc: Arc<dyn CmsRpc> = if dry_run {
        Arc::new(InMemoryCms::new())
    } else {
        Arc::new(OdooJsonRpc::new(&cfg.odoo)?)
    };
    let source = Arc::new(SwapiClient::new(&cfg.swapi)?);
    let assets = Arc::new(SwimgClient::new(&cfg.swimg)?);
    let gateway = TargetGateway::new(rpc, &cfg.odoo.external_key_field);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing admitted items");
            let _ = cancel_tx.send(true);
        }
    });

    let pipeline = Pipeline::new(source, assets, gateway, credentials(cfg), options)
        .with_cancel(cancel_rx)
        .with_progress(progress.reporter());
    let report = pipeline.run().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, dry_run);
    }

    Ok(exit_code(&report))
}

fn exit_code(report: &RunReport) -> ExitCode {
    match report.state {
        PipelineState::Done if report.is_clean() => ExitCode::SUCCESS,
        PipelineState::Done => ExitCode::from(1),
        _ => ExitCode::from(2),
    }
}

fn print_summary(report: &RunReport, dry_run: bool) {
    for resource in Resource::ALL {
        let items: Vec<_> = report.outcomes_for(resource).collect();
        if items.is_empty() {
            continue;
        }
        if dry_run {
            println!("sync {} (dry-run)", resource);
        } else {
            println!("sync {}", resource);
        }
        let created = items
            .iter()
            .filter(|i| matches!(i.outcome, UpsertOutcome::Created { .. }))
            .count();
        let updated = items
            .iter()
            .filter(|i| matches!(i.outcome, UpsertOutcome::Updated { .. }))
            .count();
        println!("  items: {}", items.len());
        println!("  created: {}", created);
        println!("  updated: {}", updated);
        for item in &items {
            if let UpsertOutcome::Failed { kind, message } = &item.outcome {
                println!("  failed {} [{}]: {}", item.external_key, kind, message);
            }
        }
        let degraded = items.iter().filter(|i| i.degraded.is_some()).count();
        if degraded > 0 {
            println!("  without image: {}", degraded);
        }
    }

    for failure in &report.page_failures {
        println!(
            "page failed {} {}: {}",
            failure.resource, failure.token, failure.message
        );
    }

    if let Some(finished) = report.finished_at {
        let elapsed = (finished - report.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        println!("elapsed: {:.1}s", elapsed.as_secs_f64());
    }

    if report.cancelled {
        println!("cancelled");
    }
    match (&report.state, &report.fatal) {
        (PipelineState::Fatal, Some(reason)) => println!("aborted: {}", reason),
        _ if report.is_clean() => println!("ok"),
        _ => println!("completed with failures"),
    }
}
