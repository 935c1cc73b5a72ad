use anyhow::{Context, Result};
use cert_sync::{
    open_database, run_batch, run_single, BatchOptions, HomeDivisionResolver, HttpFeedClient,
    ReconcileError, ReconciliationEngine, SyncConfig, SyncTier, DEFAULT_BATCH_SIZE,
};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Update members using the cert feed
#[derive(Parser, Debug)]
#[command(name = "members-cert-update", version, about, long_about = None)]
struct Args {
    /// Maximum members to load (hard limit 10,000)
    #[arg(default_value_t = DEFAULT_BATCH_SIZE)]
    max_members: usize,

    /// Which update are we running? hourly, daily, weekly, monthly or all
    #[arg(short = 't', long = "type", default_value = "all")]
    tier: SyncTier,

    /// If specified, only this CID will be checked
    #[arg(short = 'f', long = "force")]
    force: Option<i64>,

    /// JSON settings file
    #[arg(long, env = "CERT_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides the config file)
    #[arg(long, env = "CERT_SYNC_DATABASE")]
    database: Option<PathBuf>,

    /// Cert feed base URL (overrides the config file)
    #[arg(long, env = "CERT_SYNC_FEED_URL")]
    feed_url: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();

    let mut config = SyncConfig::load(args.config.as_deref())?;
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(feed_url) = args.feed_url {
        config.feed_base_url = feed_url;
    }

    let mut conn = open_database(&config.database_path)?;
    let feed = HttpFeedClient::new(config.feed_base_url.clone(), config.feed_timeout())
        .context("Failed to build cert feed client")?;
    let resolver = HomeDivisionResolver::new(config.home_region.clone(), config.home_division.clone());
    let engine = ReconciliationEngine::new(feed, resolver, config.system_account_id);

    // Forced single-member update: process and exit
    if let Some(member_id) = args.force {
        match run_single(&mut conn, &engine, member_id, Utc::now()) {
            Ok(outcome) => {
                if !outcome.is_synced() {
                    warn!(member_id, "Forced update did not sync the member");
                }
                std::process::exit(0)
            }
            Err(ReconcileError::MemberNotFound(id)) => {
                error!(member_id = id, "Cannot retrieve member {id} during forced update");
                std::process::exit(1);
            }
            Err(e) => {
                error!(member_id, error = %e, "Forced update failed");
                std::process::exit(1);
            }
        }
    }

    let options = BatchOptions {
        tier: args.tier,
        max_members: args.max_members,
        min_member_id: config.min_member_id,
    };
    let report = run_batch(&mut conn, &engine, &options, Utc::now)?;
    info!(
        processed = report.processed,
        failed = report.failed + report.fetch_failed,
        "Cert update finished"
    );

    Ok(())
}
