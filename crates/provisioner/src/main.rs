use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use solana_sdk::{pubkey::Pubkey, signature::read_keypair_file};

use pool_provisioner::config::create_example_config;
use pool_provisioner::{
    storage_units, tx_per_account, PoolService, ProvisionerConfig, RpcConnection, ServiceSettings,
};

#[derive(Parser, Debug)]
#[command(name = "pool-provisioner")]
#[command(about = "Provision and tear down program/fee-payer account pools")]
struct Args {
    /// Path to provisioner configuration file
    #[arg(short, long, default_value = "provisioner.toml")]
    config: String,

    /// Funding keypair file path
    #[arg(short, long)]
    keypair: Option<String>,

    /// RPC URL for Solana cluster
    #[arg(short, long)]
    rpc_url: Option<String>,

    /// Number of program/fee-payer lanes
    #[arg(short, long)]
    parallelization: Option<u64>,

    /// Program owning the program accounts
    #[arg(long)]
    program_id: Option<Pubkey>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the lamport cost of a pool
    Estimate,

    /// Create a pool, keep it until interrupted, then close it
    Create {
        /// Close automatically after this many seconds
        #[arg(long)]
        hold_secs: Option<u64>,
    },

    /// Write an example configuration file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .default_filter_or(if args.verbose { "debug" } else { "info" })
    ).init();

    if let Command::InitConfig = args.command {
        create_example_config(&args.config)?;
        log::info!("Wrote example configuration to {}", args.config);
        return Ok(());
    }

    let mut config = if Path::new(&args.config).exists() {
        ProvisionerConfig::load(&args.config)?
    } else {
        log::warn!("Config file {} not found, using defaults", args.config);
        ProvisionerConfig::default()
    };

    if let Some(rpc_url) = args.rpc_url {
        config.rpc_url = rpc_url;
    }
    if let Some(parallelization) = args.parallelization {
        config.parallelization = parallelization;
    }
    if let Some(program_id) = args.program_id {
        config.program_id = program_id;
    }
    if args.keypair.is_some() {
        config.payer_keypair = args.keypair;
    }
    config.validate()?;

    log::info!("RPC URL: {}", config.rpc_url);
    log::info!("Program ID: {}", config.program_id);
    log::info!("Parallelization: {}", config.parallelization);

    let connection = Arc::new(RpcConnection::from_url(config.rpc_url.clone()));
    let mut service = PoolService::new(connection, config.parallelization, ServiceSettings::from(&config))
        .with_program_id(config.program_id);

    if let Command::Create { .. } = args.command {
        let path = config
            .payer_keypair
            .as_deref()
            .context("A funding keypair is required to create a pool")?;
        let payer = read_keypair_file(expand_home(path))
            .map_err(|e| anyhow!("Failed to load keypair from {}: {}", path, e))?;
        service = service.with_payer(Arc::new(payer));
    }

    let service = Arc::new(service);
    service.refresh_costs().await?;
    let costs = service
        .costs()
        .context("Cost estimate was superseded before completing")?;

    match args.command {
        Command::Estimate => {
            let report = json!({
                "parallelization": config.parallelization,
                "storage_units": storage_units(config.parallelization)?,
                "account_capacity": tx_per_account(config.parallelization)?,
                "costs": costs,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Create { hold_secs } => {
            log::info!("Pool will cost {} lamports", costs.total);

            let Some(pool) = service.create().await? else {
                return Err(anyhow!("Another pool operation is in progress"));
            };
            println!("{}", serde_json::to_string_pretty(&pool.summary())?);

            match hold_secs {
                Some(secs) => {
                    log::info!("Holding pool for {}s (Ctrl-C to close early)", secs);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                        _ = tokio::signal::ctrl_c() => {}
                    }
                }
                None => {
                    log::info!("Pool active, press Ctrl-C to close");
                    tokio::signal::ctrl_c().await?;
                }
            }

            service.close().await?;
            log::info!("Pool closed");
        }
        Command::InitConfig => unreachable!("handled before connecting"),
    }

    Ok(())
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}
