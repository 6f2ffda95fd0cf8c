mod device;
mod env_utils;
mod gen1;
mod gen2;
mod logging;
mod report;
mod scenario;
mod telemetry;
mod wifi;
mod workflows_provision;
mod workspace;

use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use logging::Logger;

use workflows_provision::ProvisionOptions;

#[derive(Debug, Parser)]
#[command(name = "plugctl")]
#[command(about = "Shelly smart-plug provisioning CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Discover device access points and provision every one of them
    Provision(ProvisionArgs),
    /// List visible device access points without touching them
    Scan(ScanArgs),
}

#[derive(Debug, Args)]
struct ProvisionArgs {
    /// Substring that identifies device access points
    #[arg(long, default_value = "shelly")]
    filter: String,
    /// Customer name; prompted for when absent
    #[arg(long)]
    customer: Option<String>,
    /// Workspace id holding the target WiFi; prompted for when absent
    #[arg(long = "workspace-id")]
    workspace_id: Option<i64>,
    #[arg(long, default_value = "NNEHotspotTest")]
    backup_ssid: String,
    #[arg(long, default_value = "NNEHotspotTest")]
    backup_key: String,
    /// Version label recorded in the report and telemetry
    #[arg(long, default_value = "v.0.1")]
    version_label: String,
    /// Report path (defaults to shelly-plugs.csv in the working directory)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ScanArgs {
    #[arg(long, default_value = "shelly")]
    filter: String,
}

fn run(cli: Cli) -> Result<()> {
    let mut logger = Logger::from_env()?;

    match cli.command {
        Commands::Provision(args) => {
            let customer_name = match args.customer {
                Some(customer) => customer,
                None => prompt("Customer name")?,
            };
            let workspace_id = match args.workspace_id {
                Some(id) => id,
                None => prompt("Workspace id")?
                    .parse::<i64>()
                    .context("workspace id must be an integer")?,
            };
            workflows_provision::run_provision(
                &mut logger,
                ProvisionOptions {
                    filter: args.filter,
                    customer_name,
                    workspace_id,
                    backup_ssid: args.backup_ssid,
                    backup_key: args.backup_key,
                    version_label: args.version_label,
                    output_path: args.output,
                },
            )
        }
        Commands::Scan(args) => workflows_provision::run_scan(&mut logger, &args.filter),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim().to_string();
    if trimmed.is_empty() {
        return Err(anyhow!("{label} must not be empty"));
    }
    Ok(trimmed)
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}
