use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use tg_fetchbot::config;
use tg_fetchbot::registry::UserRegistry;

#[derive(Parser, Debug)]
#[command(about = "Export the user registry to CSV and print aggregate stats.")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Destination CSV file
    #[arg(long, default_value = "users_export.csv")]
    output: PathBuf,

    /// Print stats as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let registry = UserRegistry::initialize(&cfg.database_url()).await?;

    let stats = registry.get_user_stats().await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Total users: {}", stats.total_users);
        println!("Last 24h:    {}", stats.users_today);
        match stats.first_user_date {
            Some(d) => println!("First user:  {}", d.to_rfc3339()),
            None => println!("First user:  -"),
        }
    }

    if !registry.export_users(&args.output).await {
        bail!("export to {} failed", args.output.display());
    }
    println!("Exported to {}", args.output.display());
    Ok(())
}
