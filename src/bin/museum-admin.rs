use anyhow::Result;
use clap::{Parser, Subcommand};
use museum::analytics::StatsAggregator;
use museum::config::DatabaseConfig;

#[derive(Parser)]
#[command(name = "museum-admin")]
#[command(about = "Museum CMS maintenance CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Print current visit statistics as JSON
    Stats,
    /// Show the visitor record for an IP address
    Visitor {
        /// Client IP address
        ip: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    museum::init_tracing();

    let cli = Cli::parse();
    let config = DatabaseConfig::from_env()?;

    // Connecting also creates the schema
    let storage = museum::connect_storage(&config).await?;

    match cli.command {
        Commands::Init => {
            println!("✓ Database schema is up to date");
        }
        Commands::Stats => {
            let stats = StatsAggregator::new(storage).stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Visitor { ip } => match storage.get_visitor(&ip).await? {
            Some(visitor) => println!("{}", serde_json::to_string_pretty(&visitor)?),
            None => println!("⚠ No visitor recorded for '{}'", ip),
        },
    }

    Ok(())
}
