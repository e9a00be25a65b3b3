//! miga: the migration CLI
//!
//! # Usage
//!
//! ```bash
//! # Apply everything pending
//! miga migrate up
//!
//! # Step back to a version
//! miga migrate down-to 20240101120000
//!
//! # Same commands against the seed ledger
//! miga seed up
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use miga::prelude::*;

#[derive(Parser)]
#[command(name = "miga")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "One CLI for goose-style and migrate-style migrations", long_about = None)]
#[command(after_help = "EXAMPLES:
    miga migrate create add_users
    miga migrate up
    miga migrate down-to 20240101120000
    miga --driver migrate --dsn postgres://localhost/app migrate version")]
struct Cli {
    /// Path to miga.toml (defaults to ./miga.toml, then the user config dir)
    #[arg(short, long, env = "MIGA_CONFIG")]
    config: Option<PathBuf>,

    /// Driver name (goose or migrate)
    #[arg(long, env = "MIGA_DRIVER")]
    driver: Option<String>,

    /// SQL dialect (postgres, mysql, sqlite3)
    #[arg(long, env = "MIGA_DIALECT")]
    dialect: Option<String>,

    /// Database connection URL
    #[arg(long, env = "MIGA_DSN")]
    dsn: Option<String>,

    /// Version table name
    #[arg(long, env = "MIGA_TABLE")]
    table: Option<String>,

    /// Migrations directory
    #[arg(long, env = "MIGA_PATH")]
    path: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schema migrations
    #[command(subcommand)]
    Migrate(Action),
    /// Seed data, tracked in its own table
    #[command(subcommand)]
    Seed(Action),
}

#[derive(Subcommand)]
enum Action {
    /// Create an up/down file pair
    Create {
        name: String,
        /// File extension
        #[arg(long, default_value = "sql")]
        ext: String,
    },
    /// Apply all pending migrations
    Up,
    /// Apply migrations up to and including VERSION
    UpTo { version: String },
    /// Revert the latest migration
    Down,
    /// Revert migrations down to VERSION
    DownTo { version: String },
    /// Revert and re-apply the latest migration (force-clears a dirty ledger)
    Redo,
    /// Revert all migrations
    Reset,
    /// Show the current version
    Status {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show the current version
    Version {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = MigaConfig::resolve(cli.config.as_deref())?;
    let mut config = MigaConfig::from_path(&config_path)?;
    config.apply(Overrides {
        driver: cli.driver,
        dialect: cli.dialect,
        dsn: cli.dsn,
        table: cli.table,
        path: cli.path,
    });
    miga::logger::init(&config.logger, cli.verbose);
    tracing::debug!("Loaded config from {}", config_path.display());
    config.validate()?;

    let (driver_config, action) = match cli.command {
        Commands::Migrate(action) => (config.migrations(), action),
        Commands::Seed(action) => (config.seeds()?, action),
    };

    let mut driver = miga::driver::new(&driver_config).await?;
    let result = execute(driver.as_mut(), action).await;
    let closed = driver.close().await;
    result?;
    closed?;
    Ok(())
}

async fn execute(driver: &mut dyn Driver, action: Action) -> Result<()> {
    match action {
        Action::Create { name, ext } => {
            driver.create(&name, &ext).await?;
            println!("{} {}", "✓ Created".green(), name.cyan());
        }
        Action::Up => {
            driver.up().await?;
            print_version(driver, OutputFormat::Text).await?;
        }
        Action::UpTo { version } => {
            driver.up_to(&version).await?;
            print_version(driver, OutputFormat::Text).await?;
        }
        Action::Down => {
            driver.down().await?;
            print_version(driver, OutputFormat::Text).await?;
        }
        Action::DownTo { version } => {
            driver.down_to(&version).await?;
            print_version(driver, OutputFormat::Text).await?;
        }
        Action::Redo => {
            driver.redo().await?;
            print_version(driver, OutputFormat::Text).await?;
        }
        Action::Reset => {
            driver.reset().await?;
            print_version(driver, OutputFormat::Text).await?;
        }
        Action::Status { format } => {
            let marker = driver.status().await?;
            print_marker(&marker, format)?;
        }
        Action::Version { format } => print_version(driver, format).await?,
    }
    Ok(())
}

async fn print_version(driver: &mut dyn Driver, format: OutputFormat) -> Result<()> {
    let marker = driver.version().await?;
    print_marker(&marker, format)
}

fn print_marker(marker: &VersionMarker, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(marker)?),
        OutputFormat::Text => {
            let dirty = if marker.dirty {
                "true".red().bold()
            } else {
                "false".green()
            };
            println!(
                "{} {} {} {}",
                "Current version:".dimmed(),
                marker.version.to_string().cyan(),
                "dirty:".dimmed(),
                dirty
            );
        }
    }
    Ok(())
}
