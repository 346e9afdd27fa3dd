use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

use narrator::config::{CliOverrides, NarratorConfig};
use narrator::logging::{self, LogFormat};

#[derive(Parser)]
#[command(name = "narrator")]
#[command(version, about = "Code Narrator - generate READMEs, comments and call graphs for GitHub repositories")]
pub struct Cli {
    /// Path to narrator.toml. Defaults to ./narrator.toml, then the user config dir.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    pub log_level: Level,

    #[arg(long, value_enum, default_value_t = LogFormat::Plaintext, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the web server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Directory holding the analysis scripts
        #[arg(long)]
        scripts_dir: Option<PathBuf>,

        /// Python interpreter used to run the scripts
        #[arg(long)]
        python: Option<String>,

        /// Auto-open browser after server starts
        #[arg(long)]
        open: bool,

        /// Enable dev mode (CORS permissive for a separately served UI)
        #[arg(long)]
        dev: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration (secrets redacted)
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal; anything already in the environment wins.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logging::init(cli.log_level, cli.log_format).context("Failed to initialise logging")?;

    match &cli.command {
        Commands::Serve {
            port,
            host,
            scripts_dir,
            python,
            open,
            dev,
        } => {
            let overrides = CliOverrides {
                host: host.clone(),
                port: *port,
                python: python.clone(),
                scripts_dir: scripts_dir.clone(),
                dev_mode: *dev,
            };
            let config = NarratorConfig::load(cli.config.as_deref(), overrides)
                .context("Failed to load configuration")?;
            cmd_serve(config, *open).await?;
        }
        Commands::Config { command } => {
            let config = NarratorConfig::load(cli.config.as_deref(), CliOverrides::default())
                .context("Failed to load configuration")?;
            cmd_config(&config, command.clone().unwrap_or(ConfigCommands::Show));
        }
    }

    Ok(())
}

async fn cmd_serve(config: NarratorConfig, open: bool) -> Result<()> {
    if open && !config.dev_mode {
        let url = format!("http://localhost:{}", config.port);
        tokio::spawn(async move {
            // Small delay to let the server start binding
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                tracing::warn!(error = %e, "Failed to open browser");
            }
        });
    }

    narrator::server::server::start_server(config).await
}

fn cmd_config(config: &NarratorConfig, command: ConfigCommands) {
    match command {
        ConfigCommands::Show => {
            println!();
            println!("Narrator Configuration");
            println!("======================");
            println!();
            for (key, value) in config.summary() {
                println!("  {:<20} {}", key, value);
            }
            println!();
        }
        ConfigCommands::Validate => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }
}
