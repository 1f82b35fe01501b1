use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

use lampd::auth::JwtValidator;
use lampd::config::loader::{load_or_default, ConfigError};
use lampd::config::validation::validate_config;
use lampd::lifecycle::{check_config, run_supervisor, run_worker_from_env};
use lampd::observability::init_logging;

#[derive(Parser)]
#[command(name = "lampd", version)]
#[command(about = "Light-belt control service with a supervised worker pool", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the public listener port.
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor and its worker pool (default)
    Serve,
    /// Worker mode; spawned by the supervisor
    #[command(hide = true)]
    Worker,
    /// Validate a configuration file and its routes
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Mint a bearer token for manual testing
    Token {
        #[arg(long)]
        secret: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        role: Option<String>,
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,
    },
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let mut config = load_or_default(cli.config.as_deref())?;
            if let Some(port) = cli.port {
                config.listener.port = port;
                validate_config(&config).map_err(ConfigError::Validation)?;
            }
            init_logging(&config.observability)?;
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "lampd starting");

            let runtime = tokio::runtime::Runtime::new()?;
            Ok(runtime.block_on(run_supervisor(config, cli.config))?)
        }
        Commands::Worker => match run_worker_from_env()? {},
        Commands::CheckConfig { config } => {
            let (loaded, table) = check_config(&config)?;
            println!(
                "{}: OK ({} routes, port {})",
                config.display(),
                table.len(),
                loaded.listener.port
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Token {
            secret,
            subject,
            role,
            ttl_secs,
        } => {
            let token = JwtValidator::new(&secret).issue(subject, role, Duration::from_secs(ttl_secs))?;
            println!("{token}");
            Ok(ExitCode::SUCCESS)
        }
    }
}
