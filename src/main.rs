use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(version, about = "Live dashboard server for a step-gated delivery pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the dashboard server
    Serve {
        /// Port to serve on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Path to a conveyor.toml file (defaults to ./conveyor.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Auto-open the dashboard in a browser after the server starts
        #[arg(long, default_value = "true")]
        open: bool,

        /// Enable dev mode (bind all interfaces, permissive CORS)
        #[arg(long)]
        dev: bool,
    },
    /// Print the pipeline step catalog
    Steps,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            port,
            host,
            config,
            open,
            dev,
        } => {
            cmd::cmd_serve(port, host.as_deref(), config.as_deref(), open, dev).await?;
        }
        Commands::Steps => cmd::cmd_steps()?,
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
