use clap::Parser;

use marketsync::adapter::inbound::cli::command::{Cli, Commands};
use marketsync::adapter::inbound::cli::{check, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    // Both reqwest and tokio-tungstenite use rustls; pin one provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Run(args) => run::execute(&cli.config, args).await?,
        Commands::Check(args) => {
            if !check::execute(&cli.config, args, cli.json).await? {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
