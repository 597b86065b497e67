mod commands;
mod presets;
mod utils;

use clap::{Parser, Subcommand};
use commands::{BootArgs, boot, list_assets, print_config};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "vphone")]
#[command(about = "Boot a sandboxed Linux guest and bridge its console")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision, extract and boot the guest, then attach to its console
    Boot(BootArgs),
    /// List bundled assets
    Assets {
        /// Bundled assets root
        #[arg(long, default_value = "assets")]
        asset_dir: PathBuf,

        /// Subdirectory to list
        #[arg(default_value = "")]
        dir: String,
    },
    /// Print the effective boot configuration as JSON
    Config(BootArgs),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Guest output owns stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Boot(args)) => {
            boot(args).await?;
        }
        Some(Commands::Assets { asset_dir, dir }) => {
            list_assets(&asset_dir, &dir).await?;
        }
        Some(Commands::Config(args)) => {
            print_config(args).await?;
        }
        None => {
            println!("vphone ready. Use --help for usage information.");
        }
    }

    Ok(())
}
