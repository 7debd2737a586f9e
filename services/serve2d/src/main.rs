//! serve2d - protocol-multiplexing daemon
//!
//! Usage: `serve2d <config.json>`

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "serve2d", version, about = "Serve many protocols on one port")]
struct Args {
    /// Path to the JSON configuration file.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Err(e) = serve2d::run(&args.config).await {
        eprintln!("serve2d: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
