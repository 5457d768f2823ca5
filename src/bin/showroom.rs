//! Showroom CLI
//!
//! Serves the object removal API or runs the pipelines on local files.

use showroom::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
