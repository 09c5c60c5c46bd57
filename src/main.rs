// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use canopy::cli::{execute, Cli};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Connecting a chain lens is the embedding application's concern; the
    // bare binary serves the database-side commands.
    if let Err(e) = execute(cli, None).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
