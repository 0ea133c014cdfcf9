// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;
mod cloud_node;
mod filter_node;

use args::{Args, Command};
use clap::Parser as _;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(args.rust_log.into())
                .from_env_lossy(),
        )
        .init();

    let session = args::open_session(&args.zenoh).await?;
    info!("opened zenoh session {}", session.zid());

    match &args.command {
        Command::Cloud(cloud) => cloud_node::run(session, cloud).await?,
        Command::Filter(filter) => filter_node::run(session, filter).await?,
    }

    Ok(())
}
