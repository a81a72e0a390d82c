// SPDX-License-Identifier: MPL-2.0

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "video-texture")]
#[command(about = "Headless player for the zero-copy video texture backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a test pattern or a media URI through the texture backend
    Play {
        /// Graphics context to paint with
        #[arg(short, long, value_enum, default_value_t = cli::RendererKind::Software)]
        renderer: cli::RendererKind,

        /// Media URI to play (default: a generated test pattern)
        #[arg(short, long)]
        uri: Option<String>,

        /// Stop after this many painted frames
        #[arg(short, long)]
        frames: Option<u64>,

        /// Item orientation in degrees (multiple of 90)
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        orientation: i32,

        /// Mirror the output horizontally
        #[arg(short, long)]
        mirror: bool,

        /// Save materialized frames as PNG into this directory
        #[arg(short, long)]
        snapshot_dir: Option<PathBuf>,

        /// Save every Nth frame
        #[arg(long, default_value = "30")]
        snapshot_every: u64,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=video_texture::timing=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            renderer,
            uri,
            frames,
            orientation,
            mirror,
            snapshot_dir,
            snapshot_every,
        } => cli::play(cli::PlayOptions {
            renderer,
            uri,
            frames,
            orientation,
            mirror,
            snapshot_dir,
            snapshot_every,
        }),
        Commands::Config => cli::print_config(),
    }
}
