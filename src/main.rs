//! Music Courier - a batch music acquisition engine.
//!
//! A declarative manifest of songs, albums, playlists, and artists goes
//! in; a directory tree of tagged audio files comes out. The plan
//! pipeline (generate, optimize, execute) does the work, surrounded by
//! caching, rate limiting, and resumable persistence.

pub mod audio;
pub mod cache;
pub mod cli;
pub mod config;
pub mod downloader;
pub mod error;
pub mod hashing;
pub mod history;
pub mod plan;
pub mod ratelimit;
pub mod spotify;
pub mod tagger;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("music_courier=info".parse().unwrap()))
        .init();

    let code = cli::run_command(&args)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
