use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tune_arena::{Gateway, MemoryStore, ServerConfig};

/// Real-time multiplayer name-that-tune game server.
#[derive(Parser, Debug)]
#[command(name = "tune-arena", version)]
struct Cli {
    /// Port to bind
    #[arg(long, env = "TUNE_ARENA_PORT", default_value_t = 3000)]
    port: u16,

    /// Comma-separated list of allowed client origins ("*" allows any)
    #[arg(long, env = "TUNE_ARENA_ORIGINS", default_value = "*")]
    origins: String,

    /// Base URL for shareable room links
    #[arg(long, env = "TUNE_ARENA_BASE_URL")]
    base_url: Option<String>,

    /// Minimum number of tracks accepted at game start
    #[arg(long, env = "TUNE_ARENA_MIN_TRACKS", default_value_t = 1)]
    min_tracks: usize,

    /// Cap on rounds per game (defaults to the playlist length)
    #[arg(long, env = "TUNE_ARENA_ROUND_LIMIT")]
    round_limit: Option<usize>,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let origins: Vec<String> = cli
        .origins
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let mut config = ServerConfig::new()
        .port(cli.port)
        .allowed_origins(origins)
        .min_tracks(cli.min_tracks);
    if let Some(url) = cli.base_url {
        config = config.base_url(url);
    }
    if let Some(limit) = cli.round_limit {
        config = config.round_limit(limit);
    }

    // The default binary runs on the in-memory store with no catalog or
    // identity providers wired in; embedders supply their own.
    let store = Arc::new(MemoryStore::new());
    let gateway = Gateway::new(config, store, None, None, None);

    tune_arena::server::serve(gateway).await
}
