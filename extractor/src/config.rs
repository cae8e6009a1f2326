use clap::Parser;

/// The engine's configuration surface (§6.2). Flag/env parsing is kept at
/// this one boundary struct so the rest of the crate stays free of `clap`.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    #[arg(long, env = "PEER_ADDRESS")]
    pub peer_address: String,

    #[arg(long, env = "INSECURE", default_value_t = false)]
    pub insecure: bool,

    #[arg(long, env = "MAX_RECV_MSG_SIZE", default_value_t = 16 * 1024 * 1024)]
    pub max_recv_msg_size: usize,

    #[arg(long, env = "START_HEIGHT")]
    pub start: Option<u64>,

    #[arg(long, env = "STOP_HEIGHT")]
    pub stop: Option<u64>,

    #[arg(long, env = "LIVE", default_value_t = false)]
    pub live: bool,

    #[arg(long, env = "BLOCK_TIME_SECS", default_value_t = 6)]
    pub block_time_secs: u64,

    #[arg(long, env = "REINDEX", default_value_t = false)]
    pub reindex: bool,

    #[arg(long = "max-concurrency", env = "MAX_CONCURRENCY", default_value_t = 100)]
    pub max_concurrency: usize,

    #[arg(long = "max-retries", env = "MAX_RETRIES", default_value_t = 5)]
    pub max_retries: u32,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
