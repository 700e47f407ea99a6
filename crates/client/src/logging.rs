use tracing_subscriber::EnvFilter;

use parley_core::config::Config;

/// Install the global fmt subscriber. `RUST_LOG`, when set, wins over
/// `level`. Returns `false` if a subscriber was already installed.
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}

pub fn init_from_config(config: &Config) -> bool {
    init(&config.logging.level)
}

