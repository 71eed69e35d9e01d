use std::env;
use std::time::Duration;

/// Records per dispatched batch unless `IMPORT_BATCH_SIZE` overrides it.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Destination account that authors topic-roots.
pub const SYSTEM_USER_ID: i64 = -1;

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

/// Runtime configuration for an import run.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub batch_size: usize,
    pub system_user_id: i64,
    pub avatar_timeout: Duration,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").ok(),
            max_connections: env_usize("IMPORT_DB_MAX_CONNECTIONS", 5).clamp(1, 64) as u32,
            batch_size: env_usize("IMPORT_BATCH_SIZE", DEFAULT_BATCH_SIZE).max(1),
            system_user_id: env_i64("IMPORT_SYSTEM_USER_ID", SYSTEM_USER_ID),
            avatar_timeout: env_duration_millis("IMPORT_AVATAR_TIMEOUT_MS", 30_000),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            batch_size: DEFAULT_BATCH_SIZE,
            system_user_id: SYSTEM_USER_ID,
            avatar_timeout: Duration::from_millis(30_000),
        }
    }
}
