use std::path::PathBuf;

const DB_PATH: &str = "LANWATCH_DB";

const DEFAULT_DB_PATH: &str = "./lanwatch.db";

pub fn get_db_path() -> PathBuf {
    std::env::var(DB_PATH).map_or_else(|_| PathBuf::from(DEFAULT_DB_PATH), PathBuf::from)
}

const CONFIG_PATH: &str = "LANWATCH_CONFIG";

pub fn get_config_path() -> Option<PathBuf> {
    std::env::var(CONFIG_PATH).ok().map(PathBuf::from)
}

/// Milliseconds elapsed as `u64`, saturating on absurd durations
pub fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
