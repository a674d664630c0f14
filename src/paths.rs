use std::path::PathBuf;
use std::sync::OnceLock;

static SHARDCORE_HOME: OnceLock<PathBuf> = OnceLock::new();

/// Returns the shardcore home directory (`~/.shardcore/`).
/// Supports `$SHARDCORE_HOME` env override. Cached via `OnceLock`.
pub fn shardcore_home() -> &'static PathBuf {
    SHARDCORE_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("SHARDCORE_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".shardcore")
    })
}

/// `~/.shardcore/config/`
pub fn config_dir() -> PathBuf {
    shardcore_home().join("config")
}

/// `~/.shardcore/data/` — the MCP tool store redb file lives here.
pub fn data_dir() -> PathBuf {
    shardcore_home().join("data")
}

/// `~/.shardcore/logs/`
pub fn logs_dir() -> PathBuf {
    shardcore_home().join("logs")
}

/// `~/.shardcore/prompts/` — per-shard-type system prompt files, loaded by
/// the prompt loader for persistent/user shards.
pub fn prompts_dir() -> PathBuf {
    shardcore_home().join("prompts")
}
