//! Configuration loading with env-var overrides.
//!
//! Reads a TOML file (default `config/default.toml`), falls back to hardcoded
//! defaults when no file exists, then applies `RAGLINE_WORK_DIR`,
//! `RAGLINE_LOG_LEVEL`, and `RAGLINE_API_KEY` env overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

/// Hard ceiling for embedding batch size; config values above this are rejected.
pub const MAX_EMBED_BATCH: usize = 4096;

// ── Resolved config ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP listener binds to.
    pub bind: String,
    /// Shared secret for mutating routes. `None` disables the check entirely.
    pub api_key: Option<String>,
    /// Root directory for snapshots (`index.json`, `kg.json`).
    pub work_dir: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Approximate maximum character count per chunk.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks. Must be < `chunk_size`.
    pub chunk_overlap: usize,
    /// Chunks scoring below this are excluded from the index (kept as metadata).
    pub quality_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` for an OpenAI-compatible HTTP endpoint, `"hash"` for the
    /// deterministic offline provider.
    pub provider: String,
    pub api_base_url: String,
    pub model: String,
    /// Expected vector dimension. `None` means it is fixed by the first
    /// successful embed call.
    pub dimension: Option<usize>,
    pub timeout_seconds: u64,
    /// Texts per embedding request, 1..=[`MAX_EMBED_BATCH`].
    pub batch_size: usize,
    /// Bearer token for the embedding endpoint (`EMBED_API_KEY` env).
    pub api_key: Option<String>,
}

impl Config {
    pub fn index_path(&self) -> PathBuf {
        self.work_dir.join("index.json")
    }

    pub fn kg_path(&self) -> PathBuf {
        self.work_dir.join("kg.json")
    }
}

// ── Raw (serde) layer ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    storage: RawStorage,
    #[serde(default)]
    log: RawLog,
    #[serde(default)]
    chunking: RawChunking,
    #[serde(default)]
    embedding: RawEmbedding,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawServer {
    bind: String,
    api_key: Option<String>,
}

impl Default for RawServer {
    fn default() -> Self {
        Self { bind: "127.0.0.1:8080".to_string(), api_key: None }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawStorage {
    work_dir: String,
}

impl Default for RawStorage {
    fn default() -> Self {
        Self { work_dir: "~/.ragline".to_string() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawLog {
    level: String,
    file: Option<String>,
}

impl Default for RawLog {
    fn default() -> Self {
        Self { level: "info".to_string(), file: None }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawChunking {
    chunk_size: usize,
    chunk_overlap: usize,
    quality_threshold: f32,
}

impl Default for RawChunking {
    fn default() -> Self {
        Self { chunk_size: 800, chunk_overlap: 120, quality_threshold: 0.2 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawEmbedding {
    provider: String,
    api_base_url: String,
    model: String,
    dimension: Option<usize>,
    timeout_seconds: u64,
    batch_size: usize,
}

impl Default for RawEmbedding {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            api_base_url: "http://127.0.0.1:8081/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: None,
            timeout_seconds: 60,
            batch_size: 256,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from the given path, or `config/default.toml`, then apply
/// env-var overrides. Missing default file → hardcoded defaults.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let work_dir_override = env::var("RAGLINE_WORK_DIR").ok();
    let log_level_override = env::var("RAGLINE_LOG_LEVEL").ok();

    let raw = if let Some(path) = config_path {
        read_raw(Path::new(path))?
    } else {
        let default_path = Path::new("config/default.toml");
        if default_path.exists() {
            read_raw(default_path)?
        } else {
            RawConfig::default()
        }
    };

    resolve(raw, work_dir_override.as_deref(), log_level_override.as_deref())
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    resolve(read_raw(path)?, work_dir_override, log_level_override)
}

fn read_raw(path: &Path) -> Result<RawConfig, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))
}

fn resolve(
    raw: RawConfig,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let chunking = ChunkingConfig {
        chunk_size: raw.chunking.chunk_size,
        chunk_overlap: raw.chunking.chunk_overlap,
        quality_threshold: raw.chunking.quality_threshold,
    };
    if chunking.chunk_size == 0 {
        return Err(AppError::Config("chunk_size must be > 0".into()));
    }
    if chunking.chunk_overlap >= chunking.chunk_size {
        return Err(AppError::Config(format!(
            "chunk_overlap ({}) must be < chunk_size ({})",
            chunking.chunk_overlap, chunking.chunk_size
        )));
    }

    if raw.embedding.batch_size == 0 || raw.embedding.batch_size > MAX_EMBED_BATCH {
        return Err(AppError::Config(format!(
            "embedding batch_size must be 1..={MAX_EMBED_BATCH}, got {}",
            raw.embedding.batch_size
        )));
    }

    let work_dir_str = work_dir_override
        .map(ToString::to_string)
        .unwrap_or(raw.storage.work_dir);
    let log_level = log_level_override
        .map(ToString::to_string)
        .unwrap_or(raw.log.level);

    Ok(Config {
        bind: raw.server.bind,
        api_key: env::var("RAGLINE_API_KEY").ok().or(raw.server.api_key),
        work_dir: expand_home(&work_dir_str),
        log_level,
        log_file: raw.log.file.map(|f| expand_home(&f)),
        chunking,
        embedding: EmbeddingConfig {
            provider: raw.embedding.provider,
            api_base_url: raw.embedding.api_base_url,
            model: raw.embedding.model,
            dimension: raw.embedding.dimension,
            timeout_seconds: raw.embedding.timeout_seconds,
            batch_size: raw.embedding.batch_size,
            api_key: env::var("EMBED_API_KEY").ok(),
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_toml(body: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().expect("tempfile");
        f.write_all(body.as_bytes()).expect("write");
        f
    }

    #[test]
    fn defaults_resolve_without_file() {
        let cfg = resolve(RawConfig::default(), Some("/tmp/ragline-test"), None).expect("resolve");
        assert_eq!(cfg.bind, "127.0.0.1:8080");
        assert_eq!(cfg.chunking.chunk_size, 800);
        assert_eq!(cfg.chunking.chunk_overlap, 120);
        assert_eq!(cfg.embedding.batch_size, 256);
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/ragline-test"));
    }

    #[test]
    fn file_values_override_defaults() {
        let f = write_toml(
            r#"
            [server]
            bind = "0.0.0.0:9999"
            [chunking]
            chunk_size = 400
            chunk_overlap = 50
            "#,
        );
        let cfg = load_from(f.path(), None, None).expect("load");
        assert_eq!(cfg.bind, "0.0.0.0:9999");
        assert_eq!(cfg.chunking.chunk_size, 400);
        assert_eq!(cfg.chunking.chunk_overlap, 50);
    }

    #[test]
    fn overlap_ge_size_rejected() {
        let f = write_toml("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n");
        assert!(load_from(f.path(), None, None).is_err());
    }

    #[test]
    fn batch_size_ceiling_enforced() {
        let f = write_toml("[embedding]\nbatch_size = 5000\n");
        assert!(load_from(f.path(), None, None).is_err());
    }

    #[test]
    fn log_level_override_wins() {
        let f = write_toml("[log]\nlevel = \"warn\"\n");
        let cfg = load_from(f.path(), None, Some("debug")).expect("load");
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn expand_home_passthrough() {
        assert_eq!(expand_home("/var/data"), PathBuf::from("/var/data"));
        assert_eq!(expand_home("relative/dir"), PathBuf::from("relative/dir"));
    }
}
