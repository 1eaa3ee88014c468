use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::services::excel::types::DuplicateHeaders;

fn default_max_file_size() -> usize {
    // 10 MB in bytes
    10 * 1024 * 1024
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    pub upload_dir: PathBuf,
    pub max_file_size: usize,
    pub max_files_per_upload: usize,
    pub duplicate_headers: DuplicateHeaders,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            database_path: PathBuf::from("excel_analytics.db"),
            upload_dir: PathBuf::from("uploads"),
            max_file_size: default_max_file_size(),
            max_files_per_upload: 10,
            duplicate_headers: DuplicateHeaders::default(),
        }
    }
}

impl Config {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        Ok(Config {
            bind_addr: parse_var(&lookup, "BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            database_path: lookup("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            upload_dir: lookup("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            max_file_size: parse_var(&lookup, "MAX_FILE_SIZE")?.unwrap_or(defaults.max_file_size),
            max_files_per_upload: parse_var(&lookup, "MAX_FILES_PER_UPLOAD")?
                .unwrap_or(defaults.max_files_per_upload),
            duplicate_headers: match lookup("DUPLICATE_HEADERS") {
                Some(raw) => raw
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!("Invalid DUPLICATE_HEADERS: {}", e))?,
                None => defaults.duplicate_headers,
            },
        })
    }

    /// Largest request body accepted by the upload route.
    pub fn upload_body_limit(&self) -> usize {
        // room for multipart framing and the text fields
        self.max_file_size
            .saturating_mul(self.max_files_per_upload)
            .saturating_add(64 * 1024)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid {}: '{}'", key, raw))
        })
        .transpose()
}

pub fn load_config() -> Result<Config> {
    let config = Config::from_env()?;
    tracing::info!(
        "Loaded config: bind={}, database={}, uploads={}, max_file_size={}",
        config.bind_addr,
        config.database_path.display(),
        config.upload_dir.display(),
        config.max_file_size
    );
    Ok(config)
}
