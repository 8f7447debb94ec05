use std::path::PathBuf;

use anyhow::{Context, bail};

use courier_db::DEFAULT_READER_POOL;

pub const DEFAULT_DB_PATH: &str = "courier.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub reader_pool: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            reader_pool: DEFAULT_READER_POOL,
        }
    }
}

impl Config {
    /// Load `.env` if present, then read `COURIER_*` variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("COURIER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let reader_pool = match lookup("COURIER_READER_POOL") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("invalid COURIER_READER_POOL: {raw:?}"))?,
            None => DEFAULT_READER_POOL,
        };
        if reader_pool == 0 {
            bail!("COURIER_READER_POOL must be at least 1");
        }

        Ok(Self {
            db_path,
            reader_pool,
        })
    }
}
