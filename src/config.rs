use std::{env, str::FromStr, time::Duration};

use crate::{
    error::{AppErr, AppResult},
    gateway::DEFAULT_ROSTER_TIMEOUT,
};

pub const DEFAULT_BIND: &str = "0.0.0.0:3000";
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr:      String,
    pub static_dir:     String,
    pub roster_timeout: Duration,
    pub body_limit:     usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr:      DEFAULT_BIND.into(),
            static_dir:     "static".into(),
            roster_timeout: DEFAULT_ROSTER_TIMEOUT,
            body_limit:     DEFAULT_BODY_LIMIT,
        }
    }
}

impl Config {
    /// `.env` first (if present), then the process environment.
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|k| env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let d = Self::default();
        Ok(Self {
            bind_addr:      get("SYNC_BIND_ADDR").unwrap_or(d.bind_addr),
            static_dir:     get("SYNC_STATIC_DIR").unwrap_or(d.static_dir),
            roster_timeout: parsed(&get, "SYNC_ROSTER_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.roster_timeout),
            body_limit:     parsed(&get, "SYNC_BODY_LIMIT")?.unwrap_or(d.body_limit),
        })
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> AppResult<Option<T>> {
    match get(key) {
        None    => Ok(None),
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppErr::Config(format!("{key}={v:?} is not a valid number"))),
    }
}
