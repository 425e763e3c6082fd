use std::{env, path::PathBuf};

use anyhow::{Context, Result};

use crate::warmer::DEFAULT_WARMUP_YEARS;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Root of the `{year}/CW_{week}` tree.
    pub source_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub server_host: String,
    pub server_port: u16,
    pub cors_allowed_origin: Option<String>,
    pub warm_cache: bool,
    pub warmup_years: u32,
    pub warmup_workers: Option<usize>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let source_dir = env::var("MMOTCW_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let cache_dir = env::var("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir());
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let warm_cache = !env::var("SKIP_CACHE_WARMUP")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        let warmup_years = env::var("CACHE_WARMUP_YEARS")
            .ok()
            .map(|value| value.parse())
            .transpose()
            .context("CACHE_WARMUP_YEARS must be an integer")?
            .unwrap_or(DEFAULT_WARMUP_YEARS);
        let warmup_workers = env::var("CACHE_WARMUP_WORKERS")
            .ok()
            .map(|value| value.parse())
            .transpose()
            .context("CACHE_WARMUP_WORKERS must be an integer")?;

        Ok(Self {
            source_dir,
            cache_dir,
            server_host,
            server_port,
            cors_allowed_origin,
            warm_cache,
            warmup_years,
            warmup_workers,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::parse_flag;

    #[test]
    fn parses_boolean_flags() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("true"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("yes"));
    }
}
