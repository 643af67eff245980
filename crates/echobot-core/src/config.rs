use std::{env, fs, path::Path, time::Duration};

use crate::{
    errors::Error,
    outbox::SendWorkerConfig,
    poll::PollConfig,
    Result,
};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram caps `getUpdates` at 100 updates per call.
pub const MAX_POLL_LIMIT: u32 = 100;

/// Typed configuration, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Endpoint
    pub bot_token: String,
    pub api_base: String,

    // Polling
    pub poll_timeout: Duration,
    pub poll_limit: u32,
    pub error_backoff: Duration,

    // Replies
    pub send_timeout: Duration,
    pub send_concurrency: usize,
    pub outbox_capacity: usize,
    pub shutdown_grace: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the process environment in
    /// production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bot_token = lookup("TELEGRAM_BOT_TOKEN")
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
            })?;

        let api_base = lookup("TELEGRAM_API_BASE")
            .and_then(non_empty)
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        if !api_base.starts_with("http://") && !api_base.starts_with("https://") {
            return Err(Error::Config(format!(
                "TELEGRAM_API_BASE must be an http(s) URL, got {api_base:?}"
            )));
        }

        let poll_timeout =
            Duration::from_secs(parse::<u64>(&lookup, "POLL_TIMEOUT_SECS")?.unwrap_or(30));
        let poll_limit = parse::<u32>(&lookup, "POLL_LIMIT")?
            .unwrap_or(MAX_POLL_LIMIT)
            .clamp(1, MAX_POLL_LIMIT);
        let error_backoff =
            Duration::from_millis(parse::<u64>(&lookup, "ERROR_BACKOFF_MS")?.unwrap_or(5_000));

        let send_timeout =
            Duration::from_millis(parse::<u64>(&lookup, "SEND_TIMEOUT_MS")?.unwrap_or(10_000));
        let send_concurrency = parse::<usize>(&lookup, "SEND_CONCURRENCY")?.unwrap_or(4).max(1);
        let outbox_capacity = parse::<usize>(&lookup, "OUTBOX_CAPACITY")?.unwrap_or(256).max(1);
        let shutdown_grace =
            Duration::from_millis(parse::<u64>(&lookup, "SHUTDOWN_GRACE_MS")?.unwrap_or(5_000));

        Ok(Self {
            bot_token,
            api_base,
            poll_timeout,
            poll_limit,
            error_backoff,
            send_timeout,
            send_concurrency,
            outbox_capacity,
            shutdown_grace,
        })
    }

    /// Minimal config for one-shot helpers: token and base URL, defaults
    /// elsewhere.
    pub fn with_token(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            poll_timeout: Duration::from_secs(30),
            poll_limit: MAX_POLL_LIMIT,
            error_backoff: Duration::from_secs(5),
            send_timeout: Duration::from_secs(10),
            send_concurrency: 4,
            outbox_capacity: 256,
            shutdown_grace: Duration::from_secs(5),
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            poll_timeout: self.poll_timeout,
            error_backoff: self.error_backoff,
            ..PollConfig::default()
        }
    }

    pub fn send_worker_config(&self) -> SendWorkerConfig {
        SendWorkerConfig {
            concurrency: self.send_concurrency,
            send_timeout: self.send_timeout,
            shutdown_grace: self.shutdown_grace,
        }
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = lookup(key).and_then(non_empty) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw:?}")))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn token_is_required() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(config_from(&[("TELEGRAM_BOT_TOKEN", "   ")]).is_err());
    }

    #[test]
    fn defaults_match_long_poll_protocol() {
        let cfg = config_from(&[("TELEGRAM_BOT_TOKEN", "123:abc")]).unwrap();
        assert_eq!(cfg.bot_token, "123:abc");
        assert_eq!(cfg.api_base, DEFAULT_API_BASE);
        assert_eq!(cfg.poll_timeout, Duration::from_secs(30));
        assert_eq!(cfg.poll_limit, 100);
        assert_eq!(cfg.error_backoff, Duration::from_secs(5));
        assert_eq!(cfg.poll_config().latest_timeout, Duration::from_secs(1));
    }

    #[test]
    fn overrides_and_clamps() {
        let cfg = config_from(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("TELEGRAM_API_BASE", "http://localhost:8081/"),
            ("POLL_TIMEOUT_SECS", "50"),
            ("POLL_LIMIT", "500"),
            ("ERROR_BACKOFF_MS", "250"),
            ("SEND_CONCURRENCY", "0"),
        ])
        .unwrap();
        assert_eq!(cfg.api_base, "http://localhost:8081");
        assert_eq!(cfg.poll_timeout, Duration::from_secs(50));
        assert_eq!(cfg.poll_limit, 100);
        assert_eq!(cfg.error_backoff, Duration::from_millis(250));
        assert_eq!(cfg.send_worker_config().concurrency, 1);
    }

    #[test]
    fn rejects_garbage_numbers_and_urls() {
        assert!(config_from(&[("TELEGRAM_BOT_TOKEN", "t"), ("POLL_LIMIT", "lots")]).is_err());
        assert!(
            config_from(&[("TELEGRAM_BOT_TOKEN", "t"), ("TELEGRAM_API_BASE", "ftp://x")]).is_err()
        );
    }

    #[test]
    fn dotenv_parsing_strips_quotes_and_comments() {
        let parsed = parse_dotenv(
            "# comment\nTELEGRAM_BOT_TOKEN=\"abc\"\n\nPOLL_LIMIT = 10\nbroken line\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("TELEGRAM_BOT_TOKEN".to_string(), "abc".to_string()),
                ("POLL_LIMIT".to_string(), "10".to_string()),
            ]
        );
    }
}
