use crate::agent::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use anyhow::{bail, Context, Result};
use std::{path::PathBuf, time::Duration};

/// Daemon configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub completion_timeout: Duration,
    pub host: String,
    pub port: u16,
    /// Prefix that turns stored avatar paths into absolute URLs.
    pub public_base_url: String,
    pub upload_dir: PathBuf,
    /// Built browser client to serve for unknown paths, if any.
    pub frontend_dir: Option<PathBuf>,
    pub cors_origin: Option<String>,
}

const REQUIRED: [&str; 3] = ["DATABASE_URL", "JWT_SECRET", "GEMINI_API_KEY"];

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Refuses to produce a config if any
    /// required key is absent or blank.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let missing: Vec<&str> = REQUIRED.iter().copied().filter(|k| get(*k).is_none()).collect();
        if !missing.is_empty() {
            bail!(
                "Missing required environment variables: {}",
                missing.join(", ")
            );
        }

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().with_context(|| format!("Invalid PORT: {raw}"))?,
            None => 5000,
        };

        let timeout_secs = match get("COMPLETION_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("Invalid COMPLETION_TIMEOUT_SECS: {raw}"))?,
            None => 30,
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_default(),
            jwt_secret: get("JWT_SECRET").unwrap_or_default(),
            gemini_api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            gemini_base_url: get("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            completion_timeout: Duration::from_secs(timeout_secs),
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            public_base_url: get("PUBLIC_BASE_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            upload_dir: get("UPLOAD_DIR").map(PathBuf::from).unwrap_or_else(|| "uploads".into()),
            frontend_dir: get("FRONTEND_DIR").map(PathBuf::from),
            cors_origin: Some(
                get("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5173".to_string()),
            )
            .filter(|origin| origin != "*"),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Terminal client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub cache_dir: PathBuf,
    pub reply_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let timeout_secs = match get("JARVIS_REPLY_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("Invalid JARVIS_REPLY_TIMEOUT_SECS: {raw}"))?,
            None => 60,
        };

        let cache_dir = match get("JARVIS_CACHE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from(get("HOME").unwrap_or_else(|| ".".to_string())).join(".jarvis"),
        };

        Ok(Self {
            server_url: get("JARVIS_SERVER_URL")
                .unwrap_or_else(|| "http://localhost:5000".to_string()),
            cache_dir,
            reply_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const BASE: [(&str, &str); 3] = [
        ("DATABASE_URL", "sqlite://jarvis.db"),
        ("JWT_SECRET", "s3cret"),
        ("GEMINI_API_KEY", "key"),
    ];

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&BASE)).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.bind_addr(), "0.0.0.0:5000");
        assert_eq!(config.public_base_url, "http://localhost:5000");
        assert_eq!(config.gemini_model, "gemini-1.5-flash");
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.cors_origin.as_deref(), Some("http://localhost:5173"));
        assert_eq!(config.completion_timeout, Duration::from_secs(30));
        assert!(config.frontend_dir.is_none());
    }

    #[rstest]
    #[case("DATABASE_URL")]
    #[case("JWT_SECRET")]
    #[case("GEMINI_API_KEY")]
    fn refuses_to_start_without_required_key(#[case] dropped: &str) {
        let pairs: Vec<(&str, &str)> = BASE.iter().copied().filter(|(k, _)| *k != dropped).collect();
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains(dropped));
    }

    #[test]
    fn blank_required_value_counts_as_missing() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite://jarvis.db"),
            ("JWT_SECRET", "   "),
        ]))
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("JWT_SECRET"));
        assert!(message.contains("GEMINI_API_KEY"));
        assert!(!message.contains("DATABASE_URL"));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = BASE.to_vec();
        pairs.extend([
            ("PORT", "8080"),
            ("CORS_ORIGIN", "*"),
            ("FRONTEND_DIR", "frontend/dist"),
            ("COMPLETION_TIMEOUT_SECS", "5"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.public_base_url, "http://localhost:8080");
        assert_eq!(config.cors_origin, None);
        assert_eq!(config.frontend_dir, Some(PathBuf::from("frontend/dist")));
        assert_eq!(config.completion_timeout, Duration::from_secs(5));
    }

    #[test]
    fn bad_port_is_an_error() {
        let mut pairs = BASE.to_vec();
        pairs.push(("PORT", "http"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn client_defaults_live_under_home() {
        let config = ClientConfig::from_lookup(lookup(&[("HOME", "/home/alice")])).unwrap();
        assert_eq!(config.server_url, "http://localhost:5000");
        assert_eq!(config.cache_dir, PathBuf::from("/home/alice/.jarvis"));
        assert_eq!(config.reply_timeout, Duration::from_secs(60));
    }

    #[test]
    fn client_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("JARVIS_SERVER_URL", "https://jarvis.example"),
            ("JARVIS_CACHE_DIR", "/tmp/jarvis"),
            ("JARVIS_REPLY_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.server_url, "https://jarvis.example");
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/jarvis"));
        assert_eq!(config.reply_timeout, Duration::from_secs(5));

        assert!(ClientConfig::from_lookup(lookup(&[("JARVIS_REPLY_TIMEOUT_SECS", "soon")])).is_err());
    }
}
