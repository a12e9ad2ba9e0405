use std::{env, path::PathBuf};

use anyhow::{Context, Result};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_VAPID_FILE: &str = "vapid.json";
pub const DEFAULT_VAPID_SUBJECT: &str = "mailto:example@example.com";
pub const DEFAULT_PUSH_TTL: u32 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub vapid_public_key: Option<String>,
    pub vapid_private_key: Option<String>,
    pub vapid_file: PathBuf,
    pub vapid_subject: String,
    pub push_ttl: u32,
}

impl Config {
    /// Reads `.env` (if any) and then the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match non_empty("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT must be a port number, got {raw:?}"))?,
            None => DEFAULT_PORT,
        };
        let push_ttl = match non_empty("PUSH_TTL") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("PUSH_TTL must be seconds, got {raw:?}"))?,
            None => DEFAULT_PUSH_TTL,
        };

        Ok(Config {
            host: non_empty("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            vapid_public_key: non_empty("VAPID_PUBLIC_KEY"),
            vapid_private_key: non_empty("VAPID_PRIVATE_KEY"),
            vapid_file: non_empty("VAPID_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VAPID_FILE)),
            vapid_subject: non_empty("VAPID_SUBJECT")
                .unwrap_or_else(|| DEFAULT_VAPID_SUBJECT.to_string()),
            push_ttl,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            vapid_public_key: None,
            vapid_private_key: None,
            vapid_file: PathBuf::from(DEFAULT_VAPID_FILE),
            vapid_subject: DEFAULT_VAPID_SUBJECT.to_string(),
            push_ttl: DEFAULT_PUSH_TTL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn falls_back_to_defaults() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:4000");
        assert_eq!(cfg.vapid_file, PathBuf::from("vapid.json"));
        assert_eq!(cfg.push_ttl, 60);
        assert!(cfg.vapid_public_key.is_none());
    }

    #[test]
    fn reads_overrides_and_ignores_blank_values() {
        let cfg = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("VAPID_PUBLIC_KEY", "pub"),
            ("VAPID_PRIVATE_KEY", "  "),
            ("VAPID_SUBJECT", "mailto:ops@example.org"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.vapid_public_key.as_deref(), Some("pub"));
        assert!(cfg.vapid_private_key.is_none());
        assert_eq!(cfg.vapid_subject, "mailto:ops@example.org");
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Config::from_lookup(lookup(&[("PORT", "http")])).is_err());
    }
}
