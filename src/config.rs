use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::{CredentialSettings, MAX_BCRYPT_COST, MIN_BCRYPT_COST};

/// Minimum HMAC secret length for session tokens.
pub const MIN_TOKEN_SECRET_LEN: usize = 32;

const WAL_FILE: &str = "roombook.wal";

#[derive(Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub token_secret: Vec<u8>,
    pub session_ttl: Duration,
    pub bcrypt_cost: u32,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("data_dir", &self.data_dir)
            .field("password", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("compact_threshold", &self.compact_threshold)
            .field("token_secret", &"[REDACTED]")
            .field("session_ttl", &self.session_ttl)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("metrics_port", &self.metrics_port)
            .field("tls_cert", &self.tls_cert)
            .field("tls_key", &self.tls_key)
            .finish()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    MissingEnvVar(&'static str),
    InvalidValue { var: &'static str, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingEnvVar(var) => {
                write!(f, "missing required environment variable: {var}")
            }
            ConfigError::InvalidValue { var, reason } => write!(f, "invalid {var}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_or<T>(vars: &HashMap<String, String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            reason: e.to_string(),
        }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a map of variables (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind = vars
            .get("ROOMBOOK_BIND")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or(vars, "ROOMBOOK_PORT", 5433u16)?;
        let data_dir = PathBuf::from(
            vars.get("ROOMBOOK_DATA_DIR")
                .map(String::as_str)
                .unwrap_or("./data"),
        );
        let password = vars
            .get("ROOMBOOK_PASSWORD")
            .cloned()
            .unwrap_or_else(|| "roombook".to_string());

        let max_connections = parse_or(vars, "ROOMBOOK_MAX_CONNECTIONS", 256usize)?;
        if max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                var: "ROOMBOOK_MAX_CONNECTIONS",
                reason: "must be at least 1".into(),
            });
        }
        let compact_threshold = parse_or(vars, "ROOMBOOK_COMPACT_THRESHOLD", 1000u64)?;

        let token_secret = vars
            .get("ROOMBOOK_TOKEN_SECRET")
            .ok_or(ConfigError::MissingEnvVar("ROOMBOOK_TOKEN_SECRET"))?
            .as_bytes()
            .to_vec();
        if token_secret.len() < MIN_TOKEN_SECRET_LEN {
            return Err(ConfigError::InvalidValue {
                var: "ROOMBOOK_TOKEN_SECRET",
                reason: format!(
                    "expected at least {MIN_TOKEN_SECRET_LEN} bytes, got {}",
                    token_secret.len()
                ),
            });
        }

        let ttl_secs = parse_or(vars, "ROOMBOOK_SESSION_TTL_SECS", 3600u64)?;
        if ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                var: "ROOMBOOK_SESSION_TTL_SECS",
                reason: "must be positive".into(),
            });
        }

        let bcrypt_cost = parse_or(vars, "ROOMBOOK_BCRYPT_COST", 12u32)?;
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidValue {
                var: "ROOMBOOK_BCRYPT_COST",
                reason: format!("must be between {MIN_BCRYPT_COST} and {MAX_BCRYPT_COST}"),
            });
        }

        let metrics_port = match vars.get("ROOMBOOK_METRICS_PORT") {
            None => None,
            Some(_) => Some(parse_or(vars, "ROOMBOOK_METRICS_PORT", 0u16)?),
        };

        let tls_cert = vars.get("ROOMBOOK_TLS_CERT").cloned();
        let tls_key = vars.get("ROOMBOOK_TLS_KEY").cloned();
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::InvalidValue {
                var: "ROOMBOOK_TLS_CERT",
                reason: "ROOMBOOK_TLS_CERT and ROOMBOOK_TLS_KEY must be set together".into(),
            });
        }

        Ok(Config {
            bind,
            port,
            data_dir,
            password,
            max_connections,
            compact_threshold,
            token_secret,
            session_ttl: Duration::from_secs(ttl_secs),
            bcrypt_cost,
            metrics_port,
            tls_cert,
            tls_key,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE)
    }

    pub fn credential_settings(&self) -> CredentialSettings {
        CredentialSettings {
            token_secret: self.token_secret.clone(),
            session_ttl: self.session_ttl,
            bcrypt_cost: self.bcrypt_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn vars(extra: &[(&str, &str)]) -> HashMap<String, String> {
        let mut vars = HashMap::from([("ROOMBOOK_TOKEN_SECRET".to_string(), SECRET.to_string())]);
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        vars
    }

    #[test]
    fn defaults() {
        let config = Config::from_vars(&vars(&[])).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.password, "roombook");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.session_ttl, Duration::from_secs(3600));
        assert_eq!(config.bcrypt_cost, 12);
        assert_eq!(config.metrics_port, None);
        assert!(config.tls_cert.is_none());
        assert_eq!(config.wal_path(), PathBuf::from("./data").join("roombook.wal"));
    }

    #[test]
    fn overrides() {
        let config = Config::from_vars(&vars(&[
            ("ROOMBOOK_BIND", "127.0.0.1"),
            ("ROOMBOOK_PORT", "6000"),
            ("ROOMBOOK_DATA_DIR", "/tmp/rb"),
            ("ROOMBOOK_SESSION_TTL_SECS", "60"),
            ("ROOMBOOK_BCRYPT_COST", "4"),
            ("ROOMBOOK_METRICS_PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:6000");
        assert_eq!(config.wal_path(), PathBuf::from("/tmp/rb/roombook.wal"));
        assert_eq!(config.session_ttl, Duration::from_secs(60));
        assert_eq!(config.credential_settings().bcrypt_cost, 4);
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn token_secret_required() {
        let result = Config::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar("ROOMBOOK_TOKEN_SECRET"))));
    }

    #[test]
    fn short_token_secret_rejected() {
        let vars = HashMap::from([("ROOMBOOK_TOKEN_SECRET".to_string(), "short".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue { var, reason }) if var == "ROOMBOOK_TOKEN_SECRET" && reason.contains("got 5"))
        );
    }

    #[test]
    fn bcrypt_cost_bounds() {
        assert!(Config::from_vars(&vars(&[("ROOMBOOK_BCRYPT_COST", "3")])).is_err());
        assert!(Config::from_vars(&vars(&[("ROOMBOOK_BCRYPT_COST", "32")])).is_err());
        assert!(Config::from_vars(&vars(&[("ROOMBOOK_BCRYPT_COST", "31")])).is_ok());
    }

    #[test]
    fn unparseable_numbers_rejected() {
        let result = Config::from_vars(&vars(&[("ROOMBOOK_PORT", "not-a-port")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { var: "ROOMBOOK_PORT", .. })));
        assert!(Config::from_vars(&vars(&[("ROOMBOOK_MAX_CONNECTIONS", "0")])).is_err());
        assert!(Config::from_vars(&vars(&[("ROOMBOOK_SESSION_TTL_SECS", "0")])).is_err());
    }

    #[test]
    fn tls_requires_both_files() {
        assert!(Config::from_vars(&vars(&[("ROOMBOOK_TLS_CERT", "cert.pem")])).is_err());
        let config = Config::from_vars(&vars(&[
            ("ROOMBOOK_TLS_CERT", "cert.pem"),
            ("ROOMBOOK_TLS_KEY", "key.pem"),
        ]))
        .unwrap();
        assert_eq!(config.tls_key.as_deref(), Some("key.pem"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = Config::from_vars(&vars(&[("ROOMBOOK_PASSWORD", "hunter2")])).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains(SECRET));
    }
}
