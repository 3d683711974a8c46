use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{info, warn};

use crate::auth::{AuthError, UserDirectory};

const DEFAULT_USERS: &str = "admin:admin:admin";

#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub users_file: Option<PathBuf>,
    pub users: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String, reason: String },
    UsersFile { path: PathBuf, reason: String },
    Users(AuthError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { key, value, reason } => {
                write!(f, "invalid {key}={value:?}: {reason}")
            }
            ConfigError::UsersFile { path, reason } => {
                write!(f, "cannot read users file {}: {reason}", path.display())
            }
            ConfigError::Users(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<AuthError> for ConfigError {
    fn from(e: AuthError) -> Self {
        ConfigError::Users(e)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            port: parse_or(&lookup, "ROOMBOOK_PORT", 5433)?,
            bind: lookup("ROOMBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("ROOMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            max_connections: parse_or(&lookup, "ROOMBOOK_MAX_CONNECTIONS", 256)?,
            compact_threshold: parse_or(&lookup, "ROOMBOOK_COMPACT_THRESHOLD", 1000)?,
            metrics_port: parse_opt(&lookup, "ROOMBOOK_METRICS_PORT")?,
            tls_cert: lookup("ROOMBOOK_TLS_CERT").map(PathBuf::from),
            tls_key: lookup("ROOMBOOK_TLS_KEY").map(PathBuf::from),
            users_file: lookup("ROOMBOOK_USERS_FILE").map(PathBuf::from),
            users: lookup("ROOMBOOK_USERS"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    /// Accounts from the users file, else the inline list, else a single
    /// default admin.
    pub fn load_users(&self) -> Result<UserDirectory, ConfigError> {
        if let Some(path) = &self.users_file {
            let json = std::fs::read_to_string(path).map_err(|e| ConfigError::UsersFile {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            let users = UserDirectory::from_json(&json)?;
            info!("loaded {} users from {}", users.len(), path.display());
            return Ok(users);
        }
        if let Some(list) = &self.users {
            return Ok(UserDirectory::from_list(list)?);
        }
        warn!("no ROOMBOOK_USERS_FILE or ROOMBOOK_USERS set, using default admin account");
        Ok(UserDirectory::from_list(DEFAULT_USERS)?)
    }
}

fn parse_opt<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    match value.trim().parse::<T>() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => {
            warn!("invalid {key} value: {e}");
            Err(ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            })
        }
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + fmt::Display,
    T::Err: fmt::Display,
{
    Ok(parse_opt(lookup, key)?.unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.listen_addr(), "0.0.0.0:5433");
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/bookings.wal"));
        let users = cfg.load_users().unwrap();
        assert!(users.role_of("admin").unwrap().is_admin());
    }

    #[test]
    fn overrides() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("ROOMBOOK_PORT", "6000"),
            ("ROOMBOOK_BIND", "127.0.0.1"),
            ("ROOMBOOK_METRICS_PORT", "9100"),
            ("ROOMBOOK_USERS", "ops:pw:admin,tamu:tamu:user"),
        ]))
        .unwrap();
        assert_eq!(cfg.listen_addr(), "127.0.0.1:6000");
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.load_users().unwrap().len(), 2);
    }

    #[test]
    fn bad_number_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[("ROOMBOOK_PORT", "not-a-port")])).unwrap_err();
        assert!(err.to_string().contains("ROOMBOOK_PORT"), "{err}");
    }

    #[test]
    fn users_file_takes_precedence() {
        let dir = std::env::temp_dir().join("roombook_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("users.json");
        std::fs::write(&path, r#"[{"username":"kepala","password":"x","role":"admin"}]"#).unwrap();

        let cfg = Config::from_lookup(lookup_from(&[
            ("ROOMBOOK_USERS_FILE", path.to_str().unwrap()),
            ("ROOMBOOK_USERS", "other:pw:user"),
        ]))
        .unwrap();
        let users = cfg.load_users().unwrap();
        assert_eq!(users.len(), 1);
        assert!(users.get("kepala").is_some());
    }

    #[test]
    fn missing_users_file_is_reported() {
        let cfg = Config::from_lookup(lookup_from(&[(
            "ROOMBOOK_USERS_FILE",
            "/nonexistent/roombook/users.json",
        )]))
        .unwrap();
        assert!(matches!(cfg.load_users(), Err(ConfigError::UsersFile { .. })));
    }
}
