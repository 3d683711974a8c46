use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use serde::{Deserialize, Serialize};

use crate::limits::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Admin => "admin",
            Role::User => "user",
        })
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(AuthError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub username: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    UnknownRole(String),
    MalformedEntry(String),
    InvalidAccount(&'static str),
    DuplicateUser(String),
    Json(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::UnknownRole(r) => write!(f, "unknown role: {r} (expected admin or user)"),
            AuthError::MalformedEntry(e) => {
                write!(f, "malformed user entry: {e} (expected name:password:role)")
            }
            AuthError::InvalidAccount(msg) => write!(f, "invalid account: {msg}"),
            AuthError::DuplicateUser(u) => write!(f, "duplicate user: {u}"),
            AuthError::Json(e) => write!(f, "bad users file: {e}"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Accounts known to the server, keyed by username.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<String, UserAccount>,
}

impl UserDirectory {
    pub fn new(accounts: Vec<UserAccount>) -> Result<Self, AuthError> {
        if accounts.len() > MAX_USERS {
            return Err(AuthError::InvalidAccount("too many users"));
        }
        let mut users = HashMap::with_capacity(accounts.len());
        for account in accounts {
            if account.username.is_empty() {
                return Err(AuthError::InvalidAccount("empty username"));
            }
            if account.username.len() > MAX_USERNAME_LEN {
                return Err(AuthError::InvalidAccount("username too long"));
            }
            if account.password.is_empty() {
                return Err(AuthError::InvalidAccount("empty password"));
            }
            if users.contains_key(&account.username) {
                return Err(AuthError::DuplicateUser(account.username));
            }
            users.insert(account.username.clone(), account);
        }
        Ok(Self { users })
    }

    /// JSON array of `{"username", "password", "role"}` objects.
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        let accounts: Vec<UserAccount> =
            serde_json::from_str(json).map_err(|e| AuthError::Json(e.to_string()))?;
        Self::new(accounts)
    }

    /// Comma-separated `name:password:role` entries.
    pub fn from_list(list: &str) -> Result<Self, AuthError> {
        let mut accounts = Vec::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            let (Some(username), Some(password), Some(role)) =
                (parts.next(), parts.next(), parts.next())
            else {
                return Err(AuthError::MalformedEntry(entry.to_string()));
            };
            accounts.push(UserAccount {
                username: username.to_string(),
                password: password.to_string(),
                role: role.parse()?,
            });
        }
        Self::new(accounts)
    }

    pub fn get(&self, username: &str) -> Option<&UserAccount> {
        self.users.get(username)
    }

    pub fn role_of(&self, username: &str) -> Option<Role> {
        self.users.get(username).map(|a| a.role)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Cleartext password source backed by the user directory.
#[derive(Debug)]
pub struct RoomBookAuthSource {
    users: Arc<UserDirectory>,
}

impl RoomBookAuthSource {
    pub fn new(users: Arc<UserDirectory>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl AuthSource for RoomBookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let username = login.user().unwrap_or_default();
        match self.users.get(username) {
            Some(account) => Ok(Password::new(None, account.password.as_bytes().to_vec())),
            None => {
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                tracing::warn!("login attempt for unknown user {username:?}");
                Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                    "FATAL".into(),
                    "28P01".into(),
                    format!("password authentication failed for user \"{username}\""),
                ))))
            }
        }
    }
}
