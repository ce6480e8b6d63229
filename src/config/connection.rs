// databasebackup/src/config/connection.rs
use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::errors::{BackupError, Result};

pub const EXPECTED_SCHEME: &str = "mongodb";
pub const DEFAULT_PORT: u16 = 27017;

/// Connection details parsed once from the `mongodb://` URI given on the command line.
pub struct ConnectionTarget {
    pub scheme: String,
    pub username: Option<String>,
    password: Option<SecretString>,
    pub hostname: String,
    pub port: u16,
    pub database: String,
    pub authority: String,
}

impl ConnectionTarget {
    /// Parses `scheme://[user[:pass]@]host[:port]/dbname`.
    ///
    /// Userinfo is kept exactly as written in the URI.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| BackupError::config(format!("Invalid connection URI: {}", e)))?;

        if url.scheme() != EXPECTED_SCHEME {
            return Err(BackupError::config(format!(
                "url must be in the form {}://*, got scheme '{}'",
                EXPECTED_SCHEME,
                url.scheme()
            )));
        }

        let hostname = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| BackupError::config("Connection URI is missing a hostname"))?
            .to_string();

        let database = url.path().trim_start_matches('/').to_string();
        if database.is_empty() || database.contains('/') {
            return Err(BackupError::config(
                "Connection URI must name exactly one database, e.g. mongodb://host:27017/orders",
            ));
        }

        let username = Some(url.username()).filter(|u| !u.is_empty()).map(str::to_string);
        let password = url.password().map(|p| SecretString::from(p.to_string()));

        Ok(ConnectionTarget {
            scheme: url.scheme().to_string(),
            username,
            password,
            hostname,
            port: url.port().unwrap_or(DEFAULT_PORT),
            database,
            authority: url.authority().to_string(),
        })
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret())
    }

    /// The URI without credentials, safe to log.
    pub fn redacted(&self) -> String {
        format!("{}://{}:{}/{}", self.scheme, self.hostname, self.port, self.database)
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("scheme", &self.scheme)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}
