//! Destination connection parameters.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ExportError, ExportResult};
use crate::sql::Dialect;

/// Default number of pooled destination connections.
pub const DEFAULT_CONNECTION_LIMIT: usize = 10;

/// Database engine behind the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[default]
    #[serde(alias = "mariadb")]
    Mysql,
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    Sqlite,
}

impl Driver {
    /// Detect the driver from a database URL scheme.
    ///
    /// - `mysql://` or `mariadb://` → MySQL
    /// - `postgres://` or `postgresql://` → PostgreSQL
    /// - Everything else → SQLite
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("mysql://") || url.starts_with("mariadb://") {
            Driver::Mysql
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Driver::Postgres
        } else {
            Driver::Sqlite
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Driver::Mysql => Dialect::MySql,
            Driver::Postgres | Driver::Sqlite => Dialect::Ansi,
        }
    }

    fn scheme(&self) -> &'static str {
        match self {
            Driver::Mysql => "mysql",
            Driver::Postgres => "postgres",
            Driver::Sqlite => "sqlite",
        }
    }

    fn default_port(&self) -> Option<u16> {
        match self {
            Driver::Mysql => Some(3306),
            Driver::Postgres => Some(5432),
            Driver::Sqlite => None,
        }
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

/// Connection parameters as given in the export input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<Driver>,
    /// Full database URL; overrides the individual fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_port",
        skip_serializing_if = "Option::is_none"
    )]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Database name, or the database file for SQLite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Pool size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_limit: Option<usize>,
}

/// Ports arrive as numbers or strings depending on who wrote the input.
fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match Option::<PortRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(PortRepr::Number(port)) => Ok(Some(port)),
        Some(PortRepr::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(PortRepr::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {text}"))),
    }
}

impl ConnectionConfig {
    pub fn driver(&self) -> Driver {
        self.driver
            .or_else(|| self.url.as_deref().map(Driver::from_url))
            .unwrap_or_default()
    }

    pub fn connection_limit(&self) -> usize {
        self.connection_limit
            .unwrap_or(DEFAULT_CONNECTION_LIMIT)
            .max(1)
    }

    /// Whether enough is given to attempt a connection.
    pub fn is_usable(&self) -> bool {
        match self.driver() {
            Driver::Sqlite => self.url.is_some() || self.database.is_some(),
            _ => self.url.is_some() || self.host.as_deref().is_some_and(|h| !h.is_empty()),
        }
    }

    /// Host and port the destination is reached at, if network based.
    pub fn endpoint(&self) -> Option<(String, u16)> {
        let driver = self.driver();
        if let Some(raw) = &self.url {
            let parsed = url::Url::parse(raw).ok()?;
            let host = parsed.host_str()?.to_string();
            let port = parsed.port().or(driver.default_port())?;
            return Some((host, port));
        }
        let host = self.host.clone().filter(|h| !h.is_empty())?;
        let port = self.port.or(driver.default_port())?;
        Some((host, port))
    }

    /// Replace the endpoint, e.g. with a local tunnel address.
    pub fn with_endpoint(&self, host: &str, port: u16) -> ExportResult<Self> {
        let mut config = self.clone();
        if let Some(raw) = &self.url {
            let mut parsed = url::Url::parse(raw)
                .map_err(|e| ExportError::config(format!("invalid connection url: {e}")))?;
            parsed
                .set_host(Some(host))
                .map_err(|e| ExportError::config(format!("invalid tunnel host: {e}")))?;
            parsed
                .set_port(Some(port))
                .map_err(|_| ExportError::config("connection url cannot carry a port"))?;
            config.url = Some(parsed.to_string());
        } else {
            config.host = Some(host.to_string());
            config.port = Some(port);
        }
        Ok(config)
    }

    /// Build the URL handed to the connection manager.
    pub fn database_url(&self) -> ExportResult<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }

        let driver = self.driver();
        if driver == Driver::Sqlite {
            return self
                .database
                .clone()
                .ok_or_else(|| ExportError::config("sqlite connection requires `database`"));
        }

        let host = self
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ExportError::config("connection requires `host` or `url`"))?;
        let mut url = url::Url::parse(&format!("{}://placeholder", driver.scheme()))
            .map_err(|e| ExportError::config(e.to_string()))?;
        url.set_host(Some(host))
            .map_err(|e| ExportError::config(format!("invalid host {host}: {e}")))?;
        let bad = |what: &str| ExportError::config(format!("invalid {what} in connection"));
        if let Some(port) = self.port {
            url.set_port(Some(port)).map_err(|_| bad("port"))?;
        }
        if let Some(user) = &self.user {
            url.set_username(user).map_err(|_| bad("user"))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| bad("password"))?;
        }
        if let Some(database) = &self.database {
            url.set_path(database);
        }
        Ok(url.to_string())
    }
}
