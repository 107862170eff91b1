//! Driver trait and backend connection parameters

use crate::{Connection, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Opens new backend connections
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Driver identifier (e.g., "postgres", "mysql")
    fn id(&self) -> &'static str;

    /// Open a new connection to the backend described by `params`
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn Connection>>;
}

/// Where and how to reach the backend
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Driver ID (e.g., "postgres", "mysql")
    #[serde(default)]
    pub driver: String,
    /// Host address
    #[serde(default)]
    pub host: String,
    /// Port number (0 for the driver default)
    #[serde(default)]
    pub port: u16,
    /// Database name
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Additional driver-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Statements run, in order, on every freshly opened connection
    #[serde(default)]
    pub session_init: Vec<String>,
}

impl ConnectionParams {
    /// Create parameters for the given driver and address
    pub fn new(driver: &str, host: &str, port: u16) -> Self {
        Self {
            driver: driver.to_string(),
            host: host.to_string(),
            port,
            ..Default::default()
        }
    }

    /// Set the database name
    pub fn with_database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }

    /// Set the login credentials
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Set a driver-specific parameter
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Append a session initialisation statement
    pub fn with_session_init(mut self, sql: &str) -> Self {
        self.session_init.push(sql.to_string());
        self
    }

    /// Get a string parameter, falling back to the well-known fields
    pub fn get_string(&self, key: &str) -> Option<String> {
        if let Some(val) = self.params.get(key) {
            return Some(val.clone());
        }
        match key {
            "host" => Some(self.host.clone()),
            "database" => self.database.clone(),
            "username" | "user" => self.username.clone(),
            _ => None,
        }
    }

    /// `host:port` for log lines
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("params", &self.params)
            .field("session_init", &self.session_init)
            .finish()
    }
}
