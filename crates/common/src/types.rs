//! Core configuration types

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::catalog::ResponseCatalog;
use crate::error::Error;
use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// Failure injection mode.
///
/// `Success` is a caller-side label for readability in test setup; the stub
/// treats it exactly like `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceAction {
    #[default]
    None,
    Success,
    Fail,
}

impl ForceAction {
    pub fn is_fail(self) -> bool {
        self == ForceAction::Fail
    }
}

impl std::fmt::Display for ForceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForceAction::None => write!(f, "none"),
            ForceAction::Success => write!(f, "success"),
            ForceAction::Fail => write!(f, "fail"),
        }
    }
}

impl FromStr for ForceAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(ForceAction::None),
            "success" => Ok(ForceAction::Success),
            "fail" => Ok(ForceAction::Fail),
            other => Err(Error::Config(format!(
                "unknown force action '{}' (expected none, success or fail)",
                other
            ))),
        }
    }
}

/// Mock backend configuration, fixed for the lifetime of a server instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Canned answers keyed by method and endpoint
    #[serde(default)]
    pub catalog: ResponseCatalog,

    /// Failure injection mode
    #[serde(default)]
    pub force_action: ForceAction,

    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on (0 = let the OS pick)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            catalog: ResponseCatalog::default(),
            force_action: ForceAction::default(),
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(mut self, catalog: ResponseCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_force_action(mut self, force_action: ForceAction) -> Self {
        self.force_action = force_action;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `host:port` as handed to the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
