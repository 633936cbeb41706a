//! Worker wire protocol
//!
//! The worker reads one JSON-encoded [`ServerConfig`](crate::ServerConfig)
//! line on stdin and then writes newline-delimited [`WorkerEvent`]s on stdout.
//! The first event is always `ready` or `bind_failed`. After that, stdin
//! carries [`SupervisorCommand`] lines: each `captured` event is answered
//! with an `ack` once the body is queued on the supervisor side, and the
//! worker holds the HTTP response until then.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One line of worker stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Listener is bound and accepting
    Ready { port: u16 },

    /// Listener could not be bound; the worker exits after sending this
    BindFailed { port: u16, message: String },

    /// A POST body was accepted; its response waits for `ack` with the same id
    Captured { id: u64, body: Value },
}

impl WorkerEvent {
    /// Encode as a single line, without the trailing newline
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| Error::Protocol(format!("undecodable worker line {:?}: {}", line, e)))
    }
}

/// One line of worker stdin after the configuration line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SupervisorCommand {
    /// The capture with this id is queued for polling
    Ack { id: u64 },
}

impl SupervisorCommand {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| Error::Protocol(format!("undecodable supervisor line {:?}: {}", line, e)))
    }
}
