//! Attendance Common Library
//!
//! Value types shared by both sides of the mock backend's process boundary:
//! the canned response catalog, server configuration, the worker wire
//! protocol and the error taxonomy.

pub mod catalog;
pub mod error;
pub mod protocol;
pub mod types;

// Re-export commonly used types
pub use catalog::{endpoint_key, ResponseCatalog};
pub use error::{Error, Result};
pub use protocol::{SupervisorCommand, WorkerEvent};
pub use types::{ForceAction, ServerConfig};

/// Port the mock backend listens on when none is configured
pub const DEFAULT_PORT: u16 = 8000;

/// Interface the mock backend binds when none is configured
pub const DEFAULT_HOST: &str = "127.0.0.1";
