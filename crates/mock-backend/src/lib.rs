//! Attendance Mock Backend
//!
//! An HTTP stub for browser-driven front-end tests. The listener runs in a
//! separate worker process so the test process is never blocked by request
//! handling.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────── test process ────────────────┐      ┌──────── worker process ────────┐
//! │  MockServer (supervisor)                     │stdin │  run_worker                    │
//! │    ├── start()  ── ServerConfig line ────────┼─────▶│    ├── bind -> ready event     │
//! │    ├── stop()   ── kill                      │      │    └── axum router             │
//! │    └── poll_no_wait() <─ CaptureReceiver     │stdout│          handle_request        │
//! │              ▲  reader task <── events ──────┼◀─────┼── relay <─ CaptureSink <── POST│
//! │                 reader task ── ack ──────────┼─────▶│    relay ── release 200        │
//! └──────────────────────────────────────────────┘      └────────────────────────────────┘
//! ```

pub mod channel;
pub mod handler;
pub mod supervisor;
pub mod worker;

pub use attendance_common::{Error, ForceAction, ResponseCatalog, Result, ServerConfig};
pub use channel::{acknowledged_capture_channel, capture_channel, CaptureReceiver, CaptureSink, PendingCapture};
pub use handler::router;
pub use supervisor::{MockServer, ServerState};
