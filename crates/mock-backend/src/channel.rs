//! Capture channel - ordered hand-off of captured POST bodies
//!
//! The same pair is used on both sides of the process boundary. In the worker,
//! handlers deliver into an acknowledged [`CaptureSink`] and wait until the
//! relay task confirms the supervisor has queued the body. In the test
//! process, the supervisor's reader task pushes decoded events and the harness
//! polls the receiver.

use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use attendance_common::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Create an unbounded FIFO capture channel. Delivery completes on enqueue.
pub fn capture_channel() -> (CaptureSink, CaptureReceiver) {
    channel(false)
}

/// Like [`capture_channel`], but [`CaptureSink::deliver`] only completes
/// once the consumer acknowledges the body.
pub fn acknowledged_capture_channel() -> (CaptureSink, CaptureReceiver) {
    channel(true)
}

fn channel(acknowledged: bool) -> (CaptureSink, CaptureReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CaptureSink { tx, acknowledged }, CaptureReceiver { rx })
}

/// A queued body, possibly with a producer waiting on its acknowledgement
#[derive(Debug)]
pub struct PendingCapture {
    body: Value,
    ack: Option<oneshot::Sender<()>>,
}

impl PendingCapture {
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Release the waiting producer, if any, and take the body
    pub fn acknowledge(self) -> Value {
        if let Some(ack) = self.ack {
            // The producer may have given up (client disconnected)
            let _ = ack.send(());
        }
        self.body
    }
}

/// Producer half. Cloneable; pushes never block.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    tx: mpsc::UnboundedSender<PendingCapture>,
    acknowledged: bool,
}

impl CaptureSink {
    /// Enqueue one captured body. Fails only once the receiver is gone.
    pub fn push(&self, body: Value) -> Result<()> {
        self.send(PendingCapture { body, ack: None })
    }

    /// Enqueue one captured body and, on an acknowledged channel, wait until
    /// the consumer has acknowledged it.
    ///
    /// Fails with [`Error::ChannelClosed`] if the consumer drops the body
    /// unacknowledged.
    pub async fn deliver(&self, body: Value) -> Result<()> {
        if !self.acknowledged {
            return self.push(body);
        }
        let (ack, acked) = oneshot::channel();
        self.send(PendingCapture {
            body,
            ack: Some(ack),
        })?;
        acked.await.map_err(|_| Error::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, capture: PendingCapture) -> Result<()> {
        self.tx.send(capture).map_err(|_| Error::ChannelClosed)
    }
}

/// Single consumer half
#[derive(Debug)]
pub struct CaptureReceiver {
    rx: mpsc::UnboundedReceiver<PendingCapture>,
}

impl CaptureReceiver {
    /// Take the oldest queued body without waiting.
    ///
    /// Returns [`Error::EmptyQueue`] when nothing is queued right now, even if
    /// every producer has gone away.
    pub fn poll_no_wait(&mut self) -> Result<Value> {
        match self.rx.try_recv() {
            Ok(capture) => Ok(capture.acknowledge()),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Err(Error::EmptyQueue),
        }
    }

    /// Poll until a body is queued or `timeout` elapses
    pub async fn wait_for(&mut self, timeout: Duration) -> Result<Value> {
        let start = Instant::now();
        loop {
            match self.poll_no_wait() {
                Ok(body) => return Ok(body),
                Err(Error::EmptyQueue) if start.elapsed() < timeout => sleep(POLL_INTERVAL).await,
                Err(Error::EmptyQueue) => return Err(Error::CaptureTimeout(timeout)),
                Err(e) => return Err(e),
            }
        }
    }

    /// Take every body queued right now, oldest first
    pub fn drain(&mut self) -> Vec<Value> {
        let mut bodies = Vec::new();
        while let Ok(capture) = self.rx.try_recv() {
            bodies.push(capture.acknowledge());
        }
        bodies
    }

    /// Wait for the next body; `None` once every sink is dropped and the queue is empty.
    pub async fn recv(&mut self) -> Option<Value> {
        self.recv_pending().await.map(PendingCapture::acknowledge)
    }

    /// Wait for the next capture, leaving its acknowledgement to the caller
    pub async fn recv_pending(&mut self) -> Option<PendingCapture> {
        self.rx.recv().await
    }
}
