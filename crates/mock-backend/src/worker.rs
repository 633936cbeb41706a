//! Worker side of the mock backend - bind, announce, serve
//!
//! [`run_worker`] is what the supervisor's child process runs. It reads the
//! configuration line, binds, reports the outcome as a [`WorkerEvent`], then
//! serves until its input closes. A POST is answered only after the
//! supervisor acknowledges its capture. [`serve_standalone`] is the same
//! server for manual runs, logging captures instead of exporting them.

use std::collections::HashMap;
use std::future::IntoFuture;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::net::TcpListener;
use tracing::{info, warn};

use attendance_common::{Error, Result, ServerConfig, SupervisorCommand, WorkerEvent};

use crate::channel::{acknowledged_capture_channel, capture_channel, CaptureReceiver, PendingCapture};
use crate::handler::router;

/// Bind the configured address, mapping failures to [`Error::Bind`]
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    TcpListener::bind(config.bind_address())
        .await
        .map_err(|e| Error::Bind {
            host: config.host.clone(),
            port: config.port,
            message: e.to_string(),
        })
}

/// Writes newline-delimited worker events
struct EventWriter<W> {
    output: W,
}

impl<W: AsyncWrite + Unpin> EventWriter<W> {
    fn new(output: W) -> Self {
        Self { output }
    }

    async fn send(&mut self, event: &WorkerEvent) -> Result<()> {
        let mut line = event.encode()?;
        line.push('\n');
        self.output.write_all(line.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }
}

/// Run the worker protocol over `input` / `output` (stdin / stdout in the
/// real process).
///
/// Returns once `input` reaches end of file, which is how the worker notices
/// that its supervisor went away.
pub async fn run_worker<R, W>(input: R, output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut input = input.lines();
    let Some(line) = input.next_line().await? else {
        return Err(Error::Protocol(
            "input closed before the configuration arrived".to_string(),
        ));
    };
    let config: ServerConfig = serde_json::from_str(line.trim())?;

    let mut events = EventWriter::new(output);
    let listener = match bind(&config).await {
        Ok(listener) => listener,
        Err(err) => {
            events
                .send(&WorkerEvent::BindFailed {
                    port: config.port,
                    message: err.to_string(),
                })
                .await?;
            return Err(err);
        }
    };
    let port = listener.local_addr()?.port();
    events.send(&WorkerEvent::Ready { port }).await?;
    info!(
        port,
        force_action = %config.force_action,
        "worker listening"
    );

    let (sink, captures) = acknowledged_capture_channel();
    let mut relay = tokio::spawn(relay_captures(input, captures, events));
    let server = axum::serve(listener, router(&config, sink)).into_future();

    tokio::select! {
        served = server => served?,
        relayed = &mut relay => match relayed {
            Ok(Ok(())) => info!("input closed, shutting down"),
            Ok(Err(e)) => return Err(e),
            Err(e) => return Err(Error::Protocol(format!("capture relay failed: {}", e))),
        },
    }
    relay.abort();
    Ok(())
}

/// Single writer for captured bodies, and reader of the supervisor's acks.
///
/// Each capture is written as a numbered `captured` event and held until the
/// matching `ack` arrives; acknowledging it releases the handler's response.
/// Returns when `input` closes.
async fn relay_captures<R, W>(
    mut input: Lines<R>,
    mut captures: CaptureReceiver,
    mut events: EventWriter<W>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut pending: HashMap<u64, PendingCapture> = HashMap::new();
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            capture = captures.recv_pending() => {
                let Some(capture) = capture else {
                    return Ok(());
                };
                let id = next_id;
                next_id += 1;
                events
                    .send(&WorkerEvent::Captured {
                        id,
                        body: capture.body().clone(),
                    })
                    .await?;
                pending.insert(id, capture);
            }
            line = input.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                match SupervisorCommand::decode(&line) {
                    Ok(SupervisorCommand::Ack { id }) => match pending.remove(&id) {
                        Some(capture) => {
                            capture.acknowledge();
                        }
                        None => warn!(id, "ack for unknown capture"),
                    },
                    Err(e) => warn!(error = %e, "ignoring unexpected worker input"),
                }
            }
        }
    }
}

/// Serve in the foreground until Ctrl-C, logging each captured body
pub async fn serve_standalone(config: ServerConfig) -> Result<()> {
    let listener = bind(&config).await?;
    info!(
        addr = %listener.local_addr()?,
        force_action = %config.force_action,
        "mock backend listening"
    );

    let (sink, mut captures) = capture_channel();
    tokio::spawn(async move {
        while let Some(body) = captures.recv().await {
            info!(body = %body, "captured POST body");
        }
    });

    axum::serve(listener, router(&config, sink))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
