//! Results publisher
//!
//! Execution events from concurrent workflow tasks funnel through a bounded
//! queue into a single writer task that seals and pushes each event on the
//! results socket. One event is one transport frame; ordering is preserved
//! per execution because each execution enqueues sequentially.
//!
//! Loss policy: a full queue blocks the caller briefly, then the event is
//! dropped and counted. Send failures retry twice, then drop. Nothing here
//! ever propagates an error back into the workflow interpreter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zeromq::{PushSocket, Socket, SocketSend, ZmqMessage};

use crate::crypto::Channel;
use crate::error::TransportError;
use crate::metrics::WorkerMetrics;
use crate::protocol::{self, WireEvent};

const PUBLISH_TIMEOUT: Duration = Duration::from_millis(250);
const SEND_RETRIES: usize = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);
const QUEUE_DEPTH: usize = 256;

/// Where sealed result frames go.
#[async_trait]
pub trait EventTransport: Send {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;
}

/// PUSH socket to the central results collector.
pub struct ZmqPushTransport {
    socket: PushSocket,
}

impl ZmqPushTransport {
    pub async fn connect(address: &str) -> Result<Self, TransportError> {
        let mut socket = PushSocket::new();
        socket.connect(address).await?;
        Ok(Self { socket })
    }
}

#[async_trait]
impl EventTransport for ZmqPushTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.socket.send(ZmqMessage::from(frame)).await?;
        Ok(())
    }
}

/// Cloneable handle to the single-writer publication queue.
#[derive(Clone)]
pub struct ResultsPublisher {
    tx: mpsc::Sender<WireEvent>,
    metrics: Arc<WorkerMetrics>,
}

impl ResultsPublisher {
    /// Spawn the writer task. The task exits when every publisher handle has
    /// been dropped and the queue is drained.
    pub fn start(
        transport: impl EventTransport + 'static,
        channel: Channel,
        metrics: Arc<WorkerMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let writer = tokio::spawn(write_loop(transport, channel, rx, metrics.clone()));
        (Self { tx, metrics }, writer)
    }

    /// Enqueue an event for publication. Blocks up to the publish timeout
    /// when the queue is full, then drops the event.
    pub async fn publish(&self, event: WireEvent) {
        match self.tx.send_timeout(event, PUBLISH_TIMEOUT).await {
            Ok(()) => {}
            Err(mpsc::error::SendTimeoutError::Timeout(event)) => {
                self.metrics.inc_events_dropped();
                warn!(event = %event.event_name, "results queue full, dropping event");
            }
            Err(mpsc::error::SendTimeoutError::Closed(event)) => {
                self.metrics.inc_events_dropped();
                debug!(event = %event.event_name, "results writer stopped, dropping event");
            }
        }
    }
}

async fn write_loop(
    mut transport: impl EventTransport,
    channel: Channel,
    mut rx: mpsc::Receiver<WireEvent>,
    metrics: Arc<WorkerMetrics>,
) {
    while let Some(event) = rx.recv().await {
        let bytes = match protocol::encode_event(&event) {
            Ok(bytes) => bytes,
            Err(err) => {
                metrics.inc_publish_errors();
                warn!(event = %event.event_name, error = %err, "failed to encode event");
                continue;
            }
        };
        let frame = match channel.seal(&bytes) {
            Ok(frame) => frame,
            Err(err) => {
                metrics.inc_publish_errors();
                warn!(event = %event.event_name, error = %err, "failed to seal event frame");
                continue;
            }
        };

        let mut attempt = 0;
        loop {
            match transport.send(frame.clone()).await {
                Ok(()) => break,
                Err(err) if attempt < SEND_RETRIES => {
                    attempt += 1;
                    warn!(error = %err, attempt, "results send failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(err) => {
                    metrics.inc_publish_errors();
                    metrics.inc_events_dropped();
                    warn!(
                        event = %event.event_name,
                        error = %err,
                        "dropping event after repeated send failures"
                    );
                    break;
                }
            }
        }
    }
    debug!("results writer stopped");
}
