//! Control intake
//!
//! Subscribes to the fleet-wide control broadcast and applies each message
//! locally: workflow pause/abort resolve through the registry (messages for
//! executions running elsewhere are silently ignored), case messages mutate
//! the subscription cache, and `Exit` closes the control stream and starts
//! the local shutdown path.
//!
//! Messages are processed strictly in receive order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use zeromq::{Socket, SocketRecv, SubSocket};

use crate::crypto::Channel;
use crate::error::TransportError;
use crate::metrics::WorkerMetrics;
use crate::protocol::{
    self, CaseControl, CaseControlKind, ControlMessage, WorkflowControl, WorkflowControlKind,
};
use crate::registry::WorkflowRegistry;
use crate::subscriptions::SubscriptionCache;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Source of sealed control frames. `None` means no frame arrived within the
/// poll window.
#[async_trait]
pub trait ControlTransport: Send {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// SUB socket with an empty topic filter: every worker sees every broadcast.
pub struct ZmqSubTransport {
    socket: SubSocket,
}

impl ZmqSubTransport {
    pub async fn connect(address: &str) -> Result<Self, TransportError> {
        let mut socket = SubSocket::new();
        socket.connect(address).await?;
        socket.subscribe("").await?;
        Ok(Self { socket })
    }
}

#[async_trait]
impl ControlTransport for ZmqSubTransport {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match tokio::time::timeout(RECV_TIMEOUT, self.socket.recv()).await {
            Ok(Ok(message)) => Ok(message.into_vec().into_iter().next().map(|b| b.to_vec())),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Ok(None),
        }
    }
}

pub struct ControlReceiver {
    registry: Arc<WorkflowRegistry>,
    subscriptions: Arc<SubscriptionCache>,
    channel: Channel,
    metrics: Arc<WorkerMetrics>,
    shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ControlReceiver {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        subscriptions: Arc<SubscriptionCache>,
        channel: Channel,
        metrics: Arc<WorkerMetrics>,
        shutdown_rx: watch::Receiver<bool>,
        shutdown_tx: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            registry,
            subscriptions,
            channel,
            metrics,
            shutdown_rx,
            shutdown_tx,
        }
    }

    /// Drive the control stream until shutdown or an `Exit` frame.
    pub async fn run(self, mut transport: impl ControlTransport) {
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let frame = match transport.recv().await {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, "control receive failed, backing off");
                    tokio::time::sleep(RECV_TIMEOUT).await;
                    continue;
                }
            };

            let payload = match self.channel.open(&frame) {
                Ok((_identity, payload)) => payload,
                Err(err) => {
                    self.metrics.inc_frames_dropped();
                    self.metrics.inc_crypto_failures();
                    debug!(error = %err, "dropping unauthenticated control frame");
                    continue;
                }
            };

            let message = match protocol::decode_control(&payload) {
                Ok(message) => message,
                Err(err) => {
                    self.metrics.inc_frames_dropped();
                    debug!(error = %err, "dropping malformed control frame");
                    continue;
                }
            };

            if !self.dispatch(message) {
                break;
            }
        }
        info!("control stream closed");
    }

    /// Apply one control message. Returns false when the stream should end.
    fn dispatch(&self, message: ControlMessage) -> bool {
        match message {
            ControlMessage::Workflow(WorkflowControl {
                kind,
                workflow_execution_id,
            }) => {
                match self.registry.lookup_by_execution_id(&workflow_execution_id) {
                    Some(workflow) => match kind {
                        WorkflowControlKind::Pause => {
                            info!(execution_id = %workflow_execution_id, "pause requested");
                            workflow.pause();
                        }
                        WorkflowControlKind::Abort => {
                            info!(execution_id = %workflow_execution_id, "abort requested");
                            workflow.abort();
                        }
                    },
                    // Running on another worker, or already finished.
                    None => debug!(
                        execution_id = %workflow_execution_id,
                        "control message for workflow not running here"
                    ),
                }
                true
            }
            ControlMessage::Case(CaseControl {
                kind,
                case_id,
                subscriptions,
            }) => {
                match kind {
                    CaseControlKind::Create | CaseControlKind::Update => {
                        debug!(case_id = %case_id, count = subscriptions.len(), "installing case subscriptions");
                        self.subscriptions.install(&case_id, subscriptions);
                    }
                    CaseControlKind::Delete => {
                        debug!(case_id = %case_id, "removing case subscriptions");
                        self.subscriptions.remove(&case_id);
                    }
                }
                true
            }
            ControlMessage::Exit => {
                warn!(
                    "control Exit received; shutting down this worker \
                     (a fleet-wide stop requires one Exit per worker)"
                );
                let _ = self.shutdown_tx.send(true);
                false
            }
        }
    }
}
