//! Worker: admission loop and lifecycle
//!
//! The scheduler admits one request at a time while the registry has a free
//! slot, dispatches it onto the pool, and otherwise sleeps a short quantum.
//! Three long-lived tasks run beside it: control intake, the results writer,
//! and (from `main`) the health surface.
//!
//! Shutdown: flag every loop, abort in-flight workflows, drain bounded, join
//! the control task bounded, close the results path. Exit code 0 on a clean
//! drain, 1 when workflows were still live at the deadline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bridge::SignalBridge;
use crate::config::Config;
use crate::control::{ControlReceiver, ControlTransport, ZmqSubTransport};
use crate::crypto::{self, Channel, FrameCrypto, TransportKeys};
use crate::intake::{Intake, RequestIntake};
use crate::metrics::WorkerMetrics;
use crate::protocol::{self, events, ExecuteRequest, Packet, WireEvent, WorkflowDescriptor, WorkflowPacket};
use crate::publisher::{EventTransport, ResultsPublisher, ZmqPushTransport};
use crate::queue::{RedisQueue, RequestQueue};
use crate::registry::{SlotGuard, WorkflowRegistry};
use crate::subscriptions::{CaseLog, CaseLogger, SubscriptionCache};
use crate::workflow::{ExecutionStore, Invocation};

const SCHEDULER_QUANTUM: Duration = Duration::from_millis(100);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_POLL: Duration = Duration::from_millis(100);
const CONTROL_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const WRITER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Worker {
    registry: Arc<WorkflowRegistry>,
    subscriptions: Arc<SubscriptionCache>,
    metrics: Arc<WorkerMetrics>,
    store: Arc<dyn ExecutionStore>,
    case_logger: Arc<CaseLogger>,
    publisher: ResultsPublisher,
    writer_task: JoinHandle<()>,
    control_task: JoinHandle<()>,
    intake: RequestIntake,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Worker {
    /// Wire the worker against its real collaborators: the Redis request
    /// queue and the control/results sockets, all keyed from `keys_path`.
    pub async fn connect(
        config: &Config,
        store: Arc<dyn ExecutionStore>,
        case_log: Arc<dyn CaseLog>,
    ) -> Result<Self> {
        let keys = crypto::load_keys(&config.keys_path)
            .with_context(|| format!("loading key pair from {}", config.keys_path.display()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building queue HTTP client")?;
        let queue = Arc::new(RedisQueue::new(
            http,
            config.queue_url.clone(),
            config.queue_token.clone(),
            config.queue_key.clone(),
        ));

        let control = ZmqSubTransport::connect(&config.control_address)
            .await
            .with_context(|| format!("connecting control socket to {}", config.control_address))?;
        let results = ZmqPushTransport::connect(&config.results_address)
            .await
            .with_context(|| format!("connecting results socket to {}", config.results_address))?;

        Ok(Self::assemble(config, store, case_log, queue, control, results, keys))
    }

    /// Assemble from explicit parts. The test suite drives this directly
    /// with in-memory transports.
    pub fn assemble(
        config: &Config,
        store: Arc<dyn ExecutionStore>,
        case_log: Arc<dyn CaseLog>,
        queue: Arc<dyn RequestQueue>,
        control: impl ControlTransport + 'static,
        results: impl EventTransport + 'static,
        keys: TransportKeys,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let registry = WorkflowRegistry::new(config.capacity);
        let subscriptions = Arc::new(SubscriptionCache::default());
        let metrics = Arc::new(WorkerMetrics::default());
        let case_logger = Arc::new(CaseLogger::new(subscriptions.clone(), case_log));
        let identity = config.socket_identity();

        let (publisher, writer_task) = ResultsPublisher::start(
            results,
            Channel::new(&keys.secret, &keys.server_public, identity.clone()),
            metrics.clone(),
        );

        let receiver = ControlReceiver::new(
            registry.clone(),
            subscriptions.clone(),
            Channel::new(&keys.secret, &keys.server_public, identity),
            metrics.clone(),
            shutdown_rx.clone(),
            shutdown_tx.clone(),
        );
        let control_task = tokio::spawn(receiver.run(control));

        let intake = RequestIntake::new(
            queue,
            FrameCrypto::new(&keys.secret, &keys.server_public),
            metrics.clone(),
            shutdown_rx.clone(),
        );

        Self {
            registry,
            subscriptions,
            metrics,
            store,
            case_logger,
            publisher,
            writer_task,
            control_task,
            intake,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn registry(&self) -> Arc<WorkflowRegistry> {
        self.registry.clone()
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.metrics.clone()
    }

    pub fn subscriptions(&self) -> Arc<SubscriptionCache> {
        self.subscriptions.clone()
    }

    /// Handle for the signal path: sending `true` initiates shutdown. The
    /// flag is level-triggered, so repeated delivery is harmless.
    pub fn shutdown_handle(&self) -> Arc<watch::Sender<bool>> {
        self.shutdown_tx.clone()
    }

    /// Run the admission loop until shutdown, then drain. Returns the
    /// process exit code.
    pub async fn run(mut self) -> i32 {
        info!(capacity = self.registry.capacity(), "worker admission loop started");
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            if self.registry.at_capacity() {
                tokio::time::sleep(SCHEDULER_QUANTUM).await;
                continue;
            }
            match self.intake.next().await {
                Intake::Closed => break,
                Intake::Tick => continue,
                Intake::Request(request) => self.admit(request),
            }
        }
        self.shutdown().await
    }

    fn admit(&self, request: ExecuteRequest) {
        // Capacity was checked before the pop and only this loop reserves,
        // so reservation cannot fail; stay defensive anyway.
        let slot = match self.registry.try_reserve() {
            Ok(slot) => slot,
            Err(err) => {
                error!(
                    execution_id = %request.workflow_execution_id,
                    error = %err,
                    "slot reservation failed after capacity check, dropping request"
                );
                return;
            }
        };
        self.metrics.inc_requests_admitted();
        let ctx = DispatchContext {
            registry: self.registry.clone(),
            store: self.store.clone(),
            publisher: self.publisher.clone(),
            case_logger: self.case_logger.clone(),
            metrics: self.metrics.clone(),
        };
        tokio::spawn(dispatch(ctx, slot, request));
    }

    async fn shutdown(self) -> i32 {
        info!("shutdown requested, draining in-flight workflows");
        let _ = self.shutdown_tx.send(true);

        // Cancellation is cooperative: flag every live workflow and give the
        // interpreters a bounded window to reach a safe point.
        for workflow in self.registry.live_workflows() {
            workflow.abort();
        }
        let drained = wait_for_drain(&self.registry, DRAIN_TIMEOUT).await;
        if !drained {
            warn!(
                running = self.registry.len(),
                "drain timed out with workflows still live"
            );
        }

        let control_abort = self.control_task.abort_handle();
        if tokio::time::timeout(CONTROL_JOIN_TIMEOUT, self.control_task)
            .await
            .is_err()
        {
            warn!("control task did not stop in time, aborting it");
            control_abort.abort();
        }

        // Dropping the last publisher handle lets the writer drain and exit.
        drop(self.publisher);
        drop(self.intake);
        if tokio::time::timeout(WRITER_JOIN_TIMEOUT, self.writer_task)
            .await
            .is_err()
        {
            warn!("results writer did not drain in time");
        }

        info!(drained, "worker stopped");
        if drained {
            0
        } else {
            1
        }
    }
}

struct DispatchContext {
    registry: Arc<WorkflowRegistry>,
    store: Arc<dyn ExecutionStore>,
    publisher: ResultsPublisher,
    case_logger: Arc<CaseLogger>,
    metrics: Arc<WorkerMetrics>,
}

/// Dispatch body, one pool task per admitted request. The slot guard is held
/// for the whole body; dropping it on any path releases the slot.
async fn dispatch(ctx: DispatchContext, slot: SlotGuard, request: ExecuteRequest) {
    if let Err(err) = ctx.store.refresh().await {
        warn!(error = %format!("{err:#}"), "execution store refresh failed");
    }

    let workflow = match ctx.store.fetch_workflow(&request.workflow_id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => {
            warn!(workflow_id = %request.workflow_id, "workflow not found");
            ctx.metrics.inc_workflows_failed();
            publish_aborted(&ctx, &request, "workflow not found").await;
            return;
        }
        Err(err) => {
            error!(
                workflow_id = %request.workflow_id,
                error = %format!("{err:#}"),
                "execution store lookup failed"
            );
            ctx.metrics.inc_workflows_failed();
            publish_aborted(&ctx, &request, "execution store unavailable").await;
            return;
        }
    };

    if request.resume {
        match ctx.store.load_saved(&request.workflow_execution_id).await {
            Ok(Some(saved)) => {
                if let Err(err) = workflow.restore(&saved) {
                    error!(
                        execution_id = %request.workflow_execution_id,
                        error = %format!("{err:#}"),
                        "failed to restore saved workflow state"
                    );
                    ctx.metrics.inc_workflows_failed();
                    publish_aborted(&ctx, &request, "saved state could not be restored").await;
                    return;
                }
            }
            Ok(None) => {
                warn!(
                    execution_id = %request.workflow_execution_id,
                    "resume requested but no saved state exists"
                );
                ctx.metrics.inc_workflows_failed();
                publish_aborted(&ctx, &request, "no saved state for resume").await;
                return;
            }
            Err(err) => {
                error!(
                    execution_id = %request.workflow_execution_id,
                    error = %format!("{err:#}"),
                    "failed to load saved workflow state"
                );
                ctx.metrics.inc_workflows_failed();
                publish_aborted(&ctx, &request, "saved state unavailable").await;
                return;
            }
        }
    }

    if let Err(err) = ctx
        .registry
        .bind(&slot, workflow.clone(), &request.workflow_execution_id)
    {
        warn!(error = %err, "refusing to run duplicate execution");
        ctx.metrics.inc_workflows_failed();
        publish_aborted(&ctx, &request, "duplicate execution id").await;
        return;
    }

    let sink = Arc::new(SignalBridge::new(
        workflow.clone(),
        &request.workflow_execution_id,
        ctx.publisher.clone(),
        ctx.case_logger.clone(),
        ctx.store.clone(),
    ));
    let invocation = Invocation {
        execution_id: request.workflow_execution_id.clone(),
        start: request.start.clone(),
        start_arguments: request.start_arguments.clone(),
        resume: request.resume,
    };

    match workflow.execute(invocation, sink).await {
        Ok(()) => ctx.metrics.inc_workflows_completed(),
        Err(err) => {
            // The interpreter emits its own terminal event before failing;
            // nothing further goes on the wire from here.
            ctx.metrics.inc_workflows_failed();
            error!(
                execution_id = %request.workflow_execution_id,
                error = %format!("{err:#}"),
                "workflow execution failed"
            );
        }
    }
}

/// Aborted-workflow notice for requests that never reached `execute`.
async fn publish_aborted(ctx: &DispatchContext, request: &ExecuteRequest, reason: &str) {
    let data = serde_json::json!({ "status": "aborted", "reason": reason });
    ctx.case_logger
        .record(events::WORKFLOW_ABORTED, &request.workflow_id, Some(&data));
    ctx.publisher
        .publish(WireEvent {
            event_name: events::WORKFLOW_ABORTED.to_string(),
            packet: Packet::Workflow(WorkflowPacket {
                sender: WorkflowDescriptor {
                    name: String::new(),
                    id: request.workflow_id.clone(),
                    execution_id: request.workflow_execution_id.clone(),
                },
                additional_data: Some(protocol::json_text(&data)),
            }),
        })
        .await;
}

async fn wait_for_drain(registry: &WorkflowRegistry, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if registry.is_empty() {
            return true;
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
    registry.is_empty()
}
