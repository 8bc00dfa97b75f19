//! Interfaces to the workflow interpreter and the execution database
//!
//! The interpreter itself is an external subsystem; the worker sees it as an
//! opaque handle that executes, pauses, aborts, and snapshots. Execution
//! events flow back through an explicit per-dispatch `EventSink` rather than
//! a process-wide signal, so no global state maps a callback to its emitting
//! workflow.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{ActionSender, Argument};

/// Per-attempt execution parameters.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub execution_id: String,
    /// `None` resolves to the workflow's declared start node.
    pub start: Option<String>,
    pub start_arguments: Vec<Argument>,
    pub resume: bool,
}

/// Snapshot of a paused or awaiting-data workflow. The accumulator and
/// app-instance payloads are owned by the interpreter; the worker stores and
/// returns them opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedWorkflow {
    pub execution_id: String,
    pub accumulator: Value,
    pub app_instances: Value,
    pub saved_at: DateTime<Utc>,
}

impl SavedWorkflow {
    pub fn new(execution_id: impl Into<String>, accumulator: Value, app_instances: Value) -> Self {
        Self {
            execution_id: execution_id.into(),
            accumulator,
            app_instances,
            saved_at: Utc::now(),
        }
    }
}

/// A user-facing message emitted mid-execution.
#[derive(Debug, Clone)]
pub struct UserMessage {
    pub subject: String,
    pub body: Value,
    pub users: Vec<i64>,
    pub roles: Vec<String>,
    pub requires_reauth: bool,
}

/// Callback interface handed to the interpreter at dispatch. One sink per
/// execution; methods never return errors into the interpreter.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_workflow_event(&self, event: &str, data: Option<Value>);
    async fn on_action_event(&self, event: &str, sender: &ActionSender, data: Option<Value>);
    /// Console output from the running action. Sender attribution is resolved
    /// by the worker, not the interpreter hook.
    async fn on_log(&self, level: &str, message: &str);
    async fn on_send_message(&self, message: UserMessage);
    async fn on_branch_event(&self, event: &str, sender_id: &str, app_name: Option<String>);
}

/// Opaque interpreter handle for one workflow.
///
/// `pause` and `abort` are asynchronous requests: they set flags the
/// interpreter observes at its next safe point.
#[async_trait]
pub trait Workflow: Send + Sync {
    fn id(&self) -> String;
    fn name(&self) -> String;

    /// Run to completion, suspension, or abort, emitting events through
    /// `sink` in emission order.
    async fn execute(&self, invocation: Invocation, sink: Arc<dyn EventSink>) -> Result<()>;

    fn pause(&self);
    fn abort(&self);

    /// Rehydrate accumulator, per-branch counters, and the app-instance
    /// repository from a snapshot, ahead of a resumed `execute`.
    fn restore(&self, saved: &SavedWorkflow) -> Result<()>;

    /// Capture the state a future resume will restore.
    fn snapshot(&self, execution_id: &str) -> SavedWorkflow;

    /// The action currently executing, for console-log attribution.
    fn executing_action(&self) -> Option<ActionSender>;
}

/// The worker's view of the execution database.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Discard cached session state so fetched workflows reflect current rows.
    async fn refresh(&self) -> Result<()>;

    async fn fetch_workflow(&self, workflow_id: &str) -> Result<Option<Arc<dyn Workflow>>>;

    async fn load_saved(&self, execution_id: &str) -> Result<Option<SavedWorkflow>>;

    async fn save_snapshot(&self, snapshot: SavedWorkflow) -> Result<()>;
}

/// In-memory execution store. Backs the test suite and standalone runs;
/// deployments embed the worker as a library and supply their own store.
#[derive(Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<String, Arc<dyn Workflow>>>,
    saved: RwLock<HashMap<String, SavedWorkflow>>,
}

impl MemoryStore {
    pub fn register(&self, workflow: Arc<dyn Workflow>) {
        self.workflows.write().insert(workflow.id(), workflow);
    }

    pub fn insert_saved(&self, saved: SavedWorkflow) {
        self.saved.write().insert(saved.execution_id.clone(), saved);
    }

    pub fn saved(&self, execution_id: &str) -> Option<SavedWorkflow> {
        self.saved.read().get(execution_id).cloned()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_workflow(&self, workflow_id: &str) -> Result<Option<Arc<dyn Workflow>>> {
        Ok(self.workflows.read().get(workflow_id).cloned())
    }

    async fn load_saved(&self, execution_id: &str) -> Result<Option<SavedWorkflow>> {
        Ok(self.saved.read().get(execution_id).cloned())
    }

    async fn save_snapshot(&self, snapshot: SavedWorkflow) -> Result<()> {
        self.insert_saved(snapshot);
        Ok(())
    }
}
