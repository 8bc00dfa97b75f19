//! Signal bridge
//!
//! Execution-scoped fan-in: one bridge per dispatched workflow, constructed
//! at dispatch with the execution's descriptor and handle, and passed to the
//! interpreter as its event sink. Resolving "which workflow emitted this"
//! is therefore a field read, not a lookup keyed on thread identity.
//!
//! Snapshot persistence and case logging may fail; publication still happens.
//! Publication failures are counted and swallowed inside the publisher.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::protocol::{
    self, events, ActionPacket, ActionSender, GeneralPacket, GeneralSender, LogPacket, Packet,
    UserMessagePacket, WireEvent, WorkflowDescriptor, WorkflowPacket,
};
use crate::publisher::ResultsPublisher;
use crate::subscriptions::CaseLogger;
use crate::workflow::{EventSink, ExecutionStore, UserMessage, Workflow};

pub struct SignalBridge {
    workflow: Arc<dyn Workflow>,
    descriptor: WorkflowDescriptor,
    publisher: ResultsPublisher,
    case_logger: Arc<CaseLogger>,
    store: Arc<dyn ExecutionStore>,
}

impl SignalBridge {
    pub fn new(
        workflow: Arc<dyn Workflow>,
        execution_id: &str,
        publisher: ResultsPublisher,
        case_logger: Arc<CaseLogger>,
        store: Arc<dyn ExecutionStore>,
    ) -> Self {
        let descriptor = WorkflowDescriptor {
            name: workflow.name(),
            id: workflow.id(),
            execution_id: execution_id.to_string(),
        };
        Self {
            workflow,
            descriptor,
            publisher,
            case_logger,
            store,
        }
    }

    /// Events that park the workflow persist a snapshot before publication;
    /// that snapshot is what a future resume restores.
    fn is_checkpoint(event: &str) -> bool {
        event == events::WORKFLOW_PAUSED || event == events::TRIGGER_ACTION_AWAITING_DATA
    }

    async fn snapshot_if_checkpoint(&self, event: &str) {
        if !Self::is_checkpoint(event) {
            return;
        }
        let snapshot = self.workflow.snapshot(&self.descriptor.execution_id);
        if let Err(err) = self.store.save_snapshot(snapshot).await {
            warn!(
                execution_id = %self.descriptor.execution_id,
                error = %format!("{err:#}"),
                "failed to persist workflow snapshot"
            );
        }
    }

    async fn emit(&self, event: &str, sender_id: &str, data: Option<&Value>, packet: Packet) {
        self.case_logger.record(event, sender_id, data);
        self.publisher
            .publish(WireEvent {
                event_name: event.to_string(),
                packet,
            })
            .await;
    }
}

#[async_trait]
impl EventSink for SignalBridge {
    async fn on_workflow_event(&self, event: &str, data: Option<Value>) {
        self.snapshot_if_checkpoint(event).await;
        let packet = Packet::Workflow(WorkflowPacket {
            sender: self.descriptor.clone(),
            additional_data: data.as_ref().map(protocol::json_text),
        });
        self.emit(event, &self.descriptor.id, data.as_ref(), packet)
            .await;
    }

    async fn on_action_event(&self, event: &str, sender: &ActionSender, data: Option<Value>) {
        self.snapshot_if_checkpoint(event).await;
        let packet = Packet::Action(ActionPacket {
            sender: sender.clone(),
            workflow: self.descriptor.clone(),
            additional_data: data.as_ref().map(protocol::json_text),
        });
        self.emit(event, &sender.id, data.as_ref(), packet).await;
    }

    async fn on_log(&self, level: &str, message: &str) {
        // The log belongs to the action being executed, not the hook that
        // forwarded it.
        let action = self.workflow.executing_action().unwrap_or_default();
        let packet = Packet::Log(LogPacket {
            name: action.name,
            app_name: action.app_name,
            action_name: action.action_name,
            level: level.to_string(),
            message: message.to_string(),
            workflow: self.descriptor.clone(),
        });
        self.emit(events::CONSOLE_LOG, &action.id, None, packet).await;
    }

    async fn on_send_message(&self, message: UserMessage) {
        let UserMessage {
            subject,
            body,
            users,
            roles,
            requires_reauth,
        } = message;
        let packet = Packet::UserMessage(UserMessagePacket {
            subject,
            body: protocol::json_text(&body),
            users,
            roles,
            requires_reauth,
            workflow: self.descriptor.clone(),
        });
        self.emit(events::SEND_MESSAGE, &self.descriptor.id, None, packet)
            .await;
    }

    async fn on_branch_event(&self, event: &str, sender_id: &str, app_name: Option<String>) {
        let packet = Packet::General(GeneralPacket {
            sender: GeneralSender {
                id: sender_id.to_string(),
                app_name,
            },
            workflow: self.descriptor.clone(),
        });
        self.emit(event, sender_id, None, packet).await;
    }
}
