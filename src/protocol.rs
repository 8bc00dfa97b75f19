//! Wire schemas and codec
//!
//! Three frame families cross the worker's boundary:
//! - inbound request frames (`ExecuteWorkflowMessage`, carried encrypted on
//!   the shared queue)
//! - inbound control frames (`ControlMessage`, broadcast to the fleet)
//! - outbound event frames (`WireEvent`, pushed to the results collector)
//!
//! Frames are bincode-encoded; union discrimination is the serde enum tag, so
//! an out-of-range tag is a decode error rather than a structural guess.
//! Free-form payload fields (`additional_data`, message bodies, argument
//! values) travel as JSON text inside the binary frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;

/// Canonical execution event names. The worker treats a handful specially
/// (snapshot checkpoints, console-log attribution); everything else passes
/// through opaquely.
pub mod events {
    pub const WORKFLOW_START: &str = "WorkflowStart";
    pub const WORKFLOW_SHUTDOWN: &str = "WorkflowShutdown";
    pub const WORKFLOW_PAUSED: &str = "WorkflowPaused";
    pub const WORKFLOW_ABORTED: &str = "WorkflowAborted";
    pub const TRIGGER_ACTION_AWAITING_DATA: &str = "TriggerActionAwaitingData";
    pub const ACTION_STARTED: &str = "ActionStarted";
    pub const ACTION_EXECUTION_SUCCESS: &str = "ActionExecutionSuccess";
    pub const ACTION_EXECUTION_ERROR: &str = "ActionExecutionError";
    pub const CONSOLE_LOG: &str = "ConsoleLog";
    pub const SEND_MESSAGE: &str = "SendMessage";
}

// ═══════════════════════════════════════════════════════════════════════════
// Inbound: execution requests
// ═══════════════════════════════════════════════════════════════════════════

/// Wire form of one execution request, as produced by the scheduler side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteWorkflowMessage {
    pub workflow_id: String,
    pub workflow_execution_id: String,
    pub start: Option<String>,
    pub arguments: Vec<WireArgument>,
    pub resume: bool,
}

/// Wire form of an argument: all three payload fields are strings; non-string
/// values are JSON-encoded by the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireArgument {
    pub name: String,
    pub value: Option<String>,
    pub reference: Option<String>,
    pub selection: Option<String>,
}

/// A start argument after intake normalization: the value is materialized
/// back into a JSON value.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub value: Option<Value>,
    pub reference: Option<String>,
    pub selection: Option<String>,
}

impl Argument {
    /// Decode the wire form. The name must be non-empty and at least one of
    /// value/reference/selection must be set. Values that are not valid JSON
    /// text are kept as plain strings, matching the producer's fallback.
    pub fn from_wire(wire: WireArgument) -> Result<Self, CodecError> {
        if wire.name.is_empty() {
            return Err(CodecError::UnnamedArgument);
        }
        if wire.value.is_none() && wire.reference.is_none() && wire.selection.is_none() {
            return Err(CodecError::EmptyArgument(wire.name));
        }
        let value = wire
            .value
            .map(|raw| serde_json::from_str(&raw).unwrap_or(Value::String(raw)));
        Ok(Self {
            name: wire.name,
            value,
            reference: wire.reference,
            selection: wire.selection,
        })
    }

    /// Encode back to the wire form. Strings pass through unchanged; anything
    /// else is JSON-serialized, falling back to its display form rather than
    /// dropping the argument.
    pub fn to_wire(&self) -> WireArgument {
        WireArgument {
            name: self.name.clone(),
            value: self.value.as_ref().map(encode_argument_value),
            reference: self.reference.clone(),
            selection: self.selection.clone(),
        }
    }
}

fn encode_argument_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// One unit of admitted work, immutable once constructed.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub workflow_id: String,
    pub workflow_execution_id: String,
    /// `None` means "the workflow's declared start node".
    pub start: Option<String>,
    pub start_arguments: Vec<Argument>,
    pub resume: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
// Inbound: control plane
// ═══════════════════════════════════════════════════════════════════════════

/// Control-plane broadcast. Every worker receives every message and filters
/// locally by execution id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage {
    Workflow(WorkflowControl),
    Case(CaseControl),
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowControlKind {
    Pause,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowControl {
    pub kind: WorkflowControlKind,
    pub workflow_execution_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseControlKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseControl {
    pub kind: CaseControlKind,
    pub case_id: String,
    pub subscriptions: Vec<Subscription>,
}

/// A sender id and the event names an operator wants recorded for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub events: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Outbound: execution events
// ═══════════════════════════════════════════════════════════════════════════

/// One published execution event: a top-level event name plus a packet whose
/// shape depends on the emitting element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub event_name: String,
    pub packet: Packet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    Workflow(WorkflowPacket),
    Action(ActionPacket),
    UserMessage(UserMessagePacket),
    Log(LogPacket),
    General(GeneralPacket),
}

/// Identity of the workflow an event belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    pub name: String,
    pub id: String,
    pub execution_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPacket {
    pub sender: WorkflowDescriptor,
    /// JSON text, present iff the event carried data.
    pub additional_data: Option<String>,
}

/// Identity of the action that emitted an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSender {
    pub name: String,
    pub id: String,
    pub execution_id: String,
    pub app_name: String,
    pub action_name: String,
    /// Signed on the wire; −1 when the action is not bound to a device.
    pub device_id: i64,
    pub arguments: Vec<WireArgument>,
}

pub const NO_DEVICE: i64 = -1;

impl Default for ActionSender {
    fn default() -> Self {
        Self {
            name: String::new(),
            id: String::new(),
            execution_id: String::new(),
            app_name: String::new(),
            action_name: String::new(),
            device_id: NO_DEVICE,
            arguments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPacket {
    pub sender: ActionSender,
    pub workflow: WorkflowDescriptor,
    pub additional_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessagePacket {
    pub subject: String,
    /// JSON text.
    pub body: String,
    pub users: Vec<i64>,
    pub roles: Vec<String>,
    pub requires_reauth: bool,
    pub workflow: WorkflowDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPacket {
    pub name: String,
    pub app_name: String,
    pub action_name: String,
    /// Stringified even when the origin level was numeric.
    pub level: String,
    pub message: String,
    pub workflow: WorkflowDescriptor,
}

/// Branch / condition / transform events carry only the element id and, when
/// the element has one, an app name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralSender {
    pub id: String,
    pub app_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralPacket {
    pub sender: GeneralSender,
    pub workflow: WorkflowDescriptor,
}

// ═══════════════════════════════════════════════════════════════════════════
// Codec entry points
// ═══════════════════════════════════════════════════════════════════════════

/// Decode and normalize one decrypted request frame.
pub fn decode_request(bytes: &[u8]) -> Result<ExecuteRequest, CodecError> {
    let message: ExecuteWorkflowMessage = bincode::deserialize(bytes)?;
    let start_arguments = message
        .arguments
        .into_iter()
        .map(Argument::from_wire)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ExecuteRequest {
        workflow_id: message.workflow_id,
        workflow_execution_id: message.workflow_execution_id,
        start: message.start.filter(|s| !s.is_empty()),
        start_arguments,
        resume: message.resume,
    })
}

pub fn encode_request(message: &ExecuteWorkflowMessage) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(message).map_err(CodecError::Encode)
}

pub fn decode_control(bytes: &[u8]) -> Result<ControlMessage, CodecError> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn encode_control(message: &ControlMessage) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(message).map_err(CodecError::Encode)
}

pub fn encode_event(event: &WireEvent) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(event).map_err(CodecError::Encode)
}

pub fn decode_event(bytes: &[u8]) -> Result<WireEvent, CodecError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Wire form of free-form event data: deterministic JSON text.
pub fn json_text(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}
