use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{CaseInfo, EvidenceItem, InputKind, RoundCounters},
    error::BackendError,
};

/// Outbound envelope. `user_input` carries the thread id at the envelope
/// level, which is why this enum is internally tagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    StartTrial { data: StartTrialPayload },
    UserInput { thread_id: String, data: UserInputPayload },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTrialPayload {
    pub case_info: CaseInfo,
    pub evidence_list: Vec<EvidenceItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInputPayload {
    pub interrupt_node: String,
    pub input: UserInput,
}

/// The three input shapes an interrupt can ask for; serialized bare on the
/// wire (boolean, string, or the evidence-submission object).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserInput {
    Decision(bool),
    Text(String),
    Evidence(EvidenceSubmission),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSubmission {
    #[serde(default)]
    pub current_evidence: Vec<EvidenceItem>,
    pub messages: String,
}

/// Inbound envelope `{ "type": ..., "data": ... }`. Frames that do not
/// deserialize into one of these shapes are dropped by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionCreated(SessionCreatedData),
    NodeExecuted(NodeExecutedData),
    InterruptRequest(InterruptRequestData),
    TrialCompleted(TrialCompletedData),
    Error(BackendError),
    Pong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreatedData {
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutedData {
    pub node_name: String,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rounds: Option<RoundCounters>,
    /// Raw message entries; individually validated by the session so one
    /// malformed entry cannot sink the whole event.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
    /// Per-node state delta, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_delta: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Human,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptRequestData {
    pub node_name: String,
    pub input_type: InputKind,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Opaque final snapshot; the client surfaces completion but never inspects
/// the payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrialCompletedData {
    #[serde(default)]
    pub final_state: Value,
}
