//! Session state machine: applies the inbound event stream one event at a
//! time and produces the next observable state. Every apply method is
//! synchronous, never panics, and reports precondition violations through
//! the diagnostic log instead of erroring across the public boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    domain::{ActiveRole, DisplayRole, EvidenceItem, RoundCounters, TrialPhase},
    error::BackendError,
    protocol::{
        ClientRequest, InterruptRequestData, NodeExecutedData, NodeMessage, ServerEvent,
        SessionCreatedData, TrialCompletedData, UserInput, UserInputPayload,
    },
};
use std::collections::VecDeque;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{dedup::DedupLedger, mapping};

pub const INITIAL_NOTICE: &str = "系统已就绪。请配置案件信息并开始庭审。";
const FALLBACK_ATTORNEY: &str = "辩护代理人";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub role: DisplayRole,
    pub display_name: String,
    pub content: String,
    pub is_self: bool,
    pub timestamp: DateTime<Utc>,
    pub origin_node: Option<String>,
}

/// Observable state change, broadcast to presentation after each applied
/// event or local command.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected { thread_id: String },
    Disconnected,
    TranscriptAppended(TranscriptEntry),
    AwaitingInput(InterruptRequestData),
    ProgressChanged { phase: TrialPhase, progress: f64 },
    TrialEnded,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub connection_status: ConnectionStatus,
    pub session_id: Option<String>,
    pub thread_id: Option<String>,
    pub current_phase: TrialPhase,
    pub rounds: RoundCounters,
    pub active_speaker: String,
    pub active_role: ActiveRole,
    pub pending_interrupt: Option<InterruptRequestData>,
    pub last_interrupt: Option<InterruptRequestData>,
    pub progress_percent: f64,
    pub focus_points: Vec<String>,
    pub evidence_list: Vec<EvidenceItem>,
    pub transcript: Vec<TranscriptEntry>,
    /// Diagnostic lines, newest first.
    pub log: VecDeque<String>,
    /// Role the human operator plays; messages attributed to it (or echoed
    /// back under a user label) are subject to deduplication.
    pub operator_role: DisplayRole,
    pub attorney_name: String,
    #[serde(skip)]
    dedup: DedupLedger,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::with_operator(DisplayRole::Defense)
    }

    pub fn with_operator(operator_role: DisplayRole) -> Self {
        let mut state = Self {
            connection_status: ConnectionStatus::Disconnected,
            session_id: None,
            thread_id: None,
            current_phase: TrialPhase::Preparing,
            rounds: RoundCounters::default(),
            active_speaker: String::new(),
            active_role: ActiveRole::Standby,
            pending_interrupt: None,
            last_interrupt: None,
            progress_percent: 0.0,
            focus_points: Vec::new(),
            evidence_list: Vec::new(),
            transcript: Vec::new(),
            log: VecDeque::new(),
            operator_role,
            attorney_name: String::new(),
            dedup: DedupLedger::default(),
        };
        state.push_entry(DisplayRole::System, "System", INITIAL_NOTICE, false, None);
        state
    }

    /// True iff an interrupt is outstanding; derived so it can never
    /// desynchronize from `pending_interrupt`.
    pub fn is_awaiting_input(&self) -> bool {
        self.pending_interrupt.is_some()
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        self.log
            .push_front(format!("[{}] {}", Utc::now().format("%H:%M:%S"), line.into()));
    }

    fn push_entry(
        &mut self,
        role: DisplayRole,
        name: impl Into<String>,
        content: impl Into<String>,
        is_self: bool,
        origin_node: Option<String>,
    ) -> TranscriptEntry {
        let entry = TranscriptEntry {
            id: Uuid::new_v4(),
            role,
            display_name: name.into(),
            content: content.into(),
            is_self,
            timestamp: Utc::now(),
            origin_node,
        };
        self.transcript.push(entry.clone());
        entry
    }

    fn attorney_display(&self) -> &str {
        if self.attorney_name.is_empty() {
            FALLBACK_ATTORNEY
        } else {
            &self.attorney_name
        }
    }

    /// Restores every field to its initial value and empties the ledger.
    /// The operator role is configuration, not session state, and survives.
    pub fn reset(&mut self) {
        *self = Self::with_operator(self.operator_role);
    }

    pub fn begin_connecting(&mut self) {
        self.connection_status = ConnectionStatus::Connecting;
        self.push_log("establishing connection...");
    }

    pub fn mark_disconnected(&mut self) -> Vec<SessionEvent> {
        if self.connection_status == ConnectionStatus::Disconnected {
            return Vec::new();
        }
        self.connection_status = ConnectionStatus::Disconnected;
        self.session_id = None;
        self.thread_id = None;
        self.active_role = ActiveRole::Standby;
        self.push_log("disconnected");
        vec![SessionEvent::Disconnected]
    }

    pub fn apply_server_event(&mut self, event: ServerEvent) -> Vec<SessionEvent> {
        match event {
            ServerEvent::SessionCreated(data) => self.apply_session_created(data),
            ServerEvent::NodeExecuted(data) => self.apply_node_executed(data),
            ServerEvent::InterruptRequest(data) => self.apply_interrupt_request(data),
            ServerEvent::TrialCompleted(data) => self.apply_trial_completed(data),
            ServerEvent::Error(error) => self.apply_error(error),
            // Keepalive acknowledgment; nothing to update.
            ServerEvent::Pong => Vec::new(),
        }
    }

    fn apply_session_created(&mut self, data: SessionCreatedData) -> Vec<SessionEvent> {
        self.dedup.clear();
        self.session_id = Some(data.thread_id.clone());
        self.thread_id = Some(data.thread_id.clone());
        self.connection_status = ConnectionStatus::Connected;
        self.active_role = ActiveRole::Judge;
        let short: String = data.thread_id.chars().take(8).collect();
        self.push_log(format!("session created: {short}..."));
        let entry = self.push_entry(
            DisplayRole::System,
            "System",
            "已连接到法庭会话，庭审即将开始...",
            false,
            None,
        );
        vec![
            SessionEvent::Connected {
                thread_id: data.thread_id,
            },
            SessionEvent::TranscriptAppended(entry),
        ]
    }

    fn apply_node_executed(&mut self, data: NodeExecutedData) -> Vec<SessionEvent> {
        self.push_log(format!(
            "node executed: {} ({:.1}%)",
            data.node_name, data.progress
        ));

        self.progress_percent = data.progress;
        if let Some(hint) = &data.current_phase {
            self.current_phase = mapping::node_phase(&data.node_name)
                .or_else(|| TrialPhase::from_label(hint))
                .unwrap_or(self.current_phase);
        }
        if let Some(focus) = data.focus {
            self.focus_points = focus;
        }
        if let Some(rounds) = data.rounds {
            self.rounds = rounds;
        }
        self.active_role = mapping::role_for_node(&data.node_name);
        self.active_speaker = data.node_name.clone();
        self.pending_interrupt = None;

        let mut events = vec![SessionEvent::ProgressChanged {
            phase: self.current_phase,
            progress: self.progress_percent,
        }];

        for raw in &data.messages {
            let message: NodeMessage = match serde_json::from_value(raw.clone()) {
                Ok(message) => message,
                Err(err) => {
                    warn!(node = %data.node_name, "skipping malformed message entry: {err}");
                    continue;
                }
            };
            let explicit = message.name.as_deref().filter(|name| !name.is_empty());
            let role = mapping::role_from_speaker(explicit);
            let name = mapping::speaker_label(&message.content, explicit);

            if role == self.operator_role || role == DisplayRole::User {
                let raw_name = explicit.unwrap_or("");
                let suppressed = self
                    .dedup
                    .should_suppress(raw_name, &message.content, data.message_count)
                    || (!raw_name.is_empty()
                        && self.dedup.should_suppress("", &message.content, data.message_count));
                if suppressed {
                    debug!(node = %data.node_name, "suppressing re-delivered message from '{raw_name}'");
                    continue;
                }
                self.dedup.record(raw_name, &message.content, data.message_count);
            }

            let entry = self.push_entry(
                role,
                name,
                message.content,
                false,
                Some(data.node_name.clone()),
            );
            events.push(SessionEvent::TranscriptAppended(entry));
        }

        events
    }

    fn apply_interrupt_request(&mut self, data: InterruptRequestData) -> Vec<SessionEvent> {
        self.push_log(format!(
            "interrupt requested by {} ({:?})",
            data.node_name, data.input_type
        ));
        self.active_role = mapping::role_for_node(&data.node_name);
        self.last_interrupt = Some(data.clone());
        let entry = self.push_entry(DisplayRole::System, "System", data.prompt.clone(), false, None);
        self.pending_interrupt = Some(data.clone());
        vec![
            SessionEvent::AwaitingInput(data),
            SessionEvent::TranscriptAppended(entry),
        ]
    }

    fn apply_trial_completed(&mut self, _data: TrialCompletedData) -> Vec<SessionEvent> {
        self.push_log("trial completed");
        self.current_phase = TrialPhase::Ended;
        self.active_role = ActiveRole::Verdict;
        self.progress_percent = 100.0;
        self.pending_interrupt = None;
        let entry = self.push_entry(DisplayRole::System, "System", "🎉 庭审已完成！", false, None);
        vec![
            SessionEvent::ProgressChanged {
                phase: self.current_phase,
                progress: self.progress_percent,
            },
            SessionEvent::TrialEnded,
            SessionEvent::TranscriptAppended(entry),
        ]
    }

    fn apply_error(&mut self, error: BackendError) -> Vec<SessionEvent> {
        self.push_log(format!("error {}: {}", error.code, error.message));
        let entry = self.push_entry(
            DisplayRole::System,
            "Error",
            format!("❌ 错误: {}", error.message),
            false,
            None,
        );
        let mut events = vec![SessionEvent::TranscriptAppended(entry)];
        if error.is_transport() {
            self.connection_status = ConnectionStatus::Disconnected;
            self.active_role = ActiveRole::Standby;
            events.push(SessionEvent::Disconnected);
        }
        events
    }

    /// Validates the respond preconditions and builds the outbound command.
    /// Violations are logged and yield `None`; they never error outward.
    pub fn build_user_input(&mut self, input: UserInput) -> Option<ClientRequest> {
        let Some(pending) = &self.pending_interrupt else {
            self.push_log("no active interrupt to respond to");
            return None;
        };
        let interrupt_node = pending.node_name.clone();
        let Some(thread_id) = self.thread_id.clone() else {
            self.push_log("cannot respond: no active session thread");
            return None;
        };
        Some(ClientRequest::UserInput {
            thread_id,
            data: UserInputPayload {
                interrupt_node,
                input,
            },
        })
    }

    /// Applies the local effects of a successfully dispatched response: the
    /// optimistic transcript entry, the fingerprint aliases that suppress
    /// the echo-back under any attributed name, and the cleared slot.
    pub fn commit_response(&mut self, input: &UserInput) -> Vec<SessionEvent> {
        let display = match input {
            UserInput::Decision(true) => "✅ 是 / 有异议".to_string(),
            UserInput::Decision(false) => "❌ 否 / 无异议".to_string(),
            UserInput::Text(text) => text.clone(),
            UserInput::Evidence(submission) if !submission.messages.is_empty() => {
                submission.messages.clone()
            }
            UserInput::Evidence(_) => "已提交证据".to_string(),
        };

        let attorney = self.attorney_display().to_string();
        let user_label = format!("用户 ({attorney})");
        self.dedup.record(&user_label, &display, None);
        self.dedup.record("", &display, None);
        self.dedup.record(FALLBACK_ATTORNEY, &display, None);
        self.dedup
            .record(&format!("{FALLBACK_ATTORNEY}{attorney}"), &display, None);

        if let Some(pending) = &self.pending_interrupt {
            let node = pending.node_name.clone();
            self.push_log(format!("responded to interrupt: {node}"));
        }
        let entry = self.push_entry(self.operator_role, user_label, display, true, None);
        self.pending_interrupt = None;
        vec![SessionEvent::TranscriptAppended(entry)]
    }

    /// Restores the most recently cleared interrupt so the user can submit
    /// again. A no-op (log only) when nothing was ever cleared.
    pub fn retry(&mut self) -> Vec<SessionEvent> {
        let Some(last) = self.last_interrupt.clone() else {
            self.push_log("nothing to retry");
            return Vec::new();
        };
        self.active_role = mapping::role_for_node(&last.node_name);
        self.pending_interrupt = Some(last.clone());
        self.push_log("retry requested; previous interrupt restored");
        let entry = self.push_entry(
            DisplayRole::System,
            "System",
            "⚠️ 系统提示：您已触发【重试】操作，正在恢复上一次的输入请求，请重新提交...",
            false,
            None,
        );
        vec![
            SessionEvent::AwaitingInput(last),
            SessionEvent::TranscriptAppended(entry),
        ]
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
