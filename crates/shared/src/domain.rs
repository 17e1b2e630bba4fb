use serde::{Deserialize, Serialize};

/// Transcript styling/grouping role, distinct from the backend's own role
/// vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayRole {
    System,
    User,
    Prosecutor,
    Defense,
    Judge,
    Clerk,
}

/// Node highlighted in the execution-flow view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveRole {
    #[default]
    Standby,
    Prosecutor,
    Defense,
    Judge,
    Clerk,
    Verdict,
}

/// Coarse trial stage shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialPhase {
    #[default]
    Preparing,
    Opening,
    Investigation,
    Debate,
    Verdict,
    Ended,
}

impl TrialPhase {
    /// The backend's label for this phase, as carried in `current_phase`
    /// hints and shown in the UI.
    pub fn label(self) -> &'static str {
        match self {
            TrialPhase::Preparing => "准备阶段",
            TrialPhase::Opening => "开庭阶段",
            TrialPhase::Investigation => "法庭调查",
            TrialPhase::Debate => "法庭辩论",
            TrialPhase::Verdict => "宣判阶段",
            TrialPhase::Ended => "已结束",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let phase = match label {
            "准备阶段" => TrialPhase::Preparing,
            "开庭阶段" => TrialPhase::Opening,
            "法庭调查" => TrialPhase::Investigation,
            "法庭辩论" => TrialPhase::Debate,
            "宣判阶段" => TrialPhase::Verdict,
            "已结束" => TrialPhase::Ended,
            _ => return None,
        };
        Some(phase)
    }
}

/// Kind of input an interrupt expects from the human operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Boolean,
    #[serde(rename = "string")]
    Text,
    Evidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceProvider {
    Prosecutor,
    Defendant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    pub name: String,
    pub content: String,
    pub provider: EvidenceProvider,
}

/// Per-session progress counters; overwritten wholesale by each event that
/// carries them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCounters {
    #[serde(default)]
    pub pros_question_rounds: u32,
    #[serde(default)]
    pub pros_evidence_rounds: u32,
    #[serde(default)]
    pub pros_focus_rounds: u32,
}

/// Case metadata handed to the backend with `start_trial`. Field names must
/// match the backend's case_info model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseInfo {
    #[serde(rename = "abstract")]
    pub summary: String,

    pub prosecutor_title: String,
    pub prosecutor_name: String,
    pub statement_charge: String,
    pub crime: String,

    pub defendant_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defendant_former_name: Option<String>,
    pub defendant_birthdate: String,
    pub defendant_birthplace: String,
    pub defendant_ethnicity: String,
    pub defendant_education: String,
    pub defendant_occupation: String,
    pub defendant_employer: String,
    pub defendant_residence: String,
    #[serde(rename = "defendant_ID_number")]
    pub defendant_id_number: String,
    pub defendant_legal_record: String,
    pub detention_date: String,
    pub indictment_date: String,
    pub attorney_name: String,

    pub court_name: String,
    pub judge_name: String,
    pub judge_name_2: String,
    pub clerk_name: String,
    pub case_id: String,
}
