//! Classification tables translating backend node identifiers and speaker
//! labels into display roles and trial phases.
//!
//! `role_for_node` is an ordered, first-match-wins classification over node
//! substrings. The ordering is a contract: a node like `defense_focus`
//! belongs to the defense, not the judge, because the defense check runs
//! first. Reordering the checks silently reclassifies roles.

use shared::domain::{ActiveRole, DisplayRole, TrialPhase};

/// Maps a backend node identifier to the trial phase it belongs to.
/// Unknown nodes return `None`; callers fall back to the event's own
/// phase hint.
pub fn node_phase(node: &str) -> Option<TrialPhase> {
    let phase = match node {
        "clerk_rules" | "judge_open" | "judge_check" | "right_notify" | "pros_indictment"
        | "defense_defense_object_control" | "defense_objection" => TrialPhase::Opening,
        "pros_question" | "defense_reply" | "defense_question_control" | "defense_question"
        | "pros_summary" | "defense_summary" | "judge_start_evidence" | "pros_evidence_decision"
        | "pros_show_evidence" | "defense_cross" | "judge_confirm" | "defense_evidence_control"
        | "defense_show_evidence" | "pros_cross" => TrialPhase::Investigation,
        "judge_start_debate" | "pros_statement" | "defense_self_statement" | "defense_statement"
        | "judge_summary" | "focus" | "pros_focus" | "defense_focus" | "pros_sumup"
        | "defense_sumup" | "defense_final_statement" => TrialPhase::Debate,
        "judge_verdict" => TrialPhase::Verdict,
        _ => return None,
    };
    Some(phase)
}

/// Classifies a node identifier into the execution-flow role it lights up.
/// Total over every string; `Standby` is the catch-all.
pub fn role_for_node(node: &str) -> ActiveRole {
    if node.contains("pros") || node.contains("prosecutor") {
        ActiveRole::Prosecutor
    } else if node.contains("defense") || node.contains("defendant") {
        ActiveRole::Defense
    } else if node.contains("judge") || node.contains("focus") || node.contains("verdict") {
        ActiveRole::Judge
    } else if node.contains("clerk") {
        ActiveRole::Clerk
    } else {
        ActiveRole::Standby
    }
}

/// Classifies a free-text speaker label by its title prefix. Labels with the
/// local-user prefix map to `User` so echoed-back input stays attributable;
/// anything unmatched or absent is `System`.
pub fn role_from_speaker(label: Option<&str>) -> DisplayRole {
    let Some(label) = label else {
        return DisplayRole::System;
    };
    if label.starts_with("书记员") {
        DisplayRole::Clerk
    } else if label.starts_with("审判长") || label.starts_with("法官") {
        DisplayRole::Judge
    } else if label.starts_with("公诉人") || label.starts_with("检察员") {
        DisplayRole::Prosecutor
    } else if label.starts_with("被告人")
        || label.starts_with("被告")
        || label.starts_with("辩护人")
        || label.starts_with("辩护代理人")
        || label.starts_with("辩护")
    {
        DisplayRole::Defense
    } else if label.starts_with("用户") || label == "User" {
        DisplayRole::User
    } else {
        DisplayRole::System
    }
}

const SPEAKER_TITLES: [&str; 5] = ["审判长", "公诉人", "被告人", "辩护人", "书记员"];

/// Recovers a speaker label for a message: an explicit non-empty name wins;
/// otherwise a leading `<title>…：` prefix embedded in the content is
/// captured; otherwise a generic "System".
pub fn speaker_label(content: &str, explicit: Option<&str>) -> String {
    if let Some(name) = explicit {
        if !name.is_empty() {
            return name.to_string();
        }
    }
    for title in SPEAKER_TITLES {
        let Some(rest) = content.strip_prefix(title) else {
            continue;
        };
        if let Some(idx) = rest.find(|c| c == '：' || c == ':') {
            return format!("{title}{}", &rest[..idx]);
        }
    }
    "System".to_string()
}

#[cfg(test)]
#[path = "tests/mapping_tests.rs"]
mod tests;
