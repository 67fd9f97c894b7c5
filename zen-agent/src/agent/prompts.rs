//! Prompt builders for the agent loop and the awakening pipeline.

use crate::message::{ChatMessage, MessageRole};
use crate::store::{FailureEntry, KarmaEntry};

use super::state::{Delta, RunState};

/// Instruction injected into DECIDE after a tanha loop was detected.
pub const ALTERNATIVE_APPROACH: &str =
    "IMPORTANT: the same action keeps failing the same way. Do not repeat it; \
     try an alternative approach or a different tool.";

/// The system message a run (or a Context Reset) starts from.
#[must_use]
pub fn system(state: &RunState, carried_failures: &[FailureEntry]) -> String {
    let mut out = String::new();
    out.push_str("You are an autonomous agent working toward a goal.\n\n");
    out.push_str(&format!("Goal: {}\n", state.goal.description));
    if let Some(criteria) = &state.goal.success_criteria {
        out.push_str(&format!("Success criteria: {criteria}\n"));
    }
    let remaining = &state.milestones[state.current_milestone_index.min(state.milestones.len())..];
    if !remaining.is_empty() {
        out.push_str("\nRemaining milestones:\n");
        for milestone in remaining {
            out.push_str(&format!("- {}\n", milestone.description));
        }
    }
    if !carried_failures.is_empty() {
        out.push_str("\nLessons from earlier in this run:\n");
        for failure in carried_failures {
            out.push_str(&format!("- {} (when: {})\n", failure.proverb, failure.condition));
        }
    }
    out
}

/// The observe prompt: goal, recent events, memory hints.
#[must_use]
pub fn observe(state: &RunState, history: &[ChatMessage], hints: &[String]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Goal: {}\n", state.goal.description));
    if let Some(milestone) = state.current_milestone() {
        out.push_str(&format!("Current milestone: {}\n", milestone.description));
    }
    if let Some(delta) = &state.delta {
        out.push_str(&format!(
            "Previous progress: {:.2}, gaps: {}\n",
            delta.progress,
            delta.gaps.join("; ")
        ));
    }

    let recent: Vec<&ChatMessage> = history
        .iter()
        .filter(|m| matches!(m.role, MessageRole::Tool | MessageRole::Assistant))
        .rev()
        .take(3)
        .collect();
    if !recent.is_empty() {
        out.push_str("\nRecent events (newest first):\n");
        for message in recent {
            let mut line = message.content.replace('\n', " ");
            if line.len() > 200 {
                line.truncate(200);
            }
            out.push_str(&format!("- [{}] {}\n", message.role.as_str(), line));
        }
    }

    if !hints.is_empty() {
        out.push_str("\nContext:\n");
        for hint in hints {
            out.push_str(&format!("- {hint}\n"));
        }
    }

    out.push_str(
        "\nAssess progress toward the current milestone. Reply with JSON only:\n\
         {\"description\": \"what changed\", \"progress\": 0.0, \"gaps\": [\"...\"], \
         \"isComplete\": false, \"sufferingDelta\": 0.0, \"egoNoise\": 0.0}\n",
    );
    out
}

/// One repair attempt for invalid structured output.
#[must_use]
pub fn repair(raw: &str) -> String {
    format!(
        "The following reply was supposed to be a single JSON object but is \
         invalid. Output the corrected JSON object and nothing else.\n\n{raw}"
    )
}

/// The decision prompt appended to the chat before tool selection.
#[must_use]
pub fn decide(
    delta: &Delta,
    fragments: &[String],
    alternative_needed: bool,
    strategies: Option<&[String]>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Progress is at {:.2}. Gaps: {}.\n",
        delta.progress,
        if delta.gaps.is_empty() { "none".to_owned() } else { delta.gaps.join("; ") }
    ));
    if let Some(strategies) = strategies
        && !strategies.is_empty()
    {
        out.push_str("\nConsider only these strategies:\n");
        for strategy in strategies {
            out.push_str(&format!("- {strategy}\n"));
        }
    }
    for fragment in fragments {
        out.push('\n');
        out.push_str(fragment);
        out.push('\n');
    }
    if alternative_needed {
        out.push('\n');
        out.push_str(ALTERNATIVE_APPROACH);
        out.push('\n');
    }
    out.push_str(
        "\nChoose the single best tool call to close the gaps, or answer in \
         plain text if the goal is already achieved.",
    );
    out
}

/// Awakening stage 1: investigate candidate strategies.
#[must_use]
pub fn investigation(state: &RunState, delta: &Delta, wisdom: &[String]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Goal: {}\nProgress: {:.2}\nGaps: {}\n",
        state.goal.description,
        delta.progress,
        delta.gaps.join("; ")
    ));
    if !wisdom.is_empty() {
        out.push_str("\nAccumulated wisdom:\n");
        for line in wisdom {
            out.push_str(&format!("- {line}\n"));
        }
    }
    out.push_str(
        "\nInvestigate: list candidate strategies for the next step. Reply \
         with JSON only: {\"hypotheses\": [\"...\"]}\n",
    );
    out
}

/// Awakening stage 2: filter ego-driven hypotheses.
#[must_use]
pub fn mindfulness(hypotheses: &[String]) -> String {
    let list: Vec<String> = hypotheses.iter().map(|h| format!("- {h}")).collect();
    format!(
        "Candidate strategies:\n{}\n\nWhich of these are driven by craving \
         or aversion rather than the goal itself? Reply with JSON only:\n\
         {{\"filtered\": [\"...\"], \"removed\": [\"...\"], \"reasoning\": \"...\"}}\n",
        list.join("\n")
    )
}

/// Causal-analysis prompt over two consecutive failures.
#[must_use]
pub fn causal(earlier: &KarmaEntry, later: &KarmaEntry) -> String {
    format!(
        "Two failures happened in consecutive steps.\n\
         Earlier: {} (when: {})\n\
         Later: {} (when: {})\n\n\
         Are they causally linked? Reply with JSON only:\n\
         {{\"isCausal\": false, \"strength\": 0.0, \"reasoning\": \"...\"}}\n",
        earlier.proverb, earlier.condition, later.proverb, later.condition
    )
}
