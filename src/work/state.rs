use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkState {
    NotWorking,
    Working,
    Paused,
    /// Only ever a transition target; stored as `NotWorking`.
    Finished,
}

impl Default for WorkState {
    fn default() -> Self {
        WorkState::NotWorking
    }
}

impl WorkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkState::NotWorking => "NOT_WORKING",
            WorkState::Working => "WORKING",
            WorkState::Paused => "PAUSED",
            WorkState::Finished => "FINISHED",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            WorkState::NotWorking | WorkState::Finished => "🏠",
            WorkState::Working => "⚡",
            WorkState::Paused => "☕",
        }
    }

    /// The state a transition into `self` actually rests in.
    pub fn normalized(self) -> Self {
        match self {
            WorkState::Finished => WorkState::NotWorking,
            other => other,
        }
    }
}

impl fmt::Display for WorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const START_WORK: &str = "Start Work";
pub const START_BREAK: &str = "Start Break";
pub const RETURN_FROM_BREAK: &str = "Return from Break";
pub const FINISH_WORK: &str = "Finish Work";

/// An edge of the transition graph plus the portal control that performs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkAction {
    pub label: String,
    pub button_text: String,
    pub button_id: String,
    pub next_state: WorkState,
}

impl WorkAction {
    /// Identity for validation: button identifiers are deliberately ignored.
    pub fn same_edge(&self, other: &WorkAction) -> bool {
        self.label == other.label && self.next_state == other.next_state
    }
}

struct ActionTemplate {
    label: &'static str,
    button_text: &'static str,
    button_id: &'static str,
    next_state: WorkState,
}

impl ActionTemplate {
    fn to_action(&self) -> WorkAction {
        WorkAction {
            label: self.label.to_string(),
            button_text: self.button_text.to_string(),
            button_id: self.button_id.to_string(),
            next_state: self.next_state,
        }
    }
}

const BEGIN_TEXT: &str = "Mobiles Arbeiten beg";
const END_TEXT: &str = "Mobiles Arbeiten end";
const BREAK_TEXT: &str = "Pause Mobiles Arbeit";

const NOT_WORKING_ACTIONS: &[ActionTemplate] = &[ActionTemplate {
    label: START_WORK,
    button_text: BEGIN_TEXT,
    button_id: "TerminalButton4",
    next_state: WorkState::Working,
}];

const WORKING_ACTIONS: &[ActionTemplate] = &[
    ActionTemplate {
        label: START_BREAK,
        button_text: BREAK_TEXT,
        button_id: "TerminalButton6",
        next_state: WorkState::Paused,
    },
    ActionTemplate {
        label: FINISH_WORK,
        button_text: END_TEXT,
        button_id: "TerminalButton5",
        next_state: WorkState::Finished,
    },
];

const PAUSED_ACTIONS: &[ActionTemplate] = &[
    ActionTemplate {
        label: RETURN_FROM_BREAK,
        button_text: BEGIN_TEXT,
        button_id: "TerminalButton4",
        next_state: WorkState::Working,
    },
    ActionTemplate {
        label: FINISH_WORK,
        button_text: END_TEXT,
        button_id: "TerminalButton5",
        next_state: WorkState::Finished,
    },
];

fn templates(state: WorkState) -> &'static [ActionTemplate] {
    match state {
        WorkState::NotWorking => NOT_WORKING_ACTIONS,
        WorkState::Working => WORKING_ACTIONS,
        WorkState::Paused => PAUSED_ACTIONS,
        WorkState::Finished => &[],
    }
}

/// Built-in actions for `state`, with default button identifiers.
pub fn default_actions(state: WorkState) -> Vec<WorkAction> {
    templates(state).iter().map(ActionTemplate::to_action).collect()
}

/// Built-in action from `state` whose target is `next_state`.
pub fn default_action_to(state: WorkState, next_state: WorkState) -> Option<WorkAction> {
    templates(state)
        .iter()
        .find(|template| template.next_state == next_state)
        .map(ActionTemplate::to_action)
}

/// Formats milliseconds as `"{hours}h {minutes}m"`, truncating seconds.
pub fn format_duration(ms: u64) -> String {
    let hours = ms / (1000 * 60 * 60);
    let minutes = (ms % (1000 * 60 * 60)) / (1000 * 60);
    format!("{hours}h {minutes}m")
}
