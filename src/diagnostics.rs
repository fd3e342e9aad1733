use std::time::Duration;

use log::{Level, log};

use crate::history::History;
use crate::store::{Action, State};

pub const DEFAULT_SLOW_REDUCTION_THRESHOLD: Duration = Duration::from_millis(20);

const MAX_LOGGED_CHARS: usize = 120;

/// One top-level `State` field that differs between two states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub before: String,
    pub after: String,
}

/// Shortens `text` to a loggable length, marking the cut with an ellipsis.
pub fn ellipsize(text: &str) -> String {
    if text.chars().count() <= MAX_LOGGED_CHARS {
        return text.to_string();
    }
    let mut shortened = text.chars().take(MAX_LOGGED_CHARS - 1).collect::<String>();
    shortened.push('…');
    shortened
}

/// Compares the top-level fields of two states.
pub fn shallow_diff(previous: &State, next: &State) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if previous.config != next.config {
        changes.push(FieldChange {
            field: "config",
            before: ellipsize(&format!("{:?}", previous.config)),
            after: ellipsize(&format!("{:?}", next.config)),
        });
    }
    if previous.history != next.history {
        changes.push(FieldChange {
            field: "history",
            before: summarize_history(previous.history.as_ref()),
            after: summarize_history(next.history.as_ref()),
        });
    }
    if previous.graph_config != next.graph_config {
        changes.push(FieldChange {
            field: "graph_config",
            before: ellipsize(&format!("{:?}", previous.graph_config)),
            after: ellipsize(&format!("{:?}", next.graph_config)),
        });
    }
    changes
}

pub fn describe_diff(changes: &[FieldChange]) -> String {
    if changes.is_empty() {
        return "none".to_string();
    }
    changes
        .iter()
        .map(|change| format!("{}: `{}` => `{}`", change.field, change.before, change.after))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Logs one reduction at debug level, or as a warning when it ran longer than
/// `threshold`.
pub fn log_reduction(
    action: &Action,
    elapsed: Duration,
    previous: &State,
    next: &State,
    threshold: Duration,
) {
    let level = if elapsed > threshold {
        Level::Warn
    } else {
        Level::Debug
    };
    if !log::log_enabled!(level) {
        return;
    }
    log!(
        level,
        "Reduced {} in {} ms. State diff: {}",
        describe_action(action),
        elapsed.as_millis(),
        describe_diff(&shallow_diff(previous, next))
    );
}

/// Renders an action for the log. A replacement history is summarized rather
/// than printed in full.
pub fn describe_action(action: &Action) -> String {
    match action {
        Action::SetHistory(history) => {
            format!("SetHistory({})", summarize_history(Some(history)))
        }
        other => ellipsize(&format!("{other:?}")),
    }
}

fn summarize_history(history: Option<&History>) -> String {
    match history {
        None => "None".to_string(),
        Some(history) => format!(
            "{} entries, open since {}",
            history.entries().len(),
            history.current_activity_start_time()
        ),
    }
}
