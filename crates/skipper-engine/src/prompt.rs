//! Message composition.
//!
//! Three pure rendering functions with no I/O: identical inputs always
//! produce identical text, so the composer can be tested without a browser
//! or a model.

use std::fmt::Write as _;

use skipper_core::browser::BrowserStateSnapshot;
use skipper_core::history::HistoryRecord;
use skipper_core::plan::GoalEvaluation;

use crate::registry::ActionRegistry;

/// Fixed operating instructions plus the response schema, the serialized
/// action catalog, and the task.
pub fn system_message(registry: &ActionRegistry, task: &str) -> String {
    let mut out = String::from(
        "You are a browser automation agent. You control a real browser and \
         work toward the task below one step at a time.\n\
         \n\
         Each turn you receive the transcript of previous steps and the \
         current page state. Respond with exactly one JSON object and \
         nothing else — no markdown fences, no commentary:\n\
         \n\
         {\"state\": {\"previousGoalEvaluation\": \"Success\" | \"Fail\" | \"Unknown\", \
         \"evaluationReason\": \"why\", \"memory\": \"what to remember\", \
         \"nextGoal\": \"what this step should achieve\"}, \
         \"actions\": [{\"name\": \"actionName\", \"args\": {\"param\": value}}]}\n\
         \n\
         Rules:\n\
         - Evaluate whether your previous goal succeeded using the page state.\n\
         - Actions run in the order listed; a later action may rely on the page \
         state produced by the one before it.\n\
         - Tab numbers shown in tab lists are the numbers tab actions accept.\n\
         - When the task is finished, call done.\n\
         \n\
         Available actions:\n",
    );

    for descriptor in registry.describe() {
        let params = descriptor
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.kind.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "- {}({params}) — {}", descriptor.name, descriptor.description);
    }

    let _ = write!(out, "\nTask: {task}");
    out
}

/// One transcript entry, rendered for replay.
pub fn history_message(record: &HistoryRecord) -> String {
    let mut out = format!("Step at {}\n", record.timestamp.to_rfc3339());

    render_tabs(&mut out, &record.tabs, record.active_tab);

    let _ = writeln!(
        out,
        "Evaluation: {} — {}",
        evaluation_label(&record.state.previous_goal_evaluation),
        record.state.evaluation_reason
    );
    let _ = writeln!(out, "Memory: {}", record.state.memory);
    let _ = writeln!(out, "Goal: {}", record.state.next_goal);

    out.push_str("Executed:\n");
    if record.actions.is_empty() {
        out.push_str("  (no actions issued)\n");
    }
    for action in &record.actions {
        let args = serde_json::to_string(&action.args).unwrap_or_else(|_| "{}".into());
        let outcome = match &action.result {
            Some(value) => value.to_string(),
            None => "(nothing returned)".into(),
        };
        let marker = if action.success { "->" } else { "-> FAILED:" };
        let _ = writeln!(out, "  {}({args}) {marker} {outcome}", action.name);
    }
    out
}

/// The current browser state.
pub fn state_message(snapshot: &BrowserStateSnapshot) -> String {
    let mut out = String::new();
    if snapshot.active_tab.is_some() {
        let _ = writeln!(out, "Current page: {} ({})", snapshot.title, snapshot.url);
    } else {
        out.push_str("Current page: (no visible tab)\n");
    }

    render_tabs(&mut out, &snapshot.tabs, snapshot.active_tab);

    out.push_str("Page content:\n");
    if snapshot.content.is_empty() {
        out.push_str("(empty)\n");
    } else {
        out.push_str(&snapshot.content);
        out.push('\n');
    }
    out
}

fn render_tabs(
    out: &mut String,
    tabs: &[skipper_core::browser::TabInfo],
    active: Option<usize>,
) {
    out.push_str("Open tabs:\n");
    if tabs.is_empty() {
        out.push_str("  (none)\n");
    }
    for (i, tab) in tabs.iter().enumerate() {
        let marker = if active == Some(i) { " [active]" } else { "" };
        let _ = writeln!(out, "  {}. {} ({}){marker}", i + 1, tab.title, tab.url);
    }
}

fn evaluation_label(eval: &GoalEvaluation) -> &'static str {
    match eval {
        GoalEvaluation::Success => "Success",
        GoalEvaluation::Fail => "Fail",
        GoalEvaluation::Unknown => "Unknown",
    }
}
