//! Dependency resolution and workflow status transitions (spec §4.3).

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::action::{Action, ActionStatus};

/// Terminal status a workflow can settle into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowTerminalStatus {
    Success,
    Failed,
}

// Cycle detection over `requires` edges lives on `Action::detect_cycle`
// (spec §8 boundary case); admission callers use that directly.

/// Select the set of Actions ready to be enqueued: `Potential` with every
/// `requires` reference `Completed`. Selection among equally-eligible Actions
/// is lexicographic by identifier (stable, testable); the caller may dispatch
/// as many as the target queue's worker width allows.
pub fn ready_actions<'a>(actions: &'a [Action]) -> Vec<&'a Action> {
    let by_id: HashMap<&str, &Action> = actions.iter().map(|a| (a.identifier(), a)).collect();

    let mut ready: Vec<&Action> = actions
        .iter()
        .filter(|a| a.status() == ActionStatus::PotentialActionStatus)
        .filter(|a| {
            a.requires().iter().all(|dep| {
                by_id
                    .get(dep.as_str())
                    .map(|d| d.status() == ActionStatus::CompletedActionStatus)
                    .unwrap_or(false)
            })
        })
        .collect();

    ready.sort_by(|a, b| a.identifier().cmp(b.identifier()));
    ready
}

/// `PotentialActionStatus -> ActiveActionStatus` on enqueue.
pub fn mark_active(action: &mut Action) {
    action.set_status(ActionStatus::ActiveActionStatus);
    action.set_start_time(Utc::now());
}

/// `ActiveActionStatus -> CompletedActionStatus` on handler success.
pub fn mark_completed(action: &mut Action, result: Value) {
    action.set_status(ActionStatus::CompletedActionStatus);
    action.set_end_time(Utc::now());
    action.set_result(result);
}

/// `ActiveActionStatus -> FailedActionStatus` on non-retriable handler failure.
pub fn mark_failed(action: &mut Action, error: Value) {
    action.set_status(ActionStatus::FailedActionStatus);
    action.set_end_time(Utc::now());
    action.set_error(error);
}

/// Mark an Action as `FailedActionStatus` with the `cancelled` sub-state used
/// for reporting when its dependencies became permanently unsatisfiable.
/// `controlMetadata` is untrusted input (ingestion only validates JSON-LD
/// well-formedness, not field shapes), so a non-object value there is
/// coerced to an empty object rather than trusted to already be one.
fn mark_cancelled(action: &mut Action) {
    action.set_status(ActionStatus::FailedActionStatus);
    if action.set_field("controlMetadata.cancelled", Value::Bool(true)).is_err() {
        warn!(
            action_id = %action.identifier(),
            "controlMetadata was not an object; replacing it before marking cancelled"
        );
        let _ = action.set_field("controlMetadata", Value::Object(serde_json::Map::new()));
        let _ = action.set_field("controlMetadata.cancelled", Value::Bool(true));
    }
    action.set_error(serde_json::json!({
        "name": "DependencyUnsatisfiable",
        "description": "an upstream dependency failed permanently",
    }));
}

fn is_unsatisfiable(
    id: &str,
    by_id: &HashMap<&str, &Action>,
    memo: &mut HashMap<String, bool>,
) -> bool {
    if let Some(cached) = memo.get(id) {
        return *cached;
    }
    memo.insert(id.to_string(), false); // break cycles conservatively
    let result = match by_id.get(id) {
        None => false,
        Some(action) => match action.status() {
            ActionStatus::FailedActionStatus => true,
            _ => action
                .requires()
                .iter()
                .any(|dep| is_unsatisfiable(dep, by_id, memo)),
        },
    };
    memo.insert(id.to_string(), result);
    result
}

/// Evaluate whether the workflow has reached a terminal state given the
/// current status of every child Action. As a side effect, Actions whose
/// dependencies have become permanently unsatisfiable are transitioned to
/// `FailedActionStatus` with the `cancelled` sub-state.
///
/// Returns `None` while the workflow is still in progress.
pub fn evaluate_workflow(actions: &mut [Action]) -> Option<WorkflowTerminalStatus> {
    if actions
        .iter()
        .all(|a| a.status() == ActionStatus::CompletedActionStatus)
    {
        return Some(WorkflowTerminalStatus::Success);
    }

    let any_failed = actions
        .iter()
        .any(|a| a.status() == ActionStatus::FailedActionStatus);
    if !any_failed {
        return None;
    }

    let by_id: HashMap<&str, &Action> = actions.iter().map(|a| (a.identifier(), a)).collect();

    let mut memo = HashMap::new();
    let unsatisfiable_ids: HashSet<String> = actions
        .iter()
        .filter(|a| a.status() == ActionStatus::PotentialActionStatus)
        .filter(|a| is_unsatisfiable(a.identifier(), &by_id, &mut memo))
        .map(|a| a.identifier().to_string())
        .collect();

    for action in actions.iter_mut() {
        if unsatisfiable_ids.contains(action.identifier()) {
            mark_cancelled(action);
        }
    }

    let still_in_progress = actions.iter().any(|a| {
        matches!(
            a.status(),
            ActionStatus::PotentialActionStatus | ActionStatus::ActiveActionStatus
        )
    });

    if still_in_progress {
        None
    } else {
        Some(WorkflowTerminalStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completed(id: &str) -> Action {
        let mut a = Action::new(id, "SearchAction");
        a.set_status(ActionStatus::CompletedActionStatus);
        a
    }

    #[test]
    fn empty_requires_are_all_immediately_ready() {
        let actions = vec![Action::new("a1", "SearchAction"), Action::new("a2", "SearchAction")];
        let ready = ready_actions(&actions);
        assert_eq!(ready.len(), 2);
    }

    #[test]
    fn ready_selection_is_lexicographic() {
        let actions = vec![Action::new("b", "SearchAction"), Action::new("a", "SearchAction")];
        let ready = ready_actions(&actions);
        assert_eq!(ready[0].identifier(), "a");
        assert_eq!(ready[1].identifier(), "b");
    }

    #[test]
    fn dependent_action_waits_for_completion() {
        let mut a2 = Action::new("a2", "CreateAction");
        a2.set_requires(vec!["a1".into()]);
        let actions = vec![Action::new("a1", "SearchAction"), a2];
        let ready = ready_actions(&actions);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].identifier(), "a1");
    }

    #[test]
    fn dependency_correctness_never_enqueues_incomplete_deps() {
        let mut a2 = Action::new("a2", "CreateAction");
        a2.set_requires(vec!["a1".into()]);
        let actions = vec![completed("a1"), a2];
        let ready = ready_actions(&actions);
        assert_eq!(ready[0].identifier(), "a2");

        let mut a2b = Action::new("a2b", "CreateAction");
        a2b.set_requires(vec!["a1b".into()]);
        let actions2 = vec![Action::new("a1b", "SearchAction"), a2b];
        assert!(ready_actions(&actions2).iter().all(|a| a.requires().is_empty()));
    }

    #[test]
    fn all_completed_means_workflow_success() {
        let mut actions = vec![completed("a1"), completed("a2")];
        assert_eq!(
            evaluate_workflow(&mut actions),
            Some(WorkflowTerminalStatus::Success)
        );
    }

    #[test]
    fn failed_leaf_cancels_dependents_and_fails_workflow() {
        let mut a1 = Action::new("a1", "SearchAction");
        a1.set_status(ActionStatus::FailedActionStatus);
        let mut a2 = Action::new("a2", "CreateAction");
        a2.set_requires(vec!["a1".into()]);

        let mut actions = vec![a1, a2];
        let result = evaluate_workflow(&mut actions);
        assert_eq!(result, Some(WorkflowTerminalStatus::Failed));
        assert_eq!(actions[1].status(), ActionStatus::FailedActionStatus);
        assert_eq!(
            actions[1].get_field("controlMetadata.cancelled").unwrap(),
            &json!(true)
        );
    }

    #[test]
    fn cancellation_survives_a_non_object_control_metadata() {
        let mut a1 = Action::new("a1", "SearchAction");
        a1.set_status(ActionStatus::FailedActionStatus);
        let mut a2 = Action::new("a2", "CreateAction");
        a2.set_requires(vec!["a1".into()]);
        a2.set_field("controlMetadata", json!("not-an-object")).unwrap();

        let mut actions = vec![a1, a2];
        let result = evaluate_workflow(&mut actions);
        assert_eq!(result, Some(WorkflowTerminalStatus::Failed));
        assert_eq!(actions[1].status(), ActionStatus::FailedActionStatus);
        assert_eq!(
            actions[1].get_field("controlMetadata.cancelled").unwrap(),
            &json!(true)
        );
    }

    #[test]
    fn independent_sibling_keeps_workflow_in_progress_after_a_failure() {
        let mut a1 = Action::new("a1", "SearchAction");
        a1.set_status(ActionStatus::FailedActionStatus);
        let a2 = Action::new("a2", "SearchAction"); // no requires, independent

        let mut actions = vec![a1, a2];
        let result = evaluate_workflow(&mut actions);
        assert_eq!(result, None, "independent sibling can still run");
    }

    #[test]
    fn mark_active_then_completed_sets_timestamps() {
        let mut action = Action::new("a1", "SearchAction");
        mark_active(&mut action);
        assert_eq!(action.status(), ActionStatus::ActiveActionStatus);
        assert!(action.start_time().is_some());

        mark_completed(&mut action, json!({"ok": true}));
        assert_eq!(action.status(), ActionStatus::CompletedActionStatus);
        assert!(action.end_time().is_some());
        assert_eq!(action.result(), Some(&json!({"ok": true})));
    }
}
