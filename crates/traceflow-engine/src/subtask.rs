use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use traceflow_types::{Content, SubTask, Task, elapsed_secs};

use crate::classifier::is_input_subtask;

/// Matches a trailing timing suffix: `(1.23s)`, `(1.23s, +0.40s)` or `(2 seconds)`.
static TIMING_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\((?:\d+(?:\.\d+)?s(?:,\s*\+\d+(?:\.\d+)?s)?|\d+(?:\.\d+)?\s+seconds?)\)\s*$")
        .unwrap()
});

/// Strip the timing suffix from a title so updates can match it.
pub fn normalize_title(title: &str) -> &str {
    match TIMING_SUFFIX.find(title) {
        Some(m) => title[..m.start()].trim_end(),
        None => title.trim_end(),
    }
}

/// Merge a subtask into `parent`.
///
/// A subtask with the same normalized title is updated in place; otherwise a
/// new one is inserted. Input halves go to the front and everything else is
/// appended, so an input always precedes its output.
pub fn add_subtask(parent: &mut Task, title: &str, content: Content, now: DateTime<Utc>) {
    let normalized = normalize_title(title).to_string();
    let since_parent = elapsed_secs(parent.timestamp, now);

    if let Some(existing) = parent
        .sub_tasks
        .iter_mut()
        .find(|s| normalize_title(&s.title) == normalized)
    {
        let since_last = elapsed_secs(existing.timestamp, now);
        existing.title = format!("{} ({}s, +{}s)", normalized, since_parent, since_last);
        existing.content = content;
        existing.timestamp = now;
        return;
    }

    let subtask = SubTask {
        title: format!("{} ({}s)", normalized, since_parent),
        content,
        timestamp: now,
    };
    if is_input_subtask(&normalized) {
        parent.sub_tasks.insert(0, subtask);
    } else {
        parent.sub_tasks.push(subtask);
    }
}

/// Whether `task` already carries a subtask with this normalized title.
pub fn has_subtask(task: &Task, title: &str) -> bool {
    let wanted = normalize_title(title);
    task.sub_tasks
        .iter()
        .any(|s| normalize_title(&s.title) == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use traceflow_types::AgentId;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn parent() -> Task {
        Task {
            step_number: 1,
            title: "Step 1: Invoking Model (0.00s)".to_string(),
            label: "Invoking Model".to_string(),
            content: None,
            timestamp: base(),
            sub_tasks: Vec::new(),
            sequence_number: 1,
            agent_id: AgentId::Supervisor,
            model_invocation_id: None,
        }
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("Model Input (1.25s)"), "Model Input");
        assert_eq!(normalize_title("Model Input (1.25s, +0.50s)"), "Model Input");
        assert_eq!(normalize_title("Model Output (3 seconds)"), "Model Output");
        assert_eq!(
            normalize_title("Agent Invocation - Order (beta)"),
            "Agent Invocation - Order (beta)"
        );
        assert_eq!(normalize_title("Rationale"), "Rationale");
    }

    #[test]
    fn test_output_before_input_keeps_input_first() {
        let mut task = parent();
        add_subtask(
            &mut task,
            "Model Output",
            Content::text("out"),
            base() + Duration::seconds(2),
        );
        add_subtask(
            &mut task,
            "Model Input",
            Content::text("in"),
            base() + Duration::seconds(3),
        );

        let titles: Vec<_> = task
            .sub_tasks
            .iter()
            .map(|s| normalize_title(&s.title))
            .collect();
        assert_eq!(titles, vec!["Model Input", "Model Output"]);
        assert_eq!(task.sub_tasks[1].title, "Model Output (2.00s)");
    }

    #[test]
    fn test_same_title_updates_in_place() {
        let mut task = parent();
        add_subtask(
            &mut task,
            "Knowledge Base Results",
            Content::text("first"),
            base() + Duration::seconds(1),
        );
        add_subtask(
            &mut task,
            "Knowledge Base Results (1.00s)",
            Content::text("second"),
            base() + Duration::milliseconds(2500),
        );

        assert_eq!(task.sub_tasks.len(), 1);
        let sub = &task.sub_tasks[0];
        assert_eq!(sub.content, Content::text("second"));
        assert_eq!(sub.title, "Knowledge Base Results (2.50s, +1.50s)");
        assert!(has_subtask(&task, "Knowledge Base Results"));
    }
}
