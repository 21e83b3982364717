use traceflow_types::{Task, TraceGroup};

use crate::classifier::{AGENT_INVOCATION, FINAL_RESPONSE, OBSERVATION, RATIONALE, is_input_subtask};
use crate::subtask::normalize_title;

/// Order a group's tasks for rendering.
///
/// Numbered steps are sorted by (step, timestamp). Specials are woven in:
/// rationale right after step 1, observations after the agent invocation
/// whose time window contains them, final responses last. The stored group
/// keeps insertion order; this view is rebuilt on every render.
pub fn normalize_for_display(group: &TraceGroup) -> TraceGroup {
    let (mut ordered, mut specials): (Vec<Task>, Vec<Task>) =
        group.tasks.iter().cloned().partition(|t| !t.is_special());
    ordered.sort_by_key(|t| (t.step_number, t.timestamp));
    specials.sort_by_key(|t| t.sequence_number);

    let numbered = ordered.clone();
    let mut finals = Vec::new();

    for special in specials {
        let label = special.label.clone();
        match label.as_str() {
            FINAL_RESPONSE => finals.push(special),
            RATIONALE => match ordered.iter().position(|t| t.step_number == 1) {
                Some(anchor) => insert_after(&mut ordered, anchor, special),
                None => insert_chronologically(&mut ordered, special),
            },
            OBSERVATION => match invocation_window(&numbered, &special) {
                Some(sequence) => {
                    let anchor = ordered
                        .iter()
                        .position(|t| !t.is_special() && t.sequence_number == sequence);
                    match anchor {
                        Some(anchor) => insert_after(&mut ordered, anchor, special),
                        None => insert_chronologically(&mut ordered, special),
                    }
                }
                None => insert_chronologically(&mut ordered, special),
            },
            _ => insert_chronologically(&mut ordered, special),
        }
    }
    ordered.extend(finals);

    for task in &mut ordered {
        task.sub_tasks
            .sort_by_key(|s| !is_input_subtask(normalize_title(&s.title)));
    }

    let mut view = group.clone();
    view.tasks = ordered;
    view
}

/// Insert after `anchor` and after any specials already placed behind it,
/// so repeated insertions keep their arrival order.
fn insert_after(tasks: &mut Vec<Task>, anchor: usize, task: Task) {
    let mut at = anchor + 1;
    while at < tasks.len() && tasks[at].is_special() {
        at += 1;
    }
    tasks.insert(at, task);
}

fn insert_chronologically(tasks: &mut Vec<Task>, task: Task) {
    let at = tasks.partition_point(|t| t.timestamp <= task.timestamp);
    tasks.insert(at, task);
}

/// Sequence number of the agent invocation step whose window
/// `[start, next step start)` contains the observation.
fn invocation_window(numbered: &[Task], observation: &Task) -> Option<u64> {
    numbered
        .iter()
        .enumerate()
        .filter(|(_, t)| t.label.starts_with(AGENT_INVOCATION))
        .find(|(i, t)| {
            let next = numbered.get(i + 1).map(|n| n.timestamp);
            t.timestamp <= observation.timestamp && next.is_none_or(|n| observation.timestamp < n)
        })
        .map(|(_, t)| t.sequence_number)
}
