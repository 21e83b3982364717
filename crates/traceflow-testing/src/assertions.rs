//! Custom assertions for reduced trace groups.

use anyhow::{Result, bail};
use traceflow_types::TraceGroup;

const INPUT_PREFIXES: &[&str] = &["Model Input", "Knowledge Base Query", "Action Group Input"];
const OUTPUT_PREFIXES: &[&str] = &[
    "Model Output",
    "Knowledge Base Results",
    "Action Group Output",
];

/// Numbered steps, in insertion order, start at 1 and advance by exactly one.
pub fn assert_steps_gap_free(group: &TraceGroup) -> Result<()> {
    for (i, task) in group.numbered_tasks().enumerate() {
        let expected = i as u32 + 1;
        if task.step_number != expected {
            bail!(
                "Step numbering broken at '{}': got {}, expected {}",
                task.title,
                task.step_number,
                expected
            );
        }
    }
    Ok(())
}

/// In every task, no input subtask appears after an output subtask.
pub fn assert_inputs_before_outputs(group: &TraceGroup) -> Result<()> {
    for task in &group.tasks {
        let mut seen_output = false;
        for sub in &task.sub_tasks {
            if OUTPUT_PREFIXES.iter().any(|p| sub.title.starts_with(p)) {
                seen_output = true;
            } else if seen_output && INPUT_PREFIXES.iter().any(|p| sub.title.starts_with(p)) {
                bail!("Input '{}' follows an output in '{}'", sub.title, task.title);
            }
        }
    }
    Ok(())
}

/// Step labels of numbered tasks, in insertion order.
pub fn step_labels(group: &TraceGroup) -> Vec<String> {
    group.numbered_tasks().map(|t| t.label.clone()).collect()
}
