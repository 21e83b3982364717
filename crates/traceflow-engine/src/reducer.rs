use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use traceflow_types::{AgentId, Content, RawTrace, Task, TraceGroup, elapsed_secs};

use crate::classifier::{
    self, Classification, FINAL_RESPONSE, StepFamily, StepKind, USER_MESSAGE, placeholder_content,
};
use crate::content::extract_content;
use crate::identity::{is_inferred, resolve_with_rule};
use crate::subtask::{add_subtask, has_subtask};

/// Number of trailing tasks searched for an open half to pair with.
///
/// A heuristic: pairs reordered further apart than this open separate steps.
pub const DEFAULT_PAIRING_LOOKBACK: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerConfig {
    pub model_pairing_lookback: usize,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            model_pairing_lookback: DEFAULT_PAIRING_LOOKBACK,
        }
    }
}

/// Group id for a payload: one group per session, whichever agents
/// contribute to it. Each task records its own agent.
///
/// Payloads without a session or trace id fall back to `fallback`, usually
/// the transport's message id.
pub fn group_id_for(trace: &RawTrace, fallback: &str) -> String {
    trace
        .session_id()
        .or_else(|| trace.trace_id())
        .unwrap_or(fallback)
        .to_string()
}

/// A classified payload on its way into a group.
struct Incoming<'a> {
    agent: AgentId,
    /// The agent was guessed from content, so another agent's open step
    /// may take this half.
    inferred: bool,
    classification: &'a Classification,
    content: Option<Content>,
    fallback: Content,
    now: DateTime<Utc>,
}

impl Incoming<'_> {
    fn body(&self) -> Content {
        self.content.clone().unwrap_or_else(|| self.fallback.clone())
    }
}

/// Folds raw payloads into trace groups.
///
/// `reduce` never mutates its input group: it returns the next value and
/// leaves committing it to the caller.
#[derive(Debug, Clone, Default)]
pub struct TraceReducer {
    config: ReducerConfig,
}

impl TraceReducer {
    pub fn new(config: ReducerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReducerConfig {
        &self.config
    }

    pub fn reduce(
        &self,
        prev: Option<&TraceGroup>,
        trace: &RawTrace,
        group_id: &str,
        now: DateTime<Utc>,
    ) -> TraceGroup {
        let (agent, rule) = resolve_with_rule(trace);
        let classification = classifier::classify(trace);
        let content = extract_content(trace);

        let mut group = match prev {
            Some(prev) => prev.clone(),
            None => new_group(trace, agent, group_id, now),
        };

        tracing::debug!(
            group = %group.id,
            agent = %agent,
            rule,
            title = %classification.title,
            kind = ?classification.kind,
            "reducing trace"
        );

        let incoming = Incoming {
            agent,
            inferred: is_inferred(rule),
            classification: &classification,
            fallback: trace
                .family_body()
                .cloned()
                .map(Content::Structured)
                .unwrap_or_else(|| Content::text(classification.title.clone())),
            content,
            now,
        };

        match (classification.kind, group.is_complete) {
            (StepKind::Special, _) => self.apply_special(&mut group, &incoming),
            (_, true) => self.apply_late(&mut group, &incoming),
            (StepKind::Primary, false) => self.apply_primary(&mut group, &incoming),
            (StepKind::Subtask, false) => self.apply_subtask(&mut group, &incoming),
            (StepKind::Detail, false) => self.apply_detail(&mut group, &incoming),
        }

        let is_final = classification.is_final_response()
            || trace.has_family_field("/observation/finalResponse");
        if is_final {
            if let Some(text) = incoming.content.as_ref().map(Content::to_display_string) {
                group.final_response = Some(text);
            }
            if !group.is_complete {
                group.is_complete = true;
                group.final_elapsed_time = Some(elapsed_secs(group.start_time, now));
                tracing::info!(group = %group.id, agent = %group.agent_id, "trace group complete");
            }
        }

        group.last_update_time = now;
        if let Some(text) = incoming
            .content
            .as_ref()
            .map(Content::to_display_string)
            .filter(|t| !t.trim().is_empty())
        {
            group.text = Some(text);
        }
        let elapsed = group
            .final_elapsed_time
            .clone()
            .unwrap_or_else(|| elapsed_secs(group.start_time, now));
        group.dropdown_title = format!("{} ({}s)", group.agent_id.display_name(), elapsed);

        group
    }

    /// Trace group recording a message typed by the end user.
    pub fn user_message(&self, group_id: &str, text: &str, now: DateTime<Utc>) -> TraceGroup {
        let mut group = TraceGroup::new(group_id, AgentId::Customer, "Browser", now);
        open_step(
            &mut group,
            1,
            USER_MESSAGE,
            Some(Content::text(text)),
            AgentId::Customer,
            now,
        );
        group.text = Some(text.to_string());
        group.is_complete = true;
        group.final_elapsed_time = Some(elapsed_secs(now, now));
        group.dropdown_title = format!("{} ({}s)", USER_MESSAGE, elapsed_secs(now, now));
        group
    }

    fn apply_primary(&self, group: &mut TraceGroup, incoming: &Incoming<'_>) {
        let c = incoming.classification;

        if let Some(half) = c.subtask_title
            && let Some(index) = self.find_pair_target(group, &c.title, half, incoming)
        {
            tracing::debug!(step = group.tasks[index].step_number, half, "paired with open step");
            add_subtask(&mut group.tasks[index], half, incoming.body(), incoming.now);
            return;
        }

        let content = primary_content(c).or_else(|| incoming.content.clone());
        let step_number = group.max_step() + 1;
        let index = open_step(group, step_number, &c.title, content, incoming.agent, incoming.now);

        if c.family == StepFamily::Model {
            group.tasks[index].model_invocation_id = Some(format!(
                "model-{}-{}-{}",
                incoming.agent.node_id(),
                group.id,
                step_number
            ));
        }
        if let Some(half) = c.subtask_title {
            add_subtask(&mut group.tasks[index], half, incoming.body(), incoming.now);
        }
    }

    fn apply_subtask(&self, group: &mut TraceGroup, incoming: &Incoming<'_>) {
        let c = incoming.classification;
        let Some(half) = c.subtask_title else {
            self.apply_detail(group, incoming);
            return;
        };

        let index = match find_parent(group, &c.parent_title, half, incoming.agent) {
            Some(index) => index,
            None => {
                // No open parent: the other half was lost or is still in flight.
                let step_number = group.max_step() + 1;
                let content = placeholder_content(&c.parent_title).map(Content::text);
                open_step(
                    group,
                    step_number,
                    &c.parent_title,
                    content,
                    incoming.agent,
                    incoming.now,
                )
            }
        };
        add_subtask(&mut group.tasks[index], half, incoming.body(), incoming.now);
    }

    fn apply_detail(&self, group: &mut TraceGroup, incoming: &Incoming<'_>) {
        let c = incoming.classification;
        match group.tasks.iter().rposition(|t| !t.is_special()) {
            Some(index) => {
                add_subtask(&mut group.tasks[index], &c.title, incoming.body(), incoming.now)
            }
            None => {
                let step_number = group.max_step() + 1;
                open_step(
                    group,
                    step_number,
                    &c.title,
                    incoming.content.clone(),
                    incoming.agent,
                    incoming.now,
                );
            }
        }
    }

    fn apply_special(&self, group: &mut TraceGroup, incoming: &Incoming<'_>) {
        let c = incoming.classification;
        if c.is_final_response()
            && let Some(existing) = group
                .tasks
                .iter_mut()
                .find(|t| t.is_special() && t.label == FINAL_RESPONSE)
        {
            if incoming.content.is_some() {
                existing.content = incoming.content.clone();
            }
            tracing::debug!(group = %group.id, "duplicate final response merged");
            return;
        }
        open_step(
            group,
            0,
            &c.title,
            incoming.content.clone(),
            incoming.agent,
            incoming.now,
        );
    }

    /// Payloads arriving after completion never open a step; they are kept
    /// as subtask updates on the closest matching step.
    fn apply_late(&self, group: &mut TraceGroup, incoming: &Incoming<'_>) {
        let c = incoming.classification;
        let title: &str = match c.subtask_title {
            Some(half) => half,
            None => &c.title,
        };
        let index = group
            .tasks
            .iter()
            .rposition(|t| !t.is_special() && t.label == c.parent_title)
            .or_else(|| group.tasks.iter().rposition(|t| !t.is_special()))
            .or_else(|| group.tasks.len().checked_sub(1));

        if let Some(index) = index {
            tracing::debug!(group = %group.id, title, "late payload recorded as update");
            add_subtask(&mut group.tasks[index], title, incoming.body(), incoming.now);
        }
    }

    fn find_pair_target(
        &self,
        group: &TraceGroup,
        label: &str,
        half: &str,
        incoming: &Incoming<'_>,
    ) -> Option<usize> {
        let start = group
            .tasks
            .len()
            .saturating_sub(self.config.model_pairing_lookback);
        let open = |same_agent: bool| {
            (start..group.tasks.len()).rev().find(|&i| {
                let task = &group.tasks[i];
                !task.is_special()
                    && task.label == label
                    && (!same_agent || task.agent_id == incoming.agent)
                    && !has_subtask(task, half)
            })
        };
        match open(true) {
            Some(index) => Some(index),
            None if incoming.inferred => open(false),
            None => None,
        }
    }
}

fn new_group(trace: &RawTrace, agent: AgentId, group_id: &str, now: DateTime<Utc>) -> TraceGroup {
    let original = trace
        .collaborator_name()
        .or_else(|| trace.agent_name())
        .unwrap_or(agent.canonical_name());
    let mut group = TraceGroup::new(group_id, agent, original, now);
    group.session_id = trace.session_id().map(str::to_string);
    group
}

fn primary_content(c: &Classification) -> Option<Content> {
    let placeholder = placeholder_content(&c.title)?;
    Some(Content::text(match &c.pair_key {
        Some(key) => format!("{} {}", placeholder, key),
        None => placeholder.to_string(),
    }))
}

/// Latest step titled `label`, preferring one still missing `half` and one
/// owned by `agent`.
fn find_parent(group: &TraceGroup, label: &str, half: &str, agent: AgentId) -> Option<usize> {
    let candidates = |open_only: bool, same_agent: bool| {
        group.tasks.iter().rposition(|t| {
            !t.is_special()
                && t.label == label
                && (!open_only || !has_subtask(t, half))
                && (!same_agent || t.agent_id == agent)
        })
    };
    candidates(true, true)
        .or_else(|| candidates(true, false))
        .or_else(|| candidates(false, true))
        .or_else(|| candidates(false, false))
}

fn previous_timestamp(group: &TraceGroup) -> DateTime<Utc> {
    group
        .tasks
        .iter()
        .max_by_key(|t| t.sequence_number)
        .map(|t| t.timestamp)
        .unwrap_or(group.start_time)
}

/// Append a task and return its index. `step_number == 0` opens a special.
fn open_step(
    group: &mut TraceGroup,
    step_number: u32,
    label: &str,
    content: Option<Content>,
    agent: AgentId,
    now: DateTime<Utc>,
) -> usize {
    let elapsed = elapsed_secs(previous_timestamp(group), now);
    let title = if step_number == 0 {
        format!("{} ({}s)", label, elapsed)
    } else {
        format!("Step {}: {} ({}s)", step_number, label, elapsed)
    };
    let sequence_number = group.max_sequence() + 1;
    group.tasks.push(Task {
        step_number,
        title,
        label: label.to_string(),
        content,
        timestamp: now,
        sub_tasks: Vec::new(),
        sequence_number,
        agent_id: agent,
        model_invocation_id: None,
    });
    group.tasks.len() - 1
}
