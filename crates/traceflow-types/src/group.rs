use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AgentId;

/// Displayable payload of a task or subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Structured(Value),
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            Content::Structured(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(text) => text.trim().is_empty(),
            Content::Structured(value) => value.is_null(),
        }
    }

    /// Render as a string; structured content is pretty-printed JSON.
    pub fn to_display_string(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }

    /// Case-insensitive search; `needle` must already be lowercase.
    pub fn contains_lowercase(&self, needle: &str) -> bool {
        match self {
            Content::Text(text) => text.to_lowercase().contains(needle),
            Content::Structured(value) => value.to_string().to_lowercase().contains(needle),
        }
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

/// One half of a paired operation, or a standalone detail row under a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    pub title: String,
    pub content: Content,
    pub timestamp: DateTime<Utc>,
}

/// A row in an agent's timeline.
///
/// `step_number == 0` marks a special entry (rationale, observation, final
/// response) that is positioned by `sequence_number` rather than by step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub step_number: u32,
    pub title: String,
    /// Classified title without step prefix or timing suffix
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sub_tasks: Vec<SubTask>,
    pub sequence_number: u64,
    pub agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_invocation_id: Option<String>,
}

impl Task {
    pub fn is_special(&self) -> bool {
        self.step_number == 0
    }
}

/// Reduced timeline of one agent invocation within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceGroup {
    pub id: String,
    pub agent_id: AgentId,
    pub original_agent_type: String,
    pub tasks: Vec<Task>,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_elapsed_time: Option<String>,
    pub dropdown_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_response: Option<String>,
}

impl TraceGroup {
    pub fn new(
        id: impl Into<String>,
        agent_id: AgentId,
        original_agent_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_id,
            original_agent_type: original_agent_type.into(),
            tasks: Vec::new(),
            start_time: now,
            last_update_time: now,
            is_complete: false,
            final_elapsed_time: None,
            dropdown_title: format!("{} (0.00s)", agent_id.display_name()),
            text: None,
            session_id: None,
            final_response: None,
        }
    }

    /// Highest step number used so far (0 when no numbered step exists).
    pub fn max_step(&self) -> u32 {
        self.tasks.iter().map(|t| t.step_number).max().unwrap_or(0)
    }

    pub fn max_sequence(&self) -> u64 {
        self.tasks.iter().map(|t| t.sequence_number).max().unwrap_or(0)
    }

    pub fn numbered_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| !t.is_special())
    }

    pub fn step_count(&self) -> usize {
        self.numbered_tasks().count()
    }

    /// Whether the group originates from the end user rather than an agent.
    pub fn is_user_message(&self) -> bool {
        self.original_agent_type == "Browser"
            || self.original_agent_type == "User"
            || self.dropdown_title.contains("User Message")
            || self.dropdown_title.contains("Browser")
    }

    /// Case-insensitive search over titles and content of every task and
    /// subtask. `needle` must already be lowercase.
    pub fn mentions(&self, needle: &str) -> bool {
        if self
            .text
            .as_deref()
            .is_some_and(|t| t.to_lowercase().contains(needle))
        {
            return true;
        }
        self.tasks.iter().any(|task| {
            task.title.to_lowercase().contains(needle)
                || task
                    .content
                    .as_ref()
                    .is_some_and(|c| c.contains_lowercase(needle))
                || task.sub_tasks.iter().any(|sub| {
                    sub.title.to_lowercase().contains(needle)
                        || sub.content.contains_lowercase(needle)
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn task(step: u32, seq: u64, title: &str) -> Task {
        Task {
            step_number: step,
            title: title.to_string(),
            label: title.to_string(),
            content: None,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            sub_tasks: Vec::new(),
            sequence_number: seq,
            agent_id: AgentId::Supervisor,
            model_invocation_id: None,
        }
    }

    #[test]
    fn test_max_step_ignores_specials() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut group = TraceGroup::new("g", AgentId::Supervisor, "Supervisor", now);
        assert_eq!(group.max_step(), 0);

        group.tasks.push(task(1, 1, "Step 1: Invoking Model (0.00s)"));
        group.tasks.push(task(0, 2, "Rationale (0.10s)"));
        group.tasks.push(task(2, 3, "Step 2: Knowledge Base Tool (0.20s)"));

        assert_eq!(group.max_step(), 2);
        assert_eq!(group.max_sequence(), 3);
        assert_eq!(group.step_count(), 2);
    }

    #[test]
    fn test_content_untagged_serde() {
        let text: Content = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(text, Content::text("hello"));

        let structured: Content = serde_json::from_str("{\"a\":1}").unwrap();
        assert!(matches!(structured, Content::Structured(_)));
        assert!(structured.contains_lowercase("\"a\""));
    }

    #[test]
    fn test_mentions_searches_subtasks() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut group = TraceGroup::new("g", AgentId::Supervisor, "Unknown", now);
        let mut step = task(1, 1, "Step 1: Invoking Model (0.00s)");
        step.sub_tasks.push(SubTask {
            title: "Model Input (0.00s)".to_string(),
            content: Content::text("Recommend a Product for hiking"),
            timestamp: now,
        });
        group.tasks.push(step);

        assert!(group.mentions("product"));
        assert!(!group.mentions("trouble"));
    }
}
