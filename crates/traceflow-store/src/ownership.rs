use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use traceflow_engine::collaborator_to_agent;
use traceflow_types::{AgentId, TraceGroup};

/// How far a specialist may look into an unattributed group for its keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sniffing {
    /// Never claim a group by content.
    Off,
    /// Task titles, subtask titles and the dropdown title.
    Titles,
    /// Titles plus every task and subtask body.
    #[default]
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentOwnership {
    pub sniffing: Sniffing,
    /// Also claim groups whose original type names the supervisor.
    pub accept_supervisor_traces: bool,
}

/// Decides whether a trace group may be shown on a node.
///
/// Rules, first match wins:
/// 1. the customer node accepts user-message groups;
/// 2. the group's agent is the node, or the node contributed a task;
/// 3. the group's original agent type strictly resolves to the node;
/// 4. the supervisor accepts groups with no identifiable agent at all:
///    the original type does not resolve and no specialist appears on the
///    group or any of its tasks;
/// 5. a specialist accepts unattributed groups mentioning its keyword,
///    as far as its [`Sniffing`] mode allows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnershipPolicy {
    /// Overrides keyed by node id; absent agents use the defaults.
    pub agents: BTreeMap<String, AgentOwnership>,
}

impl OwnershipPolicy {
    pub fn for_agent(&self, agent: AgentId) -> AgentOwnership {
        self.agents
            .get(agent.node_id())
            .copied()
            .unwrap_or_default()
    }

    pub fn with_agent(mut self, agent: AgentId, ownership: AgentOwnership) -> Self {
        self.agents.insert(agent.node_id().to_string(), ownership);
        self
    }

    pub fn belongs_to(&self, node: AgentId, group: &TraceGroup) -> bool {
        if node == AgentId::Customer && group.is_user_message() {
            return true;
        }
        if group.agent_id == node || group.tasks.iter().any(|t| t.agent_id == node) {
            return true;
        }

        let original = group.original_agent_type.trim();
        let declared = collaborator_to_agent(original, true);
        if declared == Some(node) {
            return true;
        }

        let names_supervisor = original.to_lowercase().contains("supervisor");
        if node == AgentId::Supervisor {
            return names_supervisor || (declared.is_none() && !has_specialist(group));
        }

        let Some(keyword) = node.keyword() else {
            return false;
        };
        let ownership = self.for_agent(node);
        if ownership.accept_supervisor_traces && names_supervisor {
            return true;
        }
        if declared.is_some() {
            return false;
        }
        match ownership.sniffing {
            Sniffing::Off => false,
            Sniffing::Titles => titles_mention(group, keyword),
            Sniffing::Content => group.mentions(keyword),
        }
    }
}

fn has_specialist(group: &TraceGroup) -> bool {
    group.agent_id.is_specialist() || group.tasks.iter().any(|t| t.agent_id.is_specialist())
}

fn titles_mention(group: &TraceGroup, keyword: &str) -> bool {
    group.dropdown_title.to_lowercase().contains(keyword)
        || group.tasks.iter().any(|task| {
            task.title.to_lowercase().contains(keyword)
                || task
                    .sub_tasks
                    .iter()
                    .any(|sub| sub.title.to_lowercase().contains(keyword))
        })
}
