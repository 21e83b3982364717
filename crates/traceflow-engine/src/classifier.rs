use traceflow_types::{RawTrace, TraceFamily};

pub const INVOKING_MODEL: &str = "Invoking Model";
pub const MODEL_INPUT: &str = "Model Input";
pub const MODEL_OUTPUT: &str = "Model Output";
pub const KNOWLEDGE_BASE_TOOL: &str = "Knowledge Base Tool";
pub const KNOWLEDGE_BASE_QUERY: &str = "Knowledge Base Query";
pub const KNOWLEDGE_BASE_RESULTS: &str = "Knowledge Base Results";
pub const ACTION_GROUP_TOOL: &str = "Action Group Tool";
pub const ACTION_GROUP_INPUT: &str = "Action Group Input";
pub const ACTION_GROUP_OUTPUT: &str = "Action Group Output";
pub const ACTION_GROUP: &str = "Action Group";
pub const ROUTING_CLASSIFIER: &str = "Routing Classifier";
pub const CLASSIFYING_INTENT: &str = "Classifying Intent";
pub const ROUTING_DECISION: &str = "Routing Classifier Decision";
pub const ROUTING_CLASSIFICATION: &str = "Routing Classification";
pub const AGENT_INVOCATION: &str = "Agent Invocation";
pub const FINAL_RESPONSE: &str = "Final Response";
pub const RATIONALE: &str = "Rationale";
pub const OBSERVATION: &str = "Observation";
pub const PROCESSING: &str = "Processing";
pub const USER_MESSAGE: &str = "User Message";

const SUBTASK_TITLES: &[&str] = &[
    MODEL_INPUT,
    MODEL_OUTPUT,
    KNOWLEDGE_BASE_QUERY,
    KNOWLEDGE_BASE_RESULTS,
    ACTION_GROUP_INPUT,
    ACTION_GROUP_OUTPUT,
    ACTION_GROUP,
];

const INPUT_SUBTASK_TITLES: &[&str] = &[
    MODEL_INPUT,
    KNOWLEDGE_BASE_QUERY,
    ACTION_GROUP_INPUT,
    CLASSIFYING_INTENT,
];

const SPECIAL_TITLES: &[&str] = &[FINAL_RESPONSE, RATIONALE, OBSERVATION];

/// How a classified payload affects step numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Opens a numbered step (unless paired into an open one)
    Primary,
    /// Attaches under the latest open step of its family
    Subtask,
    /// Unnumbered entry placed by sequence (rationale, observation, final response)
    Special,
    /// Generic detail with no family of its own
    Detail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepFamily {
    Model,
    KnowledgeBase,
    ActionGroup,
    Routing,
    Collaborator,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Title of the step this payload represents
    pub title: String,
    pub kind: StepKind,
    pub family: StepFamily,
    /// Title of the primary step the payload belongs under
    pub parent_title: String,
    /// Subtask row this payload contributes to its parent, if any
    pub subtask_title: Option<&'static str>,
    /// Extra key for matching halves of the same operation
    pub pair_key: Option<String>,
}

impl Classification {
    fn primary(
        title: impl Into<String>,
        family: StepFamily,
        subtask: Option<&'static str>,
    ) -> Self {
        let title = title.into();
        Self {
            parent_title: title.clone(),
            title,
            kind: StepKind::Primary,
            family,
            subtask_title: subtask,
            pair_key: None,
        }
    }

    fn subtask(title: &'static str, parent: &'static str, family: StepFamily) -> Self {
        Self {
            title: title.to_string(),
            kind: StepKind::Subtask,
            family,
            parent_title: parent.to_string(),
            subtask_title: Some(title),
            pair_key: None,
        }
    }

    fn special(title: &'static str) -> Self {
        Self {
            title: title.to_string(),
            kind: StepKind::Special,
            family: StepFamily::Other,
            parent_title: title.to_string(),
            subtask_title: None,
            pair_key: None,
        }
    }

    fn detail(title: &'static str, family: StepFamily) -> Self {
        Self {
            title: title.to_string(),
            kind: StepKind::Detail,
            family,
            parent_title: title.to_string(),
            subtask_title: None,
            pair_key: None,
        }
    }

    fn with_pair_key(mut self, key: Option<&str>) -> Self {
        self.pair_key = key.map(str::to_string);
        self
    }

    pub fn is_final_response(&self) -> bool {
        self.title == FINAL_RESPONSE
    }

    /// Whether the contributed subtask is the input half of an operation.
    pub fn is_input_half(&self) -> bool {
        self.subtask_title.is_some_and(is_input_subtask)
    }
}

/// Decide which logical step a payload represents.
pub fn classify(trace: &RawTrace) -> Classification {
    match trace.family() {
        Some(TraceFamily::RoutingClassifier) => classify_routing(trace),
        Some(TraceFamily::Orchestration) => classify_orchestration(trace),
        None => Classification::detail(PROCESSING, StepFamily::Other),
    }
}

fn classify_routing(trace: &RawTrace) -> Classification {
    if trace.has_family_field("/modelInvocationInput") {
        return Classification::subtask(CLASSIFYING_INTENT, ROUTING_CLASSIFIER, StepFamily::Routing);
    }
    if trace.has_family_field("/modelInvocationOutput") {
        return Classification::subtask(ROUTING_DECISION, ROUTING_CLASSIFIER, StepFamily::Routing);
    }
    if trace.has_family_field("/invocationInput/agentCollaboratorInvocationInput") {
        return Classification::primary(
            agent_invocation_title(trace),
            StepFamily::Collaborator,
            None,
        );
    }
    if trace.has_family_field("/observation/finalResponse") {
        return Classification::special(FINAL_RESPONSE);
    }
    Classification::detail(ROUTING_CLASSIFICATION, StepFamily::Routing)
}

fn classify_orchestration(trace: &RawTrace) -> Classification {
    if trace.has_family_field("/modelInvocationInput") {
        return Classification::primary(INVOKING_MODEL, StepFamily::Model, Some(MODEL_INPUT));
    }
    if trace.has_family_field("/modelInvocationOutput") {
        return Classification::primary(INVOKING_MODEL, StepFamily::Model, Some(MODEL_OUTPUT));
    }
    if trace.has_family_field("/invocationInput/agentCollaboratorInvocationInput") {
        return Classification::primary(
            agent_invocation_title(trace),
            StepFamily::Collaborator,
            None,
        );
    }
    if trace.has_family_field("/invocationInput/knowledgeBaseLookupInput") {
        return Classification::primary(
            KNOWLEDGE_BASE_TOOL,
            StepFamily::KnowledgeBase,
            Some(KNOWLEDGE_BASE_QUERY),
        );
    }
    if trace.has_family_field("/observation/knowledgeBaseLookupOutput") {
        return Classification::subtask(
            KNOWLEDGE_BASE_RESULTS,
            KNOWLEDGE_BASE_TOOL,
            StepFamily::KnowledgeBase,
        );
    }
    if trace.has_family_field("/invocationInput/actionGroupInvocationInput") {
        let name = trace
            .family_str("/invocationInput/actionGroupInvocationInput/actionGroupName")
            .or_else(|| trace.family_str("/invocationInput/actionGroupInvocationInput/name"));
        return Classification::primary(
            ACTION_GROUP_TOOL,
            StepFamily::ActionGroup,
            Some(ACTION_GROUP_INPUT),
        )
        .with_pair_key(name);
    }
    if trace.has_family_field("/observation/actionGroupInvocationOutput") {
        return Classification::subtask(
            ACTION_GROUP_OUTPUT,
            ACTION_GROUP_TOOL,
            StepFamily::ActionGroup,
        );
    }
    if trace.has_family_field("/observation/agentCollaboratorInvocationOutput") {
        return Classification::special(OBSERVATION);
    }
    if trace.has_family_field("/observation/finalResponse") {
        return Classification::special(FINAL_RESPONSE);
    }
    if trace.has_family_field("/rationale") {
        return Classification::special(RATIONALE);
    }
    Classification::detail(PROCESSING, StepFamily::Other)
}

fn agent_invocation_title(trace: &RawTrace) -> String {
    let name = trace
        .family_str("/invocationInput/agentCollaboratorInvocationInput/agentCollaboratorName")
        .unwrap_or("Agent");
    format!("{} - {}", AGENT_INVOCATION, name)
}

/// Titles that attach under an open step instead of opening one.
pub fn is_subtask_title(title: &str) -> bool {
    SUBTASK_TITLES.contains(&title)
}

pub fn is_input_subtask(title: &str) -> bool {
    INPUT_SUBTASK_TITLES.contains(&title)
}

pub fn is_special_title(title: &str) -> bool {
    SPECIAL_TITLES.contains(&title)
}

/// Titles that advance the step counter.
pub fn is_primary_title(title: &str) -> bool {
    title == INVOKING_MODEL
        || title == KNOWLEDGE_BASE_TOOL
        || title == ACTION_GROUP_TOOL
        || title == ROUTING_CLASSIFIER
        || title.starts_with(AGENT_INVOCATION)
}

/// Placeholder body for primaries whose detail lives in their subtasks.
pub fn placeholder_content(title: &str) -> Option<&'static str> {
    match title {
        INVOKING_MODEL => Some("Model invocation details in subtasks below"),
        KNOWLEDGE_BASE_TOOL => Some("Knowledge base tool details:"),
        ACTION_GROUP_TOOL => Some("Action group tool details:"),
        ROUTING_CLASSIFIER => Some("Routing classifier operations"),
        _ => None,
    }
}
