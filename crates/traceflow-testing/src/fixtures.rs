//! Raw trace payload builders.
//!
//! Payloads mirror what the orchestration backend sends over the wire:
//! a flattened envelope (`collaboratorName`, `sessionId`) around one of the
//! two trace families.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Value, json};
use traceflow_types::RawTrace;

/// Fixed test clock: `at(ms)` is `ms` milliseconds after a fixed origin.
pub fn at(ms: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap() + Duration::milliseconds(ms)
}

/// Builder for payloads emitted on behalf of one agent in one session.
#[derive(Debug, Clone)]
pub struct Payload {
    collaborator: Option<String>,
    session: Option<String>,
}

impl Payload {
    /// Payloads tagged with `collaboratorName = agent`.
    pub fn agent(agent: &str, session: &str) -> Self {
        Self {
            collaborator: Some(agent.to_string()),
            session: Some(session.to_string()),
        }
    }

    /// Payloads with no identity tag at all.
    pub fn untagged(session: &str) -> Self {
        Self {
            collaborator: None,
            session: Some(session.to_string()),
        }
    }

    fn envelope(&self, family: &str, body: Value) -> RawTrace {
        let mut value = json!({ "trace": { family: body } });
        if let Some(name) = &self.collaborator {
            value["collaboratorName"] = json!(name);
        }
        if let Some(session) = &self.session {
            value["sessionId"] = json!(session);
        }
        RawTrace::new(value)
    }

    fn orchestration(&self, body: Value) -> RawTrace {
        self.envelope("orchestrationTrace", body)
    }

    pub fn model_input(&self, text: &str) -> RawTrace {
        self.orchestration(json!({
            "modelInvocationInput": { "text": text, "type": "ORCHESTRATION" }
        }))
    }

    pub fn model_output(&self, content: &str) -> RawTrace {
        self.orchestration(json!({
            "modelInvocationOutput": { "rawResponse": { "content": content } }
        }))
    }

    pub fn agent_invocation(&self, callee: &str, text: &str) -> RawTrace {
        self.orchestration(json!({
            "invocationInput": { "agentCollaboratorInvocationInput": {
                "agentCollaboratorName": callee,
                "input": { "text": text }
            } }
        }))
    }

    pub fn observation(&self, callee: &str, text: &str) -> RawTrace {
        self.orchestration(json!({
            "observation": { "agentCollaboratorInvocationOutput": {
                "agentCollaboratorName": callee,
                "output": { "text": text }
            } }
        }))
    }

    pub fn kb_query(&self, text: &str) -> RawTrace {
        self.orchestration(json!({
            "invocationInput": { "knowledgeBaseLookupInput": {
                "text": text,
                "knowledgeBaseId": "KB1"
            } }
        }))
    }

    pub fn kb_results(&self, passages: &[&str]) -> RawTrace {
        let references: Vec<Value> = passages
            .iter()
            .map(|p| json!({ "content": { "text": p } }))
            .collect();
        self.orchestration(json!({
            "observation": { "knowledgeBaseLookupOutput": { "retrievedReferences": references } }
        }))
    }

    pub fn action_group_input(&self, name: &str, value: Value) -> RawTrace {
        self.orchestration(json!({
            "invocationInput": { "actionGroupInvocationInput": {
                "actionGroupName": name,
                "requestBody": { "content": { "application/json": [ { "value": value } ] } }
            } }
        }))
    }

    pub fn action_group_output(&self, text: &str) -> RawTrace {
        self.orchestration(json!({
            "observation": { "actionGroupInvocationOutput": { "text": text } }
        }))
    }

    pub fn rationale(&self, text: &str) -> RawTrace {
        self.orchestration(json!({ "rationale": { "text": text } }))
    }

    pub fn final_response(&self, text: &str) -> RawTrace {
        self.orchestration(json!({ "observation": { "finalResponse": { "text": text } } }))
    }

    pub fn routing_intent(&self, text: &str) -> RawTrace {
        self.envelope(
            "routingClassifierTrace",
            json!({ "modelInvocationInput": { "text": text, "type": "ROUTING_CLASSIFIER" } }),
        )
    }

    pub fn routing_decision(&self, content: &str) -> RawTrace {
        self.envelope(
            "routingClassifierTrace",
            json!({ "modelInvocationOutput": { "rawResponse": { "content": content } } }),
        )
    }
}

/// Wrap a payload the way the chat channel delivers it: trace metadata as
/// a JSON string under `onUpdateChat`.
pub fn chat_update_envelope(trace: &RawTrace) -> Value {
    json!({
        "type": "chat-update",
        "onUpdateChat": { "traceMetadata": trace.value().to_string() }
    })
}
