use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Top-level trace family emitted by the orchestration backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TraceFamily {
    RoutingClassifier,
    Orchestration,
}

impl TraceFamily {
    pub fn key(self) -> &'static str {
        match self {
            TraceFamily::RoutingClassifier => "routingClassifierTrace",
            TraceFamily::Orchestration => "orchestrationTrace",
        }
    }
}

/// Untrusted trace payload as delivered by the transport.
///
/// Every accessor is optional: a missing, null or empty field reads as
/// `None` so callers can fall through to the next rule instead of failing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawTrace(Value);

impl RawTrace {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Parse a payload delivered as JSON text.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self(serde_json::from_str(text)?))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Value at a JSON pointer, treating `null` as absent.
    pub fn at(&self, pointer: &str) -> Option<&Value> {
        self.0.pointer(pointer).filter(|v| !v.is_null())
    }

    /// Non-empty string at a JSON pointer.
    pub fn str_at(&self, pointer: &str) -> Option<&str> {
        non_empty_str(self.0.pointer(pointer))
    }

    pub fn agent_name(&self) -> Option<&str> {
        self.str_at("/agentName")
    }

    pub fn collaborator_name(&self) -> Option<&str> {
        self.str_at("/collaboratorName")
    }

    pub fn agent_id_field(&self) -> Option<&str> {
        self.str_at("/agentId")
    }

    pub fn session_id(&self) -> Option<&str> {
        self.str_at("/sessionId")
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.str_at("/traceId")
    }

    /// Which trace family the payload carries, if any.
    pub fn family(&self) -> Option<TraceFamily> {
        [TraceFamily::RoutingClassifier, TraceFamily::Orchestration]
            .into_iter()
            .find(|family| self.at(&format!("/trace/{}", family.key())).is_some())
    }

    /// Body of the payload's trace family.
    pub fn family_body(&self) -> Option<&Value> {
        let family = self.family()?;
        self.at(&format!("/trace/{}", family.key()))
    }

    /// Value at a pointer relative to the trace family body.
    pub fn family_at(&self, pointer: &str) -> Option<&Value> {
        self.family_body()?.pointer(pointer).filter(|v| !v.is_null())
    }

    pub fn family_str(&self, pointer: &str) -> Option<&str> {
        non_empty_str(self.family_body()?.pointer(pointer))
    }

    pub fn has_family_field(&self, pointer: &str) -> bool {
        self.family_at(pointer).is_some()
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl From<Value> for RawTrace {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_reports_json_errors() {
        let trace = RawTrace::parse(r#"{ "sessionId": "s-1" }"#).unwrap();
        assert_eq!(trace.session_id(), Some("s-1"));

        let err = RawTrace::parse("{ not json").unwrap_err();
        assert!(matches!(err, crate::Error::Json(_)));
        assert!(err.to_string().starts_with("JSON error:"));
    }

    #[test]
    fn test_missing_fields_read_as_none() {
        let trace = RawTrace::new(json!({}));
        assert!(trace.is_empty());
        assert_eq!(trace.agent_name(), None);
        assert_eq!(trace.family(), None);
        assert_eq!(trace.family_at("/modelInvocationInput"), None);
    }

    #[test]
    fn test_blank_strings_are_absent() {
        let trace = RawTrace::new(json!({ "collaboratorName": "  ", "agentName": null }));
        assert_eq!(trace.collaborator_name(), None);
        assert_eq!(trace.agent_name(), None);
    }

    #[test]
    fn test_family_detection() {
        let trace = RawTrace::new(json!({
            "trace": { "orchestrationTrace": { "rationale": { "text": "thinking" } } }
        }));
        assert_eq!(trace.family(), Some(TraceFamily::Orchestration));
        assert_eq!(trace.family_str("/rationale/text"), Some("thinking"));

        let routing = RawTrace::new(json!({
            "trace": { "routingClassifierTrace": { "modelInvocationInput": { "text": "q" } } }
        }));
        assert_eq!(routing.family(), Some(TraceFamily::RoutingClassifier));
    }
}
