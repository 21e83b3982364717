//! Inbound message routing and trace envelope parsing.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use traceflow_types::RawTrace;

/// Kind of inbound message a handler subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageType {
    Trace,
    ChatUpdate,
    Any,
}

impl MessageType {
    /// Kind of `raw`; never `Any`.
    pub fn of(raw: &Value) -> MessageType {
        let tagged = raw.get("type").and_then(Value::as_str);
        if tagged == Some("chat-update") || raw.get("onUpdateChat").is_some() {
            MessageType::ChatUpdate
        } else {
            MessageType::Trace
        }
    }

    fn accepts(self, kind: MessageType) -> bool {
        self == MessageType::Any || self == kind
    }
}

/// Id of the connection a message arrived on: the session id, suffixed with
/// the model id when one is given.
pub fn connection_id(session_id: &str, model_id: Option<&str>) -> String {
    match model_id {
        Some(model) if !model.is_empty() => format!("{}-{}", session_id, model),
        _ => session_id.to_string(),
    }
}

type Handler = Box<dyn FnMut(&Value)>;

/// Host callbacks keyed by connection and message type.
#[derive(Default)]
pub struct MessageRouter {
    handlers: BTreeMap<(String, MessageType), Vec<Handler>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        connection_id: &str,
        message_type: MessageType,
        handler: impl FnMut(&Value) + 'static,
    ) {
        self.handlers
            .entry((connection_id.to_string(), message_type))
            .or_default()
            .push(Box::new(handler));
    }

    /// Remove every handler for the pair. Returns how many were removed.
    pub fn unregister(&mut self, connection_id: &str, message_type: MessageType) -> usize {
        self.handlers
            .remove(&(connection_id.to_string(), message_type))
            .map_or(0, |handlers| handlers.len())
    }

    /// Call every handler on `connection_id` accepting the message's type.
    pub fn dispatch(&mut self, connection_id: &str, raw: &Value) -> usize {
        let kind = MessageType::of(raw);
        let mut delivered = 0;
        for ((connection, message_type), handlers) in &mut self.handlers {
            if connection != connection_id || !message_type.accepts(kind) {
                continue;
            }
            for handler in handlers.iter_mut() {
                handler(raw);
                delivered += 1;
            }
        }
        delivered
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

/// Extract the trace payload from an inbound message.
///
/// Looked up in order: `onUpdateChat.traceMetadata` (string or object), the
/// legacy `onUpdateChat.trace`, `content.trace`, then the message itself
/// when it carries `trace` or an identity tag.
pub fn parse_trace_envelope(raw: &Value) -> Option<RawTrace> {
    let chat = raw.get("onUpdateChat");

    if let Some(metadata) = chat.and_then(|c| c.get("traceMetadata"))
        && let Some(value) = decode(metadata)
        && value.is_object()
    {
        return Some(RawTrace::new(value));
    }

    if let Some(legacy) = chat.and_then(|c| c.get("trace"))
        && let Some(trace) = decode(legacy)
    {
        let mut wrapped = Map::new();
        for key in ["agentId", "agentName", "collaboratorName"] {
            if let Some(v) = trace.get(key) {
                wrapped.insert(key.to_string(), v.clone());
            }
        }
        if let Some(session) = chat.and_then(|c| c.get("sessionId")) {
            wrapped.insert("sessionId".to_string(), session.clone());
        }
        wrapped.insert("trace".to_string(), trace);
        return Some(RawTrace::new(Value::Object(wrapped)));
    }

    if let Some(content) = raw.get("content")
        && let Some(trace) = content.get("trace").and_then(decode)
    {
        let mut content = content.clone();
        content["trace"] = trace;
        return Some(RawTrace::new(content));
    }

    let tagged = ["trace", "collaboratorName", "agentName"]
        .iter()
        .any(|key| raw.get(key).is_some_and(|v| !v.is_null()));
    tagged.then(|| RawTrace::new(raw.clone()))
}

/// A JSON value, or a string holding one.
fn decode(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(text) => parse_trace_json(text),
        other => Some(other.clone()),
    }
}

/// Parse `text` as JSON, falling back to the outermost `{...}` substring
/// when the payload arrives wrapped in noise.
pub fn parse_trace_json(text: &str) -> Option<Value> {
    if let Ok(trace) = RawTrace::parse(text) {
        return Some(trace.into_value());
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match RawTrace::parse(&text[start..=end]) {
        Ok(trace) => Some(trace.into_value()),
        Err(err) => {
            tracing::warn!(error = %err, "unparseable trace payload");
            None
        }
    }
}

/// Whether the message announces the end of the response stream.
pub fn is_response_complete(raw: &Value) -> bool {
    let flag = |v: Option<&Value>| v.and_then(Value::as_bool) == Some(true);
    flag(raw.get("responseComplete"))
        || flag(raw.get("isSupervisorFinalResponse"))
        || flag(raw.pointer("/content/responseComplete"))
        || flag(raw.pointer("/onUpdateChat/responseComplete"))
}
