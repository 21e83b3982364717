//! Agent identity resolution.
//!
//! A payload is attributed to an agent by walking an ordered rule table;
//! the first rule that produces an identity wins. Resolution is total: a
//! payload with no usable signal belongs to the supervisor.

use traceflow_types::{AgentId, RawTrace};

/// One entry of the resolution cascade.
pub struct IdentityRule {
    pub name: &'static str,
    pub apply: fn(&RawTrace) -> Option<AgentId>,
}

/// Resolution cascade, highest priority first.
pub const RULES: &[IdentityRule] = &[
    IdentityRule {
        name: "exact-tag",
        apply: exact_tag,
    },
    IdentityRule {
        name: "structural-marker",
        apply: structural_marker,
    },
    IdentityRule {
        name: "name-pattern",
        apply: name_pattern,
    },
    IdentityRule {
        name: "content-pattern",
        apply: content_pattern,
    },
    IdentityRule {
        name: "orchestration-marker",
        apply: orchestration_marker,
    },
];

pub const DEFAULT_RULE: &str = "default";

/// Rules that guess an identity from payload content instead of reading a
/// name the payload carries.
const INFERRED_RULES: &[&str] = &["content-pattern", "orchestration-marker", DEFAULT_RULE];

/// Whether `rule` attributes a payload by inference rather than by a tag.
pub fn is_inferred(rule: &str) -> bool {
    INFERRED_RULES.contains(&rule)
}

const ROUTING_CLASSIFIER_TAGS: &[&str] = &[
    "ROUTING_CLASSIFIER",
    "RoutingClassifier",
    "Routing Classifier",
    "routing_classifier",
    "routing-classifier",
    "routingclassifier",
];

const SUPERVISOR_TAGS: &[&str] = &["Supervisor", "SupervisorAgent", "SUPERVISOR"];

const CUSTOMER_TAGS: &[&str] = &["Browser", "User", "Customer"];

/// Substring patterns in table order. Routing patterns fold into the
/// supervisor.
const NAME_PATTERNS: &[(&[&str], AgentId)] = &[
    (&["order"], AgentId::OrderManagement),
    (&["product"], AgentId::ProductRecommendation),
    (&["trouble"], AgentId::Troubleshoot),
    (&["personal"], AgentId::Personalization),
    (&["rout", "class"], AgentId::Supervisor),
    (&["super"], AgentId::Supervisor),
];

/// Coordination vocabulary checked before the specialist patterns when
/// scanning prompt text. Supervisor prompts enumerate every specialist, so
/// a plain table scan would misattribute them.
const COORDINATION_PATTERNS: &[&str] = &["super", "orchestrat", "rout", "class"];

pub fn resolve(trace: &RawTrace) -> AgentId {
    resolve_with_rule(trace).0
}

/// Resolve and report which rule produced the identity.
pub fn resolve_with_rule(trace: &RawTrace) -> (AgentId, &'static str) {
    for rule in RULES {
        if let Some(agent) = (rule.apply)(trace) {
            tracing::debug!(rule = rule.name, agent = %agent, "resolved agent identity");
            return (agent, rule.name);
        }
    }
    (AgentId::Supervisor, DEFAULT_RULE)
}

/// Map a free-text collaborator name to an agent.
///
/// In `strict` mode an unrecognised name yields `None` instead of the
/// supervisor fallback, so ownership checks never attribute on a guess.
pub fn collaborator_to_agent(name: &str, strict: bool) -> Option<AgentId> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") {
        return fallback(strict);
    }
    exact_name(trimmed)
        .or_else(|| match_pattern(trimmed))
        .or_else(|| fallback(strict))
}

fn fallback(strict: bool) -> Option<AgentId> {
    if strict { None } else { Some(AgentId::Supervisor) }
}

/// Exact tag lookup over routing, supervisor, customer and canonical names.
pub fn exact_name(name: &str) -> Option<AgentId> {
    if ROUTING_CLASSIFIER_TAGS.contains(&name) || SUPERVISOR_TAGS.contains(&name) {
        return Some(AgentId::Supervisor);
    }
    if CUSTOMER_TAGS.contains(&name) {
        return Some(AgentId::Customer);
    }
    name.parse::<AgentId>().ok()
}

/// Case-insensitive substring lookup against the pattern table.
pub fn match_pattern(text: &str) -> Option<AgentId> {
    let lower = text.to_lowercase();
    NAME_PATTERNS
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|p| lower.contains(p)))
        .map(|(_, agent)| *agent)
}

fn match_prompt_text(text: &str) -> Option<AgentId> {
    let lower = text.to_lowercase();
    if COORDINATION_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(AgentId::Supervisor);
    }
    match_pattern(&lower)
}

fn exact_tag(trace: &RawTrace) -> Option<AgentId> {
    if trace
        .str_at("/type")
        .is_some_and(|t| ROUTING_CLASSIFIER_TAGS.contains(&t))
    {
        return Some(AgentId::Supervisor);
    }
    [
        trace.agent_name(),
        trace.collaborator_name(),
        trace.str_at("/originalAgentType"),
    ]
    .into_iter()
    .flatten()
    .find_map(exact_name)
}

fn structural_marker(trace: &RawTrace) -> Option<AgentId> {
    let routing_input = [
        "/trace/orchestrationTrace/modelInvocationInput/type",
        "/trace/routingClassifierTrace/modelInvocationInput/type",
        "/trace/preProcessingTrace/modelInvocationInput/type",
        "/modelInvocationInput/type",
    ]
    .iter()
    .any(|p| trace.str_at(p) == Some("ROUTING_CLASSIFIER"));

    let routing_trace_type = ["/trace_type", "/trace/trace_type"].iter().any(|p| {
        trace
            .str_at(p)
            .is_some_and(|t| ROUTING_CLASSIFIER_TAGS.contains(&t))
    });

    let supervisor_metadata = trace.at("/supervisorMetadata").is_some()
        || trace
            .at("/trace/orchestrationTrace/supervisorMetadata")
            .is_some()
        || trace.at("/trace/supervisorTrace").is_some();

    (trace.at("/trace/routingClassifierTrace").is_some()
        || routing_input
        || routing_trace_type
        || supervisor_metadata)
        .then_some(AgentId::Supervisor)
}

fn name_pattern(trace: &RawTrace) -> Option<AgentId> {
    [
        trace.agent_name(),
        trace.collaborator_name(),
        trace.agent_id_field(),
    ]
    .into_iter()
    .flatten()
    .find_map(match_pattern)
}

fn content_pattern(trace: &RawTrace) -> Option<AgentId> {
    if trace.has_family_field("/rationale") || trace.has_family_field("/observation/finalResponse")
    {
        return Some(AgentId::Supervisor);
    }

    let collaborator = [
        "/invocationInput/agentCollaboratorInvocationInput/agentCollaboratorName",
        "/observation/agentCollaboratorInvocationOutput/agentCollaboratorName",
    ]
    .iter()
    .filter_map(|p| trace.family_str(p))
    .find_map(match_pattern);
    if collaborator.is_some() {
        return collaborator;
    }

    [
        "/invocationInput/agentCollaboratorInvocationInput/input/text",
        "/modelInvocationInput/text",
        "/invocationInput/knowledgeBaseLookupInput/text",
        "/modelInvocationOutput/rawResponse/content",
    ]
    .iter()
    .filter_map(|p| trace.family_str(p))
    .find_map(match_prompt_text)
}

fn orchestration_marker(trace: &RawTrace) -> Option<AgentId> {
    (trace.at("/trace/orchestrationTrace/modelInvocationInput").is_some()
        || trace
            .at("/trace/orchestrationTrace/modelInvocationOutput")
            .is_some())
    .then_some(AgentId::Supervisor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trace(value: serde_json::Value) -> RawTrace {
        RawTrace::new(value)
    }

    #[test]
    fn test_empty_payload_defaults_to_supervisor() {
        assert_eq!(
            resolve_with_rule(&trace(json!({}))),
            (AgentId::Supervisor, DEFAULT_RULE)
        );
        assert_eq!(resolve(&trace(json!(null))), AgentId::Supervisor);
        assert_eq!(resolve(&trace(json!([1, 2, 3]))), AgentId::Supervisor);
        assert_eq!(resolve(&trace(json!("text"))), AgentId::Supervisor);
    }

    #[test]
    fn test_untagged_payloads_are_inferred() {
        let bare = trace(json!({
            "trace": { "orchestrationTrace": { "modelInvocationOutput": {} } }
        }));
        let (agent, rule) = resolve_with_rule(&bare);
        assert_eq!(agent, AgentId::Supervisor);
        assert!(is_inferred(rule));

        let tagged = trace(json!({ "collaboratorName": "OrderManagement" }));
        assert!(!is_inferred(resolve_with_rule(&tagged).1));
    }

    #[test]
    fn test_routing_classifier_tag_folds_into_supervisor() {
        let t = trace(json!({ "agentName": "ROUTING_CLASSIFIER" }));
        assert_eq!(resolve_with_rule(&t), (AgentId::Supervisor, "exact-tag"));

        let t = trace(json!({ "type": "ROUTING_CLASSIFIER" }));
        assert_eq!(resolve(&t), AgentId::Supervisor);
    }

    #[test]
    fn test_exact_tag_beats_structure() {
        let t = trace(json!({
            "agentName": "Troubleshoot",
            "trace": { "routingClassifierTrace": { "modelInvocationInput": {} } }
        }));
        assert_eq!(resolve_with_rule(&t), (AgentId::Troubleshoot, "exact-tag"));
    }

    #[test]
    fn test_structural_marker() {
        let t = trace(json!({
            "trace": { "orchestrationTrace": {
                "modelInvocationInput": { "type": "ROUTING_CLASSIFIER", "text": "order stuff" }
            } }
        }));
        assert_eq!(
            resolve_with_rule(&t),
            (AgentId::Supervisor, "structural-marker")
        );
    }

    #[test]
    fn test_name_pattern_table_order() {
        let t = trace(json!({ "agentName": "order-management-agent-v2" }));
        assert_eq!(
            resolve_with_rule(&t),
            (AgentId::OrderManagement, "name-pattern")
        );

        let t = trace(json!({ "collaboratorName": "PersonalizationAssistant" }));
        assert_eq!(resolve(&t), AgentId::Personalization);

        let t = trace(json!({ "agentId": "tech-troubleshooter" }));
        assert_eq!(resolve(&t), AgentId::Troubleshoot);
    }

    #[test]
    fn test_collaborator_invocation_names_the_callee() {
        let t = trace(json!({
            "trace": { "orchestrationTrace": { "invocationInput": {
                "agentCollaboratorInvocationInput": {
                    "agentCollaboratorName": "ProductRecommendationAgent",
                    "input": { "text": "find me boots" }
                }
            } } }
        }));
        assert_eq!(
            resolve_with_rule(&t),
            (AgentId::ProductRecommendation, "content-pattern")
        );
    }

    #[test]
    fn test_supervisor_prompt_is_not_misattributed() {
        let t = trace(json!({
            "trace": { "orchestrationTrace": { "modelInvocationInput": {
                "text": "You are a supervisor. Collaborators: order, product, troubleshoot."
            } } }
        }));
        assert_eq!(resolve(&t), AgentId::Supervisor);
    }

    #[test]
    fn test_bare_model_invocation_is_orchestration() {
        let t = trace(json!({
            "trace": { "orchestrationTrace": { "modelInvocationOutput": { "metadata": {} } } }
        }));
        assert_eq!(
            resolve_with_rule(&t),
            (AgentId::Supervisor, "orchestration-marker")
        );
    }

    #[test]
    fn test_collaborator_to_agent_strict() {
        assert_eq!(collaborator_to_agent("Unknown", true), None);
        assert_eq!(
            collaborator_to_agent("Unknown", false),
            Some(AgentId::Supervisor)
        );
        assert_eq!(collaborator_to_agent("billing", true), None);
        assert_eq!(
            collaborator_to_agent("ROUTING_CLASSIFIER", true),
            Some(AgentId::Supervisor)
        );
        assert_eq!(
            collaborator_to_agent("OrderManagement", true),
            Some(AgentId::OrderManagement)
        );
        assert_eq!(
            collaborator_to_agent("Browser", true),
            Some(AgentId::Customer)
        );
    }
}
