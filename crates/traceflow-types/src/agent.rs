use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Canonical identity of an agent in the pipeline.
///
/// The routing classifier is not a separate identity: its traces are
/// attributed to the supervisor, which owns the routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentId {
    Supervisor,
    OrderManagement,
    ProductRecommendation,
    Personalization,
    Troubleshoot,
    Customer,
}

impl AgentId {
    pub const ALL: [AgentId; 6] = [
        AgentId::Supervisor,
        AgentId::OrderManagement,
        AgentId::ProductRecommendation,
        AgentId::Personalization,
        AgentId::Troubleshoot,
        AgentId::Customer,
    ];

    /// Id of the visual node this agent is drawn as.
    pub fn node_id(self) -> &'static str {
        match self {
            AgentId::Supervisor => "supervisor-agent",
            AgentId::OrderManagement => "order-mgmt-agent",
            AgentId::ProductRecommendation => "product-rec-agent",
            AgentId::Personalization => "personalization-agent",
            AgentId::Troubleshoot => "ts-agent",
            AgentId::Customer => "customer",
        }
    }

    pub fn from_node_id(node_id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|agent| agent.node_id() == node_id)
    }

    /// Name the backend uses when tagging traces for this agent.
    pub fn canonical_name(self) -> &'static str {
        match self {
            AgentId::Supervisor => "Supervisor",
            AgentId::OrderManagement => "OrderManagement",
            AgentId::ProductRecommendation => "ProductRecommendation",
            AgentId::Personalization => "Personalization",
            AgentId::Troubleshoot => "Troubleshoot",
            AgentId::Customer => "Customer",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            AgentId::Supervisor => "Supervisor",
            AgentId::OrderManagement => "Order Management",
            AgentId::ProductRecommendation => "Product Recommendation",
            AgentId::Personalization => "Personalization",
            AgentId::Troubleshoot => "Troubleshoot",
            AgentId::Customer => "Customer",
        }
    }

    /// Lowercase fragment that identifies this agent inside free text.
    ///
    /// Only specialists have one; supervisor and customer content is too
    /// broad to sniff.
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            AgentId::OrderManagement => Some("order"),
            AgentId::ProductRecommendation => Some("product"),
            AgentId::Personalization => Some("personal"),
            AgentId::Troubleshoot => Some("trouble"),
            AgentId::Supervisor | AgentId::Customer => None,
        }
    }

    /// Label of the foundation model backing this agent, for display.
    pub fn model_label(self) -> &'static str {
        match self {
            AgentId::Supervisor => "Nova Premier",
            AgentId::ProductRecommendation => "Nova Lite",
            AgentId::Troubleshoot => "DeepSeek-R1",
            AgentId::Personalization => "Claude Sonnet 3.7 v1",
            AgentId::OrderManagement => "Claude 3.5 Haiku",
            AgentId::Customer => "Not detected",
        }
    }

    pub fn is_specialist(self) -> bool {
        self.keyword().is_some()
    }
}

/// Label shown for routing classifier traces, which fold into the supervisor.
pub const ROUTING_CLASSIFIER_MODEL_LABEL: &str = "Nova Micro V1";

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

impl FromStr for AgentId {
    type Err = Error;

    /// Accepts either a node id or a canonical agent name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_node_id(s)
            .or_else(|| {
                Self::ALL
                    .into_iter()
                    .find(|agent| agent.canonical_name() == s)
            })
            .ok_or_else(|| Error::UnknownNode(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_roundtrip() {
        for agent in AgentId::ALL {
            assert_eq!(AgentId::from_node_id(agent.node_id()), Some(agent));
        }
    }

    #[test]
    fn test_from_str_accepts_canonical_name() {
        assert_eq!(
            "ProductRecommendation".parse::<AgentId>().unwrap(),
            AgentId::ProductRecommendation
        );
        assert_eq!("ts-agent".parse::<AgentId>().unwrap(), AgentId::Troubleshoot);
        assert!("billing-agent".parse::<AgentId>().is_err());
    }

    #[test]
    fn test_only_specialists_have_keywords() {
        assert!(!AgentId::Supervisor.is_specialist());
        assert!(!AgentId::Customer.is_specialist());
        assert_eq!(AgentId::Troubleshoot.keyword(), Some("trouble"));
    }
}
