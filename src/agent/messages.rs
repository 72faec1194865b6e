//! Inbound agent events.

use crate::api::schema::Id;
use crate::core::WireValue;
use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Asks the agent to bring up an actor for a provision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionMessage {
    pub provision: Id,
    #[serde(default)]
    pub template: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnprovisionMessage {
    pub provision: Id,
    #[serde(default)]
    pub message: Option<String>,
}

/// One invocation routed to the actor of `provision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignationMessage {
    pub assignation: Id,
    pub provision: Id,
    #[serde(default)]
    pub reservation: Option<Id>,
    #[serde(default)]
    pub args: Vec<WireValue>,
    #[serde(default)]
    pub kwargs: HashMap<String, WireValue>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub parent: Option<Id>,
}

impl AssignationMessage {
    pub fn new(assignation: impl Into<Id>, provision: impl Into<Id>) -> Self {
        Self {
            assignation: assignation.into(),
            provision: provision.into(),
            reservation: None,
            args: Vec::new(),
            kwargs: HashMap::new(),
            reference: None,
            parent: None,
        }
    }

    pub fn with_args(mut self, args: Vec<WireValue>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: WireValue) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnassignationMessage {
    pub assignation: Id,
    pub provision: Id,
}

/// Everything an agent's inbox can carry.
///
/// On the wire the variant is selected by a `type` field, e.g.
/// `{"type": "PROVISION", "provision": "1"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessage {
    Provision(ProvisionMessage),
    Unprovision(UnprovisionMessage),
    Assignation(AssignationMessage),
    Unassignation(UnassignationMessage),
}

impl AgentMessage {
    /// Parses a raw transport frame, rejecting unknown or malformed events.
    pub fn from_wire(wire: WireValue) -> Result<Self, AgentError> {
        let kind = wire
            .get("type")
            .and_then(WireValue::as_str)
            .unwrap_or("<missing>")
            .to_string();
        serde_json::from_value(wire).map_err(|err| AgentError::UnrecognizedEvent {
            kind,
            reason: err.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AgentMessage::Provision(_) => "PROVISION",
            AgentMessage::Unprovision(_) => "UNPROVISION",
            AgentMessage::Assignation(_) => "ASSIGNATION",
            AgentMessage::Unassignation(_) => "UNASSIGNATION",
        }
    }

    /// The provision this event concerns.
    pub fn provision(&self) -> &Id {
        match self {
            AgentMessage::Provision(m) => &m.provision,
            AgentMessage::Unprovision(m) => &m.provision,
            AgentMessage::Assignation(m) => &m.provision,
            AgentMessage::Unassignation(m) => &m.provision,
        }
    }
}

impl From<ProvisionMessage> for AgentMessage {
    fn from(message: ProvisionMessage) -> Self {
        AgentMessage::Provision(message)
    }
}

impl From<UnprovisionMessage> for AgentMessage {
    fn from(message: UnprovisionMessage) -> Self {
        AgentMessage::Unprovision(message)
    }
}

impl From<AssignationMessage> for AgentMessage {
    fn from(message: AssignationMessage) -> Self {
        AgentMessage::Assignation(message)
    }
}

impl From<UnassignationMessage> for AgentMessage {
    fn from(message: UnassignationMessage) -> Self {
        AgentMessage::Unassignation(message)
    }
}
