//! The slice of the remote platform's schema this crate depends on.

use crate::core::WireValue;
use crate::core::ports::{ArgPort, Definition, HasPorts, NodeKind, ReturnPort};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub type Id = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Id,
    pub name: String,
    pub interface: String,
    #[serde(default)]
    pub package: Option<String>,
    pub description: String,
    pub kind: NodeKind,
    pub args: Vec<ArgPort>,
    pub returns: Vec<ReturnPort>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, WireValue>,
}

impl Node {
    /// The node the platform creates for a definition.
    pub fn from_definition(id: impl Into<Id>, definition: &Definition) -> Self {
        Self {
            id: id.into(),
            name: definition.name.clone(),
            interface: definition.interface.clone(),
            package: definition.package.clone(),
            description: definition.description.clone(),
            kind: definition.kind,
            args: definition.args.clone(),
            returns: definition.returns.clone(),
            interfaces: definition.interfaces.clone(),
            meta: definition.meta.clone(),
        }
    }

    /// Strips the platform id off again.
    pub fn definition(&self) -> Definition {
        Definition {
            name: self.name.clone(),
            interface: self.interface.clone(),
            package: self.package.clone(),
            description: self.description.clone(),
            kind: self.kind,
            args: self.args.clone(),
            returns: self.returns.clone(),
            interfaces: self.interfaces.clone(),
            meta: self.meta.clone(),
        }
    }
}

impl HasPorts for Node {
    fn kind(&self) -> NodeKind {
        self.kind
    }
    fn args(&self) -> &[ArgPort] {
        &self.args
    }
    fn returns(&self) -> &[ReturnPort] {
        &self.returns
    }
}

/// How to look up a node that already exists on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeQuery {
    Id(Id),
    Interface {
        package: Option<String>,
        interface: String,
    },
}

impl NodeQuery {
    pub fn interface(package: Option<&str>, interface: impl Into<String>) -> Self {
        NodeQuery::Interface {
            package: package.map(str::to_string),
            interface: interface.into(),
        }
    }
}

impl fmt::Display for NodeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeQuery::Id(id) => write!(f, "node {id}"),
            NodeQuery::Interface {
                package: Some(package),
                interface,
            } => write!(f, "{package}/{interface}"),
            NodeQuery::Interface { interface, .. } => f.write_str(interface),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: Id,
    pub node: Node,
    #[serde(default)]
    pub params: HashMap<String, WireValue>,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisionStatus {
    Pending,
    Bound,
    Providing,
    Active,
    Inactive,
    Canceling,
    Lost,
    Reconnecting,
    Denied,
    Error,
    Critical,
    Ended,
    Cancelled,
}

impl ProvisionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProvisionStatus::Denied
                | ProvisionStatus::Error
                | ProvisionStatus::Critical
                | ProvisionStatus::Ended
                | ProvisionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provision {
    pub id: Id,
    pub status: ProvisionStatus,
    #[serde(default)]
    pub template: Option<Template>,
    #[serde(default)]
    pub statusmessage: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Routing,
    NonViable,
    Providing,
    Waiting,
    Rerouting,
    Disconnected,
    Disconnect,
    Canceling,
    Active,
    Error,
    Ended,
    Cancelled,
    Critical,
}

impl ReservationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReservationStatus::Error
                | ReservationStatus::Ended
                | ReservationStatus::Cancelled
                | ReservationStatus::Critical
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignationStatus {
    Pending,
    Acknowledged,
    Assigned,
    Received,
    Progress,
    Yield,
    Returned,
    Done,
    Denied,
    Error,
    Critical,
    Cancel,
    Canceling,
    Cancelled,
}

impl AssignationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AssignationStatus::Returned
                | AssignationStatus::Done
                | AssignationStatus::Denied
                | AssignationStatus::Error
                | AssignationStatus::Critical
                | AssignationStatus::Cancelled
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            AssignationStatus::Denied
                | AssignationStatus::Error
                | AssignationStatus::Critical
                | AssignationStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveParams {
    pub desired_instances: u32,
    pub minimal_instances: u32,
    #[serde(default)]
    pub templates: Vec<Id>,
    #[serde(default)]
    pub agents: Vec<Id>,
}

impl Default for ReserveParams {
    fn default() -> Self {
        Self {
            desired_instances: 1,
            minimal_instances: 1,
            templates: Vec::new(),
            agents: Vec::new(),
        }
    }
}

/// The client-side identity of a reservation: node plus caller reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationKey {
    pub node: Id,
    pub reference: String,
}

impl ReservationKey {
    pub fn new(node: impl Into<Id>, reference: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            reference: reference.into(),
        }
    }
}

impl fmt::Display for ReservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.reference)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Id,
    pub node: NodeRef,
    pub status: ReservationStatus,
    #[serde(default)]
    pub statusmessage: Option<String>,
    pub reference: String,
    #[serde(default)]
    pub params: ReserveParams,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn key(&self) -> ReservationKey {
        ReservationKey::new(self.node.id.clone(), self.reference.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignation {
    pub id: Id,
    #[serde(default)]
    pub reservation: Option<Id>,
    #[serde(default)]
    pub args: Vec<WireValue>,
    #[serde(default)]
    pub kwargs: HashMap<String, WireValue>,
    #[serde(default)]
    pub parent: Option<Id>,
    pub status: AssignationStatus,
    #[serde(default)]
    pub statusmessage: Option<String>,
    #[serde(default)]
    pub returns: Option<Vec<WireValue>>,
    pub reference: String,
    pub updated_at: DateTime<Utc>,
}

/// One item of a platform subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event<T> {
    Create(T),
    Update(T),
    Delete(Id),
}

impl<T> Event<T> {
    /// The carried record; deletions carry none.
    pub fn into_payload(self) -> Option<T> {
        match self {
            Event::Create(value) | Event::Update(value) => Some(value),
            Event::Delete(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub node: Id,
    pub reference: String,
    pub params: ReserveParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignRequest {
    pub reservation: Id,
    pub args: Vec<WireValue>,
    pub reference: String,
    #[serde(default)]
    pub parent: Option<Id>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(json!(ReservationStatus::NonViable), json!("NON_VIABLE"));
        assert_eq!(json!(AssignationStatus::Returned), json!("RETURNED"));
        let status: ProvisionStatus = serde_json::from_value(json!("CANCELLED")).unwrap();
        assert!(status.is_terminal());
    }

    #[test]
    fn test_reservation_key() {
        let reservation: Reservation = serde_json::from_value(json!({
            "id": "r1",
            "node": {"id": "n1"},
            "status": "ROUTING",
            "reference": "default",
            "updated_at": "2024-01-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(reservation.key(), ReservationKey::new("n1", "default"));
        assert_eq!(reservation.key().to_string(), "n1:default");
        assert_eq!(reservation.params, ReserveParams::default());
    }

    #[test]
    fn test_event_payload() {
        let event: Event<NodeRef> = serde_json::from_value(json!({"delete": "x"})).unwrap();
        assert!(event.into_payload().is_none());
        let event = Event::Update(NodeRef { id: "x".into() });
        assert_eq!(event.into_payload(), Some(NodeRef { id: "x".into() }));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(AssignationStatus::Done.is_terminal());
        assert!(!AssignationStatus::Yield.is_terminal());
        assert!(!ReservationStatus::Active.is_terminal());
        assert!(AssignationStatus::Cancelled.is_failure());
        assert!(!AssignationStatus::Returned.is_failure());
    }
}
