use crate::agent::messages::{AgentMessage, AssignationMessage, ProvisionMessage};
use crate::api::schema::{AssignationStatus, Id, ProvisionStatus};
use crate::core::WireValue;
use crate::error::{AgentError, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The sending half of an agent's inbox, handed to the transport on connect.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sender: mpsc::UnboundedSender<AgentMessage>,
}

impl Broadcaster {
    pub(crate) fn new(sender: mpsc::UnboundedSender<AgentMessage>) -> Self {
        Self { sender }
    }

    pub fn broadcast(&self, message: impl Into<AgentMessage>) -> Result<(), TransportError> {
        self.sender
            .send(message.into())
            .map_err(|_| TransportError::Closed)
    }

    /// Parses a raw frame and broadcasts it.
    pub fn broadcast_wire(&self, wire: WireValue) -> Result<(), AgentError> {
        let message = AgentMessage::from_wire(wire)?;
        self.broadcast(message)?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

/// A status change reported for one assignation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignationUpdate {
    pub assignation: Id,
    pub status: AssignationStatus,
    #[serde(default)]
    pub returns: Option<Vec<WireValue>>,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub message: Option<String>,
}

impl AssignationUpdate {
    pub fn new(assignation: impl Into<Id>, status: AssignationStatus) -> Self {
        Self {
            assignation: assignation.into(),
            status,
            returns: None,
            progress: None,
            message: None,
        }
    }

    pub fn with_returns(mut self, returns: Vec<WireValue>) -> Self {
        self.returns = Some(returns);
        self
    }

    /// Progress in percent, clamped to 100.
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// The agent's connection to the platform.
///
/// Inbound events are pushed into the [`Broadcaster`] received on
/// [`connect`](AgentTransport::connect); everything else is outbound.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    fn instance_id(&self) -> &str;

    async fn connect(&self, broadcaster: Broadcaster) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Provisions the platform expects this agent to be serving.
    async fn list_provisions(&self) -> Result<Vec<ProvisionMessage>, TransportError>;

    /// Assignations still outstanding for this agent.
    async fn list_assignations(&self) -> Result<Vec<AssignationMessage>, TransportError>;

    async fn change_provision(
        &self,
        provision: &Id,
        status: ProvisionStatus,
        message: Option<String>,
    ) -> Result<(), TransportError>;

    async fn change_assignation(&self, update: AssignationUpdate) -> Result<(), TransportError>;

    async fn log_to_provision(
        &self,
        provision: &Id,
        level: LogLevel,
        message: &str,
    ) -> Result<(), TransportError>;

    async fn log_to_assignation(
        &self,
        assignation: &Id,
        level: LogLevel,
        message: &str,
    ) -> Result<(), TransportError>;
}
