//! Scoped helpers handed to user code while it serves a provision or an assignation.
//!
//! A context lives exactly as long as the call it was created for and is
//! passed explicitly; nothing is stashed in task-local state.

use crate::agent::messages::AssignationMessage;
use crate::agent::transport::{AgentTransport, AssignationUpdate, LogLevel};
use crate::api::schema::{AssignationStatus, Id, Provision, ProvisionStatus};
use crate::core::WireValue;
use crate::error::TransportError;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct AssignationContext {
    message: Arc<AssignationMessage>,
    transport: Arc<dyn AgentTransport>,
}

impl AssignationContext {
    pub fn new(message: AssignationMessage, transport: Arc<dyn AgentTransport>) -> Self {
        Self {
            message: Arc::new(message),
            transport,
        }
    }

    pub fn assignation(&self) -> &AssignationMessage {
        &self.message
    }

    pub fn id(&self) -> &Id {
        &self.message.assignation
    }

    pub async fn log(&self, level: LogLevel, message: &str) -> Result<(), TransportError> {
        self.transport
            .log_to_assignation(&self.message.assignation, level, message)
            .await
    }

    pub async fn progress(&self, percent: u8, message: Option<&str>) -> Result<(), TransportError> {
        let mut update =
            AssignationUpdate::new(self.id().clone(), AssignationStatus::Progress)
                .with_progress(percent);
        if let Some(message) = message {
            update = update.with_message(message);
        }
        self.transport.change_assignation(update).await
    }

    pub async fn set_status(
        &self,
        status: AssignationStatus,
        message: Option<String>,
    ) -> Result<(), TransportError> {
        let mut update = AssignationUpdate::new(self.id().clone(), status);
        update.message = message;
        self.transport.change_assignation(update).await
    }

    pub async fn returned(&self, returns: Vec<WireValue>) -> Result<(), TransportError> {
        self.transport
            .change_assignation(
                AssignationUpdate::new(self.id().clone(), AssignationStatus::Returned)
                    .with_returns(returns),
            )
            .await
    }

    pub async fn yielded(&self, returns: Vec<WireValue>) -> Result<(), TransportError> {
        self.transport
            .change_assignation(
                AssignationUpdate::new(self.id().clone(), AssignationStatus::Yield)
                    .with_returns(returns),
            )
            .await
    }

    pub async fn done(&self) -> Result<(), TransportError> {
        self.set_status(AssignationStatus::Done, None).await
    }

    pub async fn error(&self, message: impl Into<String>) -> Result<(), TransportError> {
        self.set_status(AssignationStatus::Error, Some(message.into()))
            .await
    }

    pub async fn critical(&self, message: impl Into<String>) -> Result<(), TransportError> {
        self.set_status(AssignationStatus::Critical, Some(message.into()))
            .await
    }

    pub async fn cancelled(&self) -> Result<(), TransportError> {
        self.set_status(AssignationStatus::Cancelled, None).await
    }
}

impl fmt::Debug for AssignationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssignationContext")
            .field("assignation", &self.message.assignation)
            .field("provision", &self.message.provision)
            .finish()
    }
}

#[derive(Clone)]
pub struct ProvisionContext {
    provision: Arc<Provision>,
    transport: Arc<dyn AgentTransport>,
}

impl ProvisionContext {
    pub fn new(provision: Provision, transport: Arc<dyn AgentTransport>) -> Self {
        Self {
            provision: Arc::new(provision),
            transport,
        }
    }

    pub fn provision(&self) -> &Provision {
        &self.provision
    }

    pub fn id(&self) -> &Id {
        &self.provision.id
    }

    pub async fn log(&self, level: LogLevel, message: &str) -> Result<(), TransportError> {
        self.transport
            .log_to_provision(&self.provision.id, level, message)
            .await
    }

    pub async fn set_status(
        &self,
        status: ProvisionStatus,
        message: Option<String>,
    ) -> Result<(), TransportError> {
        self.transport
            .change_provision(&self.provision.id, status, message)
            .await
    }
}

impl fmt::Debug for ProvisionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionContext")
            .field("provision", &self.provision.id)
            .field("status", &self.provision.status)
            .finish()
    }
}
