//! The remote platform, as seen from this crate.
//!
//! The query/mutation/subscription transport is not part of this crate: an
//! implementation of [`AgentApi`] and [`PostmanApi`] is handed to agents and
//! postmen. [`crate::mock::MockPlatform`] is an in-memory one.

pub mod schema;

use crate::core::WireValue;
use crate::core::ports::Definition;
use crate::error::ApiError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use schema::{
    AssignRequest, Assignation, Event, Id, Node, NodeQuery, Provision, Reservation,
    ReserveRequest, Template,
};
use std::collections::HashMap;

/// A platform subscription.
pub type EventStream<T> = BoxStream<'static, Result<Event<T>, ApiError>>;

/// Operations an agent needs: registering nodes and templates, resolving provisions.
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Creates (or returns the existing) node for a definition.
    async fn define(&self, definition: &Definition) -> Result<Node, ApiError>;

    async fn find(&self, query: &NodeQuery) -> Result<Node, ApiError>;

    async fn create_template(
        &self,
        node: &Id,
        params: &HashMap<String, WireValue>,
        version: &str,
    ) -> Result<Template, ApiError>;

    async fn get_provision(&self, id: &Id) -> Result<Provision, ApiError>;
}

/// Operations a postman needs: reserving, assigning and watching both.
#[async_trait]
pub trait PostmanApi: Send + Sync {
    async fn reserve(&self, request: ReserveRequest) -> Result<Reservation, ApiError>;

    async fn unreserve(&self, id: &Id) -> Result<Reservation, ApiError>;

    async fn assign(&self, request: AssignRequest) -> Result<Assignation, ApiError>;

    async fn unassign(&self, id: &Id) -> Result<Assignation, ApiError>;

    /// Subscribes to reservation updates for the given waiter identifier.
    async fn watch_reservations(
        &self,
        identifier: &str,
    ) -> Result<EventStream<Reservation>, ApiError>;

    /// Subscribes to assignation updates for the given waiter identifier.
    async fn watch_assignations(
        &self,
        identifier: &str,
    ) -> Result<EventStream<Assignation>, ApiError>;
}
