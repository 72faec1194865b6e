//! In-memory stand-ins for the remote platform and the agent transport.
//!
//! [`MockPlatform`] answers both [`AgentApi`] and [`PostmanApi`] from local
//! maps and publishes reservation and assignation events to every watcher.
//! [`MockAgentTransport`] records everything an agent reports and lets a
//! test push inbound events.

use crate::agent::messages::{AgentMessage, AssignationMessage, ProvisionMessage};
use crate::agent::transport::{AgentTransport, AssignationUpdate, Broadcaster, LogLevel};
use crate::api::schema::{
    AssignRequest, Assignation, AssignationStatus, Event, Id, Node, NodeQuery, NodeRef,
    Provision, ProvisionStatus, Reservation, ReservationStatus, ReserveRequest, Template,
};
use crate::api::{AgentApi, EventStream, PostmanApi};
use crate::core::WireValue;
use crate::core::ports::Definition;
use crate::error::{ApiError, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};

/// `None` on a feed breaks every open subscription.
type Feed<T> = broadcast::Sender<Option<Event<T>>>;

const FEED_CAPACITY: usize = 256;

fn feed_stream<T: Clone + Send + 'static>(
    receiver: broadcast::Receiver<Option<Event<T>>>,
) -> EventStream<T> {
    futures::stream::unfold(Some(receiver), |receiver| async move {
        let mut receiver = receiver?;
        loop {
            match receiver.recv().await {
                Ok(Some(event)) => return Some((Ok(event), Some(receiver))),
                Ok(None) => {
                    let err = ApiError::Subscription("connection lost".to_string());
                    return Some((Err(err), None));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Mock subscriber lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

struct PlatformState {
    nodes: HashMap<Id, Node>,
    templates: HashMap<Id, Template>,
    provisions: HashMap<Id, Provision>,
    reservations: HashMap<Id, Reservation>,
    assignations: HashMap<Id, Assignation>,
    failing: HashSet<String>,
    counter: u64,
    epoch: DateTime<Utc>,
}

impl PlatformState {
    fn next_id(&mut self, prefix: &str) -> Id {
        self.counter += 1;
        format!("{prefix}-{}", self.counter)
    }

    /// A strictly increasing timestamp.
    fn tick(&mut self) -> DateTime<Utc> {
        self.counter += 1;
        self.epoch + TimeDelta::milliseconds(self.counter as i64)
    }

    fn check(&self, operation: &str) -> Result<(), ApiError> {
        if self.failing.contains(operation) {
            return Err(ApiError::Request(format!("{operation} failed")));
        }
        Ok(())
    }
}

/// An in-memory platform.
pub struct MockPlatform {
    state: Mutex<PlatformState>,
    reservation_feed: Feed<Reservation>,
    assignation_feed: Feed<Assignation>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        let (reservation_feed, _) = broadcast::channel(FEED_CAPACITY);
        let (assignation_feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            state: Mutex::new(PlatformState {
                nodes: HashMap::new(),
                templates: HashMap::new(),
                provisions: HashMap::new(),
                reservations: HashMap::new(),
                assignations: HashMap::new(),
                failing: HashSet::new(),
                counter: 0,
                epoch: Utc::now(),
            }),
            reservation_feed,
            assignation_feed,
        }
    }

    /// Makes every later call of `operation` (e.g. `"reserve"`) fail.
    pub fn fail_on(&self, operation: &str) {
        self.state.lock().failing.insert(operation.to_string());
    }

    pub fn recover(&self, operation: &str) {
        self.state.lock().failing.remove(operation);
    }

    /// Creates a provision of `template`, as the platform does when it
    /// schedules work onto an agent. Unknown templates give a provision
    /// without one.
    pub fn add_provision(&self, template: &str) -> Provision {
        let mut state = self.state.lock();
        let id = state.next_id("provision");
        let provision = Provision {
            id: id.clone(),
            status: ProvisionStatus::Pending,
            template: state.templates.get(template).cloned(),
            statusmessage: None,
        };
        state.provisions.insert(id, provision.clone());
        provision
    }

    pub fn node(&self, interface: &str) -> Option<Node> {
        self.state
            .lock()
            .nodes
            .values()
            .find(|node| node.interface == interface)
            .cloned()
    }

    pub fn templates(&self) -> Vec<Template> {
        self.state.lock().templates.values().cloned().collect()
    }

    /// Publishes a raw reservation event, as is.
    pub fn publish_reservation(&self, event: Event<Reservation>) {
        let _ = self.reservation_feed.send(Some(event));
    }

    /// Publishes a raw assignation event, as is.
    pub fn publish_assignation(&self, event: Event<Assignation>) {
        let _ = self.assignation_feed.send(Some(event));
    }

    /// Moves an assignation to `status` with a fresh timestamp and publishes it.
    pub fn update_assignation(
        &self,
        id: &str,
        status: AssignationStatus,
        returns: Option<Vec<WireValue>>,
    ) -> Option<Assignation> {
        let assignation = {
            let mut state = self.state.lock();
            let updated_at = state.tick();
            let assignation = state.assignations.get_mut(id)?;
            assignation.status = status;
            assignation.updated_at = updated_at;
            if returns.is_some() {
                assignation.returns = returns;
            }
            assignation.clone()
        };
        self.publish_assignation(Event::Update(assignation.clone()));
        Some(assignation)
    }

    pub fn assignations(&self) -> Vec<Assignation> {
        self.state.lock().assignations.values().cloned().collect()
    }

    /// The assignation created for `reference`, if any.
    pub fn assignation_by_reference(&self, reference: &str) -> Option<Assignation> {
        self.state
            .lock()
            .assignations
            .values()
            .find(|assignation| assignation.reference == reference)
            .cloned()
    }

    /// Ends every open subscription with an error.
    pub fn break_subscriptions(&self) {
        let _ = self.reservation_feed.send(None);
        let _ = self.assignation_feed.send(None);
    }

    pub fn subscriber_count(&self) -> usize {
        self.reservation_feed.receiver_count() + self.assignation_feed.receiver_count()
    }
}

#[async_trait]
impl AgentApi for MockPlatform {
    async fn define(&self, definition: &Definition) -> Result<Node, ApiError> {
        let mut state = self.state.lock();
        state.check("define")?;
        if let Some(existing) = state.nodes.values().find(|node| {
            node.interface == definition.interface && node.package == definition.package
        }) {
            return Ok(existing.clone());
        }
        let id = state.next_id("node");
        let node = Node::from_definition(id.clone(), definition);
        state.nodes.insert(id, node.clone());
        Ok(node)
    }

    async fn find(&self, query: &NodeQuery) -> Result<Node, ApiError> {
        let state = self.state.lock();
        state.check("find")?;
        let found = match query {
            NodeQuery::Id(id) => state.nodes.get(id),
            NodeQuery::Interface { package, interface } => state.nodes.values().find(|node| {
                &node.interface == interface
                    && (package.is_none() || node.package.as_ref() == package.as_ref())
            }),
        };
        found.cloned().ok_or_else(|| ApiError::NotFound {
            kind: "Node",
            id: query.to_string(),
        })
    }

    async fn create_template(
        &self,
        node: &Id,
        params: &HashMap<String, WireValue>,
        version: &str,
    ) -> Result<Template, ApiError> {
        let mut state = self.state.lock();
        state.check("create_template")?;
        let node = state
            .nodes
            .get(node)
            .cloned()
            .ok_or_else(|| ApiError::NotFound {
                kind: "Node",
                id: node.clone(),
            })?;
        if let Some(existing) = state
            .templates
            .values_mut()
            .find(|template| template.node.id == node.id && template.version == version)
        {
            existing.params = params.clone();
            return Ok(existing.clone());
        }
        let id = state.next_id("template");
        let template = Template {
            id: id.clone(),
            node,
            params: params.clone(),
            version: version.to_string(),
        };
        state.templates.insert(id, template.clone());
        Ok(template)
    }

    async fn get_provision(&self, id: &Id) -> Result<Provision, ApiError> {
        let state = self.state.lock();
        state.check("get_provision")?;
        state
            .provisions
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound {
                kind: "Provision",
                id: id.clone(),
            })
    }
}

#[async_trait]
impl PostmanApi for MockPlatform {
    async fn reserve(&self, request: ReserveRequest) -> Result<Reservation, ApiError> {
        let reservation = {
            let mut state = self.state.lock();
            state.check("reserve")?;
            let id = state.next_id("reservation");
            let updated_at = state.tick();
            let reservation = Reservation {
                id: id.clone(),
                node: NodeRef { id: request.node },
                status: ReservationStatus::Active,
                statusmessage: None,
                reference: request.reference,
                params: request.params,
                updated_at,
            };
            state.reservations.insert(id, reservation.clone());
            reservation
        };
        self.publish_reservation(Event::Create(reservation.clone()));
        Ok(reservation)
    }

    async fn unreserve(&self, id: &Id) -> Result<Reservation, ApiError> {
        let reservation = {
            let mut state = self.state.lock();
            state.check("unreserve")?;
            let updated_at = state.tick();
            let reservation =
                state
                    .reservations
                    .get_mut(id)
                    .ok_or_else(|| ApiError::NotFound {
                        kind: "Reservation",
                        id: id.clone(),
                    })?;
            reservation.status = ReservationStatus::Cancelled;
            reservation.updated_at = updated_at;
            reservation.clone()
        };
        self.publish_reservation(Event::Update(reservation.clone()));
        Ok(reservation)
    }

    async fn assign(&self, request: AssignRequest) -> Result<Assignation, ApiError> {
        let assignation = {
            let mut state = self.state.lock();
            state.check("assign")?;
            if !state.reservations.contains_key(&request.reservation) {
                return Err(ApiError::NotFound {
                    kind: "Reservation",
                    id: request.reservation,
                });
            }
            let id = state.next_id("assignation");
            let updated_at = state.tick();
            let assignation = Assignation {
                id: id.clone(),
                reservation: Some(request.reservation),
                args: request.args,
                kwargs: HashMap::new(),
                parent: request.parent,
                status: AssignationStatus::Assigned,
                statusmessage: None,
                returns: None,
                reference: request.reference,
                updated_at,
            };
            state.assignations.insert(id, assignation.clone());
            assignation
        };
        self.publish_assignation(Event::Create(assignation.clone()));
        Ok(assignation)
    }

    async fn unassign(&self, id: &Id) -> Result<Assignation, ApiError> {
        let assignation = {
            let mut state = self.state.lock();
            state.check("unassign")?;
            let updated_at = state.tick();
            let assignation =
                state
                    .assignations
                    .get_mut(id)
                    .ok_or_else(|| ApiError::NotFound {
                        kind: "Assignation",
                        id: id.clone(),
                    })?;
            assignation.status = AssignationStatus::Cancelled;
            assignation.updated_at = updated_at;
            assignation.clone()
        };
        self.publish_assignation(Event::Update(assignation.clone()));
        Ok(assignation)
    }

    async fn watch_reservations(
        &self,
        identifier: &str,
    ) -> Result<EventStream<Reservation>, ApiError> {
        self.state.lock().check("watch_reservations")?;
        log::debug!("Mock reservation watcher '{identifier}' subscribed");
        Ok(feed_stream(self.reservation_feed.subscribe()))
    }

    async fn watch_assignations(
        &self,
        identifier: &str,
    ) -> Result<EventStream<Assignation>, ApiError> {
        self.state.lock().check("watch_assignations")?;
        log::debug!("Mock assignation watcher '{identifier}' subscribed");
        Ok(feed_stream(self.assignation_feed.subscribe()))
    }
}

/// Something an agent reported through [`MockAgentTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ProvisionChanged {
        provision: Id,
        status: ProvisionStatus,
        message: Option<String>,
    },
    AssignationChanged(AssignationUpdate),
    ProvisionLog {
        provision: Id,
        level: LogLevel,
        message: String,
    },
    AssignationLog {
        assignation: Id,
        level: LogLevel,
        message: String,
    },
}

/// A recording agent transport.
pub struct MockAgentTransport {
    instance_id: String,
    broadcaster: Mutex<Option<Broadcaster>>,
    provisions: Vec<ProvisionMessage>,
    assignations: Vec<AssignationMessage>,
    events: Mutex<Vec<TransportEvent>>,
    recorded: Notify,
}

impl Default for MockAgentTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAgentTransport {
    pub fn new() -> Self {
        Self {
            instance_id: "mock".to_string(),
            broadcaster: Mutex::new(None),
            provisions: Vec::new(),
            assignations: Vec::new(),
            events: Mutex::new(Vec::new()),
            recorded: Notify::new(),
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// Provisions reported as outstanding on catch-up.
    pub fn with_provisions(mut self, provisions: Vec<ProvisionMessage>) -> Self {
        self.provisions = provisions;
        self
    }

    /// Assignations reported as outstanding on catch-up.
    pub fn with_assignations(mut self, assignations: Vec<AssignationMessage>) -> Self {
        self.assignations = assignations;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.broadcaster.lock().is_some()
    }

    /// Pushes an inbound event into the connected agent.
    pub fn deliver(&self, message: impl Into<AgentMessage>) -> Result<(), TransportError> {
        let broadcaster = self
            .broadcaster
            .lock()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        broadcaster.broadcast(message)
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().clone()
    }

    pub fn assignation_updates(&self) -> Vec<AssignationUpdate> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                TransportEvent::AssignationChanged(update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every status reported for `provision`, oldest first.
    pub fn provision_statuses(&self, provision: &str) -> Vec<ProvisionStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                TransportEvent::ProvisionChanged {
                    provision: id,
                    status,
                    ..
                } if id == provision => Some(*status),
                _ => None,
            })
            .collect()
    }

    /// Waits until a recorded event matches `predicate`. Returns false on timeout.
    pub async fn wait_for(
        &self,
        timeout: Duration,
        predicate: impl Fn(&TransportEvent) -> bool,
    ) -> bool {
        let matched = async {
            loop {
                let notified = self.recorded.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.events.lock().iter().any(&predicate) {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, matched).await.is_ok()
    }

    fn record(&self, event: TransportEvent) {
        self.events.lock().push(event);
        self.recorded.notify_waiters();
    }
}

#[async_trait]
impl AgentTransport for MockAgentTransport {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn connect(&self, broadcaster: Broadcaster) -> Result<(), TransportError> {
        *self.broadcaster.lock() = Some(broadcaster);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.broadcaster.lock().take();
        Ok(())
    }

    async fn list_provisions(&self) -> Result<Vec<ProvisionMessage>, TransportError> {
        Ok(self.provisions.clone())
    }

    async fn list_assignations(&self) -> Result<Vec<AssignationMessage>, TransportError> {
        Ok(self.assignations.clone())
    }

    async fn change_provision(
        &self,
        provision: &Id,
        status: ProvisionStatus,
        message: Option<String>,
    ) -> Result<(), TransportError> {
        self.record(TransportEvent::ProvisionChanged {
            provision: provision.clone(),
            status,
            message,
        });
        Ok(())
    }

    async fn change_assignation(&self, update: AssignationUpdate) -> Result<(), TransportError> {
        self.record(TransportEvent::AssignationChanged(update));
        Ok(())
    }

    async fn log_to_provision(
        &self,
        provision: &Id,
        level: LogLevel,
        message: &str,
    ) -> Result<(), TransportError> {
        self.record(TransportEvent::ProvisionLog {
            provision: provision.clone(),
            level,
            message: message.to_string(),
        });
        Ok(())
    }

    async fn log_to_assignation(
        &self,
        assignation: &Id,
        level: LogLevel,
        message: &str,
    ) -> Result<(), TransportError> {
        self.record(TransportEvent::AssignationLog {
            assignation: assignation.clone(),
            level,
            message: message.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::schema::ReserveParams;

    #[tokio::test]
    async fn test_failing_operation() {
        let platform = MockPlatform::new();
        platform.fail_on("reserve");
        let request = ReserveRequest {
            node: "n".into(),
            reference: "default".into(),
            params: ReserveParams::default(),
        };
        assert!(platform.reserve(request.clone()).await.is_err());
        platform.recover("reserve");
        assert!(platform.reserve(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_watchers_see_published_events() {
        let platform = MockPlatform::new();
        let mut stream = platform.watch_reservations("default").await.unwrap();
        let reservation = platform
            .reserve(ReserveRequest {
                node: "n".into(),
                reference: "r".into(),
                params: ReserveParams::default(),
            })
            .await
            .unwrap();
        match stream.next().await {
            Some(Ok(Event::Create(seen))) => assert_eq!(seen, reservation),
            other => panic!("unexpected event {other:?}"),
        }

        platform.break_subscriptions();
        assert!(matches!(stream.next().await, Some(Err(ApiError::Subscription(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_wait_for_sees_later_events() {
        let transport = std::sync::Arc::new(MockAgentTransport::new());
        let recorder = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            recorder
                .change_provision(&"p1".to_string(), ProvisionStatus::Active, None)
                .await
                .unwrap();
        });
        let seen = transport
            .wait_for(Duration::from_secs(1), |event| {
                matches!(event, TransportEvent::ProvisionChanged { status: ProvisionStatus::Active, .. })
            })
            .await;
        assert!(seen);
        assert!(
            !transport
                .wait_for(Duration::from_millis(20), |event| {
                    matches!(event, TransportEvent::AssignationChanged(_))
                })
                .await
        );
    }
}
