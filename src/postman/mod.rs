//! The caller side: reserving nodes, assigning to them and following the
//! resulting updates.
//!
//! A [`Postman`] runs four background tasks once the first request is made:
//! one subscription per record type relaying updates into an internal queue,
//! and one [`Reconciler`] loop per record type draining that queue into the
//! callers' delivery queues.

pub mod reconciler;

use crate::api::schema::{
    AssignRequest, Assignation, AssignationStatus, Id, Reservation, ReservationKey, ReserveParams,
    ReserveRequest,
};
use crate::api::{EventStream, PostmanApi};
use crate::config::PostmanConfig;
use crate::core::WireValue;
use crate::core::codec::{expand_outputs, shrink_inputs};
use crate::core::ports::{HasPorts, NodeKind};
use crate::core::structures::StructureRegistry;
use crate::core::value::Value;
use crate::error::PostmanError;
use futures::StreamExt;
use parking_lot::Mutex;
use reconciler::{Reconciler, Reconciliation, Update};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The queue a caller reads a reservation's or assignation's updates from.
pub type Delivery<T> = mpsc::UnboundedReceiver<T>;

/// Reference used for reservations made without one.
pub const DEFAULT_REFERENCE: &str = "default";

type Shared<T> = Arc<Mutex<Reconciler<T>>>;

#[derive(Clone)]
struct Relays {
    reservations: mpsc::UnboundedSender<Reservation>,
    assignations: mpsc::UnboundedSender<Assignation>,
}

struct Watchers {
    relays: Relays,
    tasks: Vec<JoinHandle<()>>,
}

impl Watchers {
    fn is_alive(&self) -> bool {
        self.tasks.iter().all(|task| !task.is_finished())
    }
}

struct PostmanInner {
    api: Arc<dyn PostmanApi>,
    config: PostmanConfig,
    reservations: Shared<Reservation>,
    assignations: Shared<Assignation>,
    watchers: tokio::sync::Mutex<Option<Watchers>>,
}

impl Drop for PostmanInner {
    fn drop(&mut self) {
        if let Some(watchers) = self.watchers.get_mut().take() {
            for task in watchers.tasks {
                task.abort();
            }
        }
    }
}

/// Relays a subscription into the reconcile loop. When the subscription
/// fails or ends, every delivery queue of that kind is closed.
async fn subscribe<T: Update>(
    kind: &'static str,
    mut stream: EventStream<T>,
    relay: mpsc::UnboundedSender<T>,
    reconciler: Shared<T>,
) {
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                if let Some(update) = event.into_payload() {
                    if relay.send(update).is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                log::error!("Watching {kind}s failed: {err}");
                break;
            }
        }
    }
    log::error!("{kind} subscription ended, closing pending {kind} queues");
    reconciler.lock().close_all();
}

async fn reconcile<T: Update>(
    kind: &'static str,
    mut relay: mpsc::UnboundedReceiver<T>,
    reconciler: Shared<T>,
) {
    while let Some(update) = relay.recv().await {
        let key = update.key();
        let outcome = reconciler.lock().accept(update);
        match outcome {
            Reconciliation::Accepted => log::debug!("Delivered {kind} update for {key}"),
            Reconciliation::Stale => log::info!("Dropped stale {kind} update for {key}"),
            Reconciliation::Unknown => {
                log::info!("Dropped {kind} update for {key}, nobody is waiting for it")
            }
        }
    }
}

/// Pushes a request's response through the same path as subscription updates,
/// or straight into the reconciler when the relay is gone.
fn relay<T: Update>(relay: &mpsc::UnboundedSender<T>, reconciler: &Shared<T>, update: T) {
    if let Err(mpsc::error::SendError(update)) = relay.send(update) {
        reconciler.lock().accept(update);
    }
}

/// Issues reservations and assignations and reconciles their updates.
///
/// Cheap to clone; clones share the same watchers and queues. The watchers
/// stop when the last clone is dropped or on [`stop_watching`](Postman::stop_watching).
#[derive(Clone)]
pub struct Postman {
    inner: Arc<PostmanInner>,
}

impl Postman {
    pub fn new(api: Arc<dyn PostmanApi>, config: PostmanConfig) -> Self {
        Self {
            inner: Arc::new(PostmanInner {
                api,
                config,
                reservations: Arc::new(Mutex::new(Reconciler::new())),
                assignations: Arc::new(Mutex::new(Reconciler::new())),
                watchers: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &PostmanConfig {
        &self.inner.config
    }

    /// Starts the watchers unless they are already running. Watchers that
    /// died are restarted as a set.
    async fn ensure_watching(&self) -> Result<Relays, PostmanError> {
        let mut watchers = self.inner.watchers.lock().await;
        if let Some(current) = watchers.as_ref() {
            if current.is_alive() {
                return Ok(current.relays.clone());
            }
            log::warn!("Postman watchers stopped, restarting them");
            for task in &current.tasks {
                task.abort();
            }
        }

        let identifier = self.inner.config.watch_identifier.as_str();
        let reservation_stream = self.inner.api.watch_reservations(identifier).await?;
        let assignation_stream = self.inner.api.watch_assignations(identifier).await?;

        let (reservations, reservation_relay) = mpsc::unbounded_channel();
        let (assignations, assignation_relay) = mpsc::unbounded_channel();
        let tasks = vec![
            tokio::spawn(subscribe(
                "reservation",
                reservation_stream,
                reservations.clone(),
                self.inner.reservations.clone(),
            )),
            tokio::spawn(subscribe(
                "assignation",
                assignation_stream,
                assignations.clone(),
                self.inner.assignations.clone(),
            )),
            tokio::spawn(reconcile(
                "reservation",
                reservation_relay,
                self.inner.reservations.clone(),
            )),
            tokio::spawn(reconcile(
                "assignation",
                assignation_relay,
                self.inner.assignations.clone(),
            )),
        ];
        log::info!("Postman is watching as '{identifier}'");

        let relays = Relays {
            reservations,
            assignations,
        };
        *watchers = Some(Watchers {
            relays: relays.clone(),
            tasks,
        });
        Ok(relays)
    }

    pub async fn is_watching(&self) -> bool {
        self.inner
            .watchers
            .lock()
            .await
            .as_ref()
            .is_some_and(Watchers::is_alive)
    }

    /// Cancels the watcher set and waits for it to wind down.
    pub async fn stop_watching(&self) {
        let watchers = self.inner.watchers.lock().await.take();
        if let Some(watchers) = watchers {
            for task in &watchers.tasks {
                task.abort();
            }
            let _ = futures::future::join_all(watchers.tasks).await;
            log::info!("Postman stopped watching");
        }
    }

    /// Reserves `node` under `reference` (or [`DEFAULT_REFERENCE`]) and
    /// returns the queue its updates are delivered to.
    pub async fn reserve(
        &self,
        node: &Id,
        params: ReserveParams,
        reference: Option<String>,
    ) -> Result<Delivery<Reservation>, PostmanError> {
        let relays = self.ensure_watching().await?;
        let reference = reference.unwrap_or_else(|| DEFAULT_REFERENCE.to_string());
        let key = ReservationKey::new(node.clone(), reference.clone());
        let queue = self.register_reservation_queue(key.clone());

        let request = ReserveRequest {
            node: node.clone(),
            reference,
            params,
        };
        let reservation = match self.inner.api.reserve(request).await {
            Ok(reservation) => reservation,
            Err(err) => {
                self.unregister_reservation_queue(&key);
                return Err(err.into());
            }
        };
        log::info!("Reserved {key} as {}", reservation.id);
        relay(&relays.reservations, &self.inner.reservations, reservation);
        Ok(queue)
    }

    pub async fn unreserve(&self, id: &Id) -> Result<Reservation, PostmanError> {
        let relays = self.ensure_watching().await?;
        let reservation = self.inner.api.unreserve(id).await?;
        log::info!("Unreserved {id}");
        relay(
            &relays.reservations,
            &self.inner.reservations,
            reservation.clone(),
        );
        Ok(reservation)
    }

    /// Assigns to a reservation. A fresh reference is generated when none is
    /// given; updates are delivered on the returned queue.
    pub async fn assign(
        &self,
        reservation: &Id,
        args: Vec<WireValue>,
        reference: Option<String>,
        parent: Option<Id>,
    ) -> Result<Delivery<Assignation>, PostmanError> {
        let relays = self.ensure_watching().await?;
        let reference = reference.unwrap_or_else(|| Uuid::new_v4().to_string());
        let queue = self.register_assignation_queue(reference.clone());

        let request = AssignRequest {
            reservation: reservation.clone(),
            args,
            reference: reference.clone(),
            parent,
        };
        let assignation = match self.inner.api.assign(request).await {
            Ok(assignation) => assignation,
            Err(err) => {
                self.unregister_assignation_queue(&reference);
                return Err(err.into());
            }
        };
        log::debug!("Assigned {reference} to reservation {reservation}");
        relay(&relays.assignations, &self.inner.assignations, assignation);
        Ok(queue)
    }

    pub async fn unassign(&self, id: &Id) -> Result<Assignation, PostmanError> {
        let relays = self.ensure_watching().await?;
        let assignation = self.inner.api.unassign(id).await?;
        log::info!("Unassigned {id}");
        relay(
            &relays.assignations,
            &self.inner.assignations,
            assignation.clone(),
        );
        Ok(assignation)
    }

    pub fn register_reservation_queue(&self, key: ReservationKey) -> Delivery<Reservation> {
        self.inner.reservations.lock().register(key)
    }

    pub fn unregister_reservation_queue(&self, key: &ReservationKey) -> bool {
        self.inner.reservations.lock().unregister(key)
    }

    pub fn register_assignation_queue(&self, reference: String) -> Delivery<Assignation> {
        self.inner.assignations.lock().register(reference)
    }

    pub fn unregister_assignation_queue(&self, reference: &str) -> bool {
        self.inner
            .assignations
            .lock()
            .unregister(&reference.to_string())
    }

    /// The freshest reservation update seen for `key` since its queue was
    /// registered. Reserving the same key again starts from `None`.
    pub fn reservation(&self, key: &ReservationKey) -> Option<Reservation> {
        self.inner.reservations.lock().snapshot(key).cloned()
    }

    /// The freshest update seen for a running assignation.
    ///
    /// `None` once the assignation reached a final state, whose update is only
    /// handed to the delivery queue, and after its queue was unregistered.
    /// [`call`](Postman::call) and [`iterate`](Postman::iterate) unregister
    /// their queue before returning.
    pub fn assignation(&self, reference: &str) -> Option<Assignation> {
        self.inner
            .assignations
            .lock()
            .snapshot(&reference.to_string())
            .cloned()
    }

    /// Shrinks the arguments for `node`, assigns them to `reservation` and
    /// waits for the result, expanded back into values.
    ///
    /// Generator nodes are rejected; collect them with [`iterate`](Postman::iterate).
    pub async fn call<N: HasPorts + ?Sized>(
        &self,
        reservation: &Id,
        node: &N,
        args: Vec<Value>,
        kwargs: HashMap<String, Value>,
        structures: &StructureRegistry,
    ) -> Result<Vec<Value>, PostmanError> {
        if node.kind() == NodeKind::Generator {
            return Err(PostmanError::WrongNodeKind {
                operation: "call",
                kind: NodeKind::Generator,
                instead: "iterate",
            });
        }
        let wire = shrink_inputs(node, args, kwargs, structures)?;
        let reference = Uuid::new_v4().to_string();
        let mut queue = self
            .assign(reservation, wire, Some(reference.clone()), None)
            .await?;

        let outcome = loop {
            let Some(update) = queue.recv().await else {
                break Err(PostmanError::QueueClosed(reference.clone()));
            };
            match update.status {
                AssignationStatus::Returned => {
                    let returns = update.returns.unwrap_or_default();
                    break expand_outputs(node, &returns, structures).map_err(PostmanError::from);
                }
                status if status.is_failure() => {
                    break Err(PostmanError::AssignationFailed {
                        reference: reference.clone(),
                        status,
                        message: update.statusmessage.unwrap_or_default(),
                    });
                }
                status => log::debug!("Assignation {reference} is {status:?}"),
            }
        };
        self.unregister_assignation_queue(&reference);
        outcome
    }

    /// Like [`call`](Postman::call) for generator nodes: collects every
    /// yielded item until DONE.
    pub async fn iterate<N: HasPorts + ?Sized>(
        &self,
        reservation: &Id,
        node: &N,
        args: Vec<Value>,
        kwargs: HashMap<String, Value>,
        structures: &StructureRegistry,
    ) -> Result<Vec<Vec<Value>>, PostmanError> {
        if node.kind() == NodeKind::Function {
            return Err(PostmanError::WrongNodeKind {
                operation: "iterate",
                kind: NodeKind::Function,
                instead: "call",
            });
        }
        let wire = shrink_inputs(node, args, kwargs, structures)?;
        let reference = Uuid::new_v4().to_string();
        let mut queue = self
            .assign(reservation, wire, Some(reference.clone()), None)
            .await?;

        let mut items = Vec::new();
        let outcome = loop {
            let Some(update) = queue.recv().await else {
                break Err(PostmanError::QueueClosed(reference.clone()));
            };
            match update.status {
                AssignationStatus::Yield => {
                    let returns = update.returns.unwrap_or_default();
                    match expand_outputs(node, &returns, structures) {
                        Ok(item) => items.push(item),
                        Err(err) => break Err(err.into()),
                    }
                }
                AssignationStatus::Done => break Ok(()),
                status if status.is_failure() => {
                    break Err(PostmanError::AssignationFailed {
                        reference: reference.clone(),
                        status,
                        message: update.statusmessage.unwrap_or_default(),
                    });
                }
                status => log::debug!("Assignation {reference} is {status:?}"),
            }
        };
        self.unregister_assignation_queue(&reference);
        outcome.map(|()| items)
    }
}

impl fmt::Debug for Postman {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Postman")
            .field("watch_identifier", &self.inner.config.watch_identifier)
            .field("reservations", &*self.inner.reservations.lock())
            .field("assignations", &*self.inner.assignations.lock())
            .finish()
    }
}
