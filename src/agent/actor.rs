//! Actors and the task that runs each one.
//!
//! Every actor runs on its own task with an inbox. Each assignation runs as a
//! child task of that actor, which is what makes unassignation (abort, then
//! report CANCELLED) possible.

use crate::agent::context::{AssignationContext, ProvisionContext};
use crate::agent::messages::AssignationMessage;
use crate::agent::transport::{AgentTransport, AssignationUpdate};
use crate::api::schema::{AssignationStatus, Id, Provision, ProvisionStatus};
use crate::error::ActorError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// A running handler bound to exactly one provision.
#[async_trait]
pub trait Actor: Send + Sync + 'static {
    /// Called once before the provision is reported ACTIVE.
    async fn on_provide(&self, _context: &ProvisionContext) -> Result<(), ActorError> {
        Ok(())
    }

    /// Serves one assignation, reporting its results through `context`.
    ///
    /// Returning an error reports ERROR (user failure) or CRITICAL (codec and
    /// transport failures) for the assignation.
    async fn on_assign(&self, context: &AssignationContext) -> Result<(), ActorError>;

    /// Called once when the provision is torn down.
    async fn on_unprovide(&self, _context: &ProvisionContext) -> Result<(), ActorError> {
        Ok(())
    }
}

/// Builds the actor for a provision of a registered template.
pub type ActorBuilder = Arc<
    dyn Fn(&Provision, Arc<dyn AgentTransport>) -> Result<Arc<dyn Actor>, ActorError>
        + Send
        + Sync,
>;

enum Command {
    Assign(AssignationMessage),
    Unassign(Id),
    Stop(oneshot::Sender<()>),
}

/// The agent's handle on a started actor.
pub struct ActorHandle {
    provision: Id,
    sender: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl ActorHandle {
    /// Runs the provide phase and spawns the actor's task.
    ///
    /// Reports PROVIDING, then ACTIVE once `on_provide` succeeded; a failing
    /// `on_provide` reports CRITICAL and returns the error.
    pub async fn start(
        actor: Arc<dyn Actor>,
        provision: Provision,
        transport: Arc<dyn AgentTransport>,
    ) -> Result<Self, ActorError> {
        let id = provision.id.clone();
        let context = ProvisionContext::new(provision, transport.clone());

        context.set_status(ProvisionStatus::Providing, None).await?;
        if let Err(err) = actor.on_provide(&context).await {
            log::error!("Actor for provision {id} failed to provide: {err}");
            context
                .set_status(ProvisionStatus::Critical, Some(err.to_string()))
                .await?;
            return Err(err);
        }
        context.set_status(ProvisionStatus::Active, None).await?;

        let (sender, inbox) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_actor(actor, context, transport, inbox));
        log::info!("Actor for provision {id} is active");

        Ok(Self {
            provision: id,
            sender,
            task,
        })
    }

    pub fn provision(&self) -> &Id {
        &self.provision
    }

    pub fn assign(&self, message: AssignationMessage) -> Result<(), ActorError> {
        self.sender
            .send(Command::Assign(message))
            .map_err(|_| ActorError::Stopped)
    }

    pub fn unassign(&self, assignation: Id) -> Result<(), ActorError> {
        self.sender
            .send(Command::Unassign(assignation))
            .map_err(|_| ActorError::Stopped)
    }

    /// Cancels running assignations, runs `on_unprovide` and reports the
    /// provision CANCELLED. Resolves once the actor task has exited.
    pub async fn stop(self) -> Result<(), ActorError> {
        let (done, stopped) = oneshot::channel();
        self.sender
            .send(Command::Stop(done))
            .map_err(|_| ActorError::Stopped)?;
        stopped.await.map_err(|_| ActorError::Stopped)?;
        if let Err(err) = self.task.await {
            log::warn!("Actor task for provision {} ended abnormally: {err}", self.provision);
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn report_failure(context: &AssignationContext, err: ActorError) {
    log::error!("Assignation {} failed: {err}", context.id());
    let reported = if err.is_critical() {
        context.critical(err.to_string()).await
    } else {
        context.error(err.to_string()).await
    };
    if let Err(err) = reported {
        log::error!("Could not report failure of assignation {}: {err}", context.id());
    }
}

/// Aborts an assignation task and reports CANCELLED if it was still running.
async fn cancel(transport: &Arc<dyn AgentTransport>, id: Id, task: JoinHandle<()>) {
    task.abort();
    match task.await {
        Err(err) if err.is_cancelled() => {
            let update = AssignationUpdate::new(id.clone(), AssignationStatus::Cancelled);
            if let Err(err) = transport.change_assignation(update).await {
                log::error!("Could not report cancellation of assignation {id}: {err}");
            }
        }
        Err(err) => log::error!("Assignation task {id} panicked: {err}"),
        Ok(()) => log::debug!("Assignation {id} finished before it could be cancelled"),
    }
}

async fn run_actor(
    actor: Arc<dyn Actor>,
    context: ProvisionContext,
    transport: Arc<dyn AgentTransport>,
    mut inbox: mpsc::UnboundedReceiver<Command>,
) {
    let mut running: HashMap<Id, JoinHandle<()>> = HashMap::new();

    while let Some(command) = inbox.recv().await {
        running.retain(|_, task| !task.is_finished());

        match command {
            Command::Assign(message) => {
                let id = message.assignation.clone();
                let actor = actor.clone();
                let assignation = AssignationContext::new(message, transport.clone());
                let task = tokio::spawn(async move {
                    if let Err(err) = actor.on_assign(&assignation).await {
                        report_failure(&assignation, err).await;
                    }
                });
                if let Some(previous) = running.insert(id.clone(), task) {
                    log::warn!("Assignation {id} was assigned twice, cancelling the first run");
                    previous.abort();
                }
            }
            Command::Unassign(id) => match running.remove(&id) {
                Some(task) => cancel(&transport, id, task).await,
                None => log::warn!(
                    "Unassignation for assignation {id} which is not running on provision {}",
                    context.id()
                ),
            },
            Command::Stop(done) => {
                for (id, task) in running.drain() {
                    cancel(&transport, id, task).await;
                }
                if let Err(err) = actor.on_unprovide(&context).await {
                    log::error!("Actor for provision {} failed to unprovide: {err}", context.id());
                }
                if let Err(err) = context.set_status(ProvisionStatus::Cancelled, None).await {
                    log::error!("Could not report provision {} cancelled: {err}", context.id());
                }
                let _ = done.send(());
                return;
            }
        }
    }

    // The handle was dropped without a stop.
    for (_, task) in running.drain() {
        task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAgentTransport, TransportEvent};
    use std::time::Duration;

    struct Sleeper;

    #[async_trait]
    impl Actor for Sleeper {
        async fn on_assign(&self, context: &AssignationContext) -> Result<(), ActorError> {
            if context.assignation().args.is_empty() {
                return Err(ActorError::failed("need an argument"));
            }
            tokio::time::sleep(Duration::from_secs(60)).await;
            context.done().await?;
            Ok(())
        }
    }

    struct Refuses;

    #[async_trait]
    impl Actor for Refuses {
        async fn on_provide(&self, _context: &ProvisionContext) -> Result<(), ActorError> {
            Err(ActorError::failed("no resources"))
        }

        async fn on_assign(&self, _context: &AssignationContext) -> Result<(), ActorError> {
            Ok(())
        }
    }

    fn provision(id: &str) -> Provision {
        Provision {
            id: id.into(),
            status: ProvisionStatus::Pending,
            template: None,
            statusmessage: None,
        }
    }

    #[tokio::test]
    async fn test_start_reports_providing_then_active() {
        let transport = Arc::new(MockAgentTransport::new());
        let handle = ActorHandle::start(Arc::new(Sleeper), provision("p1"), transport.clone())
            .await
            .unwrap();
        assert_eq!(
            transport.provision_statuses("p1"),
            vec![ProvisionStatus::Providing, ProvisionStatus::Active]
        );
        assert!(!handle.is_finished());
        handle.stop().await.unwrap();
        assert_eq!(
            transport.provision_statuses("p1").last(),
            Some(&ProvisionStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_failed_provide_reports_critical() {
        let transport = Arc::new(MockAgentTransport::new());
        let result = ActorHandle::start(Arc::new(Refuses), provision("p1"), transport.clone()).await;
        assert!(result.is_err());
        assert_eq!(
            transport.provision_statuses("p1").last(),
            Some(&ProvisionStatus::Critical)
        );
    }

    #[tokio::test]
    async fn test_unassign_cancels_running_assignation() {
        let transport = Arc::new(MockAgentTransport::new());
        let handle = ActorHandle::start(Arc::new(Sleeper), provision("p1"), transport.clone())
            .await
            .unwrap();

        handle
            .assign(AssignationMessage::new("a1", "p1").with_args(vec![1.into()]))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.unassign("a1".into()).unwrap();

        let cancelled = transport
            .wait_for(Duration::from_secs(2), |event| {
                matches!(event, TransportEvent::AssignationChanged(update)
                    if update.assignation == "a1" && update.status == AssignationStatus::Cancelled)
            })
            .await;
        assert!(cancelled);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_user_failure_reports_error() {
        let transport = Arc::new(MockAgentTransport::new());
        let handle = ActorHandle::start(Arc::new(Sleeper), provision("p1"), transport.clone())
            .await
            .unwrap();
        handle.assign(AssignationMessage::new("a1", "p1")).unwrap();

        let errored = transport
            .wait_for(Duration::from_secs(2), |event| {
                matches!(event, TransportEvent::AssignationChanged(update)
                    if update.status == AssignationStatus::Error
                        && update.message.as_deref() == Some("need an argument"))
            })
            .await;
        assert!(errored);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_cancels_everything() {
        let transport = Arc::new(MockAgentTransport::new());
        let handle = ActorHandle::start(Arc::new(Sleeper), provision("p1"), transport.clone())
            .await
            .unwrap();
        handle
            .assign(AssignationMessage::new("a1", "p1").with_args(vec![1.into()]))
            .unwrap();
        handle
            .assign(AssignationMessage::new("a2", "p1").with_args(vec![2.into()]))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop().await.unwrap();

        let cancelled: Vec<_> = transport
            .assignation_updates()
            .into_iter()
            .filter(|u| u.status == AssignationStatus::Cancelled)
            .map(|u| u.assignation)
            .collect();
        assert_eq!(cancelled.len(), 2);
    }
}
