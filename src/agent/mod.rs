//! The agent: registers nodes, turns provisions into actors and routes
//! assignations to them.
//!
//! An [`Agent`] is split the same way a node is split into its data and its
//! behaviour: [`AgentCore`] owns every map (templates, builders, actors,
//! provisions) and the operations on them, while an [`AgentLogic`] decides
//! what to do with each inbound [`AgentMessage`]. [`StatefulLogic`] is the
//! default dispatcher.

pub mod actor;
pub mod context;
pub mod functional;
pub mod messages;
pub mod registry;
pub mod transport;

use crate::api::AgentApi;
use crate::api::schema::{AssignationStatus, Id, Provision, ProvisionStatus, Template};
use crate::blocking;
use crate::config::AgentConfig;
use crate::core::{AsAny, WireValue};
use crate::error::{AgentError, ProvisionError, TransportError};
use actor::{ActorBuilder, ActorHandle};
use async_trait::async_trait;
use messages::{
    AgentMessage, AssignationMessage, ProvisionMessage, UnassignationMessage, UnprovisionMessage,
};
use registry::DefinitionRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use transport::{AgentTransport, AssignationUpdate, Broadcaster};

/// The started/running flag pair, shared so supervisors can watch it.
#[derive(Debug, Default)]
pub struct AgentState {
    started: AtomicBool,
    running: AtomicBool,
}

impl AgentState {
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Flags the loop as running for as long as it lives, including when the
/// loop future is dropped mid-await.
struct RunningGuard {
    state: Arc<AgentState>,
    instance_id: String,
}

impl RunningGuard {
    fn new(state: Arc<AgentState>, instance_id: String) -> Self {
        state.running.store(true, Ordering::SeqCst);
        Self { state, instance_id }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
        log::info!(
            "Provisioning loop stopped. We were running {}",
            self.instance_id
        );
    }
}

/// All agent state and the operations that mutate it.
pub struct AgentCore {
    config: AgentConfig,
    api: Arc<dyn AgentApi>,
    transport: Arc<dyn AgentTransport>,
    definitions: DefinitionRegistry,
    template_builders: HashMap<Id, ActorBuilder>,
    templates: HashMap<Id, Template>,
    provision_actors: HashMap<Id, ActorHandle>,
    provisions: HashMap<Id, Provision>,
    state: Arc<AgentState>,
}

impl AgentCore {
    fn new(
        config: AgentConfig,
        api: Arc<dyn AgentApi>,
        transport: Arc<dyn AgentTransport>,
        definitions: DefinitionRegistry,
    ) -> Self {
        Self {
            config,
            api,
            transport,
            definitions,
            template_builders: HashMap::new(),
            templates: HashMap::new(),
            provision_actors: HashMap::new(),
            provisions: HashMap::new(),
            state: Arc::new(AgentState::default()),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn AgentTransport> {
        &self.transport
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    pub fn template(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    pub fn provision(&self, id: &str) -> Option<&Provision> {
        self.provisions.get(id)
    }

    pub fn actor(&self, provision: &str) -> Option<&ActorHandle> {
        self.provision_actors.get(provision)
    }

    pub fn actor_count(&self) -> usize {
        self.provision_actors.len()
    }

    fn version_of(&self, params: &HashMap<String, WireValue>) -> String {
        params
            .get("version")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_version.clone())
    }

    fn approve(&mut self, template: Template, builder: ActorBuilder) {
        log::info!(
            "Approved template {} for node {}",
            template.id,
            template.node.interface
        );
        self.template_builders.insert(template.id.clone(), builder);
        self.templates.insert(template.id.clone(), template);
    }

    /// Resolves or creates the remote node and template of every registered
    /// node and maps each template to its actor builder.
    ///
    /// Stops at the first failing platform call.
    pub async fn register_definitions(&mut self) -> Result<(), AgentError> {
        let templated = self.definitions.templated_nodes().to_vec();
        for node in templated {
            let version = self.version_of(&node.params);
            let remote = self.api.find(&node.query).await?;
            let template = self
                .api
                .create_template(&remote.id, &node.params, &version)
                .await?;
            self.approve(template, node.builder);
        }

        let defined = self.definitions.defined_nodes().to_vec();
        for node in defined {
            let version = self.version_of(&node.params);
            let remote = self.api.define(&node.definition).await?;
            let template = self
                .api
                .create_template(&remote.id, &node.params, &version)
                .await?;
            self.approve(template, node.builder);
        }
        Ok(())
    }

    /// Builds and starts the actor for a provision.
    ///
    /// A provision id that is already bound replaces its actor: the old one
    /// is stopped before the new one is recorded. If the new actor fails to
    /// start, the provision is forgotten.
    pub async fn spawn_actor(&mut self, message: &ProvisionMessage) -> Result<(), AgentError> {
        let provision = self.api.get_provision(&message.provision).await?;
        let template = provision
            .template
            .as_ref()
            .ok_or_else(|| ProvisionError::MissingTemplate {
                provision: provision.id.clone(),
            })?;
        let builder = self.template_builders.get(&template.id).cloned().ok_or_else(|| {
            ProvisionError::NoActorBuilder {
                template: template.id.clone(),
            }
        })?;

        let actor = builder(&provision, self.transport.clone()).map_err(|source| {
            ProvisionError::Build {
                template: template.id.clone(),
                source,
            }
        })?;

        if let Some(previous) = self.provision_actors.remove(&provision.id) {
            log::warn!(
                "Provision {} is already bound to an actor, replacing it",
                provision.id
            );
            if let Err(err) = previous.stop().await {
                log::warn!("Replaced actor of provision {} did not stop cleanly: {err}", provision.id);
            }
        }

        let id = provision.id.clone();
        let handle = match ActorHandle::start(actor, provision.clone(), self.transport.clone()).await
        {
            Ok(handle) => handle,
            Err(source) => {
                // Nothing serves this provision anymore.
                self.provisions.remove(&id);
                return Err(ProvisionError::Start {
                    provision: id,
                    source,
                }
                .into());
            }
        };
        self.provision_actors.insert(id.clone(), handle);
        self.provisions.insert(id, provision);
        Ok(())
    }

    /// Routes an assignation to its provision's actor, or reports it CRITICAL
    /// when no actor serves that provision.
    pub async fn assign(&mut self, message: AssignationMessage) -> Result<(), AgentError> {
        let id = message.assignation.clone();
        let provision = message.provision.clone();
        let delivered = match self.provision_actors.get(&provision) {
            Some(actor) => actor.assign(message).is_ok(),
            None => false,
        };
        if !delivered {
            log::error!("No running actor for provision {provision}, rejecting assignation {id}");
            let update = AssignationUpdate::new(id, AssignationStatus::Critical)
                .with_message(format!("No actor running for provision {provision}"));
            self.transport.change_assignation(update).await?;
        }
        Ok(())
    }

    pub async fn unassign(&mut self, message: UnassignationMessage) -> Result<(), AgentError> {
        match self.provision_actors.get(&message.provision) {
            Some(actor) => {
                if let Err(err) = actor.unassign(message.assignation.clone()) {
                    log::warn!("Could not unassign {}: {err}", message.assignation);
                }
            }
            None => log::warn!(
                "Unassignation {} for provision {} which has no actor",
                message.assignation,
                message.provision
            ),
        }
        Ok(())
    }

    /// Stops the provision's actor and forgets the provision.
    pub async fn unprovide(&mut self, message: UnprovisionMessage) -> Result<(), AgentError> {
        self.provisions.remove(&message.provision);
        match self.provision_actors.remove(&message.provision) {
            Some(actor) => {
                if let Some(reason) = &message.message {
                    log::info!("Unproviding {}: {reason}", message.provision);
                }
                if let Err(err) = actor.stop().await {
                    log::warn!("Actor of provision {} did not stop cleanly: {err}", message.provision);
                }
            }
            None => log::warn!("Unprovision for provision {} which has no actor", message.provision),
        }
        Ok(())
    }

    /// Stops every actor.
    pub async fn shutdown(&mut self) {
        self.provisions.clear();
        for (id, actor) in self.provision_actors.drain() {
            if let Err(err) = actor.stop().await {
                log::warn!("Actor of provision {id} did not stop cleanly: {err}");
            }
        }
    }
}

/// Decides what an agent does with each inbound event.
#[async_trait]
pub trait AgentLogic: AsAny + Send + Sync + 'static {
    async fn process(&self, core: &mut AgentCore, message: AgentMessage)
    -> Result<(), AgentError>;
}

/// The default dispatcher.
///
/// A provision that cannot be spawned is reported CRITICAL and the loop
/// carries on; only transport failures end it.
#[derive(Debug, Clone, Default)]
pub struct StatefulLogic;

#[async_trait]
impl AgentLogic for StatefulLogic {
    async fn process(
        &self,
        core: &mut AgentCore,
        message: AgentMessage,
    ) -> Result<(), AgentError> {
        log::debug!(
            "Processing {} for provision {}",
            message.kind(),
            message.provision()
        );
        match message {
            AgentMessage::Provision(message) => {
                if let Err(err) = core.spawn_actor(&message).await {
                    if let AgentError::Transport(_) = err {
                        return Err(err);
                    }
                    log::error!("Could not spawn actor for provision {}: {err}", message.provision);
                    core.transport()
                        .change_provision(
                            &message.provision,
                            ProvisionStatus::Critical,
                            Some(err.to_string()),
                        )
                        .await?;
                }
                Ok(())
            }
            AgentMessage::Assignation(message) => core.assign(message).await,
            AgentMessage::Unassignation(message) => core.unassign(message).await,
            AgentMessage::Unprovision(message) => core.unprovide(message).await,
        }
    }
}

/// A running agent: its core, its dispatch logic and its inbox.
pub struct Agent {
    core: AgentCore,
    behaviour: Box<dyn AgentLogic>,
    inbox: mpsc::UnboundedReceiver<AgentMessage>,
    broadcaster: Broadcaster,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        api: Arc<dyn AgentApi>,
        transport: Arc<dyn AgentTransport>,
        definitions: DefinitionRegistry,
    ) -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        Self {
            core: AgentCore::new(config, api, transport, definitions),
            behaviour: Box::new(StatefulLogic),
            inbox,
            broadcaster: Broadcaster::new(sender),
        }
    }

    /// Replaces the dispatch logic.
    pub fn with_logic<L: AgentLogic>(mut self, logic: L) -> Self {
        self.behaviour = Box::new(logic);
        self
    }

    /// The current dispatch logic, if it is an `L`.
    pub fn logic<L: AgentLogic>(&self) -> Option<&L> {
        (*self.behaviour).as_any().downcast_ref::<L>()
    }

    pub fn core(&self) -> &AgentCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    pub fn broadcast(&self, message: impl Into<AgentMessage>) -> Result<(), TransportError> {
        self.broadcaster.broadcast(message)
    }

    pub fn state(&self) -> Arc<AgentState> {
        self.core.state.clone()
    }

    /// Hands the inbox to the transport.
    pub async fn connect(&self) -> Result<(), AgentError> {
        self.core
            .transport
            .connect(self.broadcaster.clone())
            .await?;
        Ok(())
    }

    /// Registers definitions, then queues the platform's outstanding
    /// provisions and assignations so the agent catches up on what it missed.
    pub async fn start(&mut self) -> Result<(), AgentError> {
        self.core.register_definitions().await?;

        if self.core.config.catch_up {
            let provisions = self.core.transport.list_provisions().await?;
            log::info!("Catching up on {} provisions", provisions.len());
            for provision in provisions {
                self.broadcast(provision)?;
            }

            let assignations = self.core.transport.list_assignations().await?;
            log::info!("Catching up on {} assignations", assignations.len());
            for assignation in assignations {
                self.broadcast(assignation)?;
            }
        }

        self.core.state.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Processes exactly one inbound event.
    pub async fn step(&mut self) -> Result<(), AgentError> {
        let message = self.inbox.recv().await.ok_or(AgentError::InboxClosed)?;
        self.behaviour.process(&mut self.core, message).await
    }

    /// Processes events until an error occurs or the future is dropped.
    ///
    /// Either way the running flag is cleared before control leaves the loop.
    pub async fn run_loop(&mut self) -> Result<(), AgentError> {
        let _running = RunningGuard::new(
            self.core.state.clone(),
            self.core.transport.instance_id().to_string(),
        );
        loop {
            self.step().await?;
        }
    }

    /// Connects, starts and runs the loop.
    pub async fn provide(&mut self) -> Result<(), AgentError> {
        log::info!(
            "Launching provisioning task. We are running {}",
            self.core.transport.instance_id()
        );
        self.connect().await?;
        self.start().await?;
        self.run_loop().await
    }

    /// [`provide`](Agent::provide) on a dedicated runtime, blocking the caller.
    pub fn provide_blocking(&mut self) -> Result<(), AgentError> {
        blocking::run(self.provide())?
    }

    /// Stops all actors and disconnects the transport.
    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        self.core.shutdown().await;
        self.core.state.started.store(false, Ordering::SeqCst);
        self.core.transport.disconnect().await?;
        Ok(())
    }
}
