//! One-stop composition of a structure registry, a definition registry, an
//! agent and a postman.

use crate::agent::Agent;
use crate::agent::actor::ActorBuilder;
use crate::agent::context::AssignationContext;
use crate::agent::functional::Callable;
use crate::agent::registry::DefinitionRegistry;
use crate::agent::transport::AgentTransport;
use crate::api::schema::NodeQuery;
use crate::api::{AgentApi, PostmanApi};
use crate::config::{AgentConfig, PostmanConfig};
use crate::core::WireValue;
use crate::core::define::DefinitionOptions;
use crate::core::descriptor::FunctionSignature;
use crate::core::ports::Definition;
use crate::core::structures::StructureRegistry;
use crate::core::value::Value;
use crate::error::{ActorError, AgentError, DefinitionError};
use crate::postman::Postman;
use futures::Stream;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Collects what an agent offers, then hands it to an [`Agent`].
///
/// # Example
/// ```rust
/// use taskport::prelude::*;
///
/// let mut app = App::new(StructureRegistry::new());
/// app.register_function(
///     &FunctionSignature::new("add")
///         .param("a", TypeDescriptor::Int)
///         .param("b", TypeDescriptor::Int)
///         .returns(TypeDescriptor::Int)
///         .doc("Add\n\nAdds two numbers."),
///     &DefinitionOptions::new(),
///     |_context, args: Vec<Value>| async move {
///         let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
///         Ok(vec![Value::Int(sum)])
///     },
/// )
/// .unwrap();
/// assert_eq!(app.definitions().len(), 1);
/// ```
#[derive(Debug)]
pub struct App {
    structures: Arc<StructureRegistry>,
    definitions: DefinitionRegistry,
    agent_config: AgentConfig,
    postman_config: PostmanConfig,
}

impl App {
    /// Structures must be registered before the app is built; the registry is
    /// shared read-only from here on.
    pub fn new(structures: StructureRegistry) -> Self {
        let structures = Arc::new(structures);
        Self {
            definitions: DefinitionRegistry::new(structures.clone()),
            structures,
            agent_config: AgentConfig::default(),
            postman_config: PostmanConfig::default(),
        }
    }

    pub fn with_agent_config(mut self, config: AgentConfig) -> Self {
        self.agent_config = config;
        self
    }

    pub fn with_postman_config(mut self, config: PostmanConfig) -> Self {
        self.postman_config = config;
        self
    }

    pub fn structures(&self) -> &Arc<StructureRegistry> {
        &self.structures
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    pub fn register_function<F, Fut>(
        &mut self,
        signature: &FunctionSignature,
        options: &DefinitionOptions,
        function: F,
    ) -> Result<Arc<Definition>, DefinitionError>
    where
        F: Fn(AssignationContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Value>, ActorError>> + Send + 'static,
    {
        self.definitions
            .register_function(signature, options, function)
    }

    pub fn register_generator<F, S>(
        &mut self,
        signature: &FunctionSignature,
        options: &DefinitionOptions,
        generator: F,
    ) -> Result<Arc<Definition>, DefinitionError>
    where
        F: Fn(AssignationContext, Vec<Value>) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Vec<Value>, ActorError>> + Send + 'static,
    {
        self.definitions
            .register_generator(signature, options, generator)
    }

    /// Like [`register_function`](App::register_function) with template params.
    pub fn register_callable(
        &mut self,
        signature: &FunctionSignature,
        options: &DefinitionOptions,
        callable: Callable,
        params: HashMap<String, WireValue>,
    ) -> Result<Arc<Definition>, DefinitionError> {
        self.definitions
            .register_callable(signature, options, callable, params)
    }

    pub fn register_actor(
        &mut self,
        definition: Definition,
        builder: ActorBuilder,
        params: HashMap<String, WireValue>,
    ) -> Result<Arc<Definition>, DefinitionError> {
        self.definitions.register_actor(definition, builder, params)
    }

    pub fn register_template(
        &mut self,
        query: NodeQuery,
        builder: ActorBuilder,
        params: HashMap<String, WireValue>,
    ) {
        self.definitions.register_template(query, builder, params);
    }

    /// A postman sharing this app's configuration.
    pub fn postman(&self, api: Arc<dyn PostmanApi>) -> Postman {
        Postman::new(api, self.postman_config.clone())
    }

    pub fn into_agent(self, api: Arc<dyn AgentApi>, transport: Arc<dyn AgentTransport>) -> Agent {
        Agent::new(self.agent_config, api, transport, self.definitions)
    }

    /// Provides every registered node until the agent loop ends.
    pub async fn run_async(
        self,
        api: Arc<dyn AgentApi>,
        transport: Arc<dyn AgentTransport>,
    ) -> Result<(), AgentError> {
        let mut agent = self.into_agent(api, transport);
        agent.provide().await
    }

    /// Blocking [`run_async`](App::run_async).
    pub fn run(
        self,
        api: Arc<dyn AgentApi>,
        transport: Arc<dyn AgentTransport>,
    ) -> Result<(), AgentError> {
        let mut agent = self.into_agent(api, transport);
        agent.provide_blocking()
    }
}
