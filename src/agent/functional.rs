//! Actors that wrap a plain user function or generator.

use crate::agent::actor::{Actor, ActorBuilder};
use crate::agent::context::AssignationContext;
use crate::agent::transport::AgentTransport;
use crate::api::schema::Provision;
use crate::core::codec::{expand_inputs, shrink_outputs};
use crate::core::ports::{Definition, NodeKind};
use crate::core::structures::StructureRegistry;
use crate::core::value::Value;
use crate::error::ActorError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub type FunctionFuture = BoxFuture<'static, Result<Vec<Value>, ActorError>>;
pub type FunctionStream = BoxStream<'static, Result<Vec<Value>, ActorError>>;

type FunctionHandle = Arc<dyn Fn(AssignationContext, Vec<Value>) -> FunctionFuture + Send + Sync>;
type GeneratorHandle =
    Arc<dyn Fn(AssignationContext, Vec<Value>) -> FunctionStream + Send + Sync>;

/// A user callable. It receives the expanded arguments in port order and
/// produces one value per return port (per yielded item for generators).
#[derive(Clone)]
pub enum Callable {
    Function(FunctionHandle),
    Generator(GeneratorHandle),
}

impl Callable {
    /// # Example
    /// ```rust
    /// use taskport::{Callable, Value};
    ///
    /// let add = Callable::function(|_context, args: Vec<Value>| async move {
    ///     let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
    ///     Ok(vec![Value::Int(sum)])
    /// });
    /// ```
    pub fn function<F, Fut>(function: F) -> Self
    where
        F: Fn(AssignationContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Value>, ActorError>> + Send + 'static,
    {
        let handle: FunctionHandle =
            Arc::new(move |context: AssignationContext, args: Vec<Value>| -> FunctionFuture {
                Box::pin(function(context, args))
            });
        Callable::Function(handle)
    }

    pub fn generator<F, S>(generator: F) -> Self
    where
        F: Fn(AssignationContext, Vec<Value>) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Vec<Value>, ActorError>> + Send + 'static,
    {
        let handle: GeneratorHandle =
            Arc::new(move |context: AssignationContext, args: Vec<Value>| -> FunctionStream {
                Box::pin(generator(context, args))
            });
        Callable::Generator(handle)
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Callable::Function(_) => NodeKind::Function,
            Callable::Generator(_) => NodeKind::Generator,
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable::{:?}", self.kind())
    }
}

/// Expands inputs, calls the user function, shrinks what it returns.
///
/// Functions report RETURNED once; generators report a YIELD per item and a
/// final DONE.
pub struct FunctionalActor {
    definition: Arc<Definition>,
    structures: Arc<StructureRegistry>,
    callable: Callable,
}

impl FunctionalActor {
    pub fn new(
        definition: Arc<Definition>,
        structures: Arc<StructureRegistry>,
        callable: Callable,
    ) -> Self {
        Self {
            definition,
            structures,
            callable,
        }
    }
}

#[async_trait]
impl Actor for FunctionalActor {
    async fn on_assign(&self, context: &AssignationContext) -> Result<(), ActorError> {
        let message = context.assignation();
        let args = expand_inputs(
            &*self.definition,
            &message.args,
            &message.kwargs,
            &self.structures,
        )?;

        match &self.callable {
            Callable::Function(function) => {
                let returns = function(context.clone(), args).await?;
                let shrunk = shrink_outputs(&*self.definition, returns, &self.structures)?;
                context.returned(shrunk).await?;
            }
            Callable::Generator(generator) => {
                let mut items = generator(context.clone(), args);
                while let Some(item) = items.next().await {
                    let shrunk = shrink_outputs(&*self.definition, item?, &self.structures)?;
                    context.yielded(shrunk).await?;
                }
                context.done().await?;
            }
        }
        Ok(())
    }
}

/// An [`ActorBuilder`] producing a [`FunctionalActor`] for every provision.
pub fn functional_builder(
    definition: Arc<Definition>,
    structures: Arc<StructureRegistry>,
    callable: Callable,
) -> ActorBuilder {
    Arc::new(
        move |_provision: &Provision,
              _transport: Arc<dyn AgentTransport>|
              -> Result<Arc<dyn Actor>, ActorError> {
            let actor: Arc<dyn Actor> = Arc::new(FunctionalActor::new(
                definition.clone(),
                structures.clone(),
                callable.clone(),
            ));
            Ok(actor)
        },
    )
}
