//! What an agent offers to the platform.

use crate::agent::actor::ActorBuilder;
use crate::agent::context::AssignationContext;
use crate::agent::functional::{Callable, functional_builder};
use crate::api::schema::NodeQuery;
use crate::core::WireValue;
use crate::core::define::{DefinitionOptions, prepare_definition};
use crate::core::descriptor::FunctionSignature;
use crate::core::ports::{Definition, NodeKind};
use crate::core::structures::StructureRegistry;
use crate::core::value::Value;
use crate::error::{ActorError, DefinitionError};
use futures::Stream;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A node this agent defines itself.
#[derive(Clone)]
pub struct DefinedNode {
    pub definition: Arc<Definition>,
    pub builder: ActorBuilder,
    pub params: HashMap<String, WireValue>,
}

/// A node that already exists on the platform and that this agent can serve.
#[derive(Clone)]
pub struct TemplatedNode {
    pub query: NodeQuery,
    pub builder: ActorBuilder,
    pub params: HashMap<String, WireValue>,
}

#[derive(Clone)]
pub struct DefinitionRegistry {
    structures: Arc<StructureRegistry>,
    defined: Vec<DefinedNode>,
    templated: Vec<TemplatedNode>,
}

impl DefinitionRegistry {
    pub fn new(structures: Arc<StructureRegistry>) -> Self {
        Self {
            structures,
            defined: Vec::new(),
            templated: Vec::new(),
        }
    }

    pub fn structures(&self) -> &Arc<StructureRegistry> {
        &self.structures
    }

    /// Defines a node from `signature` and serves it with `callable`.
    ///
    /// Fails with [`DefinitionError::KindMismatch`] when a generator signature is
    /// paired with a plain function or the other way round.
    pub fn register_callable(
        &mut self,
        signature: &FunctionSignature,
        options: &DefinitionOptions,
        callable: Callable,
        params: HashMap<String, WireValue>,
    ) -> Result<Arc<Definition>, DefinitionError> {
        let declared = if signature.generator {
            NodeKind::Generator
        } else {
            NodeKind::Function
        };
        if declared != callable.kind() {
            return Err(DefinitionError::KindMismatch {
                function: signature.name.clone(),
                declared,
                registered: callable.kind(),
            });
        }

        let definition = Arc::new(prepare_definition(signature, &self.structures, options)?);
        let builder = functional_builder(definition.clone(), self.structures.clone(), callable);
        self.defined.push(DefinedNode {
            definition: definition.clone(),
            builder,
            params,
        });
        Ok(definition)
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
        self.register_callable(signature, options, Callable::function(function), HashMap::new())
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
        self.register_callable(
            signature,
            options,
            Callable::generator(generator),
            HashMap::new(),
        )
    }

    /// Registers a ready-made definition served by a custom actor.
    pub fn register_actor(
        &mut self,
        definition: Definition,
        builder: ActorBuilder,
        params: HashMap<String, WireValue>,
    ) -> Result<Arc<Definition>, DefinitionError> {
        definition.validate()?;
        let definition = Arc::new(definition);
        self.defined.push(DefinedNode {
            definition: definition.clone(),
            builder,
            params,
        });
        Ok(definition)
    }

    /// Serves a node that is looked up on the platform instead of defined.
    pub fn register_template(
        &mut self,
        query: NodeQuery,
        builder: ActorBuilder,
        params: HashMap<String, WireValue>,
    ) {
        self.templated.push(TemplatedNode {
            query,
            builder,
            params,
        });
    }

    pub fn defined_nodes(&self) -> &[DefinedNode] {
        &self.defined
    }

    pub fn templated_nodes(&self) -> &[TemplatedNode] {
        &self.templated
    }

    pub fn len(&self) -> usize {
        self.defined.len() + self.templated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionRegistry")
            .field(
                "defined",
                &self
                    .defined
                    .iter()
                    .map(|node| node.definition.interface.as_str())
                    .collect::<Vec<_>>(),
            )
            .field(
                "templated",
                &self
                    .templated
                    .iter()
                    .map(|node| node.query.to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::descriptor::TypeDescriptor;
    use crate::core::ports::PortKind;
    use futures::stream;

    fn registry() -> DefinitionRegistry {
        DefinitionRegistry::new(Arc::new(StructureRegistry::new()))
    }

    fn options() -> DefinitionOptions {
        DefinitionOptions::new().allow_empty_doc(true)
    }

    #[test]
    fn test_register_function() {
        let mut registry = registry();
        let signature = FunctionSignature::new("double")
            .param("x", TypeDescriptor::Int)
            .returns(TypeDescriptor::Int);
        let definition = registry
            .register_function(&signature, &options(), |_context, args| async move {
                Ok(vec![Value::Int(args[0].as_i64().unwrap_or_default() * 2)])
            })
            .unwrap();
        assert_eq!(definition.interface, "double");
        assert_eq!(registry.defined_nodes().len(), 1);
        assert!(registry.templated_nodes().is_empty());
    }

    #[test]
    fn test_kind_mismatch() {
        let mut registry = registry();
        let signature = FunctionSignature::new("count")
            .returns(TypeDescriptor::Int)
            .generator();
        let err = registry
            .register_function(&signature, &options(), |_context, _args| async move {
                Ok(vec![])
            })
            .unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::KindMismatch {
                declared: NodeKind::Generator,
                registered: NodeKind::Function,
                ..
            }
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_generator() {
        let mut registry = registry();
        let signature = FunctionSignature::new("count")
            .returns(TypeDescriptor::Int)
            .generator();
        registry
            .register_generator(&signature, &options(), |_context, _args| {
                stream::iter((0..3).map(|i| Ok(vec![Value::Int(i)])))
            })
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_actor_definition_rejected() {
        let mut registry = registry();
        let signature = FunctionSignature::new("f").returns(TypeDescriptor::Int);
        let mut definition = prepare_definition(
            &signature,
            &StructureRegistry::new(),
            &options(),
        )
        .unwrap();
        definition.returns[0].kind = PortKind::List;

        let builder = functional_builder(
            Arc::new(definition.clone()),
            Arc::new(StructureRegistry::new()),
            Callable::function(|_context, _args| async move { Ok(vec![]) }),
        );
        let err = registry
            .register_actor(definition, builder, HashMap::new())
            .unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidPort { .. }));
    }
}
