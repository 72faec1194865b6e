use crate::core::ports::{NodeKind, PortKind};
use crate::api::schema::AssignationStatus;
use thiserror::Error;

/// Errors raised by the structure registry and its converters.
#[derive(Debug, Error)]
pub enum StructureError {
    #[error("Type '{0}' is not registered in the structure registry")]
    NotRegistered(String),

    #[error("No structure registered under identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("Structure '{0}' is already registered")]
    Duplicate(String),

    #[error("Structure '{identifier}' expected a value of type {expected}, found {found}")]
    TypeMismatch {
        identifier: String,
        expected: String,
        found: String,
    },

    #[error("Could not convert structure '{identifier}': {message}")]
    Conversion { identifier: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StructureError {
    /// Shorthand for user converters reporting a failed conversion.
    pub fn conversion(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        StructureError::Conversion {
            identifier: identifier.into(),
            message: message.into(),
        }
    }
}

/// Errors that occur while turning a function signature into a node definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("{0} is not supported yet")]
    UnsupportedType(String),

    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error("Could not convert argument '{key}' of function {function} to an ArgPort")]
    Argument {
        function: String,
        key: String,
        #[source]
        source: Box<DefinitionError>,
    },

    #[error("Could not convert return '{key}' of function {function} to a ReturnPort")]
    Return {
        function: String,
        key: String,
        #[source]
        source: Box<DefinitionError>,
    },

    #[error("Default value of port '{key}' could not be converted")]
    Default {
        key: String,
        #[source]
        source: ShrinkingError,
    },

    #[error("We don't allow empty documentation for function {0}. Please provide one")]
    MissingDocumentation(String),

    #[error("Function {function} is declared as {declared:?} but was registered as {registered:?}")]
    KindMismatch {
        function: String,
        declared: NodeKind,
        registered: NodeKind,
    },

    #[error("Port '{key}' is malformed: {reason}")]
    InvalidPort { key: String, reason: String },
}

/// Errors raised while converting rich values into wire values.
#[derive(Debug, Error)]
pub enum ShrinkingError {
    #[error("Received {received} positional arguments but the node only declares {expected} ports")]
    TooManyArguments { expected: usize, received: usize },

    #[error("Missing value for port '{key}'")]
    MissingArgument { key: String },

    #[error("Keyword argument '{key}' does not match any port")]
    UnexpectedKeyword { key: String },

    #[error("Port '{key}' received both a positional and a keyword value")]
    DuplicateArgument { key: String },

    #[error("Port '{key}' expected {expected} but received {received}")]
    Shape {
        key: String,
        expected: PortKind,
        received: String,
    },

    #[error("Port '{key}' is not nullable but received null")]
    NotNullable { key: String },

    #[error("Could not shrink structure for port '{key}'")]
    Structure {
        key: String,
        #[source]
        source: StructureError,
    },

    #[error("Node declares {expected} return ports but {received} values were returned")]
    ReturnCount { expected: usize, received: usize },

    #[error("Port '{key}' is malformed: {reason}")]
    InvalidPort { key: String, reason: String },
}

/// Errors raised while converting wire values back into rich values.
#[derive(Debug, Error)]
pub enum ExpandingError {
    #[error("Received {received} wire values but the node declares {expected} ports")]
    Arity { expected: usize, received: usize },

    #[error("Missing value for port '{key}'")]
    MissingArgument { key: String },

    #[error("Keyword argument '{key}' does not match any port")]
    UnexpectedKeyword { key: String },

    #[error("Port '{key}' received both a positional and a keyword value")]
    DuplicateArgument { key: String },

    #[error("Port '{key}' expected {expected} but received {received}")]
    Shape {
        key: String,
        expected: PortKind,
        received: String,
    },

    #[error("Port '{key}' is not nullable but received null")]
    NotNullable { key: String },

    #[error("Port '{key}' received '{value}' which is not one of its options")]
    UnknownOption { key: String, value: String },

    #[error("Could not expand structure for port '{key}'")]
    Structure {
        key: String,
        #[source]
        source: StructureError,
    },

    #[error("Port '{key}' is malformed: {reason}")]
    InvalidPort { key: String, reason: String },
}

/// Errors reported by the remote platform.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Subscription failed: {0}")]
    Subscription(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by an agent transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Agent inbox is closed")]
    Closed,

    #[error("Transport error: {0}")]
    Send(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Errors raised inside an actor while it serves a provision or an assignation.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error(transparent)]
    Expanding(#[from] ExpandingError),

    #[error(transparent)]
    Shrinking(#[from] ShrinkingError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Actor is no longer running")]
    Stopped,

    #[error("{0}")]
    Failed(String),
}

impl ActorError {
    pub fn failed(message: impl Into<String>) -> Self {
        ActorError::Failed(message.into())
    }

    /// Codec and transport failures are the runtime's fault, not the user function's.
    pub fn is_critical(&self) -> bool {
        !matches!(self, ActorError::Failed(_))
    }
}

/// The provisioning failures (no builder, no template, actor refused to start).
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("No Actor Builder found for template {template}")]
    NoActorBuilder { template: String },

    #[error("Provision {provision} carries no template")]
    MissingTemplate { provision: String },

    #[error("Actor for template {template} could not be built")]
    Build {
        template: String,
        #[source]
        source: ActorError,
    },

    #[error("Actor for provision {provision} failed to start")]
    Start {
        provision: String,
        #[source]
        source: ActorError,
    },
}

/// Errors surfaced by the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Actor(#[from] ActorError),

    #[error("Unrecognized agent event '{kind}': {reason}")]
    UnrecognizedEvent { kind: String, reason: String },

    #[error("Agent inbox was closed")]
    InboxClosed,

    #[error("Could not build the blocking runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Errors surfaced by the postman.
#[derive(Debug, Error)]
pub enum PostmanError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Shrinking(#[from] ShrinkingError),

    #[error(transparent)]
    Expanding(#[from] ExpandingError),

    #[error("{operation} cannot serve a {kind:?} node, use {instead} instead")]
    WrongNodeKind {
        operation: &'static str,
        kind: NodeKind,
        instead: &'static str,
    },

    #[error("Delivery queue for '{0}' was closed before a final update arrived")]
    QueueClosed(String),

    #[error("Assignation {reference} ended with {status:?}: {message}")]
    AssignationFailed {
        reference: String,
        status: AssignationStatus,
        message: String,
    },
}
