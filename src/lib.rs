//! # Taskport
//!
//! The client-side runtime of a distributed task platform: agents that offer
//! functions to the platform, and postmen that reserve and call them.
//!
//! ## Features
//!
//! - **Typed Definitions**: Describe a function's signature once and get the
//!   wire-visible ports, widgets and defaults from it
//! - **Structures**: Register your own types and let the codec move them across
//!   the wire as identifiers
//! - **Actors**: Every provision runs on its own task; assignations can be
//!   cancelled mid-flight
//! - **Reconciled Updates**: The postman delivers each caller's updates in
//!   timestamp order, no matter how the transport delivers them
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskport::prelude::*;
//! use std::sync::Arc;
//!
//! let mut app = App::new(StructureRegistry::new());
//! app.register_function(
//!     &FunctionSignature::new("shout")
//!         .param("text", TypeDescriptor::String)
//!         .returns(TypeDescriptor::String)
//!         .doc("Shout\n\nUppercases its input."),
//!     &DefinitionOptions::new(),
//!     |_context, args: Vec<Value>| async move {
//!         let text = args[0].as_str().unwrap_or_default().to_uppercase();
//!         Ok(vec![Value::String(text)])
//!     },
//! )?;
//!
//! let platform = Arc::new(MockPlatform::new());
//! app.run(platform, Arc::new(MockAgentTransport::new()))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Module Organization
//!
//! - [`core`](crate::core): values, the structure registry, ports, definitions and the codec
//! - [`agent`]: the agent, its actors and its transport
//! - [`postman`]: reservations, assignations and update reconciliation
//! - [`api`]: the remote platform's schema and operations
//! - [`mock`]: in-memory platform and transport
//! - [`prelude`]: Commonly used types and traits (import with `use taskport::prelude::*`)
//! - [`agent_prelude`]: Only what an agent needs
//! - [`postman_prelude`]: Only what a caller needs

// ============================================================================
// Modules
// ============================================================================

pub mod agent;
pub mod api;
pub mod app;
pub mod blocking;
pub mod config;
pub mod core;
pub mod error;
pub mod mock;
pub mod postman;

// ============================================================================
// Public Re-exports - Granular Imports
// ============================================================================

// Values and structures
pub use crate::core::WireValue;
pub use crate::core::structures::{StructureEntry, StructureRegistry};
pub use crate::core::value::{StructureObject, Value};

// Ports and definitions
pub use crate::core::codec::{expand_inputs, expand_outputs, shrink_inputs, shrink_outputs};
pub use crate::core::define::{DefinitionOptions, prepare_definition};
pub use crate::core::descriptor::{Describe, FunctionSignature, TypeDescriptor};
pub use crate::core::ports::{
    ArgPort, ChildPort, Definition, EnumOption, HasPorts, NodeKind, Port, PortKind, ReturnPort,
    ReturnWidget, Widget,
};

// Agent
pub use agent::actor::{Actor, ActorBuilder, ActorHandle};
pub use agent::context::{AssignationContext, ProvisionContext};
pub use agent::functional::{Callable, FunctionalActor, functional_builder};
pub use agent::messages::{
    AgentMessage, AssignationMessage, ProvisionMessage, UnassignationMessage, UnprovisionMessage,
};
pub use agent::registry::DefinitionRegistry;
pub use agent::transport::{AgentTransport, AssignationUpdate, Broadcaster, LogLevel};
pub use agent::{Agent, AgentCore, AgentLogic, AgentState, StatefulLogic};

// Postman
pub use postman::reconciler::{Reconciler, Reconciliation, Update};
pub use postman::{Delivery, Postman};

// Platform
pub use api::schema::{
    Assignation, AssignationStatus, Id, Node, NodeQuery, Provision, ProvisionStatus,
    Reservation, ReservationKey, ReservationStatus, ReserveParams, Template,
};
pub use api::{AgentApi, PostmanApi};

// Composition and configuration
pub use app::App;
pub use config::{AgentConfig, PostmanConfig};
pub use mock::{MockAgentTransport, MockPlatform};

// Errors
pub use error::{
    ActorError, AgentError, ApiError, DefinitionError, ExpandingError, PostmanError,
    ProvisionError, ShrinkingError, StructureError, TransportError,
};

// ============================================================================
// Prelude Modules - Convenient Bulk Imports
// ============================================================================

/// The main prelude: everything needed to define, serve and call nodes.
///
/// # Example
/// ```rust
/// use taskport::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        // Agent
        Actor,
        ActorError,
        Agent,
        AgentConfig,
        AgentError,
        // Composition
        App,
        AssignationContext,
        AssignationStatus,
        Callable,
        DefinitionOptions,
        FunctionSignature,
        MockAgentTransport,
        MockPlatform,
        // Postman
        Postman,
        PostmanConfig,
        PostmanError,
        ProvisionContext,
        ReserveParams,
        StructureError,
        // Core
        StructureRegistry,
        TypeDescriptor,
        Value,
        WireValue,
        Widget,
    };
}

/// Agent-only prelude.
///
/// # Example
/// ```rust
/// use taskport::agent_prelude::*;
/// ```
pub mod agent_prelude {
    pub use super::{
        Actor, ActorBuilder, ActorError, Agent, AgentConfig, AgentError, AgentLogic, AgentTransport,
        App, AssignationContext, Callable, DefinitionOptions, DefinitionRegistry, FunctionSignature,
        ProvisionContext, StructureRegistry, TypeDescriptor, Value,
    };
}

/// Postman-only prelude.
///
/// # Example
/// ```rust
/// use taskport::postman_prelude::*;
/// ```
pub mod postman_prelude {
    pub use super::{
        AssignationStatus, Delivery, Postman, PostmanApi, PostmanConfig, PostmanError,
        ReservationKey, ReservationStatus, ReserveParams, StructureRegistry, Value, WireValue,
    };
}

// ============================================================================
// Version Information
// ============================================================================

/// The current version of taskport.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
