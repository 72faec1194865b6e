//! The value and port machinery shared by agents and postmen.
//!
//! - [`value`]: rich in-process values handed to and returned from user functions
//! - [`structures`]: the registry mapping user types to wire identifiers
//! - [`ports`]: the wire-visible description of a node (ports, widgets, definitions)
//! - [`descriptor`]: structural type descriptors a definition is built from
//! - [`define`]: turns a function signature into a [`Definition`](ports::Definition)
//! - [`codec`]: shrinks rich values into wire values and expands them back

pub mod codec;
pub mod define;
pub mod descriptor;
pub mod docstring;
pub mod ports;
pub mod structures;
pub mod value;

/// Alias for serde_json::Value, the scalar form everything travels as
pub type WireValue = serde_json::Value;

use std::any::Any;

/// A helper trait that just provides the `as_any` method.
/// Needed for downcasting the type-erased structures carried by [`value::Value`].
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
