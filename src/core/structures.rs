//! Maps user-defined types onto wire identifiers.
//!
//! A [`StructureRegistry`] is filled once while the process is configured and
//! then shared read-only (usually behind an `Arc`) by the definition builder,
//! the codec, agents and postmen.

use crate::core::WireValue;
use crate::core::ports::{ReturnWidget, Widget};
use crate::core::value::{StructureObject, Value};
use crate::error::StructureError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type ShrinkFn =
    Arc<dyn Fn(&StructureObject) -> Result<WireValue, StructureError> + Send + Sync>;
pub type ExpandFn =
    Arc<dyn Fn(&WireValue) -> Result<StructureObject, StructureError> + Send + Sync>;
pub type DefaultFn = Arc<dyn Fn(&Value) -> Result<WireValue, StructureError> + Send + Sync>;

/// Everything the registry knows about one user type.
#[derive(Clone)]
pub struct StructureEntry {
    pub identifier: String,
    pub type_name: &'static str,
    type_id: TypeId,
    shrink: ShrinkFn,
    expand: ExpandFn,
    default: Option<DefaultFn>,
    pub widget: Option<Widget>,
    pub return_widget: Option<ReturnWidget>,
}

impl StructureEntry {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn shrink(&self, object: &StructureObject) -> Result<WireValue, StructureError> {
        (self.shrink)(object)
    }

    pub fn expand(&self, wire: &WireValue) -> Result<StructureObject, StructureError> {
        (self.expand)(wire)
    }

    /// Converts a default value into its wire form.
    ///
    /// Uses the dedicated default converter when one was registered, and the
    /// shrink converter otherwise.
    pub fn convert_default(&self, value: &Value) -> Result<WireValue, StructureError> {
        if let Some(default) = &self.default {
            return default(value);
        }
        match value {
            Value::Structure(object) => self.shrink(object),
            other => Err(StructureError::TypeMismatch {
                identifier: self.identifier.clone(),
                expected: self.type_name.to_string(),
                found: other.shape(),
            }),
        }
    }

    pub fn with_widget(&mut self, widget: Widget) -> &mut Self {
        self.widget = Some(widget);
        self
    }

    pub fn with_return_widget(&mut self, widget: ReturnWidget) -> &mut Self {
        self.return_widget = Some(widget);
        self
    }

    pub fn with_default<F>(&mut self, default: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<WireValue, StructureError> + Send + Sync + 'static,
    {
        self.default = Some(Arc::new(default));
        self
    }
}

impl fmt::Debug for StructureEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructureEntry")
            .field("identifier", &self.identifier)
            .field("type_name", &self.type_name)
            .field("has_default", &self.default.is_some())
            .field("widget", &self.widget)
            .field("return_widget", &self.return_widget)
            .finish()
    }
}

#[derive(Clone, Default, Debug)]
pub struct StructureRegistry {
    entries: HashMap<String, StructureEntry>,
    identifiers: HashMap<TypeId, String>,
}

impl StructureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `identifier` with its two converters.
    ///
    /// Both the identifier and the type must be new to the registry. The
    /// returned entry can be decorated with widgets and a default converter.
    ///
    /// # Example
    /// ```rust
    /// use taskport::{StructureError, StructureRegistry, WireValue};
    ///
    /// #[derive(Debug, PartialEq)]
    /// struct Image(String);
    ///
    /// let mut registry = StructureRegistry::new();
    /// registry
    ///     .register::<Image, _, _>(
    ///         "@mikro/image",
    ///         |image| Ok(WireValue::from(image.0.clone())),
    ///         |wire| {
    ///             wire.as_str()
    ///                 .map(|id| Image(id.to_string()))
    ///                 .ok_or_else(|| StructureError::conversion("@mikro/image", "expected an id"))
    ///         },
    ///     )
    ///     .unwrap();
    /// assert!(registry.contains("@mikro/image"));
    /// ```
    pub fn register<T, S, E>(
        &mut self,
        identifier: impl Into<String>,
        shrink: S,
        expand: E,
    ) -> Result<&mut StructureEntry, StructureError>
    where
        T: Any + fmt::Debug + PartialEq + Send + Sync,
        S: Fn(&T) -> Result<WireValue, StructureError> + Send + Sync + 'static,
        E: Fn(&WireValue) -> Result<T, StructureError> + Send + Sync + 'static,
    {
        let identifier = identifier.into();
        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();

        if self.entries.contains_key(&identifier) {
            return Err(StructureError::Duplicate(identifier));
        }
        if let Some(existing) = self.identifiers.get(&type_id) {
            return Err(StructureError::Duplicate(format!(
                "{type_name} (already registered as {existing})"
            )));
        }

        let shrink_identifier = identifier.clone();
        let shrink: ShrinkFn = Arc::new(move |object: &StructureObject| {
            let value = object.downcast_ref::<T>().ok_or_else(|| {
                StructureError::TypeMismatch {
                    identifier: shrink_identifier.clone(),
                    expected: type_name.to_string(),
                    found: object.type_name().to_string(),
                }
            })?;
            shrink(value)
        });
        let expand: ExpandFn =
            Arc::new(move |wire: &WireValue| expand(wire).map(StructureObject::new));

        log::debug!("Registering structure {type_name} as {identifier}");
        self.identifiers.insert(type_id, identifier.clone());
        let entry = self
            .entries
            .entry(identifier.clone())
            .or_insert(StructureEntry {
                identifier,
                type_name,
                type_id,
                shrink,
                expand,
                default: None,
                widget: None,
                return_widget: None,
            });
        Ok(entry)
    }

    /// Registers a serde-capable type; its JSON form is what crosses the wire.
    pub fn register_serde<T>(
        &mut self,
        identifier: impl Into<String>,
    ) -> Result<&mut StructureEntry, StructureError>
    where
        T: Any + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned,
    {
        self.register::<T, _, _>(
            identifier,
            |value| serde_json::to_value(value).map_err(StructureError::from),
            |wire| serde_json::from_value(wire.clone()).map_err(StructureError::from),
        )
    }

    pub fn get(&self, identifier: &str) -> Result<&StructureEntry, StructureError> {
        self.entries
            .get(identifier)
            .ok_or_else(|| StructureError::UnknownIdentifier(identifier.to_string()))
    }

    pub fn entry_for_type(&self, type_id: TypeId) -> Option<&StructureEntry> {
        self.identifiers
            .get(&type_id)
            .and_then(|identifier| self.entries.get(identifier))
    }

    pub fn identifier_for<T: Any>(&self) -> Option<&str> {
        self.identifiers.get(&TypeId::of::<T>()).map(String::as_str)
    }

    pub fn shrink(
        &self,
        identifier: &str,
        object: &StructureObject,
    ) -> Result<WireValue, StructureError> {
        self.get(identifier)?.shrink(object)
    }

    pub fn expand(
        &self,
        identifier: &str,
        wire: &WireValue,
    ) -> Result<StructureObject, StructureError> {
        self.get(identifier)?.expand(wire)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
