//! The wire-visible description of a node: ports, widgets and definitions.
//!
//! Every port obeys the same shape invariant, checked by [`Port::validate`]:
//! LIST and DICT ports carry exactly one child port, STRUCTURE ports carry a
//! registry identifier, ENUM ports carry their options, primitive ports carry
//! none of these.

use crate::core::WireValue;
use crate::error::DefinitionError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The kind of value a port transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortKind {
    Int,
    String,
    Structure,
    List,
    Bool,
    Dict,
    Float,
    Enum,
}

impl PortKind {
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            PortKind::Int | PortKind::String | PortKind::Bool | PortKind::Float
        )
    }

    pub fn is_container(self) -> bool {
        matches!(self, PortKind::List | PortKind::Dict)
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortKind::Int => "INT",
            PortKind::String => "STRING",
            PortKind::Structure => "STRUCTURE",
            PortKind::List => "LIST",
            PortKind::Bool => "BOOL",
            PortKind::Dict => "DICT",
            PortKind::Float => "FLOAT",
            PortKind::Enum => "ENUM",
        };
        f.write_str(name)
    }
}

/// Whether a node returns once or yields many times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Function,
    Generator,
}

/// One member of an enum port: the label users see and the value on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumOption {
    pub label: String,
    pub value: WireValue,
}

impl EnumOption {
    pub fn new(label: impl Into<String>, value: impl Into<WireValue>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub value: WireValue,
    pub label: String,
}

/// Rendering hint for an argument port.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Widget {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl Widget {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// A search widget backed by a remote query.
    pub fn search(query: impl Into<String>) -> Self {
        Self::new("SearchWidget").with_query(query)
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_choice(mut self, label: impl Into<String>, value: impl Into<WireValue>) -> Self {
        self.choices.push(Choice {
            label: label.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }
}

/// Rendering hint for a return port.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReturnWidget {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl ReturnWidget {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            query: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Common read access over arg, return and child ports.
pub trait Port {
    fn kind(&self) -> PortKind;
    fn identifier(&self) -> Option<&str>;
    fn child(&self) -> Option<&ChildPort>;
    fn nullable(&self) -> bool;
    fn options(&self) -> &[EnumOption];

    /// Checks the shape invariant for this port and, recursively, its children.
    fn validate(&self, key: &str) -> Result<(), DefinitionError> {
        let invalid = |reason: &str| {
            Err(DefinitionError::InvalidPort {
                key: key.to_string(),
                reason: reason.to_string(),
            })
        };

        match self.kind() {
            PortKind::List | PortKind::Dict => {
                if self.identifier().is_some() {
                    return invalid("container ports cannot carry an identifier");
                }
                match self.child() {
                    Some(child) => child.validate(key),
                    None => invalid("container ports must carry a child port"),
                }
            }
            PortKind::Structure => {
                if self.child().is_some() {
                    return invalid("structure ports cannot carry a child port");
                }
                if self.identifier().is_none() {
                    return invalid("structure ports must carry an identifier");
                }
                Ok(())
            }
            PortKind::Enum => {
                if self.child().is_some() || self.identifier().is_some() {
                    return invalid("enum ports carry only options");
                }
                if self.options().is_empty() {
                    return invalid("enum ports must carry at least one option");
                }
                Ok(())
            }
            _ => {
                if self.child().is_some() || self.identifier().is_some() {
                    return invalid("primitive ports cannot carry a child or an identifier");
                }
                Ok(())
            }
        }
    }
}

/// The element description nested inside a LIST or DICT port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildPort {
    pub kind: PortKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<Box<ChildPort>>,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<EnumOption>,
}

impl ChildPort {
    pub fn new(kind: PortKind) -> Self {
        Self {
            kind,
            identifier: None,
            child: None,
            nullable: false,
            options: Vec::new(),
        }
    }
}

impl Port for ChildPort {
    fn kind(&self) -> PortKind {
        self.kind
    }
    fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }
    fn child(&self) -> Option<&ChildPort> {
        self.child.as_deref()
    }
    fn nullable(&self) -> bool {
        self.nullable
    }
    fn options(&self) -> &[EnumOption] {
        &self.options
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgPort {
    pub key: String,
    pub kind: PortKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<ChildPort>,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<WireValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<Widget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ArgPort {
    pub fn new(key: impl Into<String>, kind: PortKind) -> Self {
        Self {
            key: key.into(),
            kind,
            identifier: None,
            child: None,
            nullable: false,
            default: None,
            widget: None,
            label: None,
            description: None,
        }
    }
}

impl Port for ArgPort {
    fn kind(&self) -> PortKind {
        self.kind
    }
    fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }
    fn child(&self) -> Option<&ChildPort> {
        self.child.as_ref()
    }
    fn nullable(&self) -> bool {
        self.nullable
    }
    fn options(&self) -> &[EnumOption] {
        &[]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnPort {
    pub key: String,
    pub kind: PortKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<ChildPort>,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<EnumOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<ReturnWidget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ReturnPort {
    pub fn new(key: impl Into<String>, kind: PortKind) -> Self {
        Self {
            key: key.into(),
            kind,
            identifier: None,
            child: None,
            nullable: false,
            options: Vec::new(),
            widget: None,
            label: None,
            description: None,
        }
    }
}

impl Port for ReturnPort {
    fn kind(&self) -> PortKind {
        self.kind
    }
    fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }
    fn child(&self) -> Option<&ChildPort> {
        self.child.as_ref()
    }
    fn nullable(&self) -> bool {
        self.nullable
    }
    fn options(&self) -> &[EnumOption] {
        &self.options
    }
}

/// Anything that exposes ordered argument and return ports.
pub trait HasPorts {
    fn kind(&self) -> NodeKind;
    fn args(&self) -> &[ArgPort];
    fn returns(&self) -> &[ReturnPort];
}

/// A node definition that has not been registered with the platform yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub interface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    pub description: String,
    pub kind: NodeKind,
    pub args: Vec<ArgPort>,
    pub returns: Vec<ReturnPort>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, WireValue>,
}

impl Definition {
    pub fn is_generator(&self) -> bool {
        self.kind == NodeKind::Generator
    }

    pub fn arg(&self, key: &str) -> Option<&ArgPort> {
        self.args.iter().find(|port| port.key == key)
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        for port in &self.args {
            port.validate(&port.key)?;
        }
        for port in &self.returns {
            port.validate(&port.key)?;
        }
        Ok(())
    }
}

impl HasPorts for Definition {
    fn kind(&self) -> NodeKind {
        self.kind
    }
    fn args(&self) -> &[ArgPort] {
        &self.args
    }
    fn returns(&self) -> &[ReturnPort] {
        &self.returns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_port_kind_wire_names() {
        assert_eq!(json!(PortKind::Structure), json!("STRUCTURE"));
        assert_eq!(PortKind::Dict.to_string(), "DICT");
        let kind: PortKind = serde_json::from_value(json!("FLOAT")).unwrap();
        assert_eq!(kind, PortKind::Float);
    }

    #[test]
    fn test_container_requires_child() {
        let port = ArgPort::new("items", PortKind::List);
        assert!(matches!(
            port.validate("items"),
            Err(DefinitionError::InvalidPort { .. })
        ));

        let mut port = ArgPort::new("items", PortKind::List);
        port.child = Some(ChildPort::new(PortKind::Int));
        assert!(port.validate("items").is_ok());
    }

    #[test]
    fn test_structure_requires_identifier() {
        let mut port = ReturnPort::new("return0", PortKind::Structure);
        assert!(port.validate("return0").is_err());
        port.identifier = Some("hm/test".into());
        assert!(port.validate("return0").is_ok());
    }

    #[test]
    fn test_primitive_rejects_identifier() {
        let mut port = ArgPort::new("x", PortKind::Int);
        port.identifier = Some("hm/test".into());
        assert!(port.validate("x").is_err());
    }

    #[test]
    fn test_nested_child_is_validated() {
        let mut inner = ChildPort::new(PortKind::Dict);
        inner.child = None;
        let mut port = ArgPort::new("nested", PortKind::List);
        port.child = Some(inner);
        assert!(port.validate("nested").is_err());
    }

    #[test]
    fn test_widget_builder() {
        let widget = Widget::new("IntWidget")
            .with_range(0, 10)
            .with_placeholder("count");
        assert_eq!(widget.min, Some(0));
        assert_eq!(widget.max, Some(10));
        let wire = serde_json::to_value(&widget).unwrap();
        assert!(wire.get("query").is_none());
    }
}
