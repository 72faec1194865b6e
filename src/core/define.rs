//! Builds a [`Definition`] out of a [`FunctionSignature`].

use crate::core::WireValue;
use crate::core::codec;
use crate::core::descriptor::{FunctionSignature, Param, TypeDescriptor};
use crate::core::docstring::{self, Docstring};
use crate::core::ports::{
    ArgPort, ChildPort, Definition, EnumOption, NodeKind, Port, PortKind, ReturnPort,
    ReturnWidget, Widget,
};
use crate::core::structures::StructureRegistry;
use crate::core::value::Value;
use crate::error::{DefinitionError, ShrinkingError, StructureError};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};

/// Knobs for [`prepare_definition`].
#[derive(Debug, Clone, Default)]
pub struct DefinitionOptions {
    pub package: Option<String>,
    pub interface: Option<String>,
    pub widgets: HashMap<String, Widget>,
    pub return_widgets: HashMap<String, ReturnWidget>,
    pub allow_empty_doc: bool,
    pub interfaces: Vec<String>,
    /// Number of leading parameters supplied by the caller, not the platform.
    pub omit_first: usize,
    /// Number of trailing parameters supplied by the caller, not the platform.
    pub omit_last: usize,
    pub omit_keys: HashSet<String>,
    pub meta: HashMap<String, WireValue>,
}

impl DefinitionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_widget(mut self, key: impl Into<String>, widget: Widget) -> Self {
        self.widgets.insert(key.into(), widget);
        self
    }

    pub fn with_return_widget(mut self, key: impl Into<String>, widget: ReturnWidget) -> Self {
        self.return_widgets.insert(key.into(), widget);
        self
    }

    pub fn allow_empty_doc(mut self, allow: bool) -> Self {
        self.allow_empty_doc = allow;
        self
    }

    pub fn with_interfaces(mut self, interfaces: Vec<String>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn omit_first(mut self, count: usize) -> Self {
        self.omit_first = count;
        self
    }

    pub fn omit_last(mut self, count: usize) -> Self {
        self.omit_last = count;
        self
    }

    pub fn omit_key(mut self, key: impl Into<String>) -> Self {
        self.omit_keys.insert(key.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<WireValue>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    fn is_omitted(&self, index: usize, count: usize, key: &str) -> bool {
        index < self.omit_first
            || index >= count.saturating_sub(self.omit_last)
            || self.omit_keys.contains(key)
    }
}

/// Converts a descriptor into the shape of a port.
///
/// Enums are only accepted where `allow_enum` is set (return ports).
fn child_port(
    ty: &TypeDescriptor,
    registry: &StructureRegistry,
    allow_enum: bool,
) -> Result<ChildPort, DefinitionError> {
    let port = match ty {
        TypeDescriptor::Optional(inner) => {
            let mut port = child_port(inner, registry, allow_enum)?;
            port.nullable = true;
            port
        }
        TypeDescriptor::Bool => ChildPort::new(PortKind::Bool),
        TypeDescriptor::Int => ChildPort::new(PortKind::Int),
        TypeDescriptor::Float => ChildPort::new(PortKind::Float),
        TypeDescriptor::String => ChildPort::new(PortKind::String),
        TypeDescriptor::List(inner) | TypeDescriptor::Dict(inner) => {
            let kind = if matches!(ty, TypeDescriptor::List(_)) {
                PortKind::List
            } else {
                PortKind::Dict
            };
            let mut port = ChildPort::new(kind);
            port.child = Some(Box::new(child_port(inner, registry, allow_enum)?));
            port
        }
        TypeDescriptor::Enum { options, .. } if allow_enum => {
            let mut port = ChildPort::new(PortKind::Enum);
            port.options = options
                .iter()
                .map(|(label, value)| {
                    codec::shrink_value(value)
                        .map(|wire| EnumOption::new(label.clone(), wire))
                        .ok_or_else(|| {
                            DefinitionError::UnsupportedType(format!(
                                "Enum option {label} with value {}",
                                value.shape()
                            ))
                        })
                })
                .collect::<Result<_, _>>()?;
            port
        }
        TypeDescriptor::Structure { type_id, type_name } => {
            let entry = registry
                .entry_for_type(*type_id)
                .ok_or_else(|| StructureError::NotRegistered(type_name.to_string()))?;
            let mut port = ChildPort::new(PortKind::Structure);
            port.identifier = Some(entry.identifier.clone());
            port
        }
        TypeDescriptor::Enum { .. }
        | TypeDescriptor::Union(_)
        | TypeDescriptor::Tuple(_)
        | TypeDescriptor::Unit => {
            return Err(DefinitionError::UnsupportedType(ty.name()));
        }
    };
    Ok(port)
}

/// The structure a (possibly wrapped) descriptor bottoms out in.
fn innermost_structure(ty: &TypeDescriptor) -> Option<TypeId> {
    match ty {
        TypeDescriptor::Optional(inner)
        | TypeDescriptor::List(inner)
        | TypeDescriptor::Dict(inner) => innermost_structure(inner),
        TypeDescriptor::Structure { type_id, .. } => Some(*type_id),
        _ => None,
    }
}

/// Converts a default into its wire form, using registry default converters
/// for structures and recursing into containers.
fn convert_default<P: Port + ?Sized>(
    port: &P,
    key: &str,
    value: &Value,
    registry: &StructureRegistry,
) -> Result<WireValue, ShrinkingError> {
    match (port.kind(), value) {
        (_, Value::Null) => codec::shrink_port(port, key, value, registry),
        (PortKind::Structure, _) => {
            let identifier = port.identifier().ok_or_else(|| ShrinkingError::InvalidPort {
                key: key.to_string(),
                reason: "structure port without identifier".to_string(),
            })?;
            registry
                .get(identifier)
                .and_then(|entry| entry.convert_default(value))
                .map_err(|source| ShrinkingError::Structure {
                    key: key.to_string(),
                    source,
                })
        }
        (PortKind::List, Value::List(items)) => {
            let child = container_child(port, key)?;
            items
                .iter()
                .enumerate()
                .map(|(i, item)| convert_default(child, &format!("{key}[{i}]"), item, registry))
                .collect::<Result<Vec<_>, _>>()
                .map(WireValue::Array)
        }
        (PortKind::Dict, Value::Dict(map)) => {
            let child = container_child(port, key)?;
            map.iter()
                .map(|(k, item)| {
                    convert_default(child, &format!("{key}.{k}"), item, registry)
                        .map(|wire| (k.clone(), wire))
                })
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(WireValue::Object)
        }
        _ => codec::shrink_port(port, key, value, registry),
    }
}

fn container_child<'a, P: Port + ?Sized>(
    port: &'a P,
    key: &str,
) -> Result<&'a ChildPort, ShrinkingError> {
    port.child().ok_or_else(|| ShrinkingError::InvalidPort {
        key: key.to_string(),
        reason: "container port without child".to_string(),
    })
}

fn convert_argument(
    param: &Param,
    registry: &StructureRegistry,
    options: &DefinitionOptions,
) -> Result<ArgPort, DefinitionError> {
    let shape = child_port(&param.ty, registry, false)?;

    let mut port = ArgPort::new(param.key.clone(), shape.kind);
    port.identifier = shape.identifier;
    port.child = shape.child.map(|child| *child);
    port.nullable = shape.nullable;
    port.widget = options.widgets.get(&param.key).cloned().or_else(|| {
        innermost_structure(&param.ty)
            .and_then(|type_id| registry.entry_for_type(type_id))
            .and_then(|entry| entry.widget.clone())
    });

    if let Some(default) = param.default.as_ref().filter(|d| !d.is_null()) {
        let wire = convert_default(&port, &param.key, default, registry).map_err(|source| {
            DefinitionError::Default {
                key: param.key.clone(),
                source,
            }
        })?;
        port.default = Some(wire);
    }

    Ok(port)
}

fn convert_return(
    ty: &TypeDescriptor,
    key: String,
    registry: &StructureRegistry,
    options: &DefinitionOptions,
) -> Result<ReturnPort, DefinitionError> {
    let shape = child_port(ty, registry, true)?;

    let widget = options.return_widgets.get(&key).cloned().or_else(|| {
        innermost_structure(ty)
            .and_then(|type_id| registry.entry_for_type(type_id))
            .and_then(|entry| entry.return_widget.clone())
    });

    let mut port = ReturnPort::new(key, shape.kind);
    port.identifier = shape.identifier;
    port.child = shape.child.map(|child| *child);
    port.nullable = shape.nullable;
    port.options = shape.options;
    port.widget = widget;
    Ok(port)
}

/// `AddNumbers` -> `add_numbers`, `HTTPServer` -> `http_server`.
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c.is_whitespace() {
            out.push('_');
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower)
            {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

fn merge_documentation(definition: &mut Definition, doc: &Docstring) {
    for port in &mut definition.args {
        if let Some(param) = doc.param(&port.key).filter(|p| !p.description.is_empty()) {
            port.description = Some(param.description.clone());
        }
    }
    for (port, entry) in definition.returns.iter_mut().zip(&doc.returns) {
        if !entry.description.is_empty() {
            port.description = Some(entry.description.clone());
        }
    }
}

/// Turns a function signature into a node definition.
///
/// Parameters are converted in declaration order (minus omitted ones); a tuple
/// return becomes `return0..returnN-1`, a unit return no ports at all and any
/// other return a single `return0`.
///
/// # Errors
/// [`DefinitionError::Argument`] / [`DefinitionError::Return`] wrapping the
/// cause when a type cannot be converted, and
/// [`DefinitionError::MissingDocumentation`] when the documentation has no
/// long description and [`DefinitionOptions::allow_empty_doc`] is unset.
pub fn prepare_definition(
    signature: &FunctionSignature,
    registry: &StructureRegistry,
    options: &DefinitionOptions,
) -> Result<Definition, DefinitionError> {
    let function = &signature.name;
    let count = signature.params.len();

    let args = signature
        .params
        .iter()
        .enumerate()
        .filter(|(index, param)| !options.is_omitted(*index, count, &param.key))
        .map(|(_, param)| {
            convert_argument(param, registry, options).map_err(|source| {
                DefinitionError::Argument {
                    function: function.clone(),
                    key: param.key.clone(),
                    source: Box::new(source),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let return_types: Vec<&TypeDescriptor> = match &signature.returns {
        TypeDescriptor::Tuple(members) => members.iter().collect(),
        TypeDescriptor::Unit => Vec::new(),
        other => vec![other],
    };
    let returns = return_types
        .into_iter()
        .enumerate()
        .map(|(index, ty)| {
            let key = format!("return{index}");
            convert_return(ty, key.clone(), registry, options).map_err(|source| {
                DefinitionError::Return {
                    function: function.clone(),
                    key,
                    source: Box::new(source),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let doc = signature
        .doc
        .as_deref()
        .map(docstring::parse)
        .unwrap_or_default();
    if doc.long_description.is_none() && !options.allow_empty_doc {
        return Err(DefinitionError::MissingDocumentation(function.clone()));
    }

    let mut definition = Definition {
        name: doc
            .short_description
            .clone()
            .unwrap_or_else(|| function.clone()),
        interface: options
            .interface
            .clone()
            .unwrap_or_else(|| to_snake_case(function)),
        package: options.package.clone(),
        description: doc
            .long_description
            .clone()
            .unwrap_or_else(|| "No Description".to_string()),
        kind: if signature.generator {
            NodeKind::Generator
        } else {
            NodeKind::Function
        },
        args,
        returns,
        interfaces: options.interfaces.clone(),
        meta: options.meta.clone(),
    };
    merge_documentation(&mut definition, &doc);
    definition.validate()?;

    log::debug!(
        "Prepared definition {} with {} args and {} returns",
        definition.interface,
        definition.args.len(),
        definition.returns.len()
    );
    Ok(definition)
}
