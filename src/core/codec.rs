//! Shrinking turns rich [`Value`]s into wire scalars, expanding goes back.
//!
//! Both directions are driven by the ports of a node: primitives pass through
//! (ints widen into FLOAT ports), containers recurse into their child port,
//! structures go through the [`StructureRegistry`] and enums swap labels for
//! values. Nothing is silently dropped: every arity or shape mismatch is an
//! error naming the offending port key (`images[2]`, `params.size`).

use crate::core::WireValue;
use crate::core::ports::{ChildPort, HasPorts, Port, PortKind};
use crate::core::structures::StructureRegistry;
use crate::core::value::Value;
use crate::error::{ExpandingError, ShrinkingError};
use std::collections::{BTreeMap, HashMap};

/// Converts a value that holds no structures straight into its wire form.
pub fn shrink_value(value: &Value) -> Option<WireValue> {
    Some(match value {
        Value::Null => WireValue::Null,
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Int(i) => WireValue::from(*i),
        Value::Float(f) => WireValue::Number(serde_json::Number::from_f64(*f)?),
        Value::String(s) => WireValue::String(s.clone()),
        Value::List(items) => {
            WireValue::Array(items.iter().map(shrink_value).collect::<Option<_>>()?)
        }
        Value::Dict(map) => WireValue::Object(
            map.iter()
                .map(|(k, v)| shrink_value(v).map(|wire| (k.clone(), wire)))
                .collect::<Option<_>>()?,
        ),
        Value::Structure(_) => return None,
    })
}

/// A short description of a wire value's shape, used in error messages.
pub fn wire_shape(wire: &WireValue) -> String {
    match wire {
        WireValue::Null => "null".to_string(),
        WireValue::Bool(_) => "bool".to_string(),
        WireValue::Number(n) if n.is_f64() => "float".to_string(),
        WireValue::Number(_) => "int".to_string(),
        WireValue::String(_) => "string".to_string(),
        WireValue::Array(items) => format!("list of {}", items.len()),
        WireValue::Object(map) => format!("dict of {}", map.len()),
    }
}

fn child_of<'a, P: Port + ?Sized>(port: &'a P, key: &str) -> Option<&'a ChildPort> {
    let child = port.child();
    if child.is_none() {
        log::error!("Container port {key} carries no child port");
    }
    child
}

pub fn shrink_port<P: Port + ?Sized>(
    port: &P,
    key: &str,
    value: &Value,
    registry: &StructureRegistry,
) -> Result<WireValue, ShrinkingError> {
    let shape_error = || ShrinkingError::Shape {
        key: key.to_string(),
        expected: port.kind(),
        received: value.shape(),
    };
    let invalid = |reason: &str| ShrinkingError::InvalidPort {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if value.is_null() {
        return if port.nullable() {
            Ok(WireValue::Null)
        } else {
            Err(ShrinkingError::NotNullable {
                key: key.to_string(),
            })
        };
    }

    match (port.kind(), value) {
        (PortKind::Bool, Value::Bool(b)) => Ok(WireValue::Bool(*b)),
        (PortKind::Int, Value::Int(i)) => Ok(WireValue::from(*i)),
        (PortKind::Float, Value::Int(i)) => Ok(WireValue::from(*i as f64)),
        (PortKind::Float, Value::Float(f)) => serde_json::Number::from_f64(*f)
            .map(WireValue::Number)
            .ok_or_else(shape_error),
        (PortKind::String, Value::String(s)) => Ok(WireValue::String(s.clone())),
        (PortKind::List, Value::List(items)) => {
            let child = child_of(port, key).ok_or_else(|| invalid("list without child"))?;
            items
                .iter()
                .enumerate()
                .map(|(i, item)| shrink_port(child, &format!("{key}[{i}]"), item, registry))
                .collect::<Result<Vec<_>, _>>()
                .map(WireValue::Array)
        }
        (PortKind::Dict, Value::Dict(map)) => {
            let child = child_of(port, key).ok_or_else(|| invalid("dict without child"))?;
            map.iter()
                .map(|(k, item)| {
                    shrink_port(child, &format!("{key}.{k}"), item, registry)
                        .map(|wire| (k.clone(), wire))
                })
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(WireValue::Object)
        }
        (PortKind::Structure, Value::Structure(object)) => {
            let identifier = port
                .identifier()
                .ok_or_else(|| invalid("structure without identifier"))?;
            registry
                .shrink(identifier, object)
                .map_err(|source| ShrinkingError::Structure {
                    key: key.to_string(),
                    source,
                })
        }
        (PortKind::Enum, _) => {
            let options = port.options();
            if let Some(label) = value.as_str() {
                if let Some(option) = options.iter().find(|o| o.label == label) {
                    return Ok(option.value.clone());
                }
            }
            let wire = shrink_value(value).ok_or_else(shape_error)?;
            options
                .iter()
                .find(|o| o.value == wire)
                .map(|o| o.value.clone())
                .ok_or_else(shape_error)
        }
        _ => Err(shape_error()),
    }
}

pub fn expand_port<P: Port + ?Sized>(
    port: &P,
    key: &str,
    wire: &WireValue,
    registry: &StructureRegistry,
) -> Result<Value, ExpandingError> {
    let shape_error = || ExpandingError::Shape {
        key: key.to_string(),
        expected: port.kind(),
        received: wire_shape(wire),
    };
    let invalid = |reason: &str| ExpandingError::InvalidPort {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if wire.is_null() {
        return if port.nullable() {
            Ok(Value::Null)
        } else {
            Err(ExpandingError::NotNullable {
                key: key.to_string(),
            })
        };
    }

    match port.kind() {
        PortKind::Bool => wire.as_bool().map(Value::Bool).ok_or_else(shape_error),
        PortKind::Int => wire.as_i64().map(Value::Int).ok_or_else(shape_error),
        PortKind::Float => wire.as_f64().map(Value::Float).ok_or_else(shape_error),
        PortKind::String => wire
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(shape_error),
        PortKind::List => {
            let child = child_of(port, key).ok_or_else(|| invalid("list without child"))?;
            let items = wire.as_array().ok_or_else(shape_error)?;
            items
                .iter()
                .enumerate()
                .map(|(i, item)| expand_port(child, &format!("{key}[{i}]"), item, registry))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        PortKind::Dict => {
            let child = child_of(port, key).ok_or_else(|| invalid("dict without child"))?;
            let map = wire.as_object().ok_or_else(shape_error)?;
            map.iter()
                .map(|(k, item)| {
                    expand_port(child, &format!("{key}.{k}"), item, registry)
                        .map(|value| (k.clone(), value))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Value::Dict)
        }
        PortKind::Structure => {
            let identifier = port
                .identifier()
                .ok_or_else(|| invalid("structure without identifier"))?;
            registry
                .expand(identifier, wire)
                .map(Value::Structure)
                .map_err(|source| ExpandingError::Structure {
                    key: key.to_string(),
                    source,
                })
        }
        PortKind::Enum => port
            .options()
            .iter()
            .find(|o| &o.value == wire)
            .map(|o| Value::String(o.label.clone()))
            .ok_or_else(|| ExpandingError::UnknownOption {
                key: key.to_string(),
                value: wire.to_string(),
            }),
    }
}

/// Shrinks a call's arguments into one wire value per argument port.
///
/// Ports are filled from positional arguments first, then keyword arguments,
/// then the port default, then null for nullable ports.
///
/// # Errors
/// Too many positionals, a port given both positionally and by keyword, a
/// missing value, a keyword without a port, or any value shape mismatch.
pub fn shrink_inputs<N: HasPorts + ?Sized>(
    node: &N,
    args: Vec<Value>,
    mut kwargs: HashMap<String, Value>,
    registry: &StructureRegistry,
) -> Result<Vec<WireValue>, ShrinkingError> {
    let ports = node.args();
    if args.len() > ports.len() {
        return Err(ShrinkingError::TooManyArguments {
            expected: ports.len(),
            received: args.len(),
        });
    }

    let mut args = args.into_iter();
    let mut shrunk = Vec::with_capacity(ports.len());
    for port in ports {
        let value = match (args.next(), kwargs.remove(&port.key)) {
            (Some(_), Some(_)) => {
                return Err(ShrinkingError::DuplicateArgument {
                    key: port.key.clone(),
                });
            }
            (Some(value), None) | (None, Some(value)) => value,
            (None, None) => match &port.default {
                Some(default) => {
                    shrunk.push(default.clone());
                    continue;
                }
                None if port.nullable => Value::Null,
                None => {
                    return Err(ShrinkingError::MissingArgument {
                        key: port.key.clone(),
                    });
                }
            },
        };
        shrunk.push(shrink_port(port, &port.key, &value, registry)?);
    }

    if let Some(key) = kwargs.keys().min() {
        return Err(ShrinkingError::UnexpectedKeyword { key: key.clone() });
    }
    Ok(shrunk)
}

/// Expands inbound wire arguments into one rich value per argument port.
pub fn expand_inputs<N: HasPorts + ?Sized>(
    node: &N,
    args: &[WireValue],
    kwargs: &HashMap<String, WireValue>,
    registry: &StructureRegistry,
) -> Result<Vec<Value>, ExpandingError> {
    let ports = node.args();
    if args.len() > ports.len() {
        return Err(ExpandingError::Arity {
            expected: ports.len(),
            received: args.len(),
        });
    }
    if let Some(key) = kwargs
        .keys()
        .filter(|key| !ports.iter().any(|port| &port.key == *key))
        .min()
    {
        return Err(ExpandingError::UnexpectedKeyword { key: key.clone() });
    }

    ports
        .iter()
        .enumerate()
        .map(|(index, port)| {
            if index < args.len() && kwargs.contains_key(&port.key) {
                return Err(ExpandingError::DuplicateArgument {
                    key: port.key.clone(),
                });
            }
            let wire = args
                .get(index)
                .or_else(|| kwargs.get(&port.key))
                .or(port.default.as_ref());
            match wire {
                Some(wire) => expand_port(port, &port.key, wire, registry),
                None if port.nullable => Ok(Value::Null),
                None => Err(ExpandingError::MissingArgument {
                    key: port.key.clone(),
                }),
            }
        })
        .collect()
}

/// Shrinks the values a function returned, one per return port.
pub fn shrink_outputs<N: HasPorts + ?Sized>(
    node: &N,
    returns: Vec<Value>,
    registry: &StructureRegistry,
) -> Result<Vec<WireValue>, ShrinkingError> {
    let ports = node.returns();
    if returns.len() != ports.len() {
        return Err(ShrinkingError::ReturnCount {
            expected: ports.len(),
            received: returns.len(),
        });
    }
    ports
        .iter()
        .zip(&returns)
        .map(|(port, value)| shrink_port(port, &port.key, value, registry))
        .collect()
}

/// Expands wire returns into rich values, one per return port.
pub fn expand_outputs<N: HasPorts + ?Sized>(
    node: &N,
    returns: &[WireValue],
    registry: &StructureRegistry,
) -> Result<Vec<Value>, ExpandingError> {
    let ports = node.returns();
    if returns.len() != ports.len() {
        return Err(ExpandingError::Arity {
            expected: ports.len(),
            received: returns.len(),
        });
    }
    ports
        .iter()
        .zip(returns)
        .map(|(port, wire)| expand_port(port, &port.key, wire, registry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ports::{ArgPort, Definition, EnumOption, NodeKind, ReturnPort};
    use crate::error::StructureError;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Image(String);

    fn registry() -> StructureRegistry {
        let mut registry = StructureRegistry::new();
        registry
            .register::<Image, _, _>(
                "@mikro/image",
                |image| Ok(json!(image.0)),
                |wire| {
                    wire.as_str()
                        .map(|id| Image(id.to_string()))
                        .ok_or_else(|| StructureError::conversion("@mikro/image", "expected id"))
                },
            )
            .unwrap();
        registry
    }

    fn list_of(kind: PortKind) -> ChildPort {
        let mut port = ChildPort::new(PortKind::List);
        port.child = Some(Box::new(ChildPort::new(kind)));
        port
    }

    fn node() -> Definition {
        let mut images = ArgPort::new("images", PortKind::List);
        let mut child = ChildPort::new(PortKind::Structure);
        child.identifier = Some("@mikro/image".into());
        images.child = Some(child);

        let mut scale = ArgPort::new("scale", PortKind::Float);
        scale.default = Some(json!(1.0));

        let mut label = ArgPort::new("label", PortKind::String);
        label.nullable = true;

        let mut returns = ReturnPort::new("return0", PortKind::Dict);
        returns.child = Some(list_of(PortKind::Int));

        Definition {
            name: "stack".into(),
            interface: "stack".into(),
            package: None,
            description: "No Description".into(),
            kind: NodeKind::Function,
            args: vec![images, scale, label],
            returns: vec![returns],
            interfaces: vec![],
            meta: HashMap::new(),
        }
    }

    fn images(ids: &[&str]) -> Value {
        Value::List(
            ids.iter()
                .map(|id| Value::structure(Image(id.to_string())))
                .collect(),
        )
    }

    #[test]
    fn test_shrink_fills_defaults_and_nulls() {
        let shrunk =
            shrink_inputs(&node(), vec![images(&["a", "b"])], HashMap::new(), &registry())
                .unwrap();
        assert_eq!(shrunk, vec![json!(["a", "b"]), json!(1.0), WireValue::Null]);
    }

    #[test]
    fn test_shrink_keywords() {
        let kwargs = HashMap::from([
            ("label".to_string(), Value::from("cells")),
            ("scale".to_string(), Value::from(2)),
        ]);
        let shrunk = shrink_inputs(&node(), vec![images(&[])], kwargs, &registry()).unwrap();
        assert_eq!(shrunk, vec![json!([]), json!(2.0), json!("cells")]);
    }

    #[test]
    fn test_shrink_too_many_arguments() {
        let args = vec![images(&[]), Value::from(1.0), Value::Null, Value::from(1)];
        let err = shrink_inputs(&node(), args, HashMap::new(), &registry()).unwrap_err();
        assert!(matches!(
            err,
            ShrinkingError::TooManyArguments {
                expected: 3,
                received: 4
            }
        ));
    }

    #[test]
    fn test_shrink_missing_argument() {
        let err = shrink_inputs(&node(), vec![], HashMap::new(), &registry()).unwrap_err();
        assert!(matches!(err, ShrinkingError::MissingArgument { key } if key == "images"));
    }

    #[test]
    fn test_shrink_unexpected_keyword() {
        let kwargs = HashMap::from([("zoom".to_string(), Value::from(1))]);
        let err = shrink_inputs(&node(), vec![images(&[])], kwargs, &registry()).unwrap_err();
        assert!(matches!(err, ShrinkingError::UnexpectedKeyword { key } if key == "zoom"));
    }

    #[test]
    fn test_shrink_duplicate_argument() {
        let kwargs = HashMap::from([("images".to_string(), images(&[]))]);
        let err = shrink_inputs(&node(), vec![images(&[])], kwargs, &registry()).unwrap_err();
        assert!(matches!(err, ShrinkingError::DuplicateArgument { .. }));
    }

    #[test]
    fn test_shrink_shape_error_names_nested_key() {
        let args = vec![Value::List(vec![
            Value::structure(Image("a".into())),
            Value::from("not an image"),
        ])];
        let err = shrink_inputs(&node(), args, HashMap::new(), &registry()).unwrap_err();
        match err {
            ShrinkingError::Shape {
                key,
                expected,
                received,
            } => {
                assert_eq!(key, "images[1]");
                assert_eq!(expected, PortKind::Structure);
                assert_eq!(received, "string");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_int_port_rejects_float() {
        let port = ArgPort::new("x", PortKind::Int);
        let err = shrink_port(&port, "x", &Value::Float(1.5), &registry()).unwrap_err();
        assert!(matches!(err, ShrinkingError::Shape { .. }));
    }

    #[test]
    fn test_not_nullable() {
        let port = ArgPort::new("x", PortKind::Int);
        let err = shrink_port(&port, "x", &Value::Null, &registry()).unwrap_err();
        assert!(matches!(err, ShrinkingError::NotNullable { .. }));
        let err = expand_port(&port, "x", &WireValue::Null, &registry()).unwrap_err();
        assert!(matches!(err, ExpandingError::NotNullable { .. }));
    }

    #[test]
    fn test_expand_inputs_round_trip() {
        let registry = registry();
        let node = node();
        let args = vec![images(&["x"]), Value::Float(0.5), Value::from("l")];
        let shrunk = shrink_inputs(&node, args.clone(), HashMap::new(), &registry).unwrap();
        let expanded = expand_inputs(&node, &shrunk, &HashMap::new(), &registry).unwrap();
        assert_eq!(expanded, args);
    }

    #[test]
    fn test_expand_inputs_uses_kwargs_and_defaults() {
        let kwargs = HashMap::from([("images".to_string(), json!(["z"]))]);
        let expanded = expand_inputs(&node(), &[], &kwargs, &registry()).unwrap();
        assert_eq!(expanded, vec![images(&["z"]), Value::Float(1.0), Value::Null]);
    }

    #[test]
    fn test_expand_inputs_rejects_duplicate_argument() {
        let kwargs = HashMap::from([("images".to_string(), json!(["z"]))]);
        let err = expand_inputs(&node(), &[json!(["a"])], &kwargs, &registry()).unwrap_err();
        assert!(matches!(err, ExpandingError::DuplicateArgument { key } if key == "images"));
    }

    #[test]
    fn test_outputs() {
        let registry = registry();
        let node = node();
        let value = Value::Dict(BTreeMap::from([(
            "counts".to_string(),
            Value::from(vec![1, 2]),
        )]));
        let shrunk = shrink_outputs(&node, vec![value.clone()], &registry).unwrap();
        assert_eq!(shrunk, vec![json!({"counts": [1, 2]})]);
        assert_eq!(expand_outputs(&node, &shrunk, &registry).unwrap(), vec![value]);

        let err = shrink_outputs(&node, vec![], &registry).unwrap_err();
        assert!(matches!(
            err,
            ShrinkingError::ReturnCount {
                expected: 1,
                received: 0
            }
        ));
    }

    #[test]
    fn test_enum_ports() {
        let mut port = ReturnPort::new("return0", PortKind::Enum);
        port.options = vec![EnumOption::new("FAST", 1), EnumOption::new("SLOW", 2)];
        let registry = registry();

        let wire = shrink_port(&port, "return0", &Value::from("SLOW"), &registry).unwrap();
        assert_eq!(wire, json!(2));
        let value = expand_port(&port, "return0", &wire, &registry).unwrap();
        assert_eq!(value, Value::from("SLOW"));

        let err = expand_port(&port, "return0", &json!(3), &registry).unwrap_err();
        assert!(matches!(err, ExpandingError::UnknownOption { .. }));
    }

    #[test]
    fn test_wire_shape() {
        assert_eq!(wire_shape(&json!(1)), "int");
        assert_eq!(wire_shape(&json!(1.5)), "float");
        assert_eq!(wire_shape(&json!({"a": 1})), "dict of 1");
    }
}
