use crate::core::AsAny;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A rich, in-process value as user functions see it.
///
/// Primitives and containers map one-to-one onto port kinds; anything else
/// travels as a [`StructureObject`] and needs a
/// [`StructureRegistry`](crate::core::structures::StructureRegistry) entry to
/// cross the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    Structure(StructureObject),
}

impl Value {
    /// Wraps a user-defined type.
    pub fn structure<T: Any + fmt::Debug + PartialEq + Send + Sync>(value: T) -> Self {
        Value::Structure(StructureObject::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Ints widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_structure<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Structure(object) => object.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// A short description of the value's shape, used in error messages.
    pub fn shape(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::String(_) => "string".to_string(),
            Value::List(items) => format!("list of {}", items.len()),
            Value::Dict(map) => format!("dict of {}", map.len()),
            Value::Structure(object) => format!("structure {}", object.type_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(value: BTreeMap<String, T>) -> Self {
        Value::Dict(value.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Value>> From<HashMap<String, T>> for Value {
    fn from(value: HashMap<String, T>) -> Self {
        Value::Dict(value.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<StructureObject> for Value {
    fn from(value: StructureObject) -> Self {
        Value::Structure(value)
    }
}

/// Object-safe view of a user-defined type, with equality across the erased boundary.
pub trait DynStructure: AsAny + fmt::Debug + Send + Sync {
    fn dyn_eq(&self, other: &dyn DynStructure) -> bool;
    fn type_name(&self) -> &'static str;
}

impl<T> DynStructure for T
where
    T: Any + fmt::Debug + PartialEq + Send + Sync,
{
    fn dyn_eq(&self, other: &dyn DynStructure) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A type-erased user structure. Cheap to clone.
#[derive(Clone)]
pub struct StructureObject {
    inner: Arc<dyn DynStructure>,
}

impl StructureObject {
    pub fn new<T: Any + fmt::Debug + PartialEq + Send + Sync>(value: T) -> Self {
        StructureObject {
            inner: Arc::new(value),
        }
    }

    /// The `TypeId` of the wrapped value (not of the wrapper).
    pub fn type_id(&self) -> TypeId {
        (*self.inner).as_any().type_id()
    }

    pub fn type_name(&self) -> &'static str {
        (*self.inner).type_name()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.inner).as_any().downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }
}

impl PartialEq for StructureObject {
    fn eq(&self, other: &Self) -> bool {
        (*self.inner).dyn_eq(&*other.inner)
    }
}

impl fmt::Debug for StructureObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Image {
        id: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Label(String);

    #[test]
    fn test_structure_equality() {
        let a = Value::structure(Image { id: "1".into() });
        let b = Value::structure(Image { id: "1".into() });
        let c = Value::structure(Image { id: "2".into() });
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_structure_equality_across_types() {
        let a = Value::structure(Label("1".into()));
        let b = Value::structure(Image { id: "1".into() });
        assert_ne!(a, b);
    }

    #[test]
    fn test_downcast() {
        let object = StructureObject::new(Image { id: "x".into() });
        assert!(object.is::<Image>());
        assert!(!object.is::<Label>());
        assert_eq!(object.type_id(), TypeId::of::<Image>());
        assert_eq!(object.downcast_ref::<Image>().unwrap().id, "x");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(3), Value::Int(3));
        assert_eq!(Value::from("a"), Value::String("a".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(
            Value::from(vec![1, 2]),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(Value::Int(2).as_f64(), Some(2.0));
        assert_eq!(Value::Float(2.0).as_i64(), None);
    }

    #[test]
    fn test_shape() {
        assert_eq!(Value::Null.shape(), "null");
        assert_eq!(Value::from(vec![1, 2, 3]).shape(), "list of 3");
        assert!(Value::structure(Label("l".into())).shape().contains("Label"));
    }
}
