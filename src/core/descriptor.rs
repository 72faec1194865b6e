//! Structural type descriptors.
//!
//! The definition builder never reflects on live types: it walks a
//! [`TypeDescriptor`] tree. Built-in types describe themselves through
//! [`Describe`]; user types enter the tree as [`TypeDescriptor::structure`]
//! and are resolved against the structure registry later.

use crate::core::value::Value;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    Bool,
    Int,
    Float,
    String,
    List(Box<TypeDescriptor>),
    /// Keys are always strings; only the value type is described.
    Dict(Box<TypeDescriptor>),
    Optional(Box<TypeDescriptor>),
    Enum {
        name: String,
        options: Vec<(String, Value)>,
    },
    Structure {
        type_id: TypeId,
        type_name: &'static str,
    },
    Union(Vec<TypeDescriptor>),
    Tuple(Vec<TypeDescriptor>),
    Unit,
}

impl TypeDescriptor {
    pub fn of<T: Describe>() -> Self {
        T::describe()
    }

    pub fn list(inner: TypeDescriptor) -> Self {
        TypeDescriptor::List(Box::new(inner))
    }

    pub fn dict(inner: TypeDescriptor) -> Self {
        TypeDescriptor::Dict(Box::new(inner))
    }

    pub fn optional(inner: TypeDescriptor) -> Self {
        TypeDescriptor::Optional(Box::new(inner))
    }

    pub fn structure<T: Any>() -> Self {
        TypeDescriptor::Structure {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn enumeration<I, L, V>(name: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = (L, V)>,
        L: Into<String>,
        V: Into<Value>,
    {
        TypeDescriptor::Enum {
            name: name.into(),
            options: options
                .into_iter()
                .map(|(label, value)| (label.into(), value.into()))
                .collect(),
        }
    }

    /// A readable name for error messages.
    pub fn name(&self) -> String {
        match self {
            TypeDescriptor::Bool => "bool".to_string(),
            TypeDescriptor::Int => "int".to_string(),
            TypeDescriptor::Float => "float".to_string(),
            TypeDescriptor::String => "str".to_string(),
            TypeDescriptor::List(inner) => format!("List[{}]", inner.name()),
            TypeDescriptor::Dict(inner) => format!("Dict[str, {}]", inner.name()),
            TypeDescriptor::Optional(inner) => format!("Optional[{}]", inner.name()),
            TypeDescriptor::Enum { name, .. } => format!("Enum {name}"),
            TypeDescriptor::Structure { type_name, .. } => type_name.to_string(),
            TypeDescriptor::Union(members) => format!(
                "Union[{}]",
                members.iter().map(Self::name).collect::<Vec<_>>().join(", ")
            ),
            TypeDescriptor::Tuple(members) => format!(
                "Tuple[{}]",
                members.iter().map(Self::name).collect::<Vec<_>>().join(", ")
            ),
            TypeDescriptor::Unit => "None".to_string(),
        }
    }
}

/// Implemented by types that know their own descriptor.
pub trait Describe {
    fn describe() -> TypeDescriptor;
}

macro_rules! describe_as {
    ($variant:ident: $($ty:ty),+) => {
        $(impl Describe for $ty {
            fn describe() -> TypeDescriptor {
                TypeDescriptor::$variant
            }
        })+
    };
}

describe_as!(Bool: bool);
describe_as!(Int: i64, i32, u32, usize);
describe_as!(Float: f64, f32);
describe_as!(String: String, &str);
describe_as!(Unit: ());

impl<T: Describe> Describe for Vec<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::list(T::describe())
    }
}

impl<T: Describe> Describe for Option<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::optional(T::describe())
    }
}

impl<T: Describe> Describe for HashMap<String, T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::dict(T::describe())
    }
}

impl<T: Describe> Describe for BTreeMap<String, T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::dict(T::describe())
    }
}

macro_rules! describe_tuple {
    ($($name:ident),+) => {
        impl<$($name: Describe),+> Describe for ($($name,)+) {
            fn describe() -> TypeDescriptor {
                TypeDescriptor::Tuple(vec![$($name::describe()),+])
            }
        }
    };
}

describe_tuple!(A, B);
describe_tuple!(A, B, C);
describe_tuple!(A, B, C, D);

/// One declared parameter of a callable.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub key: String,
    pub ty: TypeDescriptor,
    pub default: Option<Value>,
}

/// The declared shape of a callable: what [`prepare_definition`] consumes.
///
/// [`prepare_definition`]: crate::core::define::prepare_definition
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: TypeDescriptor,
    pub generator: bool,
    pub doc: Option<String>,
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: TypeDescriptor::Unit,
            generator: false,
            doc: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.params.push(Param {
            key: key.into(),
            ty,
            default: None,
        });
        self
    }

    pub fn param_with_default(
        mut self,
        key: impl Into<String>,
        ty: TypeDescriptor,
        default: impl Into<Value>,
    ) -> Self {
        self.params.push(Param {
            key: key.into(),
            ty,
            default: Some(default.into()),
        });
        self
    }

    pub fn returns(mut self, ty: TypeDescriptor) -> Self {
        self.returns = ty;
        self
    }

    /// Marks the callable as yielding many results.
    pub fn generator(mut self) -> Self {
        self.generator = true;
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}
