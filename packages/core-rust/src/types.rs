use std::fmt;

use serde::{Deserialize, Serialize};

use crate::name::CimName;
use crate::path::ObjectPath;

/// Runtime value of a property, key binding, qualifier or method parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// No value.
    Null,
    Boolean(bool),
    /// Any unsigned integer type (uint8 through uint64).
    Uint(u64),
    /// Any signed integer type (sint8 through sint64).
    Sint(i64),
    /// real32 or real64.
    Real(f64),
    String(String),
    /// CIM datetime in its 25-character string form.
    DateTime(String),
    /// Reference to another object.
    Reference(Box<ObjectPath>),
    Array(Vec<Value>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::DateTime(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_reference(&self) -> Option<&ObjectPath> {
        match self {
            Self::Reference(path) => Some(path),
            _ => None,
        }
    }

    /// Mutable access to every object path nested in this value.
    pub fn for_each_reference_mut(&mut self, f: &mut dyn FnMut(&mut ObjectPath)) {
        match self {
            Self::Reference(path) => f(path),
            Self::Array(items) => {
                for item in items {
                    item.for_each_reference_mut(f);
                }
            }
            _ => {}
        }
    }

    /// The declared type this value conforms to, if it is not null.
    #[must_use]
    pub fn cim_type(&self) -> Option<CimType> {
        match self {
            Self::Null => None,
            Self::Boolean(_) => Some(CimType::Boolean),
            Self::Uint(_) => Some(CimType::Uint64),
            Self::Sint(_) => Some(CimType::Sint64),
            Self::Real(_) => Some(CimType::Real64),
            Self::String(_) => Some(CimType::String),
            Self::DateTime(_) => Some(CimType::DateTime),
            Self::Reference(_) => Some(CimType::Reference),
            Self::Array(items) => items.iter().find_map(Value::cim_type),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Uint(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Sint(n)
    }
}

impl From<ObjectPath> for Value {
    fn from(path: ObjectPath) -> Self {
        Self::Reference(Box::new(path))
    }
}

/// Renders the value the way it appears in an object path key binding.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Boolean(true) => f.write_str("TRUE"),
            Self::Boolean(false) => f.write_str("FALSE"),
            Self::Uint(n) => write!(f, "{n}"),
            Self::Sint(n) => write!(f, "{n}"),
            Self::Real(n) => write!(f, "{n}"),
            Self::String(s) | Self::DateTime(s) => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
            Self::Reference(path) => {
                let rendered = path.to_string();
                write!(f, "\"{}\"", rendered.replace('\\', "\\\\").replace('"', "\\\""))
            }
            Self::Array(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Declared type of a property or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CimType {
    Boolean,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Sint8,
    Sint16,
    Sint32,
    Sint64,
    Real32,
    Real64,
    Char16,
    String,
    DateTime,
    Reference,
}

/// A named input or output parameter of an extrinsic method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamValue {
    pub name: CimName,
    pub value: Value,
}
