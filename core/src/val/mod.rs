use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::types::TypeId;

mod handles;

pub use handles::{DynamicRef, ExceptionHandle, ObjectHandle, RefHandle};

static EMPTY_TUPLE: Lazy<Arc<[Value]>> = Lazy::new(|| Arc::from(Vec::new()));

/// Integer interval produced by `..` / `..<` operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeValue {
    pub lower: i64,
    pub upper: i64,
    pub exclusive: bool,
}

/// Runtime value held in a register.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
    Tuple(Arc<[Value]>),
    Range(RangeValue),
    Object(ObjectHandle),
    Exception(ExceptionHandle),
    Function(u32),
    Ref(RefHandle),
}

impl Value {
    pub fn empty_tuple() -> Value {
        Value::Tuple(Arc::clone(&EMPTY_TUPLE))
    }

    pub fn tuple(values: Vec<Value>) -> Value {
        if values.is_empty() {
            Value::empty_tuple()
        } else {
            Value::Tuple(Arc::from(values))
        }
    }

    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Null => TypeId::NULL,
            Value::Bool(_) => TypeId::BOOLEAN,
            Value::Int(_) => TypeId::INT,
            Value::Str(_) => TypeId::STRING,
            Value::Tuple(_) => TypeId::TUPLE,
            Value::Range(_) => TypeId::RANGE,
            Value::Object(obj) => obj.type_id(),
            Value::Exception(_) => TypeId::EXCEPTION,
            Value::Function(_) => TypeId::FUNCTION,
            Value::Ref(_) => TypeId::REF,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Int",
            Value::Str(_) => "String",
            Value::Tuple(_) => "Tuple",
            Value::Range(_) => "Range",
            Value::Object(obj) => obj.class(),
            Value::Exception(exc) => exc.type_name(),
            Value::Function(_) => "Function",
            Value::Ref(_) => "Ref",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_exception(&self) -> Option<&ExceptionHandle> {
        match self {
            Value::Exception(exc) => Some(exc),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Exception(a), Value::Exception(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Tuple(items) => f.debug_tuple("Tuple").field(&items).finish(),
            Value::Range(r) => write!(f, "Range({r})"),
            Value::Object(obj) => write!(f, "{obj:?}"),
            Value::Exception(exc) => write!(f, "Exception({exc:?})"),
            Value::Function(id) => write!(f, "Function(#{id})"),
            Value::Ref(r) => write!(f, "{r:?}"),
        }
    }
}

impl fmt::Display for RangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lower = itoa::Buffer::new();
        let mut upper = itoa::Buffer::new();
        let op = if self.exclusive { "..<" } else { ".." };
        write!(f, "{}{}{}", lower.format(self.lower), op, upper.format(self.upper))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => f.write_str(if *b { "true" } else { "false" }),
            Value::Int(i) => {
                let mut buf = itoa::Buffer::new();
                f.write_str(buf.format(*i))
            }
            Value::Str(s) => f.write_str(s),
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Value::Range(r) => write!(f, "{r}"),
            Value::Object(obj) => write!(f, "{}{{...}}", obj.class()),
            Value::Exception(exc) => write!(f, "{exc}"),
            Value::Function(id) => write!(f, "<function #{id}>"),
            Value::Ref(r) => match r.get() {
                Some(value) => write!(f, "{value}"),
                None => f.write_str("<unbound>"),
            },
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

impl From<ExceptionHandle> for Value {
    fn from(value: ExceptionHandle) -> Self {
        Value::Exception(value)
    }
}
