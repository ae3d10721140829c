//! Capability tables for runtime values.
//!
//! The interpreter never branches on concrete value types for operators or
//! properties. It asks the [`TypeRegistry`] for the [`TypeSupport`] of the
//! target value and delegates; failures come back as guest exceptions in
//! [`Outcome::Raise`].

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::util::fast_map::{NameMap, fast_hash_map_with_capacity};
use crate::val::{ExceptionHandle, Value};
use crate::vm::Constant;

mod builtin;
mod registry;

pub use builtin::{MAX_STRING_LEN, ObjectSupport};
pub use registry::{ClassDecl, PropertyDecl, TypeRegistry};

/// Names of the exception classes the interpreter itself raises.
pub mod exceptions {
    pub const EXCEPTION: &str = "Exception";
    pub const ILLEGAL_STATE: &str = "IllegalState";
    pub const ILLEGAL_ARGUMENT: &str = "IllegalArgument";
    pub const OUT_OF_BOUNDS: &str = "OutOfBounds";
    pub const DIVISION_BY_ZERO: &str = "DivisionByZero";
    pub const UNSUPPORTED: &str = "UnsupportedOperation";
    pub const READ_ONLY: &str = "ReadOnly";
    pub const ASSERTION: &str = "Assertion";

    pub(crate) const BUILTIN: [(&str, &str); 7] = [
        (ILLEGAL_STATE, EXCEPTION),
        (ILLEGAL_ARGUMENT, EXCEPTION),
        (OUT_OF_BOUNDS, EXCEPTION),
        (DIVISION_BY_ZERO, EXCEPTION),
        (UNSUPPORTED, EXCEPTION),
        (READ_ONLY, EXCEPTION),
        (ASSERTION, EXCEPTION),
    ];
}

/// Small integer index into the registry's support table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    pub const NULL: TypeId = TypeId(0);
    pub const BOOLEAN: TypeId = TypeId(1);
    pub const INT: TypeId = TypeId(2);
    pub const STRING: TypeId = TypeId(3);
    pub const TUPLE: TypeId = TypeId(4);
    pub const RANGE: TypeId = TypeId(5);
    pub const EXCEPTION: TypeId = TypeId(6);
    pub const FUNCTION: TypeId = TypeId(7);
    pub const REF: TypeId = TypeId(8);
    pub const FIRST_CLASS: TypeId = TypeId(9);

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Result of a capability call: a value, or a guest exception to raise.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T = Value> {
    Done(T),
    Raise(ExceptionHandle),
}

impl<T> Outcome<T> {
    pub fn raise(type_name: &str, message: impl Into<Arc<str>>) -> Self {
        Outcome::Raise(ExceptionHandle::new(type_name, message))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(v) => Outcome::Done(f(v)),
            Outcome::Raise(e) => Outcome::Raise(e),
        }
    }
}

/// Raised by the default capability implementations.
pub fn unsupported<T>(type_name: &str, action: &str) -> Outcome<T> {
    Outcome::raise(exceptions::UNSUPPORTED, format!("{action} is not supported by {type_name}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryAction {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    UShr,
    And,
    Or,
    Xor,
    Range,
    RangeExclusive,
}

impl BinaryAction {
    pub fn name(self) -> &'static str {
        match self {
            BinaryAction::Add => "add",
            BinaryAction::Sub => "sub",
            BinaryAction::Mul => "mul",
            BinaryAction::Div => "div",
            BinaryAction::Mod => "mod",
            BinaryAction::Shl => "shiftLeft",
            BinaryAction::Shr => "shiftRight",
            BinaryAction::UShr => "shiftAllRight",
            BinaryAction::And => "and",
            BinaryAction::Or => "or",
            BinaryAction::Xor => "xor",
            BinaryAction::Range => "range",
            BinaryAction::RangeExclusive => "exclusiveRange",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryAction {
    Neg,
    Compl,
    Next,
    Prev,
}

impl UnaryAction {
    pub fn name(self) -> &'static str {
        match self {
            UnaryAction::Neg => "neg",
            UnaryAction::Compl => "complement",
            UnaryAction::Next => "nextValue",
            UnaryAction::Prev => "prevValue",
        }
    }
}

/// One entry of a type's property table.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: Arc<str>,
    pub index: usize,
    pub read_only: bool,
    pub default: Constant,
}

/// Ordered property table with name lookup.
#[derive(Debug, Clone, Default)]
pub struct PropertyTable {
    entries: Vec<Property>,
    by_name: NameMap<usize>,
}

impl PropertyTable {
    pub fn new(decls: impl IntoIterator<Item = (Arc<str>, bool, Constant)>) -> Self {
        let mut entries = Vec::new();
        for (name, read_only, default) in decls {
            let index = entries.len();
            entries.push(Property {
                name,
                index,
                read_only,
                default,
            });
        }
        let mut by_name = fast_hash_map_with_capacity(entries.len());
        for entry in &entries {
            by_name.insert(Arc::clone(&entry.name), entry.index);
        }
        Self { entries, by_name }
    }

    pub fn read_only(names: &[&str]) -> Self {
        Self::new(names.iter().map(|n| (Arc::from(*n), true, Constant::Null)))
    }

    pub fn lookup(&self, name: &str) -> Option<&Property> {
        self.by_name.get(name).map(|&idx| &self.entries[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Operator and property behaviour of one runtime type.
///
/// `Err` is reserved for internal-consistency faults; anything the guest can
/// catch is returned as [`Outcome::Raise`].
pub trait TypeSupport: Send + Sync {
    fn name(&self) -> &str;

    fn properties(&self) -> Option<&PropertyTable> {
        None
    }

    fn binary(&self, action: BinaryAction, _target: &Value, _arg: &Value) -> Result<Outcome> {
        Ok(unsupported(self.name(), action.name()))
    }

    fn unary(&self, action: UnaryAction, _target: &Value) -> Result<Outcome> {
        Ok(unsupported(self.name(), action.name()))
    }

    /// Quotient and remainder in one step; by default two `binary` calls.
    fn div_rem(&self, target: &Value, arg: &Value) -> Result<Outcome<(Value, Value)>> {
        let quotient = match self.binary(BinaryAction::Div, target, arg)? {
            Outcome::Done(v) => v,
            Outcome::Raise(e) => return Ok(Outcome::Raise(e)),
        };
        Ok(self.binary(BinaryAction::Mod, target, arg)?.map(|rem| (quotient, rem)))
    }

    fn equals(&self, a: &Value, b: &Value) -> Result<Outcome<bool>> {
        Ok(Outcome::Done(a == b))
    }

    fn compare(&self, _a: &Value, _b: &Value) -> Result<Outcome<Ordering>> {
        Ok(unsupported(self.name(), "compare"))
    }

    fn is_zero(&self, _value: &Value) -> Result<Outcome<bool>> {
        Ok(unsupported(self.name(), "isZero"))
    }

    fn get_property(&self, _target: &Value, property: &Property) -> Result<Outcome> {
        Ok(unsupported(self.name(), &format!("get of property '{}'", property.name)))
    }

    fn set_property(&self, _target: &Value, property: &Property, _value: Value) -> Result<Outcome<()>> {
        Ok(Outcome::raise(
            exceptions::READ_ONLY,
            format!("property '{}' of {} is read-only", property.name, self.name()),
        ))
    }
}

impl fmt::Debug for dyn TypeSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeSupport({})", self.name())
    }
}
