use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::val::{RangeValue, Value};

use super::{BinaryAction, Outcome, Property, PropertyTable, TypeSupport, UnaryAction, exceptions, unsupported};

fn wrong_arg<T>(type_name: &str, action: &str, arg: &Value) -> Outcome<T> {
    Outcome::raise(
        exceptions::ILLEGAL_ARGUMENT,
        format!("{type_name}.{action} cannot accept {}", arg.type_name()),
    )
}

/// Longest string a repeat may produce, in bytes.
pub const MAX_STRING_LEN: usize = 1 << 28;

fn overflow<T>() -> Outcome<T> {
    Outcome::raise(exceptions::OUT_OF_BOUNDS, "Int64 overflow")
}

fn checked(result: Option<i64>) -> Outcome {
    match result {
        Some(v) => Outcome::Done(Value::Int(v)),
        None => overflow(),
    }
}

pub(super) struct NullSupport;

impl TypeSupport for NullSupport {
    fn name(&self) -> &str {
        "Null"
    }
}

pub(super) struct FunctionSupport;

impl TypeSupport for FunctionSupport {
    fn name(&self) -> &str {
        "Function"
    }
}

pub(super) struct RefSupport;

impl TypeSupport for RefSupport {
    fn name(&self) -> &str {
        "Ref"
    }
}

pub(super) struct BooleanSupport;

impl TypeSupport for BooleanSupport {
    fn name(&self) -> &str {
        "Boolean"
    }

    fn binary(&self, action: BinaryAction, target: &Value, arg: &Value) -> Result<Outcome> {
        let Value::Bool(a) = target else {
            bail!("Boolean support dispatched for {}", target.type_name());
        };
        let Value::Bool(b) = arg else {
            return Ok(wrong_arg(self.name(), action.name(), arg));
        };
        Ok(match action {
            BinaryAction::And => Outcome::Done(Value::Bool(*a & *b)),
            BinaryAction::Or => Outcome::Done(Value::Bool(*a | *b)),
            BinaryAction::Xor => Outcome::Done(Value::Bool(*a ^ *b)),
            _ => unsupported(self.name(), action.name()),
        })
    }

    fn unary(&self, action: UnaryAction, target: &Value) -> Result<Outcome> {
        let Value::Bool(a) = target else {
            bail!("Boolean support dispatched for {}", target.type_name());
        };
        Ok(match action {
            UnaryAction::Compl => Outcome::Done(Value::Bool(!*a)),
            _ => unsupported(self.name(), action.name()),
        })
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<Outcome<Ordering>> {
        Ok(match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => Outcome::Done(x.cmp(y)),
            _ => wrong_arg(self.name(), "compare", b),
        })
    }
}

pub(super) struct IntSupport;

impl IntSupport {
    fn modulo(a: i64, b: i64) -> Outcome {
        // MIN % -1 only overflows in the intermediate quotient.
        match a.checked_rem(b).or_else(|| (b == -1).then_some(0)) {
            Some(r) if r != 0 && (r ^ b) < 0 => Outcome::Done(Value::Int(r + b)),
            Some(r) => Outcome::Done(Value::Int(r)),
            None => overflow(),
        }
    }
}

impl TypeSupport for IntSupport {
    fn name(&self) -> &str {
        "Int"
    }

    fn binary(&self, action: BinaryAction, target: &Value, arg: &Value) -> Result<Outcome> {
        let Value::Int(a) = *target else {
            bail!("Int support dispatched for {}", target.type_name());
        };
        let Value::Int(b) = *arg else {
            return Ok(wrong_arg(self.name(), action.name(), arg));
        };
        let shift = (b & 63) as u32;
        Ok(match action {
            BinaryAction::Add => checked(a.checked_add(b)),
            BinaryAction::Sub => checked(a.checked_sub(b)),
            BinaryAction::Mul => checked(a.checked_mul(b)),
            BinaryAction::Div if b == 0 => Outcome::raise(exceptions::DIVISION_BY_ZERO, "division by zero"),
            BinaryAction::Div => checked(a.checked_div(b)),
            BinaryAction::Mod if b == 0 => Outcome::raise(exceptions::DIVISION_BY_ZERO, "division by zero"),
            BinaryAction::Mod => Self::modulo(a, b),
            BinaryAction::Shl => Outcome::Done(Value::Int(a.wrapping_shl(shift))),
            BinaryAction::Shr => Outcome::Done(Value::Int(a >> shift)),
            BinaryAction::UShr => Outcome::Done(Value::Int(((a as u64) >> shift) as i64)),
            BinaryAction::And => Outcome::Done(Value::Int(a & b)),
            BinaryAction::Or => Outcome::Done(Value::Int(a | b)),
            BinaryAction::Xor => Outcome::Done(Value::Int(a ^ b)),
            BinaryAction::Range | BinaryAction::RangeExclusive => Outcome::Done(Value::Range(RangeValue {
                lower: a,
                upper: b,
                exclusive: action == BinaryAction::RangeExclusive,
            })),
        })
    }

    fn unary(&self, action: UnaryAction, target: &Value) -> Result<Outcome> {
        let Value::Int(a) = *target else {
            bail!("Int support dispatched for {}", target.type_name());
        };
        Ok(match action {
            UnaryAction::Neg => checked(a.checked_neg()),
            UnaryAction::Compl => Outcome::Done(Value::Int(!a)),
            UnaryAction::Next => checked(a.checked_add(1)),
            UnaryAction::Prev => checked(a.checked_sub(1)),
        })
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<Outcome<Ordering>> {
        Ok(match (a, b) {
            (Value::Int(x), Value::Int(y)) => Outcome::Done(x.cmp(y)),
            _ => wrong_arg(self.name(), "compare", b),
        })
    }

    fn is_zero(&self, value: &Value) -> Result<Outcome<bool>> {
        match value {
            Value::Int(v) => Ok(Outcome::Done(*v == 0)),
            other => bail!("Int support dispatched for {}", other.type_name()),
        }
    }
}

pub(super) struct StringSupport {
    properties: PropertyTable,
}

impl StringSupport {
    pub(super) fn new() -> Self {
        Self {
            properties: PropertyTable::read_only(&["size"]),
        }
    }
}

impl TypeSupport for StringSupport {
    fn name(&self) -> &str {
        "String"
    }

    fn properties(&self) -> Option<&PropertyTable> {
        Some(&self.properties)
    }

    fn binary(&self, action: BinaryAction, target: &Value, arg: &Value) -> Result<Outcome> {
        let Value::Str(s) = target else {
            bail!("String support dispatched for {}", target.type_name());
        };
        Ok(match (action, arg) {
            (BinaryAction::Add, other) => {
                let mut out = String::with_capacity(s.len() + 8);
                out.push_str(s);
                out.push_str(&other.to_string());
                Outcome::Done(Value::Str(Arc::from(out)))
            }
            (BinaryAction::Mul, Value::Int(n)) if *n >= 0 => {
                let len = usize::try_from(*n).ok().and_then(|count| s.len().checked_mul(count));
                match len {
                    Some(len) if len <= MAX_STRING_LEN => Outcome::Done(Value::Str(Arc::from(s.repeat(*n as usize)))),
                    _ => Outcome::raise(
                        exceptions::OUT_OF_BOUNDS,
                        format!("repeated string would exceed {MAX_STRING_LEN} bytes"),
                    ),
                }
            }
            (BinaryAction::Mul, other) => wrong_arg(self.name(), action.name(), other),
            _ => unsupported(self.name(), action.name()),
        })
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<Outcome<Ordering>> {
        Ok(match (a, b) {
            (Value::Str(x), Value::Str(y)) => Outcome::Done(x.cmp(y)),
            _ => wrong_arg(self.name(), "compare", b),
        })
    }

    fn get_property(&self, target: &Value, property: &Property) -> Result<Outcome> {
        match (target, &*property.name) {
            (Value::Str(s), "size") => Ok(Outcome::Done(Value::Int(s.chars().count() as i64))),
            _ => Ok(unsupported(self.name(), &property.name)),
        }
    }
}

pub(super) struct TupleSupport {
    properties: PropertyTable,
}

impl TupleSupport {
    pub(super) fn new() -> Self {
        Self {
            properties: PropertyTable::read_only(&["size"]),
        }
    }
}

impl TypeSupport for TupleSupport {
    fn name(&self) -> &str {
        "Tuple"
    }

    fn properties(&self) -> Option<&PropertyTable> {
        Some(&self.properties)
    }

    fn get_property(&self, target: &Value, property: &Property) -> Result<Outcome> {
        match (target, &*property.name) {
            (Value::Tuple(items), "size") => Ok(Outcome::Done(Value::Int(items.len() as i64))),
            _ => Ok(unsupported(self.name(), &property.name)),
        }
    }
}

pub(super) struct RangeSupport {
    properties: PropertyTable,
}

impl RangeSupport {
    pub(super) fn new() -> Self {
        Self {
            properties: PropertyTable::read_only(&["lower", "upper", "exclusive"]),
        }
    }
}

impl TypeSupport for RangeSupport {
    fn name(&self) -> &str {
        "Range"
    }

    fn properties(&self) -> Option<&PropertyTable> {
        Some(&self.properties)
    }

    fn get_property(&self, target: &Value, property: &Property) -> Result<Outcome> {
        let Value::Range(range) = target else {
            bail!("Range support dispatched for {}", target.type_name());
        };
        Ok(match &*property.name {
            "lower" => Outcome::Done(Value::Int(range.lower)),
            "upper" => Outcome::Done(Value::Int(range.upper)),
            "exclusive" => Outcome::Done(Value::Bool(range.exclusive)),
            _ => unsupported(self.name(), &property.name),
        })
    }
}

pub(super) struct ExceptionSupport {
    properties: PropertyTable,
}

impl ExceptionSupport {
    pub(super) fn new() -> Self {
        Self {
            properties: PropertyTable::read_only(&["message", "type"]),
        }
    }
}

impl TypeSupport for ExceptionSupport {
    fn name(&self) -> &str {
        "Exception"
    }

    fn properties(&self) -> Option<&PropertyTable> {
        Some(&self.properties)
    }

    fn get_property(&self, target: &Value, property: &Property) -> Result<Outcome> {
        let Value::Exception(exc) = target else {
            bail!("Exception support dispatched for {}", target.type_name());
        };
        Ok(match &*property.name {
            "message" => Outcome::Done(Value::str(exc.message())),
            "type" => Outcome::Done(Value::str(exc.type_name())),
            _ => unsupported(self.name(), &property.name),
        })
    }
}

/// Support shared by every declared class: a property table with defaults
/// and read-only flags, fields stored on the object itself.
pub struct ObjectSupport {
    class: Arc<str>,
    properties: PropertyTable,
}

impl ObjectSupport {
    pub fn new(class: Arc<str>, properties: PropertyTable) -> Self {
        Self { class, properties }
    }
}

impl TypeSupport for ObjectSupport {
    fn name(&self) -> &str {
        &self.class
    }

    fn properties(&self) -> Option<&PropertyTable> {
        Some(&self.properties)
    }

    fn get_property(&self, target: &Value, property: &Property) -> Result<Outcome> {
        let Value::Object(obj) = target else {
            bail!("{} support dispatched for {}", self.class, target.type_name());
        };
        Ok(match obj.field(&property.name) {
            Some(v) => Outcome::Done(v),
            None => Outcome::Done(property.default.to_value()),
        })
    }

    fn set_property(&self, target: &Value, property: &Property, value: Value) -> Result<Outcome<()>> {
        let Value::Object(obj) = target else {
            bail!("{} support dispatched for {}", self.class, target.type_name());
        };
        if property.read_only {
            return Ok(Outcome::raise(
                exceptions::READ_ONLY,
                format!("property '{}' of {} is read-only", property.name, self.class),
            ));
        }
        obj.set_field(Arc::clone(&property.name), value);
        Ok(Outcome::Done(()))
    }
}
