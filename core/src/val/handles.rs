use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::TypeId;
use crate::util::fast_map::{NameMap, fast_hash_map_with_capacity};

use super::Value;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Guest exception value. Identity matters: a re-raised exception is the same handle.
#[derive(Clone)]
pub struct ExceptionHandle(Arc<ExceptionData>);

struct ExceptionData {
    type_name: Arc<str>,
    message: Arc<str>,
}

impl ExceptionHandle {
    pub fn new(type_name: impl Into<Arc<str>>, message: impl Into<Arc<str>>) -> Self {
        Self(Arc::new(ExceptionData {
            type_name: type_name.into(),
            message: message.into(),
        }))
    }

    pub fn type_name(&self) -> &str {
        &self.0.type_name
    }

    pub fn message(&self) -> &str {
        &self.0.message
    }

    pub fn ptr_eq(&self, other: &ExceptionHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ExceptionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ExceptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.type_name(), self.message())
    }
}

impl fmt::Display for ExceptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message().is_empty() {
            f.write_str(self.type_name())
        } else {
            write!(f, "{}: {}", self.type_name(), self.message())
        }
    }
}

/// Instance of a declared class: a type id plus a mutable field table.
#[derive(Clone)]
pub struct ObjectHandle(Arc<ObjectData>);

struct ObjectData {
    class: Arc<str>,
    type_id: TypeId,
    fields: Mutex<NameMap<Value>>,
}

impl ObjectHandle {
    pub fn new(class: Arc<str>, type_id: TypeId, fields: impl IntoIterator<Item = (Arc<str>, Value)>) -> Self {
        let iter = fields.into_iter();
        let mut table = fast_hash_map_with_capacity(iter.size_hint().0);
        table.extend(iter);
        Self(Arc::new(ObjectData {
            class,
            type_id,
            fields: Mutex::new(table),
        }))
    }

    pub fn class(&self) -> &str {
        &self.0.class
    }

    pub fn type_id(&self) -> TypeId {
        self.0.type_id
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        lock(&self.0.fields).get(name).cloned()
    }

    pub fn set_field(&self, name: Arc<str>, value: Value) {
        lock(&self.0.fields).insert(name, value);
    }

    pub fn ptr_eq(&self, other: &ObjectHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:p}", self.class(), Arc::as_ptr(&self.0))
    }
}

/// Binding state of a dynamic reference.
#[derive(Debug, Clone, Default)]
pub enum DynamicRef {
    #[default]
    Unbound,
    Bound(Value),
}

/// Shared wrapper for deferred-binding variables. Reading an unbound reference
/// is "not ready", which the interpreter turns into a repeat signal.
#[derive(Clone, Default)]
pub struct RefHandle(Arc<Mutex<DynamicRef>>);

impl RefHandle {
    pub fn unbound() -> Self {
        Self::default()
    }

    pub fn bound(value: Value) -> Self {
        Self(Arc::new(Mutex::new(DynamicRef::Bound(value))))
    }

    pub fn get(&self) -> Option<Value> {
        match &*lock(&self.0) {
            DynamicRef::Bound(value) => Some(value.clone()),
            DynamicRef::Unbound => None,
        }
    }

    pub fn bind(&self, value: Value) {
        *lock(&self.0) = DynamicRef::Bound(value);
    }

    pub fn is_bound(&self) -> bool {
        matches!(&*lock(&self.0), DynamicRef::Bound(_))
    }

    pub fn state(&self) -> DynamicRef {
        lock(&self.0).clone()
    }

    pub fn ptr_eq(&self, other: &RefHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for RefHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state() {
            DynamicRef::Unbound => f.write_str("Ref(<unbound>)"),
            DynamicRef::Bound(value) => write!(f, "Ref({value:?})"),
        }
    }
}
