use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::util::fast_map::{NameMap, fast_hash_map_new};
use crate::val::{ExceptionHandle, ObjectHandle, Value};
use crate::vm::Constant;

use super::builtin::{
    BooleanSupport, ExceptionSupport, FunctionSupport, IntSupport, NullSupport, ObjectSupport, RangeSupport, RefSupport,
    StringSupport, TupleSupport,
};
use super::{Outcome, PropertyTable, TypeId, TypeSupport, exceptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub name: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub default: Constant,
}

/// Class declaration carried by a program. A class whose parent chain reaches
/// `Exception` declares an exception type instead of an object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDecl>,
}

/// Read-only after construction; shared by every frame of a program.
pub struct TypeRegistry {
    supports: Vec<Arc<dyn TypeSupport>>,
    by_name: NameMap<TypeId>,
    parents: NameMap<Option<Arc<str>>>,
    declared: Vec<ClassDecl>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("supports", &self.supports.len())
            .field("declared", &self.declared)
            .finish()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TypeRegistry {
    pub fn with_builtins() -> Self {
        let builtins: [Arc<dyn TypeSupport>; 9] = [
            Arc::new(NullSupport),
            Arc::new(BooleanSupport),
            Arc::new(IntSupport),
            Arc::new(StringSupport::new()),
            Arc::new(TupleSupport::new()),
            Arc::new(RangeSupport::new()),
            Arc::new(ExceptionSupport::new()),
            Arc::new(FunctionSupport),
            Arc::new(RefSupport),
        ];
        let mut registry = Self {
            supports: Vec::with_capacity(builtins.len() + 8),
            by_name: fast_hash_map_new(),
            parents: fast_hash_map_new(),
            declared: Vec::new(),
        };
        for (idx, support) in builtins.into_iter().enumerate() {
            let name: Arc<str> = Arc::from(support.name());
            registry.by_name.insert(Arc::clone(&name), TypeId(idx as u32));
            registry.parents.insert(name, None);
            registry.supports.push(support);
        }
        debug_assert_eq!(registry.supports.len(), TypeId::FIRST_CLASS.index());
        for (name, parent) in exceptions::BUILTIN {
            registry.by_name.insert(Arc::from(name), TypeId::EXCEPTION);
            registry.parents.insert(Arc::from(name), Some(Arc::from(parent)));
        }
        registry
    }

    /// Registers a program class. Parents must be declared first.
    pub fn declare_class(&mut self, decl: ClassDecl) -> Result<TypeId> {
        ensure!(!self.by_name.contains_key(decl.name.as_str()), "type `{}` is already declared", decl.name);
        let parent: Option<Arc<str>> = match &decl.parent {
            Some(p) => {
                let (key, _) = self
                    .parents
                    .get_key_value(p.as_str())
                    .ok_or_else(|| anyhow!("class `{}` extends unknown type `{p}`", decl.name))?;
                Some(Arc::clone(key))
            }
            None => None,
        };
        let name: Arc<str> = Arc::from(decl.name.as_str());

        if let Some(p) = &parent
            && self.is_a(p, exceptions::EXCEPTION)
        {
            ensure!(
                decl.properties.is_empty(),
                "exception class `{}` cannot declare properties",
                decl.name
            );
            self.by_name.insert(Arc::clone(&name), TypeId::EXCEPTION);
            self.parents.insert(name, parent);
            self.declared.push(decl);
            return Ok(TypeId::EXCEPTION);
        }

        let mut props: Vec<(Arc<str>, bool, Constant)> = Vec::new();
        if let Some(p) = &parent {
            let inherited = self
                .support(self.type_id(p).ok_or_else(|| anyhow!("unknown parent `{p}`"))?)?
                .properties();
            if let Some(table) = inherited {
                props.extend(table.iter().map(|prop| (Arc::clone(&prop.name), prop.read_only, prop.default.clone())));
            }
        }
        for prop in &decl.properties {
            ensure!(
                !props.iter().any(|(n, _, _)| &**n == prop.name),
                "class `{}` declares property `{}` twice",
                decl.name,
                prop.name
            );
            props.push((Arc::from(prop.name.as_str()), prop.read_only, prop.default.clone()));
        }

        let support = Arc::new(ObjectSupport::new(Arc::clone(&name), PropertyTable::new(props)));
        let id = self.push_support(Arc::clone(&name), support);
        self.parents.insert(name, parent);
        self.declared.push(decl);
        Ok(id)
    }

    /// Installs a host-provided support under `name`, replacing any previous one.
    pub fn register_support(&mut self, name: &str, support: Arc<dyn TypeSupport>) -> TypeId {
        if let Some(&id) = self.by_name.get(name)
            && id != TypeId::EXCEPTION
        {
            self.supports[id.index()] = support;
            return id;
        }
        let name: Arc<str> = Arc::from(name);
        self.parents.entry(Arc::clone(&name)).or_insert(None);
        self.push_support(name, support)
    }

    fn push_support(&mut self, name: Arc<str>, support: Arc<dyn TypeSupport>) -> TypeId {
        let id = TypeId(self.supports.len() as u32);
        self.supports.push(support);
        self.by_name.insert(name, id);
        id
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn support(&self, id: TypeId) -> Result<&Arc<dyn TypeSupport>> {
        self.supports
            .get(id.index())
            .ok_or_else(|| anyhow!("no type support registered for type id {}", id.0))
    }

    pub fn support_for(&self, value: &Value) -> Result<&Arc<dyn TypeSupport>> {
        self.support(value.type_id())
    }

    /// True when `name` equals `target` or inherits from it.
    pub fn is_a(&self, name: &str, target: &str) -> bool {
        let mut current: Option<&str> = Some(name);
        while let Some(n) = current {
            if n == target {
                return true;
            }
            current = self.parents.get(n).and_then(|p| p.as_deref());
        }
        false
    }

    pub fn is_exception_type(&self, name: &str) -> bool {
        self.is_a(name, exceptions::EXCEPTION)
    }

    pub fn declared_classes(&self) -> &[ClassDecl] {
        &self.declared
    }

    /// Instantiates `class` with positional property values.
    pub fn construct(&self, class: &str, args: Vec<Value>) -> Result<Outcome> {
        let Some(id) = self.type_id(class) else {
            bail!("cannot construct unknown type `{class}`");
        };
        if self.is_exception_type(class) {
            if args.len() > 1 {
                return Ok(Outcome::raise(
                    exceptions::ILLEGAL_ARGUMENT,
                    format!("{class} takes at most one argument, got {}", args.len()),
                ));
            }
            let message = args.first().map(Value::to_string).unwrap_or_default();
            return Ok(Outcome::Done(Value::Exception(ExceptionHandle::new(class, message))));
        }
        ensure!(id >= TypeId::FIRST_CLASS, "built-in type `{class}` cannot be constructed with NEW");

        let support = self.support(id)?;
        let empty = PropertyTable::default();
        let table = support.properties().unwrap_or(&empty);
        if args.len() > table.len() {
            return Ok(Outcome::raise(
                exceptions::ILLEGAL_ARGUMENT,
                format!("{class} has {} properties, got {} arguments", table.len(), args.len()),
            ));
        }
        let mut args = args.into_iter();
        let fields: Vec<(Arc<str>, Value)> = table
            .iter()
            .map(|prop| {
                let value = args.next().unwrap_or_else(|| prop.default.to_value());
                (Arc::clone(&prop.name), value)
            })
            .collect();
        let name = Arc::from(support.name());
        Ok(Outcome::Done(Value::Object(ObjectHandle::new(name, id, fields))))
    }
}
