//! Loaded programs: a function table plus the type registry they run against.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::types::{ClassDecl, TypeRegistry};
use crate::util::fast_map::{NameMap, fast_hash_map_with_capacity};

use super::bytecode::{Constant, Function, Op};
use super::xvmb::{BytecodeModule, ModuleMeta};

/// JSON form of a program, used by tooling and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramSource {
    #[serde(default)]
    pub classes: Vec<ClassDecl>,
    pub functions: Vec<FunctionSource>,
    #[serde(default)]
    pub entry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSource {
    pub name: String,
    #[serde(default)]
    pub params: usize,
    #[serde(default)]
    pub consts: Vec<Constant>,
    pub code: Vec<Op>,
}

impl ProgramSource {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid program source")
    }
}

#[derive(Debug)]
pub struct Program {
    functions: Vec<Arc<Function>>,
    by_name: NameMap<u32>,
    types: Arc<TypeRegistry>,
    entry: Option<Arc<str>>,
}

impl Program {
    /// Builds a program over `types`. Function and type constants are
    /// checked against the tables here so bad references fail at load.
    pub fn new(functions: Vec<Function>, types: TypeRegistry) -> Result<Self> {
        let mut by_name = fast_hash_map_with_capacity(functions.len());
        for (id, func) in functions.iter().enumerate() {
            if by_name.insert(Arc::clone(func.name()), id as u32).is_some() {
                bail!("duplicate function `{}`", func.name());
            }
        }
        for func in &functions {
            for (idx, constant) in func.consts().iter().enumerate() {
                match constant {
                    Constant::Function(id) => ensure!(
                        (*id as usize) < functions.len(),
                        "constant k{idx} of `{}` names missing function #{id}",
                        func.name()
                    ),
                    Constant::Type(name) => ensure!(
                        types.type_id(name).is_some(),
                        "constant k{idx} of `{}` names unknown type `{name}`",
                        func.name()
                    ),
                    _ => {}
                }
            }
        }
        Ok(Self {
            functions: functions.into_iter().map(Arc::new).collect(),
            by_name,
            types: Arc::new(types),
            entry: None,
        })
    }

    pub fn from_source(source: ProgramSource) -> Result<Self> {
        Self::from_source_with(source, TypeRegistry::with_builtins())
    }

    /// Like [`Program::from_source`], over a registry the host has already
    /// extended with its own supports.
    pub fn from_source_with(source: ProgramSource, mut types: TypeRegistry) -> Result<Self> {
        for class in source.classes {
            let name = class.name.clone();
            types.declare_class(class).with_context(|| format!("declaring class `{name}`"))?;
        }
        let functions = source
            .functions
            .into_iter()
            .map(|f| Function::new(f.name, f.params, f.consts, f.code))
            .collect::<Result<Vec<_>>>()?;
        let mut program = Self::new(functions, types)?;
        program.set_entry(source.entry.as_deref())?;
        Ok(program)
    }

    pub fn from_module(module: BytecodeModule) -> Result<Self> {
        let mut types = TypeRegistry::with_builtins();
        for class in module.classes {
            let name = class.name.clone();
            types.declare_class(class).with_context(|| format!("declaring class `{name}`"))?;
        }
        let mut program = Self::new(module.functions, types)?;
        program.set_entry(module.entry.as_deref())?;
        Ok(program)
    }

    /// Loads a `.xvmb` module or, for any other extension, a JSON source.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        if path.extension().is_some_and(|ext| ext == "xvmb") {
            let module = super::xvmb::decode_module(&bytes).with_context(|| format!("loading {}", path.display()))?;
            Self::from_module(module)
        } else {
            let text = String::from_utf8(bytes).context("program source is not UTF-8")?;
            Self::from_source(ProgramSource::from_json(&text)?).with_context(|| format!("loading {}", path.display()))
        }
    }

    pub fn to_module(&self, meta: Option<ModuleMeta>) -> BytecodeModule {
        let mut module = BytecodeModule::new(self.functions.iter().map(|f| Function::clone(f)).collect());
        module.classes = self.types.declared_classes().to_vec();
        module.entry = self.entry.as_deref().map(str::to_string);
        module.meta = meta;
        module
    }

    fn set_entry(&mut self, entry: Option<&str>) -> Result<()> {
        if let Some(name) = entry {
            ensure!(self.by_name.contains_key(name), "entry function `{name}` is not defined");
            self.entry = Some(Arc::from(name));
        }
        Ok(())
    }

    pub fn function(&self, id: u32) -> Result<&Arc<Function>> {
        self.functions
            .get(id as usize)
            .ok_or_else(|| anyhow!("function #{id} is not defined"))
    }

    pub fn function_id(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn functions(&self) -> &[Arc<Function>] {
        &self.functions
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Declared entry, falling back to a function named `main`.
    pub fn entry(&self) -> Option<&str> {
        self.entry
            .as_deref()
            .or_else(|| self.by_name.contains_key("main").then_some("main"))
    }
}
