use std::sync::Arc;

use anyhow::Result;

use crate::types::{TypeId, TypeRegistry, TypeSupport};
use crate::val::Value;

// Monomorphic per-op cache of the last type's capability table. Misses go to
// the registry and are logged on the slowpath target.
#[derive(Debug, Clone)]
pub(crate) struct DispatchCache {
    sites: Vec<Option<(TypeId, Arc<dyn TypeSupport>)>>,
    enabled: bool,
    hits: u64,
    misses: u64,
}

impl DispatchCache {
    pub(crate) fn new(len: usize, enabled: bool) -> Self {
        Self {
            sites: if enabled { vec![None; len] } else { Vec::new() },
            enabled,
            hits: 0,
            misses: 0,
        }
    }

    pub(crate) fn lookup(&mut self, pc: usize, types: &TypeRegistry, value: &Value) -> Result<Arc<dyn TypeSupport>> {
        let id = value.type_id();
        if self.enabled
            && let Some(Some((cached, support))) = self.sites.get(pc)
            && *cached == id
        {
            self.hits += 1;
            return Ok(Arc::clone(support));
        }
        self.misses += 1;
        let support = Arc::clone(types.support(id)?);
        tracing::debug!(
            target: "xvm::vm::slowpath",
            pc,
            type_name = support.name(),
            "dispatch cache miss"
        );
        if self.enabled
            && let Some(site) = self.sites.get_mut(pc)
        {
            *site = Some((id, Arc::clone(&support)));
        }
        Ok(support)
    }

    pub(crate) fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
