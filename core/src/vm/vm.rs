mod caches;
mod frame;
mod guards;
mod runtime;

use std::collections::VecDeque;

use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{RefHandle, Value};
use crate::vm::config::VmConfig;
use crate::vm::layout::ScopeEvent;

use caches::DispatchCache;

pub use frame::{CallRequest, Frame, ReturnDescriptor, Signal, VarInfo, VarStyle};
pub use guards::{Guard, GuardKind, Handler};
pub use runtime::exec::Completion;

/// Drives frames of one program. Per-function dispatch caches are pooled
/// across calls and dropped when a different program is executed.
pub struct Vm {
    config: VmConfig,
    frames: Vec<Frame>,
    deferred: VecDeque<(RefHandle, Value)>,
    cache_pool: FastHashMap<u32, Vec<DispatchCache>>,
    cache_program: usize,
    last_trace: Vec<ScopeEvent>,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self {
            config,
            frames: Vec::new(),
            deferred: VecDeque::new(),
            cache_pool: fast_hash_map_new(),
            cache_program: 0,
            last_trace: Vec::new(),
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Queues a value for a dynamic reference. The VM binds queued values
    /// one at a time whenever an op reports an unready operand.
    pub fn defer_binding(&mut self, target: RefHandle, value: Value) {
        self.deferred.push_back((target, value));
    }

    pub fn pending_bindings(&self) -> usize {
        self.deferred.len()
    }

    /// Scope events of the entry frame of the last run, when
    /// `trace_scopes` is on.
    pub fn last_scope_trace(&self) -> &[ScopeEvent] {
        &self.last_trace
    }

    fn take_cache(&mut self, function: u32, len: usize) -> DispatchCache {
        self.cache_pool
            .get_mut(&function)
            .and_then(Vec::pop)
            .unwrap_or_else(|| DispatchCache::new(len, self.config.dispatch_cache))
    }

    fn release_cache(&mut self, function: u32, cache: DispatchCache) {
        self.cache_pool.entry(function).or_default().push(cache);
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
