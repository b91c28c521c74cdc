// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The lifecycle registry: lazy construction, dependency capture, and
//! ordered teardown of managed services.
//!
//! All registry state lives behind one re-entrant lock. Holding the lock
//! across a whole acquisition makes the "does it exist" check and the
//! construction that may follow atomic with respect to other OS threads,
//! while a builder or initializer requesting further services re-enters
//! freely on the owning thread. User hooks (`build`, `initialize`,
//! `cleanup`, drops) always run with the interior borrow released, so they
//! may call back into the registry.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use taxis_graph::DependencyGraph;

use crate::context::{ContextId, ContextIdProvider, ThreadContextProvider};
use crate::service::{ManagedService, ServiceState};

/// Log severities applied when a request circles back into the requesting
/// context's own initialization chain.
///
/// A service's `initialize` asking for its own service is an expected
/// pattern (registering callbacks with something it just set up) and
/// defaults to `Debug`. A request reaching a service *deeper* in the chain
/// hints at a tangled design and defaults to `Warn`. Both stay non-fatal;
/// only cycles into a `Constructing` service are fatal, regardless of
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircularityPolicy {
    /// Severity when a service requests itself during its own
    /// initialization.
    pub self_reference: log::Level,
    /// Severity when the request reaches a service deeper in the current
    /// context's initializing chain.
    pub chained_reference: log::Level,
}

impl Default for CircularityPolicy {
    fn default() -> Self {
        Self {
            self_reference: log::Level::Debug,
            chained_reference: log::Level::Warn,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LifecycleRegistry public surface
// ─────────────────────────────────────────────────────────────────────────────

/// Home of every managed service in a process.
///
/// One registry is constructed at process entry and passed by handle to
/// each subsystem that needs services; nothing here is ambient global
/// state, which keeps tests hermetic. Services come into being through
/// [`instance`], which records the dependencies it discovers along the
/// way; [`cleanup_all`] and [`delete_all`] replay those dependencies to
/// tear everything down dependents-first.
///
/// [`instance`]: LifecycleRegistry::instance
/// [`cleanup_all`]: LifecycleRegistry::cleanup_all
/// [`delete_all`]: LifecycleRegistry::delete_all
pub struct LifecycleRegistry {
    provider: Arc<dyn ContextIdProvider>,
    state: ReentrantMutex<RefCell<RegistryState>>,
}

impl Default for LifecycleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleRegistry {
    /// Creates an empty registry using [`ThreadContextProvider`] for
    /// execution-context identity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_context_provider(Arc::new(ThreadContextProvider))
    }

    /// Creates an empty registry with a custom execution-context identity
    /// source, e.g. task identity under a cooperative scheduler.
    #[must_use]
    pub fn with_context_provider(provider: Arc<dyn ContextIdProvider>) -> Self {
        Self {
            provider,
            state: ReentrantMutex::new(RefCell::new(RegistryState::default())),
        }
    }

    /// Replaces the severities used for tolerated initialization
    /// circularity.
    pub fn set_circularity_policy(&self, policy: CircularityPolicy) {
        let guard = self.state.lock();
        guard.borrow_mut().policy = policy;
    }

    /// Returns the shared instance of `T`, constructing it on first
    /// request.
    ///
    /// Construction runs `T::build`, publishes the instance, then runs
    /// `T::initialize`. Every service requested from inside either hook is
    /// recorded as a dependency of `T`; those edges later drive the
    /// dependents-first order of [`cleanup_all`] and [`delete_all`].
    ///
    /// Requesting a service that is already in the *current* execution
    /// context's construction chain is a circularity: fatal if the target
    /// is still `Constructing`, otherwise tolerated, logged per the
    /// configured [`CircularityPolicy`], and left out of the dependency
    /// edges.
    ///
    /// # Panics
    ///
    /// Panics on construction circularity, and when the instance is still
    /// `Constructing` on a different execution context (there is nothing
    /// usable to hand out and waiting could never make progress on a
    /// cooperative scheduler).
    ///
    /// [`cleanup_all`]: LifecycleRegistry::cleanup_all
    /// [`delete_all`]: LifecycleRegistry::delete_all
    pub fn instance<T: ManagedService>(&self) -> Arc<T> {
        let type_id = TypeId::of::<T>();
        let name = T::service_name();
        let context = self.provider.current_context();
        let guard = self.state.lock();

        // Existing record: classify the request against this context's
        // in-flight chain, then hand out another reference.
        {
            let mut state = guard.borrow_mut();
            if let Some(&id) = state.by_type.get(&type_id) {
                return state.acquire_existing::<T>(context, id, name);
            }
        }

        // New service: register the record and push it onto this context's
        // stack before the builder runs, so recursive requests observe the
        // Constructing state.
        let id = {
            let mut state = guard.borrow_mut();
            if state.deleted_types.remove(&type_id) {
                log::warn!("LifecycleRegistry: resurrecting service '{name}' after deletion");
            }
            let id = state.allocate_id();
            state.master.insert(id, ServiceRecord::constructing::<T>());
            state.by_type.insert(type_id, id);
            state.capture_dependency(context, id);
            state.initializing.entry(context).or_default().push(id);
            id
        };

        // User code runs with the borrow released; nested instance() calls
        // re-enter through the same lock.
        let service = Arc::new(T::build(self));

        {
            let mut state = guard.borrow_mut();
            state.publish::<T>(id, &service);
        }

        service.initialize(self);

        {
            let mut state = guard.borrow_mut();
            state.pop_initializing(context, id, name);
            if let Some(record) = state.master.get_mut(&id) {
                if record.state == ServiceState::Initializing {
                    record.state = ServiceState::Active;
                }
            }
        }

        log::debug!("LifecycleRegistry: service '{name}' is active");
        service
    }

    /// Returns the instance of `T` if one has been published, without
    /// constructing, recording dependencies, or circularity checks.
    #[must_use]
    pub fn try_instance<T: ManagedService>(&self) -> Option<Arc<T>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let id = state.by_type.get(&TypeId::of::<T>()).copied()?;
        let record = state.master.get(&id)?;
        let instance = record.instance.clone()?;
        instance.downcast::<T>().ok()
    }

    /// Whether a usable instance of `T` currently exists.
    #[must_use]
    pub fn instance_exists<T: ManagedService>(&self) -> bool {
        self.try_instance::<T>().is_some()
    }

    /// Lifecycle position of `T`: the live record's state, `Deleted` for a
    /// service the delete pass has disposed of, `None` for a type never
    /// requested.
    #[must_use]
    pub fn service_state<T: ManagedService>(&self) -> Option<ServiceState> {
        let guard = self.state.lock();
        let state = guard.borrow();
        if let Some(id) = state.by_type.get(&TypeId::of::<T>()) {
            return state.master.get(id).map(|record| record.state);
        }
        if state.deleted_types.contains(&TypeId::of::<T>()) {
            return Some(ServiceState::Deleted);
        }
        None
    }

    /// Number of live service records.
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.state.lock().borrow().master.len()
    }

    /// Names of every live service, in construction order.
    #[must_use]
    pub fn service_names(&self) -> Vec<&'static str> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.master.values().map(|record| record.name).collect()
    }

    /// Runs every service's cleanup hook, dependents before dependencies.
    ///
    /// Idempotent per service: each hook runs at most once even across
    /// repeated calls. A failing or panicking hook is logged and never
    /// stops the rest of the pass.
    pub fn cleanup_all(&self) {
        let guard = self.state.lock();
        let order = guard.borrow().teardown_order();
        for id in order {
            let step = {
                let mut state = guard.borrow_mut();
                match state.master.get_mut(&id) {
                    Some(record) if !record.cleaned && record.hooks.is_some() => {
                        record.cleaned = true;
                        record.state = ServiceState::Cleaned;
                        record.hooks.clone().map(|hooks| (record.name, hooks))
                    }
                    _ => None,
                }
            };
            if let Some((name, hooks)) = step {
                run_cleanup_hook(name, &hooks);
            }
        }
    }

    /// Runs every service's deletion closure exactly once, dependents
    /// before dependencies, and forgets the records.
    ///
    /// Safe to call repeatedly: already-deleted services are simply gone.
    /// `Arc`s handed out earlier keep their instances alive; the registry
    /// drops its own ownership and never touches them again.
    pub fn delete_all(&self) {
        let guard = self.state.lock();
        let order = guard.borrow().teardown_order();
        let mut deleted = 0usize;
        for id in order {
            let step = {
                let mut state = guard.borrow_mut();
                state.unregister(id)
            };
            if let Some((name, disposer)) = step {
                deleted += 1;
                run_disposer(name, disposer);
            }
        }
        if deleted > 0 {
            log::info!("LifecycleRegistry: deleted {deleted} services");
        }
    }

    /// Cleans up and deletes a single service, skipping dependency
    /// ordering. Returns whether the service existed.
    ///
    /// Dependents keep whatever `Arc`s they already hold; the risk of
    /// pulling a service out from under them belongs to the caller.
    pub fn delete_service<T: ManagedService>(&self) -> bool {
        let guard = self.state.lock();
        let step = {
            let mut state = guard.borrow_mut();
            let id = match state.by_type.get(&TypeId::of::<T>()).copied() {
                Some(id) => id,
                None => return false,
            };
            let hooks = match state.master.get_mut(&id) {
                Some(record) if !record.cleaned && record.hooks.is_some() => {
                    record.cleaned = true;
                    record.state = ServiceState::Cleaned;
                    record.hooks.clone()
                }
                _ => None,
            };
            state
                .unregister(id)
                .map(|(name, disposer)| (name, hooks, disposer))
        };
        let (name, hooks, disposer) = match step {
            Some(step) => step,
            None => return false,
        };
        if let Some(hooks) = hooks {
            run_cleanup_hook(name, &hooks);
        }
        run_disposer(name, disposer);
        true
    }

    /// Full ordered teardown: [`cleanup_all`] followed by [`delete_all`].
    ///
    /// Prefer calling this deterministically from the process's main exit
    /// path; the lifetime-anchor refcount covers owners that cannot.
    ///
    /// [`cleanup_all`]: LifecycleRegistry::cleanup_all
    /// [`delete_all`]: LifecycleRegistry::delete_all
    pub fn shutdown(&self) {
        log::info!("LifecycleRegistry: shutting down");
        self.cleanup_all();
        self.delete_all();
    }

    pub(crate) fn anchor_acquired(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.anchors += 1;
    }

    pub(crate) fn anchor_released(&self) {
        let remaining = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            state.anchors = state.anchors.saturating_sub(1);
            state.anchors
        };
        if remaining == 0 {
            log::debug!("LifecycleRegistry: last lifetime anchor released");
            self.delete_all();
        }
    }
}

impl Drop for LifecycleRegistry {
    fn drop(&mut self) {
        // Ordered teardown even when the owner never called shutdown().
        self.delete_all();
    }
}

/// Runs one cleanup hook inside a failure boundary.
fn run_cleanup_hook(name: &str, hooks: &Arc<dyn ManagedService>) {
    match catch_unwind(AssertUnwindSafe(|| hooks.cleanup())) {
        Ok(Ok(())) => log::debug!("LifecycleRegistry: cleaned up '{name}'"),
        Ok(Err(err)) => log::error!("LifecycleRegistry: cleanup of '{name}' failed: {err}"),
        Err(_) => log::error!("LifecycleRegistry: cleanup of '{name}' panicked"),
    }
}

/// Runs one deletion closure inside a failure boundary.
fn run_disposer(name: &str, disposer: Option<Disposer>) {
    match disposer {
        Some(disposer) => match catch_unwind(AssertUnwindSafe(disposer)) {
            Ok(()) => log::debug!("LifecycleRegistry: deleted service '{name}'"),
            Err(_) => log::error!("LifecycleRegistry: deletion of '{name}' panicked"),
        },
        None => log::debug!("LifecycleRegistry: forgot '{name}' (never finished constructing)"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

/// Monotonic identity of one record in the master list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct InstanceId(u64);

type Disposer = Box<dyn FnOnce() + Send>;

/// Everything the registry knows about one managed service.
struct ServiceRecord {
    name: &'static str,
    type_id: TypeId,
    state: ServiceState,
    /// Latch for the cleanup hook, independent of `state` so an in-flight
    /// initialization cannot unlatch it.
    cleaned: bool,
    instance: Option<Arc<dyn Any + Send + Sync>>,
    hooks: Option<Arc<dyn ManagedService>>,
    /// Ids this service requested while building or initializing; drives
    /// teardown order.
    depends_on: BTreeSet<InstanceId>,
    /// Bound right after construction while the concrete type is still
    /// known; deletion must never need type information.
    disposer: Option<Disposer>,
}

impl ServiceRecord {
    fn constructing<T: ManagedService>() -> Self {
        Self {
            name: T::service_name(),
            type_id: TypeId::of::<T>(),
            state: ServiceState::Constructing,
            cleaned: false,
            instance: None,
            hooks: None,
            depends_on: BTreeSet::new(),
            disposer: None,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    master: BTreeMap<InstanceId, ServiceRecord>,
    by_type: HashMap<TypeId, InstanceId>,
    /// One stack per live execution context; an entry is removed outright
    /// when its stack empties.
    initializing: HashMap<ContextId, Vec<InstanceId>>,
    deleted_types: HashSet<TypeId>,
    next_id: u64,
    anchors: usize,
    policy: CircularityPolicy,
}

impl RegistryState {
    fn allocate_id(&mut self) -> InstanceId {
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        id
    }

    fn stack_position(&self, context: ContextId, id: InstanceId) -> Option<usize> {
        self.initializing
            .get(&context)
            .and_then(|stack| stack.iter().position(|&entry| entry == id))
    }

    fn stack_len(&self, context: ContextId) -> usize {
        self.initializing.get(&context).map_or(0, Vec::len)
    }

    fn stack_top(&self, context: ContextId) -> Option<InstanceId> {
        self.initializing
            .get(&context)
            .and_then(|stack| stack.last().copied())
    }

    /// Hands out a reference to an already-registered service, applying
    /// the circularity rules for requests arriving from inside a
    /// construction or initialization chain.
    fn acquire_existing<T: ManagedService>(
        &mut self,
        context: ContextId,
        id: InstanceId,
        name: &'static str,
    ) -> Arc<T> {
        let record_state = match self.master.get(&id) {
            Some(record) => record.state,
            None => panic!("LifecycleRegistry: type index names a missing record for '{name}'"),
        };
        match self.stack_position(context, id) {
            Some(position) => {
                // The request circles back into this context's own
                // in-flight chain.
                if record_state == ServiceState::Constructing {
                    let chain = self.chain_description(context, name);
                    log::error!("LifecycleRegistry: circular construction: {chain}");
                    panic!("circular construction of managed services: {chain}");
                }
                if position + 1 == self.stack_len(context) {
                    log::log!(
                        self.policy.self_reference,
                        "LifecycleRegistry: '{name}' requested itself during its own initialization"
                    );
                } else {
                    log::log!(
                        self.policy.chained_reference,
                        "LifecycleRegistry: '{name}' requested from deeper in its own initialization chain; dependency not recorded"
                    );
                }
                // Circular requests never record an edge.
            }
            None => {
                if record_state == ServiceState::Constructing {
                    // Some other execution context is mid-build; there is
                    // no usable instance to hand out.
                    log::error!(
                        "LifecycleRegistry: '{name}' requested while constructing on another execution context"
                    );
                    panic!("'{name}' requested while constructing on another execution context");
                }
                self.capture_dependency(context, id);
            }
        }
        self.typed_instance::<T>(id, name)
    }

    /// Records "the innermost in-flight service of `context` depends on
    /// `dependency`". Recording the same edge twice is a silent no-op.
    fn capture_dependency(&mut self, context: ContextId, dependency: InstanceId) {
        let dependent = match self.stack_top(context) {
            Some(top) => top,
            None => return,
        };
        let dependency_name = self
            .master
            .get(&dependency)
            .map_or("<unregistered>", |record| record.name);
        if let Some(record) = self.master.get_mut(&dependent) {
            if record.depends_on.insert(dependency) {
                log::debug!(
                    "LifecycleRegistry: '{}' depends on '{}'",
                    record.name,
                    dependency_name
                );
            }
        }
    }

    /// Publishes the freshly built instance and binds its type-erased
    /// deletion closure.
    fn publish<T: ManagedService>(&mut self, id: InstanceId, service: &Arc<T>) {
        let record = match self.master.get_mut(&id) {
            Some(record) => record,
            None => panic!(
                "LifecycleRegistry: record for '{}' vanished mid-construction",
                T::service_name()
            ),
        };
        record.instance = Some(Arc::clone(service) as Arc<dyn Any + Send + Sync>);
        record.hooks = Some(Arc::clone(service) as Arc<dyn ManagedService>);
        let owned = Arc::clone(service);
        record.disposer = Some(Box::new(move || drop(owned)));
        record.state = ServiceState::Initializing;
    }

    /// Pops `id` off this context's stack, enforcing strict LIFO, and
    /// drops the stack's map entry once it empties.
    fn pop_initializing(&mut self, context: ContextId, id: InstanceId, name: &str) {
        let stack = match self.initializing.get_mut(&context) {
            Some(stack) => stack,
            None => {
                log::error!(
                    "LifecycleRegistry: initializing stack for {context} vanished while '{name}' was in flight"
                );
                panic!("initializing stack push/pop mismatch for '{name}'");
            }
        };
        match stack.pop() {
            Some(top) if top == id => {}
            other => {
                log::error!(
                    "LifecycleRegistry: initializing stack for {context} out of order: expected '{name}', found {other:?}"
                );
                panic!("initializing stack push/pop mismatch for '{name}'");
            }
        }
        if stack.is_empty() {
            self.initializing.remove(&context);
        }
    }

    fn typed_instance<T: ManagedService>(&self, id: InstanceId, name: &str) -> Arc<T> {
        let instance = match self.master.get(&id).and_then(|record| record.instance.clone()) {
            Some(instance) => instance,
            None => panic!("LifecycleRegistry: no instance published for '{name}'"),
        };
        match instance.downcast::<T>() {
            Ok(typed) => typed,
            Err(_) => panic!("LifecycleRegistry: type index corrupted for '{name}'"),
        }
    }

    /// Orders every record dependents-first by replaying the captured
    /// edges through a dependency graph: "this depends on X" becomes
    /// "this comes before X" in teardown.
    fn teardown_order(&self) -> Vec<InstanceId> {
        let mut graph: DependencyGraph<InstanceId> = DependencyGraph::new();
        for (&id, record) in &self.master {
            graph.add(id, (), [], record.depends_on.iter().copied());
        }
        match graph.sorted() {
            Ok(pairs) => pairs.into_iter().map(|(&id, _)| id).collect(),
            Err(err) => {
                log::error!(
                    "LifecycleRegistry: teardown ordering failed, falling back to reverse construction order: {err}"
                );
                self.master.keys().rev().copied().collect()
            }
        }
    }

    /// Removes the record and hands back its name and deletion closure.
    /// The record is gone before the closure runs, so no registry path can
    /// reach the instance afterwards.
    fn unregister(&mut self, id: InstanceId) -> Option<(&'static str, Option<Disposer>)> {
        let mut record = self.master.remove(&id)?;
        if self.by_type.get(&record.type_id) == Some(&id) {
            self.by_type.remove(&record.type_id);
        }
        self.deleted_types.insert(record.type_id);
        Some((record.name, record.disposer.take()))
    }

    /// Renders this context's in-flight chain plus the requested service,
    /// for circularity reports.
    fn chain_description(&self, context: ContextId, requested: &str) -> String {
        let mut chain = String::new();
        if let Some(stack) = self.initializing.get(&context) {
            for id in stack {
                if let Some(record) = self.master.get(id) {
                    let _ = write!(chain, "'{}' -> ", record.name);
                }
            }
        }
        let _ = write!(chain, "'{requested}'");
        chain
    }
}
