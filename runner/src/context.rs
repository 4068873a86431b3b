use std::any::Any;
use std::any::TypeId;
use std::any::type_name;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;

use serde::Serialize;
use time::OffsetDateTime;

use crate::callback::CompletionKeepalive;
use crate::callback::CompletionSlot;
use crate::callback::LoaderCallback;
use crate::descriptor::LoaderData;
use crate::descriptor::LoaderDescriptor;
use crate::descriptor::NormalFn;
use crate::descriptor::PitchFn;
use crate::descriptor::ResolvedLoader;
use crate::error::LoaderError;
use crate::error::LoaderResult;
use crate::request::dirname;
use crate::request::split_query;

/// Locks a mutex, recovering the data if a hook panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub level: DiagnosticLevel,
    pub message: String,
}

/// Cacheability and dependency registries as seen at the end of a run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DependencySnapshot {
    pub cacheable: bool,
    pub file_dependencies: Vec<String>,
    pub context_dependencies: Vec<String>,
    pub missing_dependencies: Vec<String>,
}

impl Default for DependencySnapshot {
    fn default() -> Self {
        Self {
            cacheable: true,
            file_dependencies: Vec::new(),
            context_dependencies: Vec::new(),
            missing_dependencies: Vec::new(),
        }
    }
}

/// What a hook sees as its loader's query.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderQuery {
    /// Structured options, when they were given as an object or array.
    Options(serde_json::Value),
    Query(String),
}

struct TypedSlot {
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync + 'static>,
}

/// Caller-provided values made visible to every hook: typed slots keyed by
/// type plus named JSON values.
#[derive(Default)]
pub struct ContextExtensions {
    typed_slots: HashMap<TypeId, TypedSlot>,
    values: HashMap<String, serde_json::Value>,
}

impl std::fmt::Debug for ContextExtensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut slots: Vec<_> = self.typed_slots.values().map(|slot| slot.type_name).collect();
        slots.sort_unstable();
        f.debug_struct("ContextExtensions")
            .field("typed_slots", &slots)
            .field("values", &self.values)
            .finish()
    }
}

impl ContextExtensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_typed<T>(&mut self, value: T)
    where
        T: Any + Send + Sync + 'static,
    {
        self.typed_slots.insert(
            TypeId::of::<T>(),
            TypedSlot {
                type_name: type_name::<T>(),
                value: Box::new(value),
            },
        );
    }

    pub fn with_typed<T>(mut self, value: T) -> Self
    where
        T: Any + Send + Sync + 'static,
    {
        self.insert_typed(value);
        self
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.values.insert(name.into(), value);
    }

    pub fn with_value(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.set_value(name, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.typed_slots.is_empty() && self.values.is_empty()
    }

    pub(crate) fn into_values(self) -> HashMap<String, serde_json::Value> {
        self.values
    }
}

struct ContextState {
    loaders: Vec<LoaderDescriptor>,
    loader_index: isize,
    context_directory: Option<String>,
    resource_path: Option<String>,
    resource_query: Option<String>,
    file_dependencies: Vec<String>,
    context_dependencies: Vec<String>,
    missing_dependencies: Vec<String>,
    cacheable: bool,
    completion: Option<CompletionSlot>,
}

impl ContextState {
    fn resource(&self) -> Option<String> {
        let path = self.resource_path.as_deref()?;
        Some(format!(
            "{path}{}",
            self.resource_query.as_deref().unwrap_or_default()
        ))
    }

    fn join_requests(&self, start: isize, end: isize, with_resource: bool) -> String {
        let clamp = |index: isize| index.clamp(0, self.loaders.len() as isize) as usize;
        let (start, end) = (clamp(start), clamp(end));
        let mut parts: Vec<String> = self.loaders[start..end.max(start)]
            .iter()
            .map(LoaderDescriptor::request)
            .collect();
        if with_resource {
            parts.push(self.resource().unwrap_or_default());
        }
        parts.join("!")
    }

    fn current(&self) -> Option<&LoaderDescriptor> {
        usize::try_from(self.loader_index)
            .ok()
            .and_then(|index| self.loaders.get(index))
    }
}

struct ContextInner {
    state: Mutex<ContextState>,
    typed_slots: RwLock<HashMap<TypeId, TypedSlot>>,
    values: RwLock<HashMap<String, serde_json::Value>>,
    diagnostics: Mutex<Vec<DiagnosticEntry>>,
}

/// The capability handle every hook receives. Cloning is cheap and clones
/// share state, so deferred work may keep a clone and report dependencies
/// before it completes.
pub struct LoaderContext {
    inner: Arc<ContextInner>,
    // A clone taken while a hook runs can still complete that hook.
    keepalive: Option<CompletionKeepalive>,
}

impl Clone for LoaderContext {
    fn clone(&self) -> Self {
        let keepalive = self
            .state()
            .completion
            .as_ref()
            .and_then(CompletionSlot::keepalive)
            .or_else(|| self.keepalive.clone());
        Self {
            inner: Arc::clone(&self.inner),
            keepalive,
        }
    }
}

impl std::fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderContext").finish_non_exhaustive()
    }
}

impl LoaderContext {
    pub(crate) fn new(
        resource: Option<&str>,
        loaders: Vec<LoaderDescriptor>,
        extensions: ContextExtensions,
    ) -> Self {
        let (resource_path, resource_query) = match resource.filter(|value| !value.is_empty()) {
            Some(resource) => {
                let (path, query) = split_query(resource);
                (Some(path.to_string()), Some(query.to_string()))
            }
            None => (None, None),
        };
        let context_directory = resource_path
            .as_deref()
            .filter(|path| !path.is_empty())
            .map(|path| dirname(path).to_string());
        let ContextExtensions {
            typed_slots,
            values,
        } = extensions;

        Self {
            inner: Arc::new(ContextInner {
                state: Mutex::new(ContextState {
                    loaders,
                    loader_index: 0,
                    context_directory,
                    resource_path,
                    resource_query,
                    file_dependencies: Vec::new(),
                    context_dependencies: Vec::new(),
                    missing_dependencies: Vec::new(),
                    cacheable: true,
                    completion: None,
                }),
                typed_slots: RwLock::new(typed_slots),
                values: RwLock::new(values),
                diagnostics: Mutex::new(Vec::new()),
            }),
            keepalive: None,
        }
    }

    fn state(&self) -> MutexGuard<'_, ContextState> {
        lock(&self.inner.state)
    }

    // Resource.

    /// `path + query` of the current resource, if there is one.
    pub fn resource(&self) -> Option<String> {
        self.state().resource()
    }

    /// Replaces the resource; an empty string removes it.
    pub fn set_resource(&self, resource: &str) {
        let mut state = self.state();
        if resource.is_empty() {
            state.resource_path = None;
            state.resource_query = None;
        } else {
            let (path, query) = split_query(resource);
            state.resource_path = Some(path.to_string());
            state.resource_query = Some(query.to_string());
        }
    }

    pub fn resource_path(&self) -> Option<String> {
        self.state().resource_path.clone()
    }

    pub fn resource_query(&self) -> Option<String> {
        self.state().resource_query.clone()
    }

    /// Directory of the resource the run started with.
    pub fn context(&self) -> Option<String> {
        self.state().context_directory.clone()
    }

    // Derived requests.

    pub fn request(&self) -> String {
        let state = self.state();
        state.join_requests(0, state.loaders.len() as isize, true)
    }

    pub fn remaining_request(&self) -> String {
        let state = self.state();
        let last = state.loaders.len() as isize - 1;
        let has_resource = state.resource().is_some_and(|resource| !resource.is_empty());
        if state.loader_index >= last && !has_resource {
            return String::new();
        }
        state.join_requests(state.loader_index + 1, state.loaders.len() as isize, true)
    }

    pub fn current_request(&self) -> String {
        let state = self.state();
        state.join_requests(state.loader_index, state.loaders.len() as isize, true)
    }

    pub fn previous_request(&self) -> String {
        let state = self.state();
        state.join_requests(0, state.loader_index, false)
    }

    pub fn loader_index(&self) -> isize {
        self.state().loader_index
    }

    /// Request strings of every loader in the chain.
    pub fn loaders(&self) -> Vec<String> {
        self.state()
            .loaders
            .iter()
            .map(LoaderDescriptor::request)
            .collect()
    }

    /// The current loader's structured options when they are an object or
    /// array, otherwise its query string.
    pub fn query(&self) -> Option<LoaderQuery> {
        let state = self.state();
        let current = state.current()?;
        match current.options() {
            Some(options) if options.is_object() || options.is_array() => {
                Some(LoaderQuery::Options(options.clone()))
            }
            _ => Some(LoaderQuery::Query(current.query().to_string())),
        }
    }

    /// Data slot of the current loader, shared between its pitch and normal hook.
    pub fn data(&self) -> Option<LoaderData> {
        self.state().current().and_then(|current| current.data().cloned())
    }

    // Cacheability and dependencies.

    /// Passing `false` marks the run non-cacheable; `true` never resets it.
    pub fn cacheable(&self, flag: bool) {
        if !flag {
            self.state().cacheable = false;
        }
    }

    pub fn is_cacheable(&self) -> bool {
        self.state().cacheable
    }

    pub fn add_dependency(&self, file: impl Into<String>) {
        self.state().file_dependencies.push(file.into());
    }

    pub fn dependency(&self, file: impl Into<String>) {
        self.add_dependency(file);
    }

    pub fn add_context_dependency(&self, context: impl Into<String>) {
        self.state().context_dependencies.push(context.into());
    }

    pub fn add_missing_dependency(&self, missing: impl Into<String>) {
        self.state().missing_dependencies.push(missing.into());
    }

    pub fn dependencies(&self) -> Vec<String> {
        self.state().file_dependencies.clone()
    }

    pub fn context_dependencies(&self) -> Vec<String> {
        self.state().context_dependencies.clone()
    }

    pub fn missing_dependencies(&self) -> Vec<String> {
        self.state().missing_dependencies.clone()
    }

    /// Empties all three registries and makes the run cacheable again.
    pub fn clear_dependencies(&self) {
        let mut state = self.state();
        state.file_dependencies.clear();
        state.context_dependencies.clear();
        state.missing_dependencies.clear();
        state.cacheable = true;
    }

    pub fn snapshot(&self) -> DependencySnapshot {
        let state = self.state();
        DependencySnapshot {
            cacheable: state.cacheable,
            file_dependencies: state.file_dependencies.clone(),
            context_dependencies: state.context_dependencies.clone(),
            missing_dependencies: state.missing_dependencies.clone(),
        }
    }

    // Completion.

    /// Switches the running hook to asynchronous completion and hands out the
    /// callback that must later be called exactly once.
    pub fn async_callback(&self) -> LoaderResult<LoaderCallback> {
        let slot = self.state().completion.clone();
        match slot {
            Some(slot) => slot.request_async(),
            None => Err(LoaderError::Protocol(
                "async(): no loader is currently running".to_string(),
            )),
        }
    }

    /// The running hook's callback, without switching it to asynchronous
    /// completion. Calling it before the hook returns completes the hook.
    pub fn callback(&self) -> LoaderResult<LoaderCallback> {
        let slot = self.state().completion.clone();
        match slot {
            Some(slot) => Ok(slot.callback()),
            None => Err(LoaderError::Protocol(
                "callback(): no loader is currently running".to_string(),
            )),
        }
    }

    // Extensions.

    pub fn extension<T>(&self) -> Option<T>
    where
        T: Any + Send + Sync + Clone + 'static,
    {
        let slots = self
            .inner
            .typed_slots
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        slots
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.value.downcast_ref::<T>().cloned())
    }

    pub fn with_extension<T, R, F>(&self, f: F) -> Option<R>
    where
        T: Any + Send + Sync + 'static,
        F: FnOnce(&T) -> R,
    {
        let slots = self
            .inner
            .typed_slots
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        slots
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.value.downcast_ref::<T>())
            .map(f)
    }

    pub fn value(&self, name: &str) -> Option<serde_json::Value> {
        self.inner
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Every named value as it stands now, including hook overwrites.
    pub fn values(&self) -> HashMap<String, serde_json::Value> {
        self.inner
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Overwrites a named value the caller supplied. Names the caller did not
    /// provide cannot be added.
    pub fn set_value(&self, name: &str, value: serde_json::Value) -> LoaderResult<()> {
        let mut values = self
            .inner
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(LoaderError::message(format!(
                "cannot add context value `{name}`"
            ))),
        }
    }

    // Diagnostics.

    pub fn push_diagnostic(&self, level: DiagnosticLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            DiagnosticLevel::Info => tracing::info!(%message, "loader diagnostic"),
            DiagnosticLevel::Warn => tracing::warn!(%message, "loader diagnostic"),
            DiagnosticLevel::Error => tracing::error!(%message, "loader diagnostic"),
        }
        lock(&self.inner.diagnostics).push(DiagnosticEntry {
            timestamp: OffsetDateTime::now_utc(),
            level,
            message,
        });
    }

    pub fn diagnostics(&self) -> Vec<DiagnosticEntry> {
        lock(&self.inner.diagnostics).clone()
    }

    // Executor plumbing.

    pub(crate) fn loader_count(&self) -> usize {
        self.state().loaders.len()
    }

    pub(crate) fn set_loader_index(&self, index: isize) {
        self.state().loader_index = index;
    }

    pub(crate) fn descriptor(&self, index: usize) -> Option<LoaderDescriptor> {
        self.state().loaders.get(index).cloned()
    }

    pub(crate) fn resolve(&self, index: usize, resolved: ResolvedLoader) {
        if let Some(descriptor) = self.state().loaders.get_mut(index) {
            descriptor.resolve(resolved);
        }
    }

    /// Marks the pitch as executed; returns the hook and a fresh data slot when
    /// there is a hook to run.
    pub(crate) fn begin_pitch(&self, index: usize) -> Option<(PitchFn, LoaderData)> {
        let mut state = self.state();
        let descriptor = state.loaders.get_mut(index)?;
        let pitch = descriptor.mark_pitch_executed()?;
        Some((pitch, descriptor.fresh_data()))
    }

    /// Marks the normal hook as executed; returns it with the loader's raw flag.
    pub(crate) fn begin_normal(&self, index: usize) -> Option<(NormalFn, bool)> {
        let mut state = self.state();
        let descriptor = state.loaders.get_mut(index)?;
        let normal = descriptor.mark_normal_executed()?;
        Some((normal, descriptor.raw()))
    }

    pub(crate) fn install_completion(&self, slot: CompletionSlot) {
        self.state().completion = Some(slot);
    }
}
