use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use crate::callback::HookReturn;
use crate::context::LoaderContext;
use crate::context::lock;
use crate::error::LoaderResult;
use crate::request::LoaderRequest;
use crate::request::split_query;
use crate::value::Args;

/// Pitch hook: `(context, remaining/previous request + data slot)`.
pub type PitchFn = Arc<dyn Fn(&LoaderContext, PitchArgs) -> LoaderResult<HookReturn> + Send + Sync>;

/// Normal hook: `(context, carried values)`.
pub type NormalFn = Arc<dyn Fn(&LoaderContext, Args) -> LoaderResult<HookReturn> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PitchArgs {
    pub remaining_request: String,
    pub previous_request: String,
    pub data: LoaderData,
}

/// Scratch object shared by the pitch and normal hook of one loader.
#[derive(Debug, Clone, Default)]
pub struct LoaderData {
    inner: Arc<Mutex<serde_json::Map<String, serde_json::Value>>>,
}

impl LoaderData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        lock(&self.inner).get(key).cloned()
    }

    pub fn insert(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        lock(&self.inner).insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        lock(&self.inner).remove(key)
    }

    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        lock(&self.inner).clone()
    }

    pub fn same_slot(&self, other: &LoaderData) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Hooks produced by a [`crate::ModuleLoader`] for one loader identifier.
#[derive(Clone, Default)]
pub struct ResolvedLoader {
    pub pitch: Option<PitchFn>,
    pub normal: Option<NormalFn>,
    pub raw: bool,
}

impl ResolvedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pitch<F>(mut self, pitch: F) -> Self
    where
        F: Fn(&LoaderContext, PitchArgs) -> LoaderResult<HookReturn> + Send + Sync + 'static,
    {
        self.pitch = Some(Arc::new(pitch));
        self
    }

    pub fn with_normal<F>(mut self, normal: F) -> Self
    where
        F: Fn(&LoaderContext, Args) -> LoaderResult<HookReturn> + Send + Sync + 'static,
    {
        self.normal = Some(Arc::new(normal));
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }
}

impl fmt::Debug for ResolvedLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedLoader")
            .field("pitch", &self.pitch.is_some())
            .field("normal", &self.normal.is_some())
            .field("raw", &self.raw)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub enum LoaderState {
    #[default]
    Unresolved,
    Resolved(ResolvedLoader),
}

/// One entry of the chain for the duration of a run.
#[derive(Debug, Clone)]
pub struct LoaderDescriptor {
    path: String,
    query: String,
    options: Option<serde_json::Value>,
    ident: Option<String>,
    state: LoaderState,
    data: Option<LoaderData>,
    pitch_executed: bool,
    normal_executed: bool,
}

impl LoaderDescriptor {
    pub fn new(request: impl Into<LoaderRequest>) -> LoaderResult<Self> {
        let mut descriptor = Self {
            path: String::new(),
            query: String::new(),
            options: None,
            ident: None,
            state: LoaderState::Unresolved,
            data: None,
            pitch_executed: false,
            normal_executed: false,
        };
        descriptor.set_request(request.into())?;
        Ok(descriptor)
    }

    /// `path + query`; always reconstructible from the two parts.
    pub fn request(&self) -> String {
        format!("{}{}", self.path, self.query)
    }

    pub fn set_request(&mut self, request: LoaderRequest) -> LoaderResult<()> {
        match request {
            LoaderRequest::Plain(request) => {
                let (path, query) = split_query(&request);
                self.path = path.to_string();
                self.query = query.to_string();
                self.options = None;
                self.ident = None;
            }
            LoaderRequest::Reference(reference) => {
                reference.validate()?;
                self.query = reference.encode_query();
                self.path = reference.loader;
                self.options = reference.options;
                self.ident = reference.ident;
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn options(&self) -> Option<&serde_json::Value> {
        self.options.as_ref()
    }

    pub fn ident(&self) -> Option<&str> {
        self.ident.as_deref()
    }

    pub fn state(&self) -> &LoaderState {
        &self.state
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, LoaderState::Resolved(_))
    }

    pub fn raw(&self) -> bool {
        match &self.state {
            LoaderState::Resolved(resolved) => resolved.raw,
            LoaderState::Unresolved => false,
        }
    }

    pub fn data(&self) -> Option<&LoaderData> {
        self.data.as_ref()
    }

    pub fn pitch_executed(&self) -> bool {
        self.pitch_executed
    }

    pub fn normal_executed(&self) -> bool {
        self.normal_executed
    }

    pub(crate) fn resolve(&mut self, resolved: ResolvedLoader) {
        if !self.is_resolved() {
            self.state = LoaderState::Resolved(resolved);
        }
    }

    pub(crate) fn mark_pitch_executed(&mut self) -> Option<PitchFn> {
        self.pitch_executed = true;
        match &self.state {
            LoaderState::Resolved(resolved) => resolved.pitch.clone(),
            LoaderState::Unresolved => None,
        }
    }

    pub(crate) fn mark_normal_executed(&mut self) -> Option<NormalFn> {
        self.normal_executed = true;
        match &self.state {
            LoaderState::Resolved(resolved) => resolved.normal.clone(),
            LoaderState::Unresolved => None,
        }
    }

    pub(crate) fn fresh_data(&mut self) -> LoaderData {
        let data = LoaderData::new();
        self.data = Some(data.clone());
        data
    }
}
