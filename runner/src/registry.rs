use crate::callback::HookReturn;
use crate::context::LoaderContext;
use crate::descriptor::LoaderDescriptor;
use crate::descriptor::PitchArgs;
use crate::descriptor::ResolvedLoader;
use crate::error::LoaderError;
use crate::error::LoaderResult;
use crate::value::Args;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Turns a loader identifier into invokable hooks. Calling it again for an
/// already resolved loader must yield the same hooks.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, loader: &LoaderDescriptor) -> LoaderResult<ResolvedLoader>;
}

/// In-memory module loader keyed by the loader's path.
#[derive(Debug, Clone, Default)]
pub struct LoaderRegistry {
    loaders: BTreeMap<String, ResolvedLoader>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the hooks served for `name`.
    pub fn register(&mut self, name: impl Into<String>, loader: ResolvedLoader) {
        self.loaders.insert(name.into(), loader);
    }

    pub fn with(mut self, name: impl Into<String>, loader: ResolvedLoader) -> Self {
        self.register(name, loader);
        self
    }

    pub fn with_pitch<F>(self, name: impl Into<String>, pitch: F) -> Self
    where
        F: Fn(&LoaderContext, PitchArgs) -> LoaderResult<HookReturn> + Send + Sync + 'static,
    {
        self.update(name.into(), |loader| loader.with_pitch(pitch))
    }

    pub fn with_normal<F>(self, name: impl Into<String>, normal: F) -> Self
    where
        F: Fn(&LoaderContext, Args) -> LoaderResult<HookReturn> + Send + Sync + 'static,
    {
        self.update(name.into(), |loader| loader.with_normal(normal))
    }

    pub fn raw(self, name: impl Into<String>, raw: bool) -> Self {
        self.update(name.into(), |loader| loader.raw(raw))
    }

    fn update(mut self, name: String, f: impl FnOnce(ResolvedLoader) -> ResolvedLoader) -> Self {
        let current = self.loaders.remove(&name).unwrap_or_default();
        self.loaders.insert(name, f(current));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedLoader> {
        self.loaders.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

#[async_trait]
impl ModuleLoader for LoaderRegistry {
    async fn load(&self, loader: &LoaderDescriptor) -> LoaderResult<ResolvedLoader> {
        self.get(loader.path()).cloned().ok_or_else(|| {
            LoaderError::resolve(loader.path(), "no loader registered under this name")
        })
    }
}
