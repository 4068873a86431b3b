use crate::config::RunConfig;
use crate::context::ContextExtensions;
use crate::reader::FsResourceReader;
use crate::reader::ResourceReader;
use crate::registry::LoaderRegistry;
use crate::registry::ModuleLoader;
use crate::request::LoaderRequest;
use std::fmt;
use std::sync::Arc;

/// Everything one run needs. Build it with [`RunOptions::builder`].
pub struct RunOptions {
    pub(crate) resource: Option<String>,
    pub(crate) loaders: Vec<LoaderRequest>,
    pub(crate) extensions: ContextExtensions,
    pub(crate) reader: Arc<dyn ResourceReader>,
    pub(crate) module_loader: Arc<dyn ModuleLoader>,
}

impl RunOptions {
    pub fn builder() -> RunOptionsBuilder {
        RunOptionsBuilder::default()
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn loaders(&self) -> &[LoaderRequest] {
        &self.loaders
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("resource", &self.resource)
            .field("loaders", &self.loaders)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

pub struct RunOptionsBuilder {
    resource: Option<String>,
    loaders: Vec<LoaderRequest>,
    extensions: ContextExtensions,
    reader: Arc<dyn ResourceReader>,
    module_loader: Arc<dyn ModuleLoader>,
}

impl Default for RunOptionsBuilder {
    fn default() -> Self {
        Self {
            resource: None,
            loaders: Vec::new(),
            extensions: ContextExtensions::default(),
            reader: Arc::new(FsResourceReader),
            module_loader: Arc::new(LoaderRegistry::default()),
        }
    }
}

impl fmt::Debug for RunOptionsBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptionsBuilder")
            .field("resource", &self.resource)
            .field("loaders", &self.loaders)
            .finish_non_exhaustive()
    }
}

impl RunOptionsBuilder {
    /// `path?query` of the resource; an empty string means no resource.
    pub fn resource(mut self, resource: impl Into<Option<String>>) -> Self {
        self.resource = resource.into().filter(|resource| !resource.is_empty());
        self
    }

    pub fn loader(mut self, loader: impl Into<LoaderRequest>) -> Self {
        self.loaders.push(loader.into());
        self
    }

    pub fn loaders<I, L>(mut self, loaders: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<LoaderRequest>,
    {
        self.loaders = loaders.into_iter().map(Into::into).collect();
        self
    }

    pub fn extensions(mut self, extensions: ContextExtensions) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn reader(mut self, reader: impl ResourceReader + 'static) -> Self {
        self.reader = Arc::new(reader);
        self
    }

    pub fn module_loader(mut self, module_loader: impl ModuleLoader + 'static) -> Self {
        self.module_loader = Arc::new(module_loader);
        self
    }

    pub fn shared_module_loader(mut self, module_loader: Arc<dyn ModuleLoader>) -> Self {
        self.module_loader = module_loader;
        self
    }

    /// Takes the resource and chain from a configuration file.
    pub fn config(self, config: RunConfig) -> Self {
        let RunConfig { resource, loaders } = config;
        self.resource(resource).loaders(loaders)
    }

    pub fn build(self) -> RunOptions {
        RunOptions {
            resource: self.resource,
            loaders: self.loaders,
            extensions: self.extensions,
            reader: self.reader,
            module_loader: self.module_loader,
        }
    }
}
