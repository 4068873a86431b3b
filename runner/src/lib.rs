//! Runs an ordered chain of loaders over one resource: pitch hooks forward,
//! then the resource read, then normal hooks backward.

mod builder;
mod callback;
mod config;
mod context;
mod descriptor;
mod error;
mod executor;
mod reader;
mod registry;
mod request;
mod telemetry;
mod value;

pub use builder::RunOptions;
pub use builder::RunOptionsBuilder;
pub use callback::HookReturn;
pub use callback::LoaderCallback;
pub use config::RunConfig;
pub use context::ContextExtensions;
pub use context::DependencySnapshot;
pub use context::DiagnosticEntry;
pub use context::DiagnosticLevel;
pub use context::LoaderContext;
pub use context::LoaderQuery;
pub use descriptor::LoaderData;
pub use descriptor::LoaderDescriptor;
pub use descriptor::LoaderState;
pub use descriptor::NormalFn;
pub use descriptor::PitchArgs;
pub use descriptor::PitchFn;
pub use descriptor::ResolvedLoader;
pub use error::ConfigError;
pub use error::LoaderError;
pub use error::LoaderResult;
pub use error::RunFailure;
pub use executor::RunOutput;
pub use executor::run_loaders;
pub use reader::FsResourceReader;
pub use reader::MemoryResourceReader;
pub use reader::ResourceReader;
pub use registry::LoaderRegistry;
pub use registry::ModuleLoader;
pub use request::LoaderReference;
pub use request::LoaderRequest;
pub use request::dirname;
pub use request::get_context;
pub use request::split_query;
pub use telemetry::RunOutcome;
pub use value::Args;
pub use value::Value;
pub use value::convert_args;
pub use value::utf8_to_string;
