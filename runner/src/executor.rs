//! The run state machine.
//!
//! ```text
//! Pitching ──(cursor past last loader)──▶ ReadingResource ──▶ Running ──(cursor < 0)──▶ Done
//!     │                                                          ▲
//!     └──────────(pitch produced a value: cursor - 1)────────────┘
//! ```
//!
//! Pitch hooks run with the cursor moving forward, normal hooks with it moving
//! back. Each step marks its loader's phase as executed before invoking the
//! hook, so the next step over the same index just moves the cursor on.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use serde::Serializer;
use tracing::debug;
use tracing::trace;

use crate::builder::RunOptions;
use crate::callback::run_sync_or_async;
use crate::context::DependencySnapshot;
use crate::context::DiagnosticEntry;
use crate::context::LoaderContext;
use crate::descriptor::LoaderDescriptor;
use crate::descriptor::PitchArgs;
use crate::error::LoaderResult;
use crate::error::RunFailure;
use crate::reader::ResourceReader;
use crate::registry::ModuleLoader;
use crate::telemetry::RunOutcome;
use crate::telemetry::record_run;
use crate::value::Args;
use crate::value::Value;
use crate::value::convert_args;

/// Successful result of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    /// Values handed to the completion of the last normal hook that ran.
    pub result: Args,
    /// Bytes of the resource, when it was read.
    #[serde(serialize_with = "serialize_buffer")]
    pub resource_buffer: Option<Bytes>,
    #[serde(flatten)]
    pub dependencies: DependencySnapshot,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<DiagnosticEntry>,
    /// Named context values at the end of the run, hook overwrites included.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub values: HashMap<String, serde_json::Value>,
}

fn serialize_buffer<S: Serializer>(
    buffer: &Option<Bytes>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    buffer
        .as_ref()
        .map(|buffer| Value::Binary(buffer.clone()))
        .serialize(serializer)
}

enum Phase {
    Pitching,
    ReadingResource,
    Running(Args),
    Done(Args),
}

struct Runner<'a> {
    ctx: &'a LoaderContext,
    reader: &'a dyn ResourceReader,
    module_loader: &'a dyn ModuleLoader,
    resource_buffer: Option<Bytes>,
    short_circuited: bool,
}

impl Runner<'_> {
    async fn drive(&mut self) -> LoaderResult<Args> {
        let mut phase = Phase::Pitching;
        loop {
            phase = match phase {
                Phase::Pitching => self.pitch().await?,
                Phase::ReadingResource => self.read_resource().await?,
                Phase::Running(args) => self.normal(args).await?,
                Phase::Done(args) => return Ok(args),
            };
        }
    }

    async fn pitch(&mut self) -> LoaderResult<Phase> {
        let index = self.ctx.loader_index();
        let Some(position) = usize::try_from(index).ok() else {
            return Ok(Phase::ReadingResource);
        };
        let Some(descriptor) = self.ctx.descriptor(position) else {
            return Ok(Phase::ReadingResource);
        };
        if descriptor.pitch_executed() {
            self.ctx.set_loader_index(index + 1);
            return Ok(Phase::Pitching);
        }

        let loader = descriptor.request();
        if !descriptor.is_resolved() {
            trace!(%loader, "resolving loader");
            match self.module_loader.load(&descriptor).await {
                Ok(resolved) => self.ctx.resolve(position, resolved),
                Err(err) => {
                    // Dependencies of a loader that never loaded are unknown.
                    self.ctx.cacheable(false);
                    return Err(err);
                }
            }
        }

        let Some((pitch, data)) = self.ctx.begin_pitch(position) else {
            return Ok(Phase::Pitching);
        };
        let args = PitchArgs {
            remaining_request: self.ctx.remaining_request(),
            previous_request: self.ctx.previous_request(),
            data,
        };
        trace!(%loader, index, "pitch");
        let result = run_sync_or_async(&loader, pitch.as_ref(), self.ctx, args).await?;

        // Any defined value stops pitching, not only the first one.
        if result.iter().any(Option::is_some) {
            debug!(%loader, index, "pitch short-circuited the chain");
            self.short_circuited = true;
            self.ctx.set_loader_index(index - 1);
            return Ok(Phase::Running(result));
        }
        Ok(Phase::Pitching)
    }

    async fn read_resource(&mut self) -> LoaderResult<Phase> {
        self.ctx.set_loader_index(self.ctx.loader_count() as isize - 1);
        let Some(path) = self.ctx.resource_path().filter(|path| !path.is_empty()) else {
            debug!("no resource to read");
            return Ok(Phase::Running(vec![Some(Value::Null)]));
        };

        self.ctx.add_dependency(path.as_str());
        debug!(%path, "reading resource");
        let buffer = self.reader.read(&path).await?;
        self.resource_buffer = Some(buffer.clone());
        Ok(Phase::Running(vec![Some(Value::Binary(buffer))]))
    }

    async fn normal(&mut self, mut args: Args) -> LoaderResult<Phase> {
        let index = self.ctx.loader_index();
        let Some(position) = usize::try_from(index).ok() else {
            return Ok(Phase::Done(args));
        };
        let Some(descriptor) = self.ctx.descriptor(position) else {
            return Ok(Phase::Done(args));
        };
        if descriptor.normal_executed() {
            self.ctx.set_loader_index(index - 1);
            return Ok(Phase::Running(args));
        }

        let Some((normal, raw)) = self.ctx.begin_normal(position) else {
            return Ok(Phase::Running(args));
        };
        convert_args(&mut args, raw);
        let loader = descriptor.request();
        trace!(%loader, index, raw, "normal");
        let result = run_sync_or_async(&loader, normal.as_ref(), self.ctx, args).await?;
        Ok(Phase::Running(result))
    }
}

/// Runs the chain over the resource.
///
/// Either outcome carries the dependencies recorded up to that point and the
/// final named context values.
pub async fn run_loaders(options: RunOptions) -> Result<RunOutput, RunFailure> {
    let started = Instant::now();
    let RunOptions {
        resource,
        loaders,
        extensions,
        reader,
        module_loader,
    } = options;
    let loader_count = loaders.len();

    let descriptors = match loaders
        .into_iter()
        .map(LoaderDescriptor::new)
        .collect::<LoaderResult<Vec<_>>>()
    {
        Ok(descriptors) => descriptors,
        Err(error) => {
            let dependencies = DependencySnapshot::default();
            record_run(
                resource.as_deref(),
                loader_count,
                started.elapsed(),
                RunOutcome::Failure,
                dependencies.cacheable,
            );
            return Err(RunFailure {
                error,
                dependencies,
                values: extensions.into_values(),
            });
        }
    };

    let ctx = LoaderContext::new(resource.as_deref(), descriptors, extensions);
    debug!(resource = ?resource, loader_count, "starting run");
    let mut runner = Runner {
        ctx: &ctx,
        reader: reader.as_ref(),
        module_loader: module_loader.as_ref(),
        resource_buffer: None,
        short_circuited: false,
    };
    let result = runner.drive().await;

    let dependencies = ctx.snapshot();
    let outcome = match &result {
        Err(_) => RunOutcome::Failure,
        Ok(_) if runner.short_circuited => RunOutcome::ShortCircuit,
        Ok(_) => RunOutcome::Success,
    };
    record_run(
        resource.as_deref(),
        loader_count,
        started.elapsed(),
        outcome,
        dependencies.cacheable,
    );

    match result {
        Ok(result) => Ok(RunOutput {
            result,
            resource_buffer: runner.resource_buffer,
            dependencies,
            diagnostics: ctx.diagnostics(),
            values: ctx.values(),
        }),
        Err(error) => {
            debug!(%error, "run failed");
            Err(RunFailure {
                error,
                dependencies,
                values: ctx.values(),
            })
        }
    }
}
