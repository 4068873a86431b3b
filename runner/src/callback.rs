//! Completion protocol shared by pitch and normal hooks.
//!
//! A hook completes in exactly one of three ways: by returning a value, by
//! returning a deferred future, or by asking the context for its callback and
//! calling it later. Whatever happens first wins; later attempts are rejected.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::debug;

use crate::context::DiagnosticLevel;
use crate::context::LoaderContext;
use crate::context::lock;
use crate::error::LoaderError;
use crate::error::LoaderResult;
use crate::value::Args;
use crate::value::Value;

const CALLBACK_ALREADY_CALLED: &str = "callback(): The callback was already called.";
const ASYNC_ALREADY_CALLED: &str = "async(): The callback was already called.";

/// What a hook hands back when it returns.
pub enum HookReturn {
    /// Completes with no values, unless the hook switched to its callback.
    Nothing,
    Value(Value),
    /// Completes once the future settles.
    Deferred(BoxFuture<'static, LoaderResult<Option<Value>>>),
}

impl HookReturn {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = LoaderResult<Option<Value>>> + Send + 'static,
    {
        Self::Deferred(Box::pin(future))
    }
}

impl fmt::Debug for HookReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nothing => f.write_str("Nothing"),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl From<Value> for HookReturn {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for HookReturn {
    fn from(value: &str) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<String> for HookReturn {
    fn from(value: String) -> Self {
        Self::Value(Value::from(value))
    }
}

#[derive(Debug)]
struct InvocationState {
    is_sync: bool,
    is_done: bool,
    reported_error: bool,
}

#[derive(Debug)]
struct Invocation {
    loader: String,
    state: Mutex<InvocationState>,
}

impl Invocation {
    fn new(loader: &str) -> Self {
        Self {
            loader: loader.to_string(),
            state: Mutex::new(InvocationState {
                is_sync: true,
                is_done: false,
                reported_error: false,
            }),
        }
    }
}

type SenderCell = Mutex<Option<oneshot::Sender<LoaderResult<Args>>>>;

/// Installed on the context while a hook runs. Holds the sender weakly; the
/// hook stays completable while a callback or a context clone taken during
/// the hook is alive. Once both are gone the runner reports the hook dropped.
#[derive(Debug, Clone)]
pub(crate) struct CompletionSlot {
    invocation: Arc<Invocation>,
    sender: Weak<SenderCell>,
}

/// Strong hold on a hook's completion channel, carried by context clones.
#[derive(Clone)]
pub(crate) struct CompletionKeepalive {
    _sender: Arc<SenderCell>,
}

impl CompletionSlot {
    pub(crate) fn keepalive(&self) -> Option<CompletionKeepalive> {
        self.sender
            .upgrade()
            .map(|sender| CompletionKeepalive { _sender: sender })
    }

    pub(crate) fn request_async(&self) -> LoaderResult<LoaderCallback> {
        {
            let mut state = lock(&self.invocation.state);
            if state.is_done && !state.reported_error {
                return Err(LoaderError::Protocol(ASYNC_ALREADY_CALLED.to_string()));
            }
            if !state.is_done {
                state.is_sync = false;
            }
        }
        Ok(self.callback())
    }

    pub(crate) fn callback(&self) -> LoaderCallback {
        LoaderCallback {
            invocation: Arc::clone(&self.invocation),
            sender: self
                .sender
                .upgrade()
                .unwrap_or_else(|| Arc::new(Mutex::new(None))),
        }
    }
}

/// Completes the hook that handed it out. Clones share the same completion.
#[derive(Clone)]
pub struct LoaderCallback {
    invocation: Arc<Invocation>,
    sender: Arc<SenderCell>,
}

impl fmt::Debug for LoaderCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderCallback")
            .field("loader", &self.invocation.loader)
            .finish_non_exhaustive()
    }
}

impl LoaderCallback {
    /// Completes the hook. Fails if it already completed, unless that
    /// completion was an error, in which case the call is silently ignored.
    pub fn call(&self, result: LoaderResult<Args>) -> LoaderResult<()> {
        {
            let mut state = lock(&self.invocation.state);
            if state.is_done {
                if state.reported_error {
                    return Ok(());
                }
                return Err(LoaderError::Protocol(CALLBACK_ALREADY_CALLED.to_string()));
            }
            state.is_done = true;
            state.is_sync = false;
            state.reported_error = result.is_err();
        }
        if let Some(sender) = lock(&self.sender).take() {
            // The receiver is gone once the run has been abandoned.
            let _ = sender.send(result);
        }
        Ok(())
    }

    pub fn success(&self, value: impl Into<Value>) -> LoaderResult<()> {
        self.call(Ok(vec![Some(value.into())]))
    }

    pub fn fail(&self, error: impl Into<LoaderError>) -> LoaderResult<()> {
        self.call(Err(error.into()))
    }
}

enum Outcome {
    Immediate(LoaderResult<Args>),
    Deferred(BoxFuture<'static, LoaderResult<Option<Value>>>),
    Pending,
}

/// Runs one hook under the completion protocol and waits for its result.
pub(crate) async fn run_sync_or_async<A>(
    loader: &str,
    hook: &(dyn Fn(&LoaderContext, A) -> LoaderResult<HookReturn> + Send + Sync),
    ctx: &LoaderContext,
    args: A,
) -> LoaderResult<Args> {
    let (tx, rx) = oneshot::channel();
    let sender: Arc<SenderCell> = Arc::new(Mutex::new(Some(tx)));
    let invocation = Arc::new(Invocation::new(loader));
    ctx.install_completion(CompletionSlot {
        invocation: Arc::clone(&invocation),
        sender: Arc::downgrade(&sender),
    });

    let returned = hook(ctx, args);

    let mut late_error = None;
    let outcome = {
        let mut state = lock(&invocation.state);
        match returned {
            Ok(value) if state.is_sync => {
                state.is_done = true;
                match value {
                    HookReturn::Nothing => Outcome::Immediate(Ok(Vec::new())),
                    HookReturn::Value(value) => Outcome::Immediate(Ok(vec![Some(value)])),
                    HookReturn::Deferred(future) => Outcome::Deferred(future),
                }
            }
            // The hook switched to its callback; the return value is ignored.
            Ok(_) => Outcome::Pending,
            Err(err) if state.is_done => {
                late_error = Some(err);
                Outcome::Pending
            }
            Err(err) => {
                state.is_done = true;
                state.reported_error = true;
                Outcome::Immediate(Err(err))
            }
        }
    };
    if let Some(err) = late_error {
        ctx.push_diagnostic(
            DiagnosticLevel::Error,
            format!("loader `{loader}` failed after completing: {err}"),
        );
    }
    drop(sender);

    match outcome {
        Outcome::Immediate(result) => result,
        Outcome::Deferred(future) => {
            debug!(loader, "awaiting deferred result");
            let result = future.await.map(|value| vec![value]);
            if result.is_err() {
                lock(&invocation.state).reported_error = true;
            }
            result
        }
        Outcome::Pending => match rx.await {
            Ok(result) => result,
            Err(_) => {
                lock(&invocation.state).is_done = true;
                Err(LoaderError::CallbackDropped {
                    loader: loader.to_string(),
                })
            }
        },
    }
}
