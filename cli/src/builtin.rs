use std::time::Duration;

use loader_runner::Args;
use loader_runner::HookReturn;
use loader_runner::LoaderContext;
use loader_runner::LoaderQuery;
use loader_runner::LoaderRegistry;
use loader_runner::LoaderResult;
use loader_runner::Value;
use serde_json::json;

/// Name and one-line description of every built-in loader.
pub const BUILTINS: &[(&str, &str)] = &[
    ("banner", "prepends the query text (`banner?text`) as a first line"),
    ("deferred-uppercase", "uppercases text, completing through the async callback"),
    ("inline", "pitch that short-circuits with the remaining request"),
    ("lowercase", "lowercases text"),
    ("raw-size", "raw loader emitting the resource size in bytes"),
    ("trim", "trims surrounding whitespace"),
    ("uppercase", "uppercases text"),
];

pub fn registry() -> LoaderRegistry {
    LoaderRegistry::new()
        .with_normal("uppercase", map_text(str::to_uppercase))
        .with_normal("lowercase", map_text(str::to_lowercase))
        .with_normal("trim", map_text(|text| text.trim().to_string()))
        .with_normal("banner", banner)
        .with_normal("raw-size", raw_size)
        .raw("raw-size", true)
        .with_pitch("inline", |_, args| Ok(HookReturn::from(args.remaining_request)))
        .with_normal("deferred-uppercase", deferred_uppercase)
}

fn first(args: Args) -> Option<Value> {
    args.into_iter().next().flatten()
}

fn map_text(
    f: fn(&str) -> String,
) -> impl Fn(&LoaderContext, Args) -> LoaderResult<HookReturn> + Send + Sync + 'static {
    move |_: &LoaderContext, args: Args| {
        Ok(match first(args) {
            Some(Value::Text(text)) => HookReturn::from(f(&text)),
            Some(other) => HookReturn::Value(other),
            None => HookReturn::Nothing,
        })
    }
}

fn banner(ctx: &LoaderContext, args: Args) -> LoaderResult<HookReturn> {
    let banner = match ctx.query() {
        Some(LoaderQuery::Options(options)) => options
            .get("text")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Some(LoaderQuery::Query(query)) => query.trim_start_matches('?').to_string(),
        None => String::new(),
    };
    let body = match first(args) {
        Some(Value::Text(text)) => text,
        Some(Value::Null) | None => String::new(),
        Some(other) => return Ok(HookReturn::Value(other)),
    };
    if banner.is_empty() {
        return Ok(HookReturn::from(body));
    }
    Ok(HookReturn::from(format!("{banner}\n{body}")))
}

fn raw_size(_: &LoaderContext, args: Args) -> LoaderResult<HookReturn> {
    let size = match first(args) {
        Some(Value::Binary(bytes)) => bytes.len(),
        _ => 0,
    };
    Ok(HookReturn::Value(Value::Json(json!(size))))
}

fn deferred_uppercase(ctx: &LoaderContext, args: Args) -> LoaderResult<HookReturn> {
    let callback = ctx.async_callback()?;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1)).await;
        let result = match first(args) {
            Some(Value::Text(text)) => callback.success(text.to_uppercase()),
            other => callback.call(Ok(vec![other])),
        };
        if let Err(err) = result {
            tracing::warn!(%err, "deferred-uppercase completed twice");
        }
    });
    Ok(HookReturn::Nothing)
}
