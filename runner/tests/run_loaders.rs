use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use loader_runner::Args;
use loader_runner::ContextExtensions;
use loader_runner::HookReturn;
use loader_runner::LoaderContext;
use loader_runner::LoaderError;
use loader_runner::LoaderQuery;
use loader_runner::LoaderReference;
use loader_runner::LoaderRegistry;
use loader_runner::LoaderResult;
use loader_runner::MemoryResourceReader;
use loader_runner::RunOptions;
use loader_runner::Value;
use loader_runner::run_loaders;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;

type Log = Arc<Mutex<Vec<String>>>;

fn first(args: Args) -> HookReturn {
    args.into_iter()
        .next()
        .flatten()
        .map(HookReturn::Value)
        .unwrap_or(HookReturn::Nothing)
}

fn uppercase(_: &LoaderContext, args: Args) -> LoaderResult<HookReturn> {
    match args.into_iter().next().flatten() {
        Some(Value::Text(text)) => Ok(HookReturn::from(text.to_uppercase())),
        other => Err(LoaderError::message(format!("expected text, got {other:?}"))),
    }
}

/// Registers a loader that logs both hooks and passes its input through.
fn recording(registry: LoaderRegistry, name: &'static str, log: &Log) -> LoaderRegistry {
    let pitch_log = Arc::clone(log);
    let normal_log = Arc::clone(log);
    registry
        .with_pitch(name, move |_, _| {
            pitch_log.lock().unwrap().push(format!("pitch {name}"));
            Ok(HookReturn::Nothing)
        })
        .with_normal(name, move |_, args| {
            normal_log.lock().unwrap().push(format!("normal {name}"));
            Ok(first(args))
        })
}

fn events(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn uppercases_file_contents_and_records_dependency() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("file.txt");
    std::fs::write(&path, "hi").expect("write resource");
    let path = path.to_string_lossy().into_owned();

    let registry = LoaderRegistry::new()
        .with_pitch("upper", |_, _| Ok(HookReturn::Nothing))
        .with_normal("upper", uppercase);
    let options = RunOptions::builder()
        .resource(path.clone())
        .loader("upper")
        .module_loader(registry)
        .build();

    let output = run_loaders(options).await.expect("run succeeds");
    assert_eq!(output.result, vec![Some(Value::from("HI"))]);
    assert_eq!(output.resource_buffer, Some(Bytes::from_static(b"hi")));
    assert_eq!(output.dependencies.file_dependencies, vec![path]);
    assert!(output.dependencies.cacheable);
}

#[tokio::test]
async fn pitch_value_short_circuits_without_resource() {
    let normal_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&normal_ran);
    let registry = LoaderRegistry::new()
        .with_pitch("shortcut", |_, _| Ok(HookReturn::from("shortcut")))
        .with_normal("shortcut", move |_, args| {
            flag.store(true, Ordering::SeqCst);
            Ok(first(args))
        });
    let options = RunOptions::builder()
        .loader("shortcut")
        .module_loader(registry)
        .build();

    let output = run_loaders(options).await.expect("run succeeds");
    assert_eq!(output.result, vec![Some(Value::from("shortcut"))]);
    assert!(!normal_ran.load(Ordering::SeqCst));
    assert!(output.dependencies.file_dependencies.is_empty());
    assert!(output.dependencies.context_dependencies.is_empty());
    assert!(output.dependencies.missing_dependencies.is_empty());
    assert_eq!(output.resource_buffer, None);
}

#[tokio::test]
async fn missing_resource_fails_with_partial_snapshot() {
    let registry = LoaderRegistry::new().with_pitch("watch", |ctx, _| {
        ctx.add_context_dependency("src");
        Ok(HookReturn::Nothing)
    });
    let options = RunOptions::builder()
        .resource("src/missing.txt?inline".to_string())
        .loader("watch")
        .reader(MemoryResourceReader::new())
        .module_loader(registry)
        .build();

    let failure = run_loaders(options).await.expect_err("read fails");
    assert!(failure.error.is_not_found());
    assert_eq!(
        failure.dependencies.file_dependencies,
        vec!["src/missing.txt".to_string()]
    );
    assert_eq!(
        failure.dependencies.context_dependencies,
        vec!["src".to_string()]
    );
}

#[tokio::test]
async fn hooks_run_forward_then_backward() {
    let log = Log::default();
    let mut registry = LoaderRegistry::new();
    for name in ["a", "b", "c"] {
        registry = recording(registry, name, &log);
    }
    let options = RunOptions::builder()
        .loaders(["a", "b", "c"])
        .module_loader(registry)
        .build();

    let output = run_loaders(options).await.expect("run succeeds");
    assert_eq!(
        events(&log),
        vec![
            "pitch a", "pitch b", "pitch c", "normal c", "normal b", "normal a"
        ]
    );
    assert_eq!(output.result, vec![Some(Value::Null)]);
}

#[tokio::test]
async fn short_circuit_skips_later_loaders_and_own_normal() {
    let log = Log::default();
    let mut registry = LoaderRegistry::new();
    for name in ["a", "c"] {
        registry = recording(registry, name, &log);
    }
    let pitch_log = Arc::clone(&log);
    let normal_log = Arc::clone(&log);
    registry = registry
        .with_pitch("b", move |_, _| {
            pitch_log.lock().unwrap().push("pitch b".to_string());
            Ok(HookReturn::from("cached"))
        })
        .with_normal("b", move |_, args| {
            normal_log.lock().unwrap().push("normal b".to_string());
            Ok(first(args))
        });
    let options = RunOptions::builder()
        .resource("never-read.txt".to_string())
        .loaders(["a", "b", "c"])
        .reader(MemoryResourceReader::new())
        .module_loader(registry)
        .build();

    let output = run_loaders(options).await.expect("run succeeds");
    assert_eq!(events(&log), vec!["pitch a", "pitch b", "normal a"]);
    assert_eq!(output.result, vec![Some(Value::from("cached"))]);
    assert!(output.dependencies.file_dependencies.is_empty());
}

#[tokio::test]
async fn any_defined_pitch_value_short_circuits() {
    let registry = LoaderRegistry::new()
        .with_pitch("second", |ctx, _| {
            ctx.callback()?
                .call(Ok(vec![None, Some(Value::from("tail"))]))?;
            Ok(HookReturn::Nothing)
        })
        .with_normal("second", |_, _| {
            Err(LoaderError::message("normal hook must be skipped"))
        });
    let options = RunOptions::builder()
        .loader("second")
        .module_loader(registry)
        .build();

    let output = run_loaders(options).await.expect("run succeeds");
    assert_eq!(output.result, vec![None, Some(Value::from("tail"))]);
}

#[tokio::test]
async fn raw_loaders_receive_bytes_and_text_loaders_receive_strings() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let raw_seen = Arc::clone(&seen);
    let text_seen = Arc::clone(&seen);
    let registry = LoaderRegistry::new()
        .with_normal("text", move |_, args| {
            text_seen.lock().unwrap().push(args.clone());
            Ok(first(args))
        })
        .with_normal("raw", move |_, args| {
            raw_seen.lock().unwrap().push(args.clone());
            Ok(first(args))
        })
        .raw("raw", true);
    let options = RunOptions::builder()
        .resource("a.txt".to_string())
        .loaders(["text", "raw"])
        .reader(MemoryResourceReader::new().with_file("a.txt", "\u{feff}hé"))
        .module_loader(registry)
        .build();

    let output = run_loaders(options).await.expect("run succeeds");
    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            vec![Some(Value::Binary(Bytes::from("\u{feff}hé")))],
            vec![Some(Value::from("hé"))],
        ]
    );
    assert_eq!(output.result, vec![Some(Value::from("hé"))]);
}

#[tokio::test]
async fn pitch_sees_request_slices_and_shares_data_with_normal() {
    let pitched = Arc::new(Mutex::new(None));
    let pitched_slot = Arc::clone(&pitched);
    let registry = LoaderRegistry::new()
        .with_normal("a", |_, args| Ok(first(args)))
        .with_pitch("b", move |ctx, args| {
            *pitched_slot.lock().unwrap() = Some((
                args.remaining_request.clone(),
                args.previous_request.clone(),
                ctx.current_request(),
                ctx.request(),
            ));
            args.data.insert("seen", json!(true));
            Ok(HookReturn::Nothing)
        })
        .with_normal("b", |ctx, args| {
            let data = ctx.data().expect("data slot");
            assert_eq!(data.get("seen"), Some(json!(true)));
            Ok(first(args))
        })
        .with_normal("c", |ctx, args| {
            assert!(ctx.data().is_none(), "no pitch hook, no data slot");
            Ok(first(args))
        });
    let options = RunOptions::builder()
        .resource("/src/file.txt?q".to_string())
        .loaders(["a?x", "b", "c"])
        .reader(MemoryResourceReader::new().with_file("/src/file.txt", "body"))
        .module_loader(registry)
        .build();

    let output = run_loaders(options).await.expect("run succeeds");
    assert_eq!(output.result, vec![Some(Value::from("body"))]);
    assert_eq!(
        pitched.lock().unwrap().clone(),
        Some((
            "c!/src/file.txt?q".to_string(),
            "a?x".to_string(),
            "b!c!/src/file.txt?q".to_string(),
            "a?x!b!c!/src/file.txt?q".to_string(),
        ))
    );
}

#[tokio::test]
async fn resolution_failure_marks_run_uncacheable() {
    let log = Log::default();
    let registry = recording(LoaderRegistry::new(), "known", &log);
    let options = RunOptions::builder()
        .loaders(["known", "unknown"])
        .module_loader(registry)
        .build();

    let failure = run_loaders(options).await.expect_err("resolution fails");
    assert!(matches!(
        failure.error,
        LoaderError::Resolve { ref loader, .. } if loader == "unknown"
    ));
    assert!(!failure.dependencies.cacheable);
    assert_eq!(events(&log), vec!["pitch known"]);
}

#[tokio::test]
async fn hook_error_aborts_remaining_hooks() {
    let log = Log::default();
    let registry = recording(LoaderRegistry::new(), "outer", &log).with_normal("inner", |ctx, _| {
        ctx.cacheable(false);
        Err(LoaderError::message("inner exploded"))
    });
    let options = RunOptions::builder()
        .resource("a.txt".to_string())
        .loaders(["outer", "inner"])
        .reader(MemoryResourceReader::new().with_file("a.txt", "x"))
        .module_loader(registry)
        .build();

    let failure = run_loaders(options).await.expect_err("hook fails");
    assert_eq!(failure.to_string(), "inner exploded");
    assert_eq!(events(&log), vec!["pitch outer"]);
    assert!(!failure.dependencies.cacheable);
    assert_eq!(
        failure.dependencies.file_dependencies,
        vec!["a.txt".to_string()]
    );
}

#[tokio::test]
async fn structured_options_reach_hooks_as_query() {
    let registry = LoaderRegistry::new().with_normal("opts", |ctx, _| {
        let value = match ctx.query() {
            Some(LoaderQuery::Options(options)) => options,
            other => json!(format!("{other:?}")),
        };
        Ok(HookReturn::Value(Value::Json(value)))
    });
    let options = RunOptions::builder()
        .loader(LoaderReference::new("opts").with_options(json!({ "x": 1 })))
        .module_loader(registry)
        .build();

    let output = run_loaders(options).await.expect("run succeeds");
    assert_eq!(output.result, vec![Some(Value::Json(json!({ "x": 1 })))]);
}

#[tokio::test]
async fn extensions_and_dependency_clearing_are_visible_to_hooks() {
    let registry = LoaderRegistry::new().with_normal("env", |ctx, _| {
        ctx.add_dependency("extra.txt");
        ctx.cacheable(false);
        ctx.clear_dependencies();
        ctx.add_missing_dependency("later.txt");
        let mode = ctx.value("mode").unwrap_or_default();
        Ok(HookReturn::Value(Value::Json(mode)))
    });
    let options = RunOptions::builder()
        .loader("env")
        .extensions(ContextExtensions::new().with_value("mode", json!("production")))
        .module_loader(registry)
        .build();

    let output = run_loaders(options).await.expect("run succeeds");
    assert_eq!(output.result, vec![Some(Value::Json(json!("production")))]);
    assert!(output.dependencies.cacheable);
    assert!(output.dependencies.file_dependencies.is_empty());
    assert_eq!(
        output.dependencies.missing_dependencies,
        vec!["later.txt".to_string()]
    );
}

#[tokio::test]
async fn overwritten_values_are_returned_to_the_caller() {
    let registry = LoaderRegistry::new()
        .with_normal("switch-mode", |ctx, args| {
            ctx.set_value("mode", json!("development"))?;
            Ok(first(args))
        })
        .with_normal("fail", |_, _| Err(LoaderError::message("after overwrite")));
    let extensions = || ContextExtensions::new().with_value("mode", json!("production"));

    let options = RunOptions::builder()
        .loader("switch-mode")
        .extensions(extensions())
        .module_loader(registry.clone())
        .build();
    let output = run_loaders(options).await.expect("run succeeds");
    assert_eq!(output.values["mode"], json!("development"));

    let options = RunOptions::builder()
        .loaders(["fail", "switch-mode"])
        .extensions(extensions())
        .module_loader(registry)
        .build();
    let failure = run_loaders(options).await.expect_err("run fails");
    assert_eq!(failure.to_string(), "after overwrite");
    assert_eq!(failure.values["mode"], json!("development"));
}

#[tokio::test]
async fn invalid_loader_entry_fails_before_running() {
    let options = RunOptions::builder()
        .loader(LoaderReference::new(""))
        .build();

    let failure = run_loaders(options).await.expect_err("entry rejected");
    assert!(matches!(failure.error, LoaderError::InvalidRequest(_)));
    assert!(failure.dependencies.cacheable);
}

#[tokio::test]
async fn empty_chain_passes_resource_bytes_through() {
    let options = RunOptions::builder()
        .resource("a.bin".to_string())
        .reader(MemoryResourceReader::new().with_file("a.bin", vec![0_u8, 1, 2]))
        .build();

    let output = run_loaders(options).await.expect("run succeeds");
    assert_eq!(
        output.result,
        vec![Some(Value::Binary(Bytes::from_static(&[0, 1, 2])))]
    );
    let manifest = serde_json::to_value(&output).expect("serialize output");
    assert_eq!(manifest["resourceBuffer"], json!("AAEC"));
    assert_eq!(manifest["fileDependencies"], json!(["a.bin"]));
}
