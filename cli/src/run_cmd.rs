use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::ValueEnum;
use loader_runner::RunConfig;
use loader_runner::RunOptions;
use loader_runner::RunOutput;
use loader_runner::Value;
use loader_runner::run_loaders;
use loader_runner::utf8_to_string;
use owo_colors::OwoColorize;
use serde_json::to_string_pretty;

use crate::builtin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// The first result value only
    Text,
    /// The full manifest: result, resource bytes, dependencies
    Json,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Resource to run the chain over (`path?query`).
    pub resource: Option<String>,

    /// Loader request, e.g. `banner?hello`. Repeat to build a chain; the
    /// first loader's normal hook runs last.
    #[arg(short = 'l', long = "loader")]
    pub loaders: Vec<String>,

    /// YAML or JSON file providing `resource` and `loaders`. Flags given on
    /// the command line take precedence.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

pub async fn run(args: RunArgs) -> Result<ExitCode> {
    let RunArgs {
        resource,
        loaders,
        config,
        format,
    } = args;

    let mut builder = RunOptions::builder().module_loader(builtin::registry());
    if let Some(path) = config {
        let config = RunConfig::load(&path)
            .await
            .with_context(|| format!("loading {}", path.display()))?;
        builder = builder.config(config);
    }
    if let Some(resource) = resource {
        builder = builder.resource(resource);
    }
    if !loaders.is_empty() {
        builder = builder.loaders(loaders);
    }

    match run_loaders(builder.build()).await {
        Ok(output) => {
            print_output(&output, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            eprintln!("{} {}", "error:".red(), failure.error);
            eprintln!("{}", to_string_pretty(&failure.dependencies)?);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_output(output: &RunOutput, format: OutputFormat) -> Result<()> {
    for diagnostic in &output.diagnostics {
        eprintln!("{} {}", "warning:".yellow(), diagnostic.message);
    }
    match format {
        OutputFormat::Json => println!("{}", to_string_pretty(output)?),
        OutputFormat::Text => match output.result.first().cloned().flatten() {
            Some(Value::Text(text)) => println!("{text}"),
            Some(Value::Binary(bytes)) => println!("{}", utf8_to_string(&bytes)),
            Some(Value::Json(value)) => println!("{}", to_string_pretty(&value)?),
            Some(Value::Null) | None => {}
        },
    }
    Ok(())
}

pub fn list() {
    println!("Built-in loaders:\n");
    for (name, description) in builtin::BUILTINS {
        let mut line = String::new();
        let _ = write!(line, "- {}", name.green());
        let _ = write!(line, ": {description}");
        println!("{line}");
    }
}
