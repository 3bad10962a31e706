use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use neural_render_contracts::events::EventWriter;
use neural_render_contracts::models::{
    AiModel, ModelParameter, ModelRegistry, ModelSelector, ParamValue, CLARITY_UPSCALER,
};
use neural_render_contracts::output::OutputFormat;
use neural_render_contracts::settings::Settings;
use neural_render_engine::{
    HttpFetcher, ImageFileSource, InvocationMode, Operation, OperationConfig, ParameterValues,
    ReplicateClient,
};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "NEURAL_RENDER_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "neural-render",
    version,
    about = "Process rendered frames with Replicate image-to-image models"
)]
struct Cli {
    /// Log progress to stderr at info level.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the registered models.
    Models(ModelsArgs),
    /// Show the editable parameters of one model.
    Describe(DescribeArgs),
    /// Send an image through a model and save the result next to it.
    Process(ProcessArgs),
}

#[derive(Debug, Parser)]
struct ModelsArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct DescribeArgs {
    model: String,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ProcessArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    model: Option<String>,
    /// Run Clarity Upscaler on the image instead of the selected model.
    #[arg(long)]
    upscale: bool,
    /// Override one parameter, e.g. `--set steps=30`.
    #[arg(long = "set", value_name = "NAME=VALUE")]
    assignments: Vec<String>,
    #[arg(long)]
    control_image: Option<PathBuf>,
    #[arg(long)]
    mask: Option<String>,
    #[arg(long)]
    output_format: Option<OutputFormat>,
    #[arg(long)]
    project_dir: Option<PathBuf>,
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    api_base: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("neural-render error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let registry = ModelRegistry::default();
    match cli.command {
        Command::Models(args) => run_models(&registry, args),
        Command::Describe(args) => run_describe(&registry, args),
        Command::Process(args) => run_process(registry, args),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_models(registry: &ModelRegistry, args: ModelsArgs) -> Result<i32> {
    if args.json {
        let models = registry.list().map(model_json).collect::<Vec<Value>>();
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(0);
    }
    for model in registry.list() {
        println!("{:<20} {:<18} {}", model.name, model.provider, model.description);
    }
    Ok(0)
}

fn run_describe(registry: &ModelRegistry, args: DescribeArgs) -> Result<i32> {
    let model = registry.find(&args.model)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&model_json(model))?);
        return Ok(0);
    }
    println!("{} ({})", model.name, model.remote_id);
    println!("{}", model.description);
    for parameter in model.editable_parameters() {
        println!(
            "  {:<24} {:<6} default={:<12} {}",
            parameter.name,
            parameter.kind,
            parameter.default.to_string(),
            constraint_label(parameter)
        );
    }
    Ok(0)
}

fn run_process(registry: ModelRegistry, args: ProcessArgs) -> Result<i32> {
    let settings = match &args.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let mode = if args.upscale {
        InvocationMode::Upscale
    } else {
        InvocationMode::Ai
    };
    let requested = match mode {
        InvocationMode::Ai => args.model.clone().or_else(|| settings.model.clone()),
        InvocationMode::Upscale => Some(CLARITY_UPSCALER.to_string()),
    };
    let output_format = args.output_format.or(settings.output_format);

    // An unknown model is reported by the operation itself, after the credential check.
    let values = match ModelSelector::new(Some(registry.clone())).select(requested.as_deref()) {
        Ok(selection) => bind_values(&selection.model, &settings, output_format, &args.assignments)?,
        Err(_) => ParameterValues::new(),
    };

    let mut client = ReplicateClient::new(args.api_base.as_deref().or(settings.api_base.as_deref()));
    if let Some(seconds) = settings.poll_interval {
        client = client.with_poll_interval(seconds);
    }
    let fetcher = HttpFetcher::new();
    let mut operation = Operation::new(&client, &fetcher).with_registry(registry);
    if let Some(path) = args.events.clone().or_else(|| settings.events.clone()) {
        let events = EventWriter::for_new_operation(path);
        tracing::info!(operation_id = events.operation_id(), path = %events.path().display(), "writing operation events");
        operation = operation.with_events(events);
    }

    let config = OperationConfig {
        api_key: settings.resolve_api_key(),
        mode,
        model: requested,
        output_format,
        values,
        source_path: args.image.clone(),
        control_image: args.control_image.clone(),
        mask: args.mask.clone(),
        project_dir: args.project_dir.clone().or_else(|| settings.project_dir.clone()),
    };
    let frame = ImageFileSource::new(&args.image);
    let report = operation.run(&config, &frame);

    if let Some(warning) = &report.cleanup_warning {
        eprintln!("warning: {warning}");
    }
    let path = report.result?;
    println!("Processed image saved: {}", path.display());
    Ok(0)
}

/// Defaults, then the settings file, then `--output-format`, then `--set` overrides.
fn bind_values(
    model: &AiModel,
    settings: &Settings,
    output_format: Option<OutputFormat>,
    assignments: &[String],
) -> Result<ParameterValues> {
    let mut values = ParameterValues::defaults_for(model);
    if let Some(overrides) = settings.parameters_for(&model.name) {
        values
            .merge_json(model, overrides)
            .with_context(|| format!("invalid settings parameters for {}", model.name))?;
    }
    if let Some(format) = output_format.filter(|_| model.declares("output_format")) {
        values.set("output_format", ParamValue::Text(format.extension().to_string()));
    }
    for raw in assignments {
        let (name, value) = parse_assignment(raw)?;
        values
            .assign_raw(model, name, value)
            .with_context(|| format!("invalid --set {raw}"))?;
    }
    Ok(values)
}

fn parse_assignment(raw: &str) -> Result<(&str, &str)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected NAME=VALUE, got '{raw}'");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("expected NAME=VALUE, got '{raw}'");
    }
    Ok((name, value.trim()))
}

fn constraint_label(parameter: &ModelParameter) -> String {
    if !parameter.options.is_empty() {
        return format!("one of: {}", parameter.options.join(", "));
    }
    match parameter.bounds {
        Some((min, max)) => format!("range {min}..={max}"),
        None => String::new(),
    }
}

fn model_json(model: &AiModel) -> Value {
    let parameters = model
        .editable_parameters()
        .map(|parameter| {
            let mut entry = json!({
                "name": parameter.name,
                "kind": parameter.kind.as_str(),
                "default": parameter.default.to_json(),
                "description": parameter.description,
            });
            if let Some((min, max)) = parameter.bounds {
                entry["min"] = json!(min);
                entry["max"] = json!(max);
            }
            if !parameter.options.is_empty() {
                entry["options"] = json!(parameter.options);
            }
            entry
        })
        .collect::<Vec<Value>>();
    json!({
        "name": model.name,
        "provider": model.provider,
        "remote_id": model.remote_id,
        "description": model.description,
        "family": model.family.as_str(),
        "parameters": parameters,
    })
}
