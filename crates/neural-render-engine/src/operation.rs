use std::fmt;
use std::path::{Path, PathBuf};

use neural_render_contracts::events::{EventPayload, EventWriter};
use neural_render_contracts::models::{AiModel, ModelRegistry, ModelSelector, CLARITY_UPSCALER};
use neural_render_contracts::output::OutputFormat;
use serde_json::{json, Value};

use crate::binding::{build_payload, build_upscale_payload, ParameterValues, PayloadImages};
use crate::capture::{CaptureFile, FrameSource};
use crate::error::{CleanupWarning, OperationError};
use crate::persist::{output_path, persist, ResultFetcher};
use crate::replicate::InferenceClient;
use crate::resolve::resolve_output;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvocationMode {
    /// Process a render with the selected model.
    #[default]
    Ai,
    /// Upscale an existing image with Clarity Upscaler.
    Upscale,
}

impl InvocationMode {
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Upscale => "upscaled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Authenticating,
    Capturing,
    BuildingPayload,
    Invoking,
    ResolvingResponse,
    Downloading,
    Persisted,
    Failed(String),
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Authenticating => "authenticating",
            Self::Capturing => "capturing",
            Self::BuildingPayload => "building_payload",
            Self::Invoking => "invoking",
            Self::ResolvingResponse => "resolving_response",
            Self::Downloading => "downloading",
            Self::Persisted => "persisted",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Persisted | Self::Failed(_))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Everything one operation needs; the host fills it from its own state.
#[derive(Debug, Clone, Default)]
pub struct OperationConfig {
    pub api_key: Option<String>,
    pub mode: InvocationMode,
    /// Ignored in [`InvocationMode::Upscale`].
    pub model: Option<String>,
    pub output_format: Option<OutputFormat>,
    pub values: ParameterValues,
    /// Names the output file and anchors its directory.
    pub source_path: PathBuf,
    pub control_image: Option<PathBuf>,
    pub mask: Option<String>,
    pub project_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct OperationReport {
    pub stage: Stage,
    pub trail: Vec<Stage>,
    pub model: Option<String>,
    pub result: Result<PathBuf, OperationError>,
    pub cleanup_warning: Option<CleanupWarning>,
}

impl OperationReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.result.as_ref().ok().map(PathBuf::as_path)
    }
}

/// Runs capture, inference and download for one user action.
pub struct Operation<'a> {
    selector: ModelSelector,
    client: &'a dyn InferenceClient,
    fetcher: &'a dyn ResultFetcher,
    events: Option<EventWriter>,
}

impl<'a> Operation<'a> {
    pub fn new(client: &'a dyn InferenceClient, fetcher: &'a dyn ResultFetcher) -> Self {
        Self {
            selector: ModelSelector::default(),
            client,
            fetcher,
            events: None,
        }
    }

    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.selector = ModelSelector::new(Some(registry));
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn run(&self, config: &OperationConfig, frame: &dyn FrameSource) -> OperationReport {
        let mut progress = Progress::new(self.events.as_ref());
        progress.enter(
            Stage::Authenticating,
            json!({"mode": config.mode.suffix(), "source": config.source_path.display().to_string()}),
        );

        let (api_key, model) = match self.prepare(config) {
            Ok(prepared) => prepared,
            Err(err) => return progress.finish(None, Err(err), None),
        };

        progress.enter(
            Stage::Capturing,
            json!({"model": model.name, "frame": frame.describe()}),
        );
        let capture = match CaptureFile::create() {
            Ok(capture) => capture,
            Err(err) => return progress.finish(Some(&model), Err(err), None),
        };
        let result = self.process(&mut progress, config, frame, &model, &api_key, &capture);
        let cleanup_warning = capture.release();
        progress.finish(Some(&model), result, cleanup_warning)
    }

    /// Credential and model checks, before any file is written.
    fn prepare(&self, config: &OperationConfig) -> Result<(String, AiModel), OperationError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(OperationError::Auth)?
            .to_string();
        let requested = match config.mode {
            InvocationMode::Ai => config.model.as_deref(),
            InvocationMode::Upscale => Some(CLARITY_UPSCALER),
        };
        let selection = self.selector.select(requested)?;
        Ok((api_key, selection.model))
    }

    fn process(
        &self,
        progress: &mut Progress<'_>,
        config: &OperationConfig,
        frame: &dyn FrameSource,
        model: &AiModel,
        api_key: &str,
        capture: &CaptureFile,
    ) -> Result<PathBuf, OperationError> {
        capture.fill_from(frame)?;

        progress.enter(Stage::BuildingPayload, json!({"model": model.name}));
        let images = PayloadImages {
            image: capture.path().to_path_buf(),
            control_image: config.control_image.clone(),
            mask: config.mask.clone(),
        };
        let payload = match config.mode {
            InvocationMode::Ai => build_payload(model, &config.values, &images)?,
            InvocationMode::Upscale => build_upscale_payload(model, &config.values, &images)?,
        };

        progress.enter(
            Stage::Invoking,
            json!({
                "model": model.name,
                "remote_id": model.remote_id,
                "input": Value::Object(payload.params_json()),
                "attachments": payload.attachments.keys().collect::<Vec<&String>>(),
            }),
        );
        let result = self.client.invoke(&model.remote_id, &payload, api_key)?;

        progress.enter(
            Stage::ResolvingResponse,
            json!({"outputs": result.len(), "family": model.family.as_str()}),
        );
        let url = resolve_output(model, &result)?;

        let format = output_format(model, config);
        let target = output_path(
            &config.source_path,
            config.mode.suffix(),
            format,
            config.project_dir.as_deref(),
        );
        progress.enter(
            Stage::Downloading,
            json!({"url": url, "target": target.display().to_string()}),
        );
        persist(self.fetcher, url, &target)
    }
}

/// The bound `output_format` when the request carries one, else the configured format.
fn output_format(model: &AiModel, config: &OperationConfig) -> OutputFormat {
    let bound = match config.mode {
        InvocationMode::Ai if model.declares("output_format") => config
            .values
            .get("output_format")
            .and_then(|value| value.as_str())
            .and_then(|raw| raw.parse::<OutputFormat>().ok()),
        _ => None,
    };
    bound.or(config.output_format).unwrap_or_default()
}

struct Progress<'w> {
    stage: Stage,
    trail: Vec<Stage>,
    events: Option<&'w EventWriter>,
}

impl<'w> Progress<'w> {
    fn new(events: Option<&'w EventWriter>) -> Self {
        Self {
            stage: Stage::Idle,
            trail: vec![Stage::Idle],
            events,
        }
    }

    fn enter(&mut self, stage: Stage, detail: Value) {
        tracing::debug!(from = %self.stage, to = %stage, "operation stage");
        let mut payload = EventPayload::new();
        payload.insert("stage".to_string(), Value::String(stage.as_str().to_string()));
        if let Value::Object(detail) = detail {
            payload.extend(detail);
        }
        self.emit("stage_entered", payload);
        self.trail.push(stage.clone());
        self.stage = stage;
    }

    fn finish(
        mut self,
        model: Option<&AiModel>,
        result: Result<PathBuf, OperationError>,
        cleanup_warning: Option<CleanupWarning>,
    ) -> OperationReport {
        if let Some(warning) = &cleanup_warning {
            tracing::warn!(%warning, "temporary capture not removed");
            let mut payload = EventPayload::new();
            payload.insert("message".to_string(), Value::String(warning.to_string()));
            self.emit("cleanup_warning", payload);
        }

        let terminal = match &result {
            Ok(path) => {
                let mut payload = EventPayload::new();
                payload.insert(
                    "output_path".to_string(),
                    Value::String(path.display().to_string()),
                );
                self.emit("operation_succeeded", payload);
                Stage::Persisted
            }
            Err(err) => {
                tracing::debug!(stage = %self.stage, kind = err.kind(), "operation failed");
                let mut payload = EventPayload::new();
                payload.insert("failed_stage".to_string(), json!(self.stage.as_str()));
                payload.insert("kind".to_string(), json!(err.kind()));
                payload.insert("message".to_string(), json!(err.to_string()));
                self.emit("operation_failed", payload);
                Stage::Failed(err.to_string())
            }
        };
        self.trail.push(terminal.clone());

        OperationReport {
            stage: terminal,
            trail: self.trail,
            model: model.map(|model| model.name.clone()),
            result,
            cleanup_warning,
        }
    }

    fn emit(&self, event_type: &str, payload: EventPayload) {
        let Some(events) = self.events else {
            return;
        };
        if let Err(err) = events.emit(event_type, payload) {
            tracing::warn!(error = %err, path = %events.path().display(), "failed writing operation event");
        }
    }
}
