use std::env;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{Map, Value};

use crate::binding::{Attachment, RequestPayload};
use crate::error::OperationError;
use crate::resolve::InferenceResult;

pub const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";
const DEFAULT_POLL_INTERVAL_S: f64 = 1.0;

/// One blocking remote inference call.
pub trait InferenceClient {
    fn invoke(
        &self,
        remote_id: &str,
        payload: &RequestPayload,
        api_key: &str,
    ) -> Result<InferenceResult, OperationError>;
}

#[derive(Debug, Clone)]
pub struct ReplicateClient {
    api_base: String,
    poll_interval: Duration,
    http: HttpClient,
}

impl Default for ReplicateClient {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ReplicateClient {
    /// `api_base` wins over `REPLICATE_API_BASE`, which wins over the public API.
    pub fn new(api_base: Option<&str>) -> Self {
        Self::with_http_client(api_base, HttpClient::new())
    }

    pub fn with_http_client(api_base: Option<&str>, http: HttpClient) -> Self {
        let api_base = api_base
            .map(str::to_string)
            .or_else(|| env::var("REPLICATE_API_BASE").ok())
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self {
            api_base,
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_S),
            http,
        }
    }

    pub fn with_poll_interval(mut self, seconds: f64) -> Self {
        let seconds = if seconds.is_finite() {
            seconds.clamp(0.2, 5.0)
        } else {
            DEFAULT_POLL_INTERVAL_S
        };
        self.poll_interval = Duration::from_secs_f64(seconds);
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Versioned ids (`owner/name:version`) go to `/predictions`; bare model
    /// ids go to the model's own predictions endpoint.
    pub fn endpoint_for(&self, remote_id: &str) -> String {
        match remote_id.split_once(':') {
            Some(_) => format!("{}/predictions", self.api_base),
            None => format!("{}/models/{}/predictions", self.api_base, remote_id.trim()),
        }
    }

    pub fn request_body(remote_id: &str, payload: &RequestPayload) -> Result<Value> {
        let mut input = payload.params_json();
        for (field, attachment) in &payload.attachments {
            input.insert(field.clone(), attachment_value(attachment)?);
        }
        let mut body = Map::new();
        if let Some((_, version)) = remote_id.split_once(':') {
            body.insert("version".to_string(), Value::String(version.trim().to_string()));
        }
        body.insert("input".to_string(), Value::Object(input));
        Ok(Value::Object(body))
    }

    fn run(&self, remote_id: &str, payload: &RequestPayload, api_key: &str) -> Result<InferenceResult> {
        let endpoint = self.endpoint_for(remote_id);
        let body = Self::request_body(remote_id, payload)?;
        tracing::info!(%endpoint, model = remote_id, "creating Replicate prediction");

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .with_context(|| format!("Replicate request failed ({endpoint})"))?;
        let mut prediction = response_json_or_error("Replicate", response)?;

        let mut poll_url: Option<String> = None;
        loop {
            let status = prediction_status(&prediction);
            match status.as_str() {
                "succeeded" => break,
                "starting" | "processing" => {
                    poll_url = prediction_poll_url(&prediction).or(poll_url);
                    let Some(url) = poll_url.as_deref() else {
                        bail!("Replicate prediction is {status} but has no poll URL");
                    };
                    thread::sleep(self.poll_interval);
                    prediction = self.fetch_prediction(url, api_key)?;
                    tracing::debug!(status = %prediction_status(&prediction), "polled Replicate prediction");
                }
                "failed" | "canceled" => {
                    bail!("Replicate prediction {status}: {}", prediction_error(&prediction))
                }
                "" => bail!(
                    "Replicate prediction has no status: {}",
                    truncate_text(&prediction.to_string(), 512)
                ),
                other => bail!(
                    "Replicate prediction has unexpected status '{other}': {}",
                    truncate_text(&prediction.to_string(), 512)
                ),
            }
        }

        let output = prediction.get("output").unwrap_or(&Value::Null);
        InferenceResult::from_output(output).context("Replicate returned a malformed prediction")
    }

    fn fetch_prediction(&self, poll_url: &str, api_key: &str) -> Result<Value> {
        let response = self
            .http
            .get(poll_url)
            .bearer_auth(api_key)
            .send()
            .with_context(|| format!("Replicate poll request failed ({poll_url})"))?;
        response_json_or_error("Replicate poll", response)
    }
}

impl InferenceClient for ReplicateClient {
    fn invoke(
        &self,
        remote_id: &str,
        payload: &RequestPayload,
        api_key: &str,
    ) -> Result<InferenceResult, OperationError> {
        self.run(remote_id, payload, api_key)
            .map_err(OperationError::Remote)
    }
}

fn prediction_status(prediction: &Value) -> String {
    prediction
        .get("status")
        .and_then(Value::as_str)
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default()
}

fn prediction_poll_url(prediction: &Value) -> Option<String> {
    prediction
        .get("urls")
        .and_then(|urls| urls.get("get"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn prediction_error(prediction: &Value) -> String {
    match prediction.get("error") {
        Some(Value::String(message)) if !message.trim().is_empty() => message.clone(),
        _ => truncate_text(&prediction.to_string(), 512),
    }
}

fn attachment_value(attachment: &Attachment) -> Result<Value> {
    match attachment {
        Attachment::Url(url) => Ok(Value::String(url.clone())),
        Attachment::File(path) => Ok(Value::String(path_to_data_url(path)?)),
    }
}

fn path_to_data_url(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let mime = mime_for_path(path).unwrap_or("image/png");
    Ok(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
