use anyhow::bail;
use neural_render_contracts::models::{AiModel, ModelFamily};
use serde_json::Value;

use crate::error::OperationError;

/// Output of one prediction: a lone URL or an ordered list of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceResult {
    Single(String),
    Many(Vec<String>),
}

impl InferenceResult {
    pub fn from_output(output: &Value) -> anyhow::Result<Self> {
        match output {
            Value::String(url) => Ok(Self::Single(url.clone())),
            Value::Array(rows) => rows
                .iter()
                .map(|row| match row {
                    Value::String(url) => Ok(url.clone()),
                    other => Err(anyhow::anyhow!("unexpected output element: {other}")),
                })
                .collect::<anyhow::Result<Vec<String>>>()
                .map(Self::Many),
            Value::Null => bail!("prediction finished without output"),
            other => bail!("unexpected prediction output: {other}"),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Many(urls) => urls.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn resolve(family: ModelFamily, result: &InferenceResult) -> Option<&str> {
    match result {
        InferenceResult::Single(url) => Some(url.as_str()),
        InferenceResult::Many(urls) => match family {
            ModelFamily::ControlNet => control_net_output(urls),
            ModelFamily::Upscaler | ModelFamily::FluxControlNet => first_output(urls),
        },
    }
}

// Control Net returns the detected control map first and the generated image second.
fn control_net_output(urls: &[String]) -> Option<&str> {
    urls.get(1).map(String::as_str)
}

fn first_output(urls: &[String]) -> Option<&str> {
    urls.first().map(String::as_str)
}

/// Like [`resolve`], but an empty resolution is a `NoOutput` failure.
pub fn resolve_output<'a>(
    model: &AiModel,
    result: &'a InferenceResult,
) -> Result<&'a str, OperationError> {
    resolve(model.family, result)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| OperationError::NoOutput {
            model: model.name.clone(),
        })
}
