use std::path::PathBuf;

use indexmap::IndexMap;
use neural_render_contracts::models::{AiModel, ModelParameter, ParamValue, ParameterError};
use serde_json::{Map, Value};

use crate::error::OperationError;

/// Clarity Upscaler parameters bound when upscaling an existing image.
pub const UPSCALE_PARAMETERS: [&str; 9] = [
    "scale_factor",
    "prompt",
    "negative_prompt",
    "seed",
    "num_inference_steps",
    "scheduler",
    "dynamic",
    "creativity",
    "resemblance",
];

/// Current user-editable values, addressed by parameter name.
pub trait ParameterSource {
    fn value(&self, name: &str) -> Option<&ParamValue>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterValues {
    values: IndexMap<String, ParamValue>,
}

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every editable parameter of `model` set to its declared default.
    pub fn defaults_for(model: &AiModel) -> Self {
        Self {
            values: model
                .editable_parameters()
                .map(|parameter| (parameter.name.clone(), parameter.default.clone()))
                .collect(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    /// Parses `raw` per the declaration of `name` and stores it.
    pub fn assign_raw(
        &mut self,
        model: &AiModel,
        name: &str,
        raw: &str,
    ) -> Result<(), ParameterError> {
        let value = model.editable(name)?.parse_value(raw)?;
        self.set(name, value);
        Ok(())
    }

    /// Overlays a JSON object of `name -> value` (settings file shape).
    pub fn merge_json(
        &mut self,
        model: &AiModel,
        overrides: &Map<String, Value>,
    ) -> Result<(), ParameterError> {
        for (name, raw) in overrides {
            let value = model.editable(name)?.value_from_json(raw)?;
            self.set(name.clone(), value);
        }
        Ok(())
    }
}

impl ParameterSource for ParameterValues {
    fn value(&self, name: &str) -> Option<&ParamValue> {
        self.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    File(PathBuf),
    Url(String),
}

/// Binary inputs attached at build time, never stored in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadImages {
    pub image: PathBuf,
    pub control_image: Option<PathBuf>,
    pub mask: Option<String>,
}

impl PayloadImages {
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            control_image: None,
            mask: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestPayload {
    pub params: IndexMap<String, Value>,
    pub attachments: IndexMap<String, Attachment>,
}

impl RequestPayload {
    /// Parameter values only, safe to log.
    pub fn params_json(&self) -> Map<String, Value> {
        self.params
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

pub fn build_payload(
    model: &AiModel,
    source: &impl ParameterSource,
    images: &PayloadImages,
) -> Result<RequestPayload, OperationError> {
    bind(model, model.editable_parameters(), source, images)
}

/// Binds only [`UPSCALE_PARAMETERS`], in the model's declaration order.
pub fn build_upscale_payload(
    model: &AiModel,
    source: &impl ParameterSource,
    images: &PayloadImages,
) -> Result<RequestPayload, OperationError> {
    let parameters = model
        .editable_parameters()
        .filter(|parameter| UPSCALE_PARAMETERS.contains(&parameter.name.as_str()));
    bind(model, parameters, source, images)
}

fn bind<'a>(
    model: &AiModel,
    parameters: impl Iterator<Item = &'a ModelParameter>,
    source: &impl ParameterSource,
    images: &PayloadImages,
) -> Result<RequestPayload, OperationError> {
    let mut payload = RequestPayload::default();
    for parameter in parameters {
        let value = source
            .value(&parameter.name)
            .ok_or_else(|| OperationError::MissingBinding {
                model: model.name.clone(),
                parameter: parameter.name.clone(),
            })?;
        parameter.check(value)?;
        payload
            .params
            .insert(parameter.name.clone(), parameter.wire_value(value));
    }

    payload
        .attachments
        .insert("image".to_string(), Attachment::File(images.image.clone()));
    if model.family.requires_control_image() {
        let control = images
            .control_image
            .clone()
            .unwrap_or_else(|| images.image.clone());
        payload
            .attachments
            .insert("control_image".to_string(), Attachment::File(control));
    }
    if let Some(mask) = images.mask.as_ref().filter(|_| model.declares("mask")) {
        payload
            .attachments
            .insert("mask".to_string(), Attachment::Url(mask.clone()));
    }
    Ok(payload)
}
